//! Private choice of higher-order marginals. Non-target attributes are
//! joined into a spanning tree whose edges are drawn one at a time with the
//! exponential mechanism, scored by how badly the independence model built
//! from the noisy 1-way estimates fits each pair. Every chosen pair is
//! extended with the targets.

use rand::{
    distributions::{Distribution, WeightedIndex},
    Rng,
};
use tracing::{debug, info};

use crate::{
    accountant::PrivacyAccountant,
    domain::{Dataset, Domain, Marginal, SchemaError},
    errors::AdagridResult,
    grid::OneWayEstimate,
    measurement::MeasurementLog,
};

/// Index drawn with probability proportional to
/// `exp(epsilon * (q - max q) / (2 * sensitivity))`. `None` when no score is
/// finite.
pub fn exponential_mechanism<R>(scores: &[f64], epsilon: f64, sensitivity: f64, rng: &mut R) -> Option<usize>
where
    R: Rng + ?Sized,
{
    let best = scores
        .iter()
        .copied()
        .filter(|q| q.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);
    if !best.is_finite() {
        return None;
    }
    let coef = (epsilon / (2.0 * sensitivity)).min(f64::MAX);
    let weights: Vec<f64> = scores
        .iter()
        .map(|q| if q.is_finite() { (coef * (q - best)).exp() } else { 0.0 })
        .collect();
    WeightedIndex::new(&weights).ok().map(|index| index.sample(rng))
}

/// Expected counts of `marginal` over the current bins if its attributes were
/// independent, scaled to the noisy record estimate. Same layout as
/// [`Dataset::project`].
pub fn independent_projection(
    domain: &Domain,
    log: &MeasurementLog,
    marginal: &Marginal,
) -> Result<Vec<f64>, SchemaError> {
    let records = log.estimated_records().unwrap_or(0.0).max(0.0);
    let mut expected = vec![records];
    for name in marginal.attributes() {
        let partition = domain.partition(name)?;
        let widths: Vec<f64> = partition.widths().into_iter().map(|w| w as f64).collect();
        let mut weights = OneWayEstimate::from_log(log, name, partition)
            .map(|estimate| estimate.counts.iter().map(|c| c.max(0.0)).collect::<Vec<_>>())
            .unwrap_or_else(|| widths.clone());
        let mut total: f64 = weights.iter().sum();
        if total <= 0.0 {
            total = widths.iter().sum();
            weights = widths;
        }
        expected = expected
            .iter()
            .flat_map(|prefix| weights.iter().map(move |w| prefix * w / total))
            .collect();
    }
    Ok(expected)
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, mut node: usize) -> usize {
        while self.parent[node] != node {
            self.parent[node] = self.parent[self.parent[node]];
            node = self.parent[node];
        }
        node
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a != b {
            self.parent[b] = a;
        }
    }
}

/// Spanning-tree selection over the live non-target attributes.
#[derive(Clone, Copy, Debug)]
pub struct TreeSelector<'a> {
    pub targets: &'a [String],
    pub max_order: usize,
    pub max_cells: usize,
    /// Draws cheaper than this are not worth making.
    pub min_rho: f64,
}

impl<'a> TreeSelector<'a> {
    /// Spends at most `rho`, split evenly over one draw per tree edge, and
    /// returns the chosen marginals in draw order. Returns nothing and spends
    /// nothing when fewer than two attributes can be joined or a draw would
    /// cost less than `min_rho`.
    pub fn select<R>(
        &self,
        data: &Dataset,
        domain: &Domain,
        log: &MeasurementLog,
        rho: f64,
        accountant: &mut PrivacyAccountant,
        rng: &mut R,
    ) -> AdagridResult<Vec<Marginal>>
    where
        R: Rng + ?Sized,
    {
        let nodes: Vec<&str> = domain
            .attributes()
            .iter()
            .filter(|attr| !attr.partition.is_collapsed() && !self.targets.contains(&attr.name))
            .map(|attr| attr.name.as_str())
            .collect();
        if nodes.len() < 2 {
            return Ok(Vec::new());
        }
        let mut edges = Vec::new();
        for a in 0..nodes.len() {
            for b in a + 1..nodes.len() {
                let marginal = Marginal::new(
                    [nodes[a], nodes[b]]
                        .into_iter()
                        .chain(self.targets.iter().map(String::as_str)),
                );
                if marginal.order() > self.max_order {
                    continue;
                }
                match domain.cells(&marginal)? {
                    Some(cells) if cells <= self.max_cells => {}
                    _ => continue,
                }
                // Sensitivity 1: one record moves one true cell by one.
                let truth = data.project(&marginal, domain)?;
                let model = independent_projection(domain, log, &marginal)?;
                let score: f64 = truth.iter().zip(&model).map(|(x, y)| (x - y).abs()).sum();
                edges.push((a, b, marginal, score));
            }
        }
        if edges.is_empty() {
            return Ok(Vec::new());
        }
        let draws = nodes.len() - 1;
        let per_draw = rho.min(accountant.remaining()) / draws as f64;
        if per_draw < self.min_rho {
            debug!(per_draw, draws, "selection draw below minimum increment, skipped");
            return Ok(Vec::new());
        }
        let mut forest = DisjointSet::new(nodes.len());
        let mut chosen = Vec::with_capacity(draws);
        for _ in 0..draws {
            let open: Vec<usize> = (0..edges.len())
                .filter(|&i| forest.find(edges[i].0) != forest.find(edges[i].1))
                .collect();
            if open.is_empty() {
                break;
            }
            let scores: Vec<f64> = open.iter().map(|&i| edges[i].3).collect();
            let epsilon = accountant.allocate_selection(per_draw)?;
            let Some(pick) = exponential_mechanism(&scores, epsilon, 1.0, rng) else {
                break;
            };
            let (a, b, marginal, score) = &edges[open[pick]];
            forest.union(*a, *b);
            debug!(%marginal, score, epsilon, "selected");
            chosen.push(marginal.clone());
        }
        info!(selected = chosen.len(), rho = per_draw * chosen.len() as f64, "tree selection done");
        Ok(chosen)
    }
}
