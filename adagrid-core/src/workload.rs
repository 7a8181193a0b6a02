use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{
    domain::{Domain, Marginal},
    grid::OneWayEstimate,
    measurement::MeasurementLog,
};

/// Ranked candidate for the next measurement. Recomputed every round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkloadEntry {
    pub marginal: Marginal,
    pub priority: f64,
}

/// Every marginal of size `order` over the attributes that still have more
/// than one bin. For `order >= 2` with targets, only marginals containing at
/// least one target are kept. Output order follows domain order and contains
/// no duplicates.
pub fn candidates(domain: &Domain, targets: &[String], order: usize) -> Vec<Marginal> {
    let live: Vec<&str> = domain
        .attributes()
        .iter()
        .filter(|attr| !attr.partition.is_collapsed())
        .map(|attr| attr.name.as_str())
        .collect();
    if order == 0 || order > live.len() {
        return Vec::new();
    }
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for combo in combinations(live.len(), order) {
        let marginal = Marginal::new(combo.iter().map(|&i| live[i]));
        if order >= 2 && !targets.is_empty() && !marginal.touches(targets) {
            continue;
        }
        if seen.insert(marginal.clone()) {
            out.push(marginal);
        }
    }
    out
}

fn combinations(n: usize, k: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    let mut idx: Vec<usize> = (0..k).collect();
    loop {
        out.push(idx.clone());
        let mut i = k;
        while i > 0 && idx[i - 1] == n - k + i - 1 {
            i -= 1;
        }
        if i == 0 {
            return out;
        }
        idx[i - 1] += 1;
        for j in i..k {
            idx[j] = idx[j - 1] + 1;
        }
    }
}

/// Read-only view handed to a [`PriorityPolicy`]. Everything in it is derived
/// from noisy measurements, so ranking costs no privacy budget.
pub struct PriorityContext<'a> {
    pub domain: &'a Domain,
    pub targets: &'a [String],
    pub log: &'a MeasurementLog,
    /// Per-attribute non-uniformity in `[0, 1)`, see [`attribute_signal`].
    pub signal: &'a BTreeMap<String, f64>,
}

pub trait PriorityPolicy {
    fn priority(&self, marginal: &Marginal, ctx: &PriorityContext<'_>) -> f64;
}

/// `boost * (1 + sum of attribute signal) / (1 + times measured)`.
#[derive(Clone, Copy, Debug)]
pub struct SignalStrengthPolicy {
    pub target_boost: f64,
}

impl Default for SignalStrengthPolicy {
    fn default() -> Self {
        Self { target_boost: 4.0 }
    }
}

impl PriorityPolicy for SignalStrengthPolicy {
    fn priority(&self, marginal: &Marginal, ctx: &PriorityContext<'_>) -> f64 {
        let boost = if marginal.touches(ctx.targets) {
            self.target_boost
        } else {
            1.0
        };
        let signal: f64 = marginal
            .attributes()
            .iter()
            .map(|name| ctx.signal.get(name).copied().unwrap_or(0.0))
            .sum();
        let seen = ctx.log.times_measured(marginal) as f64;
        boost * (1.0 + signal) / (1.0 + seen)
    }
}

/// Scores and sorts candidates, highest first; ties keep input order.
pub fn rank<P>(policy: &P, candidates: Vec<Marginal>, ctx: &PriorityContext<'_>) -> Vec<WorkloadEntry>
where
    P: PriorityPolicy + ?Sized,
{
    let mut entries: Vec<WorkloadEntry> = candidates
        .into_iter()
        .map(|marginal| {
            let priority = policy.priority(&marginal, ctx);
            WorkloadEntry {
                marginal,
                priority: if priority.is_nan() {
                    f64::NEG_INFINITY
                } else {
                    priority
                },
            }
        })
        .collect();
    entries.sort_by(|a, b| b.priority.total_cmp(&a.priority));
    entries
}

/// Variation of each attribute's combined 1-way estimate over its current
/// partition. Attributes without a 1-way measurement score zero.
pub fn attribute_signal(domain: &Domain, log: &MeasurementLog) -> BTreeMap<String, f64> {
    domain
        .attributes()
        .iter()
        .map(|attr| {
            let signal = OneWayEstimate::from_log(log, &attr.name, &attr.partition)
                .map_or(0.0, |estimate| estimate.variation(&attr.partition));
            (attr.name.clone(), signal)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn names(marginals: &[Marginal]) -> Vec<String> {
        marginals.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn first_order_lists_every_live_attribute() {
        let domain = Domain::new([("a", 3), ("b", 1), ("c", 2)]).unwrap();
        assert_eq!(names(&candidates(&domain, &[], 1)), vec!["(a)", "(c)"]);
        assert_eq!(
            names(&candidates(&domain, &["a".to_string()], 1)),
            vec!["(a)", "(c)"]
        );
    }

    #[test]
    fn pairs_without_targets() {
        let domain = Domain::new([("a", 2), ("b", 2), ("c", 2)]).unwrap();
        assert_eq!(
            names(&candidates(&domain, &[], 2)),
            vec!["(a,b)", "(a,c)", "(b,c)"]
        );
    }

    #[test]
    fn target_aware_pairs_and_triples() {
        let domain = Domain::new([("a", 2), ("b", 2), ("c", 2), ("t", 2)]).unwrap();
        let targets = vec!["t".to_string()];
        assert_eq!(
            names(&candidates(&domain, &targets, 2)),
            vec!["(a,t)", "(b,t)", "(c,t)"]
        );
        assert_eq!(
            names(&candidates(&domain, &targets, 3)),
            vec!["(a,b,t)", "(a,c,t)", "(b,c,t)"]
        );
    }

    #[test]
    fn enumeration_is_order_independent_and_unique() {
        let ab = Domain::new([("A", 2), ("B", 2)]).unwrap();
        let ba = Domain::new([("B", 2), ("A", 2)]).unwrap();
        let left = candidates(&ab, &[], 2);
        let right = candidates(&ba, &[], 2);
        assert_eq!(left, vec![Marginal::new(["A", "B"])]);
        assert_eq!(left, right);
        assert_eq!(candidates(&ab, &[], 3), Vec::<Marginal>::new());
    }

    #[test]
    fn enumeration_is_deterministic() {
        let domain = Domain::new((0..7).map(|i| (format!("x{i}"), 3))).unwrap();
        let first = candidates(&domain, &["x3".into()], 3);
        let second = candidates(&domain, &["x3".into()], 3);
        assert_eq!(first, second);
        assert_eq!(first.len(), 15);
    }

    #[test]
    fn ranking_boosts_targets_and_decays_with_repeats() {
        let domain = Domain::new([("a", 2), ("t", 2)]).unwrap();
        let targets = vec!["t".to_string()];
        let log = MeasurementLog::new();
        let signal = BTreeMap::new();
        let ctx = PriorityContext {
            domain: &domain,
            targets: &targets,
            log: &log,
            signal: &signal,
        };
        let ranked = rank(
            &SignalStrengthPolicy::default(),
            vec![Marginal::new(["a"]), Marginal::new(["a", "t"])],
            &ctx,
        );
        assert_eq!(ranked[0].marginal, Marginal::new(["a", "t"]));
        assert_eq!(ranked[0].priority, 4.0);
        assert_eq!(ranked[1].priority, 1.0);
    }
}
