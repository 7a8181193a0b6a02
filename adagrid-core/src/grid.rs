//! Adaptive grid: coarsens attribute domains where noisy 1-way counts cannot
//! tell neighbouring bins apart.

use std::{f64::consts::SQRT_2, ops::Range};

use tracing::debug;

use crate::{
    domain::{Domain, Marginal, Partition, SchemaError},
    measurement::MeasurementLog,
};

/// Inverse-variance combination of every 1-way measurement of an attribute,
/// projected onto one partition.
#[derive(Clone, Debug, PartialEq)]
pub struct OneWayEstimate {
    pub counts: Vec<f64>,
    pub variances: Vec<f64>,
}

impl OneWayEstimate {
    /// `None` when the attribute has no 1-way measurement yet. Every logged
    /// partition must be at least as fine as `target`.
    pub fn from_log(log: &MeasurementLog, name: &str, target: &Partition) -> Option<Self> {
        let marginal = Marginal::new([name]);
        let bins = target.num_bins();
        let mut precision = vec![0.0; bins];
        let mut weighted = vec![0.0; bins];
        let mut seen = false;
        for entry in log.iter().filter(|entry| *entry.marginal() == marginal) {
            let observed = &entry.partitions()[0];
            let mut counts = vec![0.0; bins];
            let mut variances = vec![0.0; bins];
            for (bin, value) in entry.noisy().iter().enumerate() {
                let first = observed.members(bin).start;
                let coarse = target.bin_of(first);
                counts[coarse] += value;
                variances[coarse] += entry.cell_variance();
            }
            for bin in 0..bins {
                if variances[bin] > 0.0 {
                    precision[bin] += 1.0 / variances[bin];
                    weighted[bin] += counts[bin] / variances[bin];
                }
            }
            seen = true;
        }
        if !seen {
            return None;
        }
        let counts = weighted
            .iter()
            .zip(&precision)
            .map(|(w, p)| if *p > 0.0 { w / p } else { 0.0 })
            .collect();
        let variances = precision
            .iter()
            .map(|p| if *p > 0.0 { 1.0 / p } else { f64::INFINITY })
            .collect();
        Some(Self { counts, variances })
    }

    /// Total-variation distance between the clipped estimate and the
    /// width-proportional uniform distribution over `partition`.
    pub fn variation(&self, partition: &Partition) -> f64 {
        let clipped: Vec<f64> = self.counts.iter().map(|c| c.max(0.0)).collect();
        let total: f64 = clipped.iter().sum();
        let size = partition.original_size() as f64;
        if total <= 0.0 || size == 0.0 {
            return 0.0;
        }
        0.5 * clipped
            .iter()
            .zip(partition.widths())
            .map(|(count, width)| (count / total - width as f64 / size).abs())
            .sum::<f64>()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RefineOutcome {
    pub attribute: String,
    pub bins_before: usize,
    pub bins_after: usize,
}

impl RefineOutcome {
    pub fn merged(&self) -> bool {
        self.bins_after < self.bins_before
    }
}

#[derive(Clone, Copy, Debug)]
pub struct GridAdapter {
    threshold: f64,
}

impl GridAdapter {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Greedy left-to-right grouping of current bins. A run keeps absorbing
    /// the next bin while its density range stays within
    /// `threshold * sqrt(2) * sigma`, sigma being the largest density
    /// standard deviation in play.
    pub fn plan(&self, partition: &Partition, estimate: &OneWayEstimate) -> Vec<Range<usize>> {
        let widths = partition.widths();
        let mut groups = Vec::new();
        let mut start = 0usize;
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        let mut sigma = 0.0f64;
        for bin in 0..partition.num_bins() {
            let width = widths[bin] as f64;
            let density = estimate.counts[bin] / width;
            let sd = estimate.variances[bin].sqrt() / width;
            if bin > start {
                let next_lo = lo.min(density);
                let next_hi = hi.max(density);
                let next_sigma = sigma.max(sd);
                if next_hi - next_lo <= self.threshold * SQRT_2 * next_sigma {
                    lo = next_lo;
                    hi = next_hi;
                    sigma = next_sigma;
                    continue;
                }
                groups.push(start..bin);
                start = bin;
            }
            lo = density;
            hi = density;
            sigma = sd;
        }
        if partition.num_bins() > 0 {
            groups.push(start..partition.num_bins());
        }
        groups
    }

    /// Re-runs the merge test for `name` over its current bins using every
    /// 1-way measurement logged so far. Bins are only ever fused: later 1-way
    /// measurements are taken on the current coarse bins, so nothing inside a
    /// merged bin is re-examined.
    pub fn refine(
        &self,
        domain: &mut Domain,
        log: &MeasurementLog,
        name: &str,
    ) -> Result<Option<RefineOutcome>, SchemaError> {
        let index = domain.index_of(name)?;
        let current = domain.partition(name)?.clone();
        let Some(estimate) = OneWayEstimate::from_log(log, name, &current) else {
            return Ok(None);
        };
        let groups = self.plan(&current, &estimate);
        let outcome = RefineOutcome {
            attribute: name.to_string(),
            bins_before: current.num_bins(),
            bins_after: groups.len(),
        };
        if outcome.merged() {
            domain.replace_partition(index, current.merge(&groups));
            debug!(
                attribute = name,
                before = outcome.bins_before,
                after = outcome.bins_after,
                "grid coarsened"
            );
        }
        Ok(Some(outcome))
    }
}
