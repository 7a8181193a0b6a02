use blake3::Hasher;
use serde::{Deserialize, Serialize};

use crate::{
    domain::{Marginal, Partition},
    noise::Metric,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    FirstOrder,
    FixedOrder,
    Refinement,
    Assembled,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::FirstOrder => "first-order",
            Phase::FixedOrder => "fixed-order",
            Phase::Refinement => "refinement",
            Phase::Assembled => "assembled",
        }
    }
}

/// One noisy marginal, frozen at the moment it was measured.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    marginal: Marginal,
    /// Fine-to-coarse maps of the marginal's attributes, in marginal order.
    partitions: Vec<Partition>,
    noisy: Vec<f64>,
    sensitivity: f64,
    metric: Metric,
    scale: f64,
    rho: f64,
    phase: Phase,
}

impl Measurement {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        marginal: Marginal,
        partitions: Vec<Partition>,
        noisy: Vec<f64>,
        sensitivity: f64,
        metric: Metric,
        scale: f64,
        rho: f64,
        phase: Phase,
    ) -> Self {
        Self {
            marginal,
            partitions,
            noisy,
            sensitivity,
            metric,
            scale,
            rho,
            phase,
        }
    }

    pub fn marginal(&self) -> &Marginal {
        &self.marginal
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn partition_of(&self, name: &str) -> Option<&Partition> {
        self.marginal
            .attributes()
            .iter()
            .position(|attr| attr == name)
            .map(|index| &self.partitions[index])
    }

    pub fn noisy(&self) -> &[f64] {
        &self.noisy
    }

    pub fn sensitivity(&self) -> f64 {
        self.sensitivity
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn rho(&self) -> f64 {
        self.rho
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Variance of each noisy cell.
    pub fn cell_variance(&self) -> f64 {
        self.metric.variance(self.scale)
    }

    /// Noisy estimate of the record count, with its variance.
    pub fn total(&self) -> (f64, f64) {
        (
            self.noisy.iter().sum(),
            self.noisy.len() as f64 * self.cell_variance(),
        )
    }
}

/// Append-only, ordered record of every measurement taken in a run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasurementLog {
    entries: Vec<Measurement>,
}

impl MeasurementLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, measurement: Measurement) -> &Measurement {
        self.entries.push(measurement);
        &self.entries[self.entries.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Measurement> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &[Measurement] {
        &self.entries
    }

    pub fn times_measured(&self, marginal: &Marginal) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.marginal == *marginal)
            .count()
    }

    pub fn total_rho(&self) -> f64 {
        self.entries.iter().map(|entry| entry.rho).sum()
    }

    pub fn in_phase(&self, phase: Phase) -> impl Iterator<Item = &Measurement> {
        self.entries.iter().filter(move |entry| entry.phase == phase)
    }

    /// Inverse-variance estimate of the number of records across all entries.
    pub fn estimated_records(&self) -> Option<f64> {
        let mut weight = 0.0;
        let mut weighted = 0.0;
        for entry in &self.entries {
            let (total, variance) = entry.total();
            if variance > 0.0 {
                weight += 1.0 / variance;
                weighted += total / variance;
            }
        }
        (weight > 0.0).then(|| weighted / weight)
    }

    /// Hex blake3 digest over the ordered log contents.
    pub fn digest(&self) -> String {
        let mut hasher = Hasher::new();
        hasher.update(&(self.entries.len() as u64).to_le_bytes());
        for entry in &self.entries {
            for attr in entry.marginal.attributes() {
                hasher.update(attr.as_bytes());
                hasher.update(&[0u8]);
            }
            for partition in &entry.partitions {
                for bin in partition.map() {
                    hasher.update(&(*bin as u64).to_le_bytes());
                }
            }
            for value in &entry.noisy {
                hasher.update(&value.to_le_bytes());
            }
            hasher.update(entry.metric.distribution().as_bytes());
            hasher.update(&entry.scale.to_le_bytes());
            hasher.update(&entry.rho.to_le_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }
}
