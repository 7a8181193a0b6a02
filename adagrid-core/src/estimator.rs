//! Output assembly: packages a finished run for a synthetic-data estimator
//! and defines the narrow interface such estimators implement.

use rand::{
    distributions::{Distribution, WeightedIndex},
    Rng,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::EstimatorConfig,
    domain::{Domain, SchemaError, Table},
    grid::OneWayEstimate,
    measurement::MeasurementLog,
    noise::{seeded_rng, Metric},
    scheduler::MechanismOutcome,
};

#[derive(Debug, Error)]
pub enum EstimationError {
    #[error("solver failed: {0}")]
    Solver(String),
    #[error("solver output invalid: {0}")]
    InvalidOutput(String),
    #[error("synthetic table does not match the domain: {0}")]
    Schema(#[from] SchemaError),
    #[error("solver i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("noisy record estimate {0} is unusable; set the record count explicitly")]
    RecordCount(f64),
}

/// Everything an estimator may see. Built only from noisy measurements, so
/// any function of it is post-processing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SynthesisInput {
    /// Original cardinalities together with the final partitions.
    pub domain: Domain,
    pub measurements: MeasurementLog,
    pub metric: Metric,
    pub warm_start: bool,
    pub pgm_iters: usize,
    /// Hex blake3 digest of `measurements`.
    pub digest: String,
    pub seed: u64,
}

impl SynthesisInput {
    pub fn assemble(outcome: &MechanismOutcome, metric: Metric, config: &EstimatorConfig) -> Self {
        Self {
            domain: outcome.domain.clone(),
            measurements: outcome.log.clone(),
            metric,
            warm_start: config.warm_start,
            pgm_iters: config.pgm_iters,
            digest: outcome.log.digest(),
            seed: outcome.seed,
        }
    }
}

/// Turns a measurement log into an integer-coded table over the original
/// domain. Implementations must not touch the raw data.
pub trait Estimator {
    fn estimate(&self, input: &SynthesisInput) -> Result<Table, EstimationError>;
}

impl<E: Estimator + ?Sized> Estimator for &E {
    fn estimate(&self, input: &SynthesisInput) -> Result<Table, EstimationError> {
        (**self).estimate(input)
    }
}

/// Samples every attribute independently from its combined noisy 1-way
/// estimate over the final bins, then uniformly within the chosen bin.
/// Attributes never measured fall back to the uniform distribution.
#[derive(Clone, Copy, Debug, Default)]
pub struct IndependentEstimator {
    records: Option<usize>,
}

impl IndependentEstimator {
    /// Upper bound on a row count taken from the noisy estimate.
    pub const MAX_ESTIMATED_RECORDS: usize = 1 << 26;

    pub fn new(records: Option<usize>) -> Self {
        Self { records }
    }

    fn records(&self, input: &SynthesisInput) -> Result<usize, EstimationError> {
        if let Some(records) = self.records {
            return Ok(records);
        }
        let Some(estimate) = input.measurements.estimated_records() else {
            return Ok(0);
        };
        if !estimate.is_finite() || estimate > Self::MAX_ESTIMATED_RECORDS as f64 {
            return Err(EstimationError::RecordCount(estimate));
        }
        Ok(estimate.max(0.0).round() as usize)
    }
}

impl Estimator for IndependentEstimator {
    fn estimate(&self, input: &SynthesisInput) -> Result<Table, EstimationError> {
        let records = self.records(input)?;
        let mut rng = seeded_rng("adagrid/independent-estimator", input.seed);
        let mut columns = Vec::with_capacity(input.domain.len());
        for attr in input.domain.attributes() {
            let partition = &attr.partition;
            let widths: Vec<f64> = partition.widths().into_iter().map(|w| w as f64).collect();
            let mut weights = OneWayEstimate::from_log(&input.measurements, &attr.name, partition)
                .map(|estimate| estimate.counts.iter().map(|c| c.max(0.0)).collect::<Vec<_>>())
                .unwrap_or_else(|| widths.clone());
            if weights.iter().sum::<f64>() <= 0.0 {
                weights = widths;
            }
            let bins = WeightedIndex::new(&weights)
                .map_err(|err| EstimationError::Solver(format!("attribute {}: {err}", attr.name)))?;
            let column: Vec<usize> = (0..records)
                .map(|_| {
                    let bin = bins.sample(&mut rng);
                    rng.gen_range(partition.members(bin))
                })
                .collect();
            columns.push(column);
        }
        Ok(Table {
            columns: input.domain.names().map(str::to_string).collect(),
            rows: (0..records)
                .map(|record| columns.iter().map(|column| column[record]).collect())
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        accountant::BudgetSnapshot,
        domain::{Dataset, Marginal, Partition},
        measurement::{Measurement, Phase},
    };

    fn outcome(log: MeasurementLog, domain: Domain) -> MechanismOutcome {
        MechanismOutcome {
            domain,
            log,
            budget: BudgetSnapshot {
                epsilon: 1.0,
                delta: 1e-10,
                rho_total: 0.1,
                rho_spent: 0.1,
                measurements: 1,
            },
            seed: 11,
        }
    }

    #[test]
    fn assembles_final_partitions_and_digest() {
        let mut domain = Domain::new([("a", 4)]).unwrap();
        domain.replace_partition(0, Partition::identity(4).merge(&[0..2, 2..4]));
        let mut log = MeasurementLog::new();
        log.push(Measurement::new(
            Marginal::new(["a"]),
            vec![Partition::identity(4)],
            vec![1.0, 2.0, 3.0, 4.0],
            1.0,
            Metric::L2,
            1.0,
            0.1,
            Phase::FirstOrder,
        ));
        let outcome = outcome(log, domain);
        let input = SynthesisInput::assemble(&outcome, Metric::L2, &EstimatorConfig::default());
        assert_eq!(input.domain.cardinality("a").unwrap(), 2);
        assert_eq!(input.domain.attribute("a").unwrap().cardinality, 4);
        assert_eq!(input.digest, outcome.log.digest());
        assert_eq!(input.pgm_iters, 2500);

        let json = serde_json::to_string(&input).unwrap();
        let back: SynthesisInput = serde_json::from_str(&json).unwrap();
        assert_eq!(back, input);
    }

    #[test]
    fn independent_estimator_respects_bins_and_domain() {
        let mut domain = Domain::new([("a", 4), ("b", 3)]).unwrap();
        domain.replace_partition(0, Partition::identity(4).merge(&[0..2, 2..4]));
        let mut log = MeasurementLog::new();
        // All mass in the upper bin of `a`; `b` never measured.
        log.push(Measurement::new(
            Marginal::new(["a"]),
            vec![domain.partition("a").unwrap().clone()],
            vec![-3.0, 50.0],
            1.0,
            Metric::L2,
            1.0,
            0.1,
            Phase::FirstOrder,
        ));
        let input = SynthesisInput::assemble(
            &outcome(log, domain),
            Metric::L2,
            &EstimatorConfig::default(),
        );
        let table = IndependentEstimator::new(Some(200)).estimate(&input).unwrap();
        assert_eq!(table.rows.len(), 200);
        let original = Domain::new([("a", 4), ("b", 3)]).unwrap();
        let synth = Dataset::new(original, &table).unwrap();
        assert!(synth.column("a").unwrap().iter().all(|v| (2..4).contains(v)));

        let again = IndependentEstimator::new(Some(200)).estimate(&input).unwrap();
        assert_eq!(table, again);
    }

    #[test]
    fn record_count_defaults_to_noisy_total() {
        let domain = Domain::new([("a", 2)]).unwrap();
        let mut log = MeasurementLog::new();
        log.push(Measurement::new(
            Marginal::new(["a"]),
            vec![Partition::identity(2)],
            vec![20.2, 9.9],
            1.0,
            Metric::L2,
            1.0,
            0.1,
            Phase::FirstOrder,
        ));
        let input = SynthesisInput::assemble(&outcome(log, domain), Metric::L2, &EstimatorConfig::default());
        let table = IndependentEstimator::default().estimate(&input).unwrap();
        assert_eq!(table.rows.len(), 30);
    }

    #[test]
    fn absurd_record_estimate_is_refused() {
        let domain = Domain::new([("a", 2)]).unwrap();
        let mut log = MeasurementLog::new();
        log.push(Measurement::new(
            Marginal::new(["a"]),
            vec![Partition::identity(2)],
            vec![1e12, 3.0],
            1.0,
            Metric::L2,
            1.0,
            0.1,
            Phase::FirstOrder,
        ));
        let input = SynthesisInput::assemble(&outcome(log, domain), Metric::L2, &EstimatorConfig::default());
        let err = IndependentEstimator::default().estimate(&input).unwrap_err();
        assert!(matches!(err, EstimationError::RecordCount(_)));
        let table = IndependentEstimator::new(Some(3)).estimate(&input).unwrap();
        assert_eq!(table.rows.len(), 3);
    }
}
