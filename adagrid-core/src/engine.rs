use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    accountant::BudgetSnapshot,
    config::AdagridConfig,
    domain::{Dataset, Table},
    errors::{AdagridError, AdagridResult},
    estimator::{EstimationError, Estimator, SynthesisInput},
    scheduler::{MechanismOutcome, RoundScheduler},
};

/// Top-level run: measure under the configured budget, then hand the log to
/// an estimator.
pub struct AdagridEngine {
    config: AdagridConfig,
}

impl AdagridEngine {
    pub fn new(config: AdagridConfig) -> AdagridResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AdagridConfig {
        &self.config
    }

    pub fn measure(&self, data: &Dataset) -> AdagridResult<MechanismOutcome> {
        info!(
            records = data.records(),
            attributes = data.domain().len(),
            epsilon = self.config.mechanism.epsilon,
            delta = self.config.mechanism.delta,
            "measuring"
        );
        RoundScheduler::new(&self.config.mechanism, data)?.run()
    }

    pub fn assemble(&self, outcome: &MechanismOutcome) -> SynthesisInput {
        SynthesisInput::assemble(outcome, self.config.mechanism.metric, &self.config.estimator)
    }

    /// Runs `estimator` on an assembled log. The table it returns is checked
    /// against the original domain and otherwise passed through untouched.
    pub fn estimate<E>(&self, input: &SynthesisInput, estimator: &E) -> AdagridResult<Table>
    where
        E: Estimator + ?Sized,
    {
        let table = estimator.estimate(input)?;
        Dataset::new(input.domain.clone(), &table)
            .map_err(|err| AdagridError::EstimationFailure(EstimationError::Schema(err)))?;
        info!(rows = table.rows.len(), digest = %input.digest, "synthetic table produced");
        Ok(table)
    }

    pub fn synthesize<E>(&self, data: &Dataset, estimator: &E) -> AdagridResult<Synthesis>
    where
        E: Estimator + ?Sized,
    {
        let outcome = self.measure(data)?;
        let input = self.assemble(&outcome);
        let table = self.estimate(&input, estimator)?;
        Ok(Synthesis {
            table,
            input,
            budget: outcome.budget,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Synthesis {
    pub table: Table,
    pub input: SynthesisInput,
    pub budget: BudgetSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::MechanismConfig,
        domain::Domain,
        estimator::IndependentEstimator,
    };

    struct FailingSolver;

    impl Estimator for FailingSolver {
        fn estimate(&self, _: &SynthesisInput) -> Result<Table, EstimationError> {
            Err(EstimationError::Solver("did not converge".into()))
        }
    }

    struct OutOfDomain;

    impl Estimator for OutOfDomain {
        fn estimate(&self, _: &SynthesisInput) -> Result<Table, EstimationError> {
            Ok(Table {
                columns: vec!["a".into()],
                rows: vec![vec![7]],
            })
        }
    }

    fn data() -> Dataset {
        let domain = Domain::new([("a", 3)]).unwrap();
        let rows = (0..60).map(|i| vec![i % 3]).collect();
        Dataset::new(
            domain,
            &Table {
                columns: vec!["a".into()],
                rows,
            },
        )
        .unwrap()
    }

    fn engine() -> AdagridEngine {
        AdagridEngine::new(AdagridConfig {
            mechanism: MechanismConfig {
                seed: Some(9),
                ..MechanismConfig::default()
            },
            ..AdagridConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn estimator_failure_is_distinct() {
        let err = engine().synthesize(&data(), &FailingSolver).unwrap_err();
        assert!(matches!(
            err,
            AdagridError::EstimationFailure(EstimationError::Solver(_))
        ));
    }

    #[test]
    fn out_of_domain_output_is_rejected() {
        let err = engine().synthesize(&data(), &OutOfDomain).unwrap_err();
        assert!(matches!(
            err,
            AdagridError::EstimationFailure(EstimationError::Schema(_))
        ));
    }

    #[test]
    fn baseline_estimator_round_trip() {
        let synthesis = engine()
            .synthesize(&data(), &IndependentEstimator::new(Some(25)))
            .unwrap();
        assert_eq!(synthesis.table.rows.len(), 25);
        assert!(synthesis.budget.rho_spent <= synthesis.budget.rho_total);
        assert_eq!(synthesis.input.seed, 9);
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let mut config = AdagridConfig::default();
        config.estimator.pgm_iters = 0;
        assert!(matches!(
            AdagridEngine::new(config),
            Err(AdagridError::Config(_))
        ));
    }
}
