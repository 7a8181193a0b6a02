use thiserror::Error;

use crate::{
    accountant::BudgetError, config::ConfigError, domain::SchemaError, estimator::EstimationError,
    noise::NoiseError,
};

pub type AdagridResult<T> = Result<T, AdagridError>;

#[derive(Debug, Error)]
pub enum AdagridError {
    #[error(transparent)]
    Budget(#[from] BudgetError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Noise(#[from] NoiseError),
    /// The measurement log was complete; only post-processing failed.
    #[error("estimation failed: {0}")]
    EstimationFailure(#[from] EstimationError),
}
