//! Adagrid: adaptive-grid marginal measurement under zero-concentrated
//! differential privacy. A run spends one zCDP budget over three phases of
//! noisy marginal measurements, coarsening each attribute's domain where the
//! noise cannot resolve neighbouring values, and hands the resulting
//! measurement log to a synthetic-data estimator.

pub mod accountant;
pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod estimator;
pub mod grid;
pub mod measurement;
pub mod noise;
pub mod scheduler;
pub mod score;
pub mod selection;
pub mod workload;

pub use accountant::{cdp_delta, cdp_eps, cdp_rho, noise_scale, BudgetError, BudgetSnapshot, PrivacyAccountant};
pub use config::{AdagridConfig, ConfigError, EstimatorConfig, MechanismConfig, Selection, SplitStrategy};
pub use domain::{Attribute, Dataset, Domain, Marginal, Partition, SchemaError, Table};
pub use engine::{AdagridEngine, Synthesis};
pub use errors::{AdagridError, AdagridResult};
pub use estimator::{EstimationError, Estimator, IndependentEstimator, SynthesisInput};
pub use grid::{GridAdapter, OneWayEstimate, RefineOutcome};
pub use measurement::{Measurement, MeasurementLog, Phase};
pub use noise::{Metric, NoiseError, NoiseInjector, NoiseMode};
pub use scheduler::{MechanismOutcome, RoundScheduler};
pub use score::{score, ScoreReport};
pub use selection::{exponential_mechanism, TreeSelector};
pub use workload::{candidates, PriorityContext, PriorityPolicy, SignalStrengthPolicy, WorkloadEntry};
