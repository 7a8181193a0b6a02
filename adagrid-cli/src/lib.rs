//! File formats, configuration and process plumbing around `adagrid-core`.

pub mod baseline;
pub mod config;
pub mod io;
pub mod logging;
pub mod runner;
pub mod solver;
pub mod transform;

pub use config::{load_config, ConfigError, ConfigFormat, IoSection, RunConfig, SolverSection};
pub use runner::{run, RunSummary};
pub use solver::SolverProcess;
