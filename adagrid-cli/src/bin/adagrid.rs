use std::path::PathBuf;

use adagrid_cli::{load_config, logging::init_tracing, run, ConfigFormat, RunConfig, SolverSection};
use adagrid_core::{Metric, NoiseMode, Selection, SplitStrategy};
use anyhow::Result;
use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "adagrid",
    version,
    about = "Differentially private synthetic data via adaptive-grid marginal measurements"
)]
struct Cli {
    /// Optional configuration file (TOML or YAML); flags override it.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = ConfigFormat::Auto)]
    config_format: ConfigFormat,
    /// Integer-coded CSV dataset.
    #[arg(long)]
    dataset: Option<PathBuf>,
    /// JSON map of attribute name to cardinality.
    #[arg(long)]
    domain: Option<PathBuf>,
    #[arg(long)]
    epsilon: Option<f64>,
    #[arg(long)]
    delta: Option<f64>,
    /// Attributes whose marginals get extra budget.
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    targets: Option<Vec<String>>,
    #[arg(long)]
    pgm_iters: Option<usize>,
    #[arg(long)]
    warm_start: Option<bool>,
    /// L1 (Laplace) or L2 (Gaussian).
    #[arg(long)]
    metric: Option<Metric>,
    /// Merge sensitivity of the adaptive grid.
    #[arg(long)]
    threshold: Option<f64>,
    /// Budget fractions of the three phases, e.g. 0.1,0.1,0.8.
    #[arg(long)]
    split_strategy: Option<SplitStrategy>,
    #[arg(long)]
    refine_rounds: Option<usize>,
    /// How phase two picks its marginals: enumerate or private-tree.
    #[arg(long)]
    selection: Option<Selection>,
    #[arg(long)]
    selection_fraction: Option<f64>,
    #[arg(long, env = "ADAGRID_SEED")]
    seed: Option<u64>,
    /// Draw no noise. For audits only: the output is not private.
    #[arg(long)]
    oracle: bool,
    /// Synthetic row count for the built-in estimator.
    #[arg(long)]
    records: Option<usize>,
    /// Where to write the synthetic CSV.
    #[arg(long)]
    save: Option<PathBuf>,
    /// Where to write the measurement log handed to the estimator.
    #[arg(long)]
    measurements: Option<PathBuf>,
    /// External solver program; reads JSON on stdin, writes CSV on stdout.
    #[arg(long)]
    solver: Option<String>,
    #[arg(long = "solver-arg", allow_hyphen_values = true)]
    solver_args: Vec<String>,
    #[arg(long, env = "ADAGRID_LOG_JSON")]
    log_json: bool,
}

impl Cli {
    fn into_config(self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path, self.config_format)?,
            None => RunConfig::default(),
        };
        let io = &mut config.io;
        if self.dataset.is_some() {
            io.dataset = self.dataset;
        }
        if self.domain.is_some() {
            io.domain = self.domain;
        }
        if let Some(save) = self.save {
            io.save = save;
        }
        if self.measurements.is_some() {
            io.measurements = self.measurements;
        }
        let mechanism = &mut config.mechanism;
        if let Some(epsilon) = self.epsilon {
            mechanism.epsilon = epsilon;
        }
        if let Some(delta) = self.delta {
            mechanism.delta = delta;
        }
        if let Some(targets) = self.targets {
            mechanism.targets = targets;
        }
        if let Some(metric) = self.metric {
            mechanism.metric = metric;
        }
        if let Some(threshold) = self.threshold {
            mechanism.threshold = threshold;
        }
        if let Some(split) = self.split_strategy {
            mechanism.split_strategy = split;
        }
        if let Some(rounds) = self.refine_rounds {
            mechanism.refine_rounds = rounds;
        }
        if let Some(selection) = self.selection {
            mechanism.selection = selection;
        }
        if let Some(fraction) = self.selection_fraction {
            mechanism.selection_fraction = fraction;
        }
        if self.seed.is_some() {
            mechanism.seed = self.seed;
        }
        if self.oracle {
            mechanism.noise = NoiseMode::Oracle;
        }
        let estimator = &mut config.estimator;
        if let Some(iters) = self.pgm_iters {
            estimator.pgm_iters = iters;
        }
        if let Some(warm_start) = self.warm_start {
            estimator.warm_start = warm_start;
        }
        if self.records.is_some() {
            estimator.records = self.records;
        }
        if let Some(command) = self.solver {
            config.solver = Some(SolverSection {
                command,
                args: self.solver_args,
            });
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);
    let config = cli.into_config()?;
    let summary = run(&config)?;
    println!(
        "wrote {} synthetic rows to {} (rho {:.6}/{:.6}, {} measurements, log {})",
        summary.synthetic_rows,
        config.io.save.display(),
        summary.rho_spent,
        summary.rho_total,
        summary.measurements,
        summary.digest
    );
    Ok(())
}
