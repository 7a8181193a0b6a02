use adagrid_core::{AdagridEngine, Dataset, IndependentEstimator};
use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::{config::RunConfig, io, solver::SolverProcess};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunSummary {
    pub records: usize,
    pub synthetic_rows: usize,
    pub measurements: usize,
    pub rho_total: f64,
    pub rho_spent: f64,
    pub digest: String,
    pub seed: u64,
}

/// Reads the inputs, measures, writes the measurement log if asked, then
/// estimates and writes the synthetic table.
pub fn run(config: &RunConfig) -> Result<RunSummary> {
    config.validate()?;
    let (Some(dataset_path), Some(domain_path)) = (&config.io.dataset, &config.io.domain) else {
        anyhow::bail!("dataset and domain are required");
    };
    let domain = io::read_domain(domain_path)
        .with_context(|| format!("reading domain {}", domain_path.display()))?;
    let table = io::read_table(dataset_path)
        .with_context(|| format!("reading dataset {}", dataset_path.display()))?;
    let data = Dataset::new(domain, &table).context("dataset does not match the domain")?;

    let engine = AdagridEngine::new(config.adagrid())?;
    let outcome = engine.measure(&data)?;
    let input = engine.assemble(&outcome);
    if let Some(path) = &config.io.measurements {
        io::write_json(path, &input)?;
        info!(path = %path.display(), digest = %input.digest, "measurement log written");
    }

    let synthetic = match &config.solver {
        Some(solver) => engine.estimate(&input, &SolverProcess::new(&solver.command, solver.args.clone()))?,
        None => engine.estimate(&input, &IndependentEstimator::new(config.estimator.records))?,
    };
    io::write_table(&config.io.save, &synthetic)
        .with_context(|| format!("writing synthetic data to {}", config.io.save.display()))?;

    Ok(RunSummary {
        records: data.records(),
        synthetic_rows: synthetic.rows.len(),
        measurements: outcome.log.len(),
        rho_total: outcome.budget.rho_total,
        rho_spent: outcome.budget.rho_spent,
        digest: input.digest,
        seed: outcome.seed,
    })
}
