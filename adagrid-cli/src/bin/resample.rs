use std::path::PathBuf;

use adagrid_cli::{baseline::resample, io, logging::init_tracing};
use adagrid_core::noise::entropy_seed;
use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

#[derive(Debug, Parser)]
#[command(
    name = "adagrid-resample",
    version,
    about = "Non-private baseline: resamples the records with replacement"
)]
struct Cli {
    #[arg(long)]
    dataset: PathBuf,
    #[arg(long, default_value = "resample.csv")]
    save: PathBuf,
    /// Row count of the sample; defaults to the input size.
    #[arg(long)]
    records: Option<usize>,
    #[arg(long, env = "ADAGRID_SEED")]
    seed: Option<u64>,
    #[arg(long, env = "ADAGRID_LOG_JSON")]
    log_json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);
    let raw = io::read_raw(&cli.dataset).with_context(|| format!("reading {}", cli.dataset.display()))?;
    let seed = cli.seed.unwrap_or_else(entropy_seed);
    let sample = resample(&raw, cli.records, seed);
    io::write_raw(&cli.save, &sample).with_context(|| format!("writing {}", cli.save.display()))?;
    info!(rows = sample.rows.len(), seed, path = %cli.save.display(), "resample written");
    Ok(())
}
