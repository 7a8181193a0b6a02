use std::path::PathBuf;

use adagrid_cli::{io, logging::init_tracing};
use adagrid_core::{score, Dataset};
use anyhow::{Context, Result};
use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "adagrid-score",
    version,
    about = "Total-variation error of a synthetic table on 2-way and target marginals"
)]
struct Cli {
    #[arg(long)]
    dataset: PathBuf,
    #[arg(long)]
    domain: PathBuf,
    #[arg(long, default_value = "out.csv")]
    synthetic: PathBuf,
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    targets: Vec<String>,
    /// CSV error report.
    #[arg(long, default_value = "error.csv")]
    save: PathBuf,
    #[arg(long, env = "ADAGRID_LOG_JSON")]
    log_json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);
    let domain = io::read_domain(&cli.domain)
        .with_context(|| format!("reading domain {}", cli.domain.display()))?;
    let data = Dataset::new(domain.clone(), &io::read_table(&cli.dataset)?)
        .context("dataset does not match the domain")?;
    let synth = Dataset::new(domain, &io::read_table(&cli.synthetic)?)
        .context("synthetic data does not match the domain")?;
    let report = score(&data, &synth, &cli.targets)?;
    io::write_score_report(&cli.save, &report)?;
    for entry in &report.errors {
        println!("{}\t{:.6}", entry.marginal, entry.error);
    }
    println!("Average Error: {:.6}", report.average);
    Ok(())
}
