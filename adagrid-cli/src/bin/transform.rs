use std::{fs, path::PathBuf};

use adagrid_cli::{
    io,
    logging::init_tracing,
    transform::{discretize, undo_discretize, Schema},
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Direction {
    Discretize,
    UndoDiscretize,
}

#[derive(Debug, Parser)]
#[command(
    name = "adagrid-transform",
    version,
    about = "Pre- and post-processing between raw CSV and integer-coded tables"
)]
struct Cli {
    #[arg(long, value_enum)]
    transform: Direction,
    /// Input CSV.
    #[arg(long)]
    df: PathBuf,
    /// JSON column schema.
    #[arg(long)]
    schema: PathBuf,
    #[arg(long)]
    output: PathBuf,
    /// Also write the derived domain JSON when discretizing.
    #[arg(long)]
    domain_out: Option<PathBuf>,
    #[arg(long, env = "ADAGRID_LOG_JSON")]
    log_json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);
    let text = fs::read_to_string(&cli.schema)
        .with_context(|| format!("reading schema {}", cli.schema.display()))?;
    let schema = Schema::from_json(&text)?;
    match cli.transform {
        Direction::Discretize => {
            let raw = io::read_raw(&cli.df)?;
            let (table, domain) = discretize(&raw, &schema)?;
            io::write_table(&cli.output, &table)?;
            if let Some(path) = &cli.domain_out {
                io::write_domain(path, &domain)?;
            }
            info!(rows = table.rows.len(), columns = table.columns.len(), "discretized");
        }
        Direction::UndoDiscretize => {
            let table = io::read_table(&cli.df)?;
            let raw = undo_discretize(&table, &schema)?;
            io::write_raw(&cli.output, &raw)?;
            info!(rows = raw.rows.len(), "restored raw values");
        }
    }
    Ok(())
}
