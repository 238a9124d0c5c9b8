use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use loan_ml::synthetic::generate_linear;

#[derive(Parser)]
#[command(name = "generate_sample")]
#[command(about = "Write a synthetic linear dataset (x_feature, y_target) as CSV", version)]
struct Cli {
    #[arg(short, long, default_value = "data/synthetic.csv")]
    output: PathBuf,

    #[arg(short = 'n', long, default_value_t = 100)]
    rows: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let table = generate_linear(cli.rows, cli.seed).context("failed to generate sample")?;

    if let Some(parent) = cli.output.parent() {
        fs::create_dir_all(parent)?;
    }
    table
        .write_csv(&cli.output)
        .with_context(|| format!("failed to write {}", cli.output.display()))?;

    tracing::info!(rows = table.nrows(), path = %cli.output.display(), "sample written");
    Ok(())
}
