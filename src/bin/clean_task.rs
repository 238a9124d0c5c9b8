//! Очистка табличного файла с повторами при ошибках

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use loan_ml::clean_task::clean_task;
use loan_ml::RetryPolicy;

#[derive(Parser)]
#[command(name = "clean_task")]
#[command(about = "Drop rows without x_feature and write the cleaned table", version)]
struct Cli {
    /// Входной CSV или JSON; если файла нет, используется демо-набор
    #[arg(short, long, default_value = "data/raw/prices.csv")]
    input: PathBuf,

    /// Куда писать результат (.csv или .json)
    #[arg(short, long, default_value = "data/processed/prices_clean.csv")]
    output: PathBuf,

    /// Каталог для clean_task.log
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    #[arg(long, default_value_t = 3)]
    attempts: u32,
}

fn init_logging(log_dir: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create {}", log_dir.display()))?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("clean_task.log"))
        .context("failed to open log file")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .init();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_dir)?;

    let policy = RetryPolicy {
        max_attempts: cli.attempts,
        ..RetryPolicy::default()
    };
    let summary = policy
        .run("clean_task", || clean_task(&cli.input, &cli.output))
        .context("clean task failed")?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
