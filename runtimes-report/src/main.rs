//! Test runtime accumulator - report generator.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use runtimes_common::{Config, LogConfig, SqliteRecordStore, init_logging};
use runtimes_report::{ReportOptions, generate_all};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "runtimes-report")]
#[command(author, version, about = "Write average test runtimes per suite and platform")]
struct Cli {
    /// Path to configuration file (default: ~/.runtimes.toml)
    #[arg(short, long, env = "RUNTIMES_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the runtime database
    #[arg(long)]
    db: Option<PathBuf>,

    /// Number of most recent builds to average
    #[arg(short, long)]
    points: Option<usize>,

    /// Omit tests whose average runtime (ms) is below this
    #[arg(short, long)]
    threshold: Option<f64>,

    /// Output directory; one subdirectory is written per platform
    #[arg(short, long)]
    outdir: Option<PathBuf>,

    /// Only generate reports for this platform (e.g. linux64-opt)
    #[arg(long)]
    platform: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config)?;

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.store.path = db;
    }
    if let Some(points) = cli.points {
        config.report.points = points;
    }
    if let Some(threshold) = cli.threshold {
        config.report.threshold = threshold;
    }
    if let Some(outdir) = cli.outdir {
        config.report.outdir = outdir;
    }
    config.validate()?;

    let registry = config.registry()?;
    let store = SqliteRecordStore::open(&config.store.path)
        .with_context(|| format!("failed to open {:?}", config.store.path))?;

    let options = ReportOptions {
        points: config.report.points,
        threshold: config.report.threshold,
        outdir: config.report.outdir.clone(),
    };
    info!(
        points = options.points,
        threshold = options.threshold,
        "Generating runtime reports into {:?}",
        options.outdir
    );

    let reports = generate_all(&store, &registry, &options, cli.platform.as_deref())?;
    let tests: usize = reports.iter().map(|r| r.runtimes.len()).sum();
    info!("Wrote {} reports covering {} tests", reports.len(), tests);
    Ok(())
}
