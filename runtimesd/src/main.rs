//! Test runtime accumulator - daemon.
//!
//! Receives build-completion payloads over HTTP (or from a JSONL replay
//! file), downloads each build's raw test logs and records per-test
//! durations in the runtime database.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use runtimes_common::{
    Config, GuardedStore, LogConfig, MemoryRecordStore, SqliteRecordStore, init_logging,
};
use runtimesd::{Daemon, http_api, replay};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "runtimesd")]
#[command(author, version, about = "Test runtime accumulator daemon")]
struct Cli {
    /// Path to configuration file (default: ~/.runtimes.toml)
    #[arg(short, long, env = "RUNTIMES_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the runtime database
    #[arg(long)]
    db: Option<PathBuf>,

    /// Keep records in memory only (nothing is persisted)
    #[arg(long, conflicts_with = "db")]
    in_memory: bool,

    /// Address for the ingest, health and metrics API
    #[arg(short, long)]
    bind: Option<String>,

    /// Number of pipeline workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Maximum pending build events before the oldest is dropped
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Replay build payloads from a JSONL file ("-" for stdin), then exit
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
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
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(workers) = cli.workers {
        config.workers.count = workers;
    }
    if let Some(capacity) = cli.queue_capacity {
        config.queue.capacity = capacity;
    }
    config.validate()?;
    for var in &config.env_overrides {
        info!("Using {} from environment", var);
    }

    info!("Starting runtime accumulator...");

    let store = if cli.in_memory {
        info!("Runtime records in-memory only (no persistence)");
        GuardedStore::new(MemoryRecordStore::new())
    } else {
        let db = SqliteRecordStore::open(&config.store.path)
            .with_context(|| format!("failed to open {:?}", config.store.path))?;
        info!("Recording runtimes to {:?}", config.store.path);
        GuardedStore::new(db)
    };

    let mut signals = listen_for_signals()?;
    let daemon = Daemon::start(&config, store)?;
    let store = Arc::clone(&daemon.store);
    info!(
        workers = daemon.workers(),
        queue_capacity = daemon.queue().capacity(),
        "Pipeline started"
    );

    match cli.replay {
        Some(path) => {
            tokio::select! {
                result = replay::replay_path(&path, &daemon.context.ingest) => {
                    // Events queued before the failure still get drained.
                    if let Err(e) = result {
                        error!("Failed to replay {}: {}", path.display(), e);
                    }
                }
                Some(signal) = signals.recv() => {
                    info!("Received {}, stopping replay", signal);
                }
            }
        }
        None => {
            let listener = TcpListener::bind(&config.server.bind)
                .await
                .with_context(|| format!("failed to bind {}", config.server.bind))?;
            info!("Listening on http://{}", listener.local_addr()?);

            let (stop_tx, stop_rx) = oneshot::channel::<()>();
            let mut server = tokio::spawn(http_api::serve(
                listener,
                daemon.context.clone(),
                async move {
                    let _ = stop_rx.await;
                },
            ));

            tokio::select! {
                Some(signal) = signals.recv() => {
                    info!("Received {}, shutting down", signal);
                    let _ = stop_tx.send(());
                    match (&mut server).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!("HTTP server error during shutdown: {}", e),
                        Err(e) => warn!("HTTP server task failed: {}", e),
                    }
                }
                result = &mut server => {
                    match result {
                        Ok(Ok(())) => warn!("HTTP server stopped unexpectedly"),
                        Ok(Err(e)) => error!("HTTP server failed: {}", e),
                        Err(e) => error!("HTTP server task failed: {}", e),
                    }
                }
            }
        }
    }

    let drain_timeout = config.drain_timeout();
    tokio::select! {
        drained = daemon.drain(drain_timeout) => {
            if !drained {
                warn!("Gave up waiting after {:?}", drain_timeout);
            }
        }
        Some(signal) = signals.recv() => {
            warn!("Received second {}, exiting without draining", signal);
            std::process::exit(1);
        }
    }

    match store.count() {
        Ok(records) => info!(records, "Runtime database closed"),
        Err(e) => warn!("Failed to count records: {}", e),
    }
    drop(store);

    info!("Shutdown complete");
    Ok(())
}

/// Forward every shutdown signal received to the returned channel.
#[cfg(unix)]
fn listen_for_signals() -> Result<mpsc::UnboundedReceiver<&'static str>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                _ = sigint.recv() => "SIGINT",
                _ = sigterm.recv() => "SIGTERM",
            };
            if tx.send(name).is_err() {
                break;
            }
        }
    });
    Ok(rx)
}

#[cfg(not(unix))]
fn listen_for_signals() -> Result<mpsc::UnboundedReceiver<&'static str>> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send("Ctrl+C").is_err() {
                break;
            }
        }
    });
    Ok(rx)
}
