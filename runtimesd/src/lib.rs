//! Test runtime accumulator daemon.
//!
//! Build payloads enter through [`ingest::Ingest`] (HTTP or replay), wait in
//! the bounded [`queue::BuildQueue`], and are processed by the
//! [`worker::WorkerPool`], which merges per-test durations into the shared
//! record store.

pub mod http_api;
pub mod ingest;
pub mod metrics;
pub mod parser;
pub mod processor;
pub mod queue;
pub mod replay;
pub mod retrieve;
pub mod worker;

use std::sync::Arc;
use std::time::{Duration, Instant};

use runtimes_common::{Config, GuardedStore, IngestToken, RegistryError, SuiteResolver};
use thiserror::Error;
use tracing::{info, warn};

use ingest::Ingest;
use metrics::Metrics;
use processor::BuildProcessor;
use queue::BuildQueue;
use retrieve::LogRetriever;
use worker::WorkerPool;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("invalid suite registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Shared daemon context passed to API handlers and ingest sources.
#[derive(Clone)]
pub struct DaemonContext {
    /// Pre-queue filter feeding the build queue.
    pub ingest: Ingest,
    pub metrics: Metrics,
    /// Daemon start time.
    pub started_at: Instant,
    /// Daemon version.
    pub version: &'static str,
    /// Daemon process ID.
    pub pid: u32,
    /// Bearer token required by `POST /events`, if any.
    pub token: Option<IngestToken>,
}

/// A running pipeline: queue, workers and the store they write to.
pub struct Daemon {
    pub context: DaemonContext,
    pub store: Arc<GuardedStore>,
    pool: WorkerPool,
}

impl Daemon {
    /// Build every component from `config` and start the workers.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(config: &Config, store: GuardedStore) -> Result<Self, DaemonError> {
        let registry = Arc::new(config.registry()?);
        let resolver = Arc::new(SuiteResolver::new(&registry)?);
        let metrics = Metrics::new()?;
        let retriever = LogRetriever::new(config.fetch_timeout(), config.credentials())?;
        let store = Arc::new(store);

        info!(
            suites = registry.suite_count(),
            platforms = registry.platform_count(),
            credentials = retriever.has_credentials(),
            ingest_token = config.server.token.is_some(),
            "Suite registry loaded"
        );

        let queue = Arc::new(BuildQueue::new(config.queue.capacity));
        let processor =
            BuildProcessor::new(resolver, retriever, Arc::clone(&store), metrics.clone());
        let pool = WorkerPool::spawn(
            config.workers.count,
            Arc::clone(&queue),
            processor,
            metrics.clone(),
        );

        let context = DaemonContext {
            ingest: Ingest::new(registry, queue, metrics.clone()),
            metrics,
            started_at: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
            pid: std::process::id(),
            token: config.server.token.clone(),
        };

        Ok(Self {
            context,
            store,
            pool,
        })
    }

    pub fn queue(&self) -> &Arc<BuildQueue> {
        self.context.ingest.queue()
    }

    pub fn workers(&self) -> usize {
        self.pool.size()
    }

    /// Stop accepting events and wait up to `timeout` for pending and
    /// in-flight events to finish.
    ///
    /// Returns `false` if the wait timed out; remaining work is abandoned.
    pub async fn drain(self, timeout: Duration) -> bool {
        let queue = Arc::clone(self.queue());
        queue.close();
        info!(
            pending = queue.len(),
            in_flight = self.pool.in_flight(),
            "Draining build queue"
        );

        let in_flight = self.pool.in_flight_counter();
        let abort_handles = self.pool.abort_handles();
        match tokio::time::timeout(timeout, self.pool.join()).await {
            Ok(()) => {
                info!("Build queue drained");
                true
            }
            Err(_) => {
                warn!(
                    pending = queue.len(),
                    in_flight = in_flight.load(std::sync::atomic::Ordering::SeqCst),
                    "Drain timed out, abandoning remaining builds"
                );
                for handle in abort_handles {
                    handle.abort();
                }
                false
            }
        }
    }
}
