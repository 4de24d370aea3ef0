//! Fixed-size pool of pipeline workers.
//!
//! Each worker takes one event at a time from the shared queue and runs it to
//! completion before taking the next. Every event runs in its own task, so a
//! failure or panic is confined to that event.

use crate::metrics::Metrics;
use crate::processor::{BuildProcessor, ProcessOutcome};
use crate::queue::BuildQueue;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info};

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    in_flight: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Start `count` workers (minimum 1) draining `queue`.
    pub fn spawn(
        count: usize,
        queue: Arc<BuildQueue>,
        processor: BuildProcessor,
        metrics: Metrics,
    ) -> Self {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let handles = (0..count.max(1))
            .map(|id| {
                let worker = Worker {
                    id,
                    queue: Arc::clone(&queue),
                    processor: processor.clone(),
                    metrics: metrics.clone(),
                    in_flight: Arc::clone(&in_flight),
                };
                tokio::spawn(worker.run())
            })
            .collect::<Vec<_>>();
        info!("Started {} pipeline workers", handles.len());
        Self { handles, in_flight }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Events currently being processed.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Shared in-flight counter, for status reporting after the pool is moved.
    pub fn in_flight_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.in_flight)
    }

    /// Wait for every worker to exit. Workers exit once the queue is closed
    /// and drained.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Worker task ended abnormally: {}", e);
            }
        }
    }

    /// Handles that stop workers immediately, abandoning in-flight events.
    pub fn abort_handles(&self) -> Vec<AbortHandle> {
        self.handles.iter().map(JoinHandle::abort_handle).collect()
    }
}

struct Worker {
    id: usize,
    queue: Arc<BuildQueue>,
    processor: BuildProcessor,
    metrics: Metrics,
    in_flight: Arc<AtomicUsize>,
}

impl Worker {
    async fn run(self) {
        debug!(worker = self.id, "Worker started");
        while let Some(event) = self.queue.pop().await {
            self.metrics.queue_depth.set(self.queue.len() as i64);
            self.in_flight.fetch_add(1, Ordering::SeqCst);

            let label = event.label();
            let built_at = event.built_at();
            let processor = self.processor.clone();
            let task = tokio::spawn(async move { processor.process(&event).await });

            match task.await {
                Ok(Ok(outcome)) => {
                    if let ProcessOutcome::Merged {
                        key,
                        artifacts,
                        tests,
                        created,
                    } = &outcome
                    {
                        self.metrics.events_processed.inc();
                        info!(
                            worker = self.id,
                            key = %key,
                            artifacts,
                            tests,
                            created,
                            built_at = %built_at,
                            "Recorded runtimes for {}",
                            label
                        );
                    } else {
                        self.metrics
                            .events_skipped
                            .with_label_values(&[outcome.label()])
                            .inc();
                    }
                }
                Ok(Err(e)) => {
                    self.metrics
                        .events_failed
                        .with_label_values(&[e.stage()])
                        .inc();
                    error!(
                        worker = self.id,
                        stage = e.stage(),
                        "Failed to process {}: {}",
                        label,
                        e
                    );
                }
                Err(e) => {
                    self.metrics
                        .events_failed
                        .with_label_values(&["panic"])
                        .inc();
                    error!(worker = self.id, "Processing {} aborted: {}", label, e);
                }
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        debug!(worker = self.id, "Worker stopped");
    }
}
