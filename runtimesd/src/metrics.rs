//! Prometheus metrics for the accumulator.

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Counters and gauges exported on `/metrics`.
///
/// Each instance owns its own registry, so tests can build as many as they
/// like without name clashes.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub events_received: IntCounter,
    pub events_skipped: IntCounterVec,
    pub events_evicted: IntCounter,
    pub events_processed: IntCounter,
    pub events_failed: IntCounterVec,
    pub artifacts_fetched: IntCounter,
    pub queue_depth: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let events_received = IntCounter::new(
            "runtimes_events_received_total",
            "Build events received from the event source",
        )?;
        let events_skipped = IntCounterVec::new(
            Opts::new(
                "runtimes_events_skipped_total",
                "Build events ignored as irrelevant",
            ),
            &["reason"],
        )?;
        let events_evicted = IntCounter::new(
            "runtimes_events_evicted_total",
            "Pending build events dropped because the queue was full",
        )?;
        let events_processed = IntCounter::new(
            "runtimes_events_processed_total",
            "Build events whose runtimes were merged into the store",
        )?;
        let events_failed = IntCounterVec::new(
            Opts::new(
                "runtimes_events_failed_total",
                "Build events abandoned after a pipeline error",
            ),
            &["stage"],
        )?;
        let artifacts_fetched = IntCounter::new(
            "runtimes_artifacts_fetched_total",
            "Raw log artifacts downloaded and parsed",
        )?;
        let queue_depth = IntGauge::new("runtimes_queue_depth", "Pending build events")?;

        registry.register(Box::new(events_received.clone()))?;
        registry.register(Box::new(events_skipped.clone()))?;
        registry.register(Box::new(events_evicted.clone()))?;
        registry.register(Box::new(events_processed.clone()))?;
        registry.register(Box::new(events_failed.clone()))?;
        registry.register(Box::new(artifacts_fetched.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;

        Ok(Self {
            registry,
            events_received,
            events_skipped,
            events_evicted,
            events_processed,
            events_failed,
            artifacts_fetched,
            queue_depth,
        })
    }

    /// Render all metrics in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}
