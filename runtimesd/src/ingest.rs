//! Pre-queue filter for inbound build payloads.

use crate::metrics::Metrics;
use crate::queue::{Admission, BuildQueue};
use runtimes_common::{BuildPayload, SuiteRegistry};
use std::sync::Arc;
use tracing::{debug, warn};

/// Why a payload never reached the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The payload carries no artifact mapping.
    NoArtifacts,
    /// `platform-buildtype` has no configured suites.
    UnknownPlatform,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoArtifacts => "no_artifacts",
            Self::UnknownPlatform => "unknown_platform",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Queued,
    /// Queued after dropping the oldest pending build (its label).
    Evicted(String),
    Skipped(SkipReason),
    /// Shutting down; no new events are accepted.
    Closed,
}

/// Filters payloads and feeds the queue.
#[derive(Clone)]
pub struct Ingest {
    registry: Arc<SuiteRegistry>,
    queue: Arc<BuildQueue>,
    metrics: Metrics,
}

impl Ingest {
    pub fn new(registry: Arc<SuiteRegistry>, queue: Arc<BuildQueue>, metrics: Metrics) -> Self {
        Self {
            registry,
            queue,
            metrics,
        }
    }

    pub fn submit(&self, payload: BuildPayload) -> IngestOutcome {
        self.metrics.events_received.inc();

        let platform = payload.platform_key();
        let build_id = payload.buildid.clone();

        let skip = if !self.registry.is_configured(&platform) {
            Some(SkipReason::UnknownPlatform)
        } else if payload.blobber_files.is_none() {
            Some(SkipReason::NoArtifacts)
        } else {
            None
        };
        if let Some(reason) = skip {
            debug!(
                build_id = %build_id,
                platform = %platform,
                reason = reason.as_str(),
                "Skipping build"
            );
            self.metrics
                .events_skipped
                .with_label_values(&[reason.as_str()])
                .inc();
            return IngestOutcome::Skipped(reason);
        }

        let Some(event) = payload.into_event() else {
            return IngestOutcome::Skipped(SkipReason::NoArtifacts);
        };

        let outcome = match self.queue.push(event) {
            Admission::Queued => {
                debug!(build_id = %build_id, platform = %platform, "Queued build");
                IngestOutcome::Queued
            }
            Admission::Evicted(old) => {
                self.metrics.events_evicted.inc();
                warn!(
                    evicted = %old.label(),
                    total_evicted = self.queue.evicted_total(),
                    "Queue full, dropped oldest pending build"
                );
                IngestOutcome::Evicted(old.label())
            }
            Admission::Closed(_) => {
                debug!(build_id = %build_id, "Queue closed, rejecting build");
                IngestOutcome::Closed
            }
        };
        self.metrics.queue_depth.set(self.queue.len() as i64);
        outcome
    }

    pub fn queue(&self) -> &Arc<BuildQueue> {
        &self.queue
    }
}
