//! Persistent store of per-build test runtime records.
//!
//! [`RecordStore`] is the backend seam. [`GuardedStore`] owns a backend
//! together with the lock that serializes read-modify-write merges, so two
//! workers contributing to the same (suite, platform, build) never lose an
//! update.

mod memory;
#[cfg(feature = "storage")]
mod sqlite;

pub use memory::MemoryRecordStore;
#[cfg(feature = "storage")]
pub use sqlite::SqliteRecordStore;

use crate::types::{RecordKey, Runtimes, TestRuntimeRecord};
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

/// Errors raised by record store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[cfg(feature = "storage")]
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("failed to encode runtimes for {key}: {source}")]
    Encode {
        key: RecordKey,
        #[source]
        source: serde_json::Error,
    },

    #[error("corrupt runtimes for {key}: {source}")]
    Decode {
        key: RecordKey,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to create store directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Backend for runtime records.
///
/// Implementations need not be internally synchronized; callers that share a
/// store between workers go through [`GuardedStore`].
pub trait RecordStore: Send {
    /// Look up the record for a key.
    fn get(&self, key: &RecordKey) -> Result<Option<TestRuntimeRecord>, StoreError>;

    /// Insert or replace a record.
    fn upsert(&mut self, record: &TestRuntimeRecord) -> Result<(), StoreError>;

    /// The most recent `limit` records for a (suite, platform), newest first.
    fn recent(
        &self,
        suite: &str,
        platform: &str,
        limit: usize,
    ) -> Result<Vec<TestRuntimeRecord>, StoreError>;

    /// Total number of stored records.
    fn count(&self) -> Result<usize, StoreError>;
}

/// Result of a merge into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Whether the record did not exist before this merge.
    pub created: bool,
    /// Number of tests in the record after the merge.
    pub tests: usize,
}

/// A record store behind a process-wide lock.
pub struct GuardedStore {
    inner: Mutex<Box<dyn RecordStore>>,
}

impl GuardedStore {
    pub fn new(store: impl RecordStore + 'static) -> Self {
        Self {
            inner: Mutex::new(Box::new(store)),
        }
    }

    /// Get-or-create the record for `key`, merge `runtimes` into it and persist.
    ///
    /// The whole sequence runs under the store lock. Revision and timestamp
    /// are only used when the record is created.
    pub fn merge(
        &self,
        key: &RecordKey,
        revision: &str,
        timestamp: i64,
        runtimes: &Runtimes,
    ) -> Result<MergeOutcome, StoreError> {
        let mut store = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let (mut record, created) = match store.get(key)? {
            Some(existing) => (existing, false),
            None => (TestRuntimeRecord::new(key.clone(), revision, timestamp), true),
        };
        record.merge(runtimes);
        store.upsert(&record)?;

        debug!(
            key = %key,
            created,
            merged = runtimes.len(),
            total = record.runtimes.len(),
            "Merged runtimes"
        );

        Ok(MergeOutcome {
            created,
            tests: record.runtimes.len(),
        })
    }

    pub fn get(&self, key: &RecordKey) -> Result<Option<TestRuntimeRecord>, StoreError> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).get(key)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).count()
    }
}
