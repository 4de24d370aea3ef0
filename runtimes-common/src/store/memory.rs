//! In-process record store.

use super::{RecordStore, StoreError};
use crate::types::{RecordKey, TestRuntimeRecord};
use std::collections::BTreeMap;

/// Record store held entirely in memory. Contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: BTreeMap<RecordKey, TestRuntimeRecord>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with records, e.g. for report generation tests.
    pub fn with_records(records: impl IntoIterator<Item = TestRuntimeRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.key.clone(), r)).collect(),
        }
    }
}

impl RecordStore for MemoryRecordStore {
    fn get(&self, key: &RecordKey) -> Result<Option<TestRuntimeRecord>, StoreError> {
        Ok(self.records.get(key).cloned())
    }

    fn upsert(&mut self, record: &TestRuntimeRecord) -> Result<(), StoreError> {
        self.records.insert(record.key.clone(), record.clone());
        Ok(())
    }

    fn recent(
        &self,
        suite: &str,
        platform: &str,
        limit: usize,
    ) -> Result<Vec<TestRuntimeRecord>, StoreError> {
        let mut matching: Vec<_> = self
            .records
            .values()
            .filter(|r| r.key.suite == suite && r.key.platform == platform)
            .cloned()
            .collect();
        // Newest first; build id breaks timestamp ties so the order is stable.
        matching.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.key.build_id.cmp(&a.key.build_id))
        });
        matching.truncate(limit);
        Ok(matching)
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.records.len())
    }
}
