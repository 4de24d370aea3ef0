//! Common types shared by the accumulator and the report generator.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-test durations in milliseconds, keyed by escaped test name.
pub type Runtimes = BTreeMap<String, u64>;

/// Filename suffix identifying raw structured test logs among build artifacts.
pub const RAW_LOG_SUFFIX: &str = "_raw.log";

/// Build-completion payload as delivered by the event source.
///
/// Field names follow the normalized build message format. Every field is
/// required except `blobber_files`, whose absence means the build uploaded no
/// artifacts and the payload is skipped before it reaches the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildPayload {
    /// Platform name, e.g. `linux64`.
    pub platform: String,
    /// Build type, e.g. `opt` or `debug`.
    pub buildtype: String,
    /// Build identifier.
    pub buildid: String,
    /// Source revision the build was made from.
    pub revision: String,
    /// Build timestamp in seconds since the epoch.
    pub builddate: i64,
    /// Raw test-group identifier, e.g. `mochitest-bc-3`.
    pub test: String,
    /// Uploaded artifacts, filename to URL.
    #[serde(default)]
    pub blobber_files: Option<BTreeMap<String, String>>,
}

impl BuildPayload {
    /// Platform key used by the suite registry (`<platform>-<buildtype>`).
    pub fn platform_key(&self) -> String {
        format!("{}-{}", self.platform, self.buildtype)
    }

    /// Convert into a [`BuildEvent`], or `None` if the payload has no artifacts.
    pub fn into_event(self) -> Option<BuildEvent> {
        let platform = self.platform_key();
        let artifacts = self.blobber_files?;
        Some(BuildEvent {
            platform,
            build_id: self.buildid,
            revision: self.revision,
            build_date: self.builddate,
            test_group: self.test,
            artifacts,
        })
    }
}

/// A build-completion event admitted to the queue.
///
/// Immutable once constructed; consumed by exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildEvent {
    /// Combined platform key (`<platform>-<buildtype>`).
    pub platform: String,
    /// Build identifier.
    pub build_id: String,
    /// Source revision.
    pub revision: String,
    /// Build timestamp in seconds since the epoch.
    pub build_date: i64,
    /// Raw test-group identifier.
    pub test_group: String,
    /// Uploaded artifacts, filename to URL.
    pub artifacts: BTreeMap<String, String>,
}

impl BuildEvent {
    /// URLs of the raw structured logs among this build's artifacts.
    ///
    /// Returned in filename order so later files consistently win when two
    /// logs report the same test.
    pub fn raw_log_urls(&self) -> Vec<&str> {
        self.artifacts
            .iter()
            .filter(|(name, _)| name.ends_with(RAW_LOG_SUFFIX))
            .map(|(_, url)| url.as_str())
            .collect()
    }

    /// Build timestamp as a UTC datetime, if it is representable.
    pub fn build_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.build_date, 0)
    }

    /// Build timestamp for log lines: RFC 3339, or the raw seconds when out
    /// of range.
    pub fn built_at(&self) -> String {
        match self.build_datetime() {
            Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Secs, true),
            None => self.build_date.to_string(),
        }
    }

    /// Short label for log lines.
    pub fn label(&self) -> String {
        format!("{}-{}", self.build_id, self.platform)
    }
}

/// Key of a persisted runtime record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    /// Canonical suite name.
    pub suite: String,
    /// Platform key (`<platform>-<buildtype>`).
    pub platform: String,
    /// Build identifier.
    pub build_id: String,
}

impl RecordKey {
    pub fn new(
        suite: impl Into<String>,
        platform: impl Into<String>,
        build_id: impl Into<String>,
    ) -> Self {
        Self {
            suite: suite.into(),
            platform: platform.into(),
            build_id: build_id.into(),
        }
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.suite, self.platform, self.build_id)
    }
}

/// Latest known per-test durations for one (suite, platform, build).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRuntimeRecord {
    pub key: RecordKey,
    pub revision: String,
    /// Build timestamp in seconds since the epoch.
    pub timestamp: i64,
    /// Escaped test name to duration in milliseconds.
    pub runtimes: Runtimes,
}

impl TestRuntimeRecord {
    /// Create an empty record.
    pub fn new(key: RecordKey, revision: impl Into<String>, timestamp: i64) -> Self {
        Self {
            key,
            revision: revision.into(),
            timestamp,
            runtimes: Runtimes::new(),
        }
    }

    /// Merge new durations into this record; existing tests are overwritten.
    pub fn merge(&mut self, runtimes: &Runtimes) {
        self.runtimes
            .extend(runtimes.iter().map(|(name, ms)| (name.clone(), *ms)));
    }
}

/// Windowed average durations for one (platform, suite).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeReport {
    pub platform: String,
    pub suite: String,
    /// Number of records the averages were computed from.
    pub samples: usize,
    /// Unescaped test name to mean duration in milliseconds.
    pub runtimes: BTreeMap<String, f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> BuildPayload {
        serde_json::from_str(
            r#"{
                "platform": "linux64",
                "buildtype": "opt",
                "buildid": "20150601030203",
                "revision": "abcdef123456",
                "builddate": 1433127723,
                "test": "mochitest-bc-e10s",
                "blobber_files": {
                    "mochitest-browser-chrome_raw.log": "https://example.test/a_raw.log",
                    "mochitest-browser-chrome_errorsummary.log": "https://example.test/a_errorsummary.log",
                    "zzz_raw.log": "https://example.test/z_raw.log"
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_platform_key_joins_platform_and_buildtype() {
        assert_eq!(payload().platform_key(), "linux64-opt");
    }

    #[test]
    fn test_payload_without_blobber_files_yields_no_event() {
        let mut p = payload();
        p.blobber_files = None;
        assert!(p.into_event().is_none());
    }

    #[test]
    fn test_payload_missing_blobber_files_field_deserializes() {
        let p: BuildPayload = serde_json::from_str(
            r#"{"platform":"linux","buildtype":"debug","buildid":"1","revision":"r",
                "builddate":0,"test":"mochitest-gl"}"#,
        )
        .unwrap();
        assert!(p.blobber_files.is_none());
    }

    #[test]
    fn test_raw_log_urls_filters_and_orders_by_filename() {
        let event = payload().into_event().unwrap();
        assert_eq!(event.platform, "linux64-opt");
        assert_eq!(
            event.raw_log_urls(),
            vec!["https://example.test/a_raw.log", "https://example.test/z_raw.log"]
        );
    }

    #[test]
    fn test_build_datetime() {
        let event = payload().into_event().unwrap();
        let dt = event.build_datetime().unwrap();
        assert_eq!(dt.timestamp(), 1433127723);
        assert_eq!(event.built_at(), "2015-06-01T03:02:03Z");
    }

    #[test]
    fn test_built_at_out_of_range_falls_back_to_seconds() {
        let mut event = payload().into_event().unwrap();
        event.build_date = i64::MAX;
        assert!(event.build_datetime().is_none());
        assert_eq!(event.built_at(), i64::MAX.to_string());
    }

    #[test]
    fn test_record_merge_adds_and_overwrites() {
        let mut record = TestRuntimeRecord::new(RecordKey::new("s", "p", "b"), "r", 0);
        record.merge(&Runtimes::from([("a".to_string(), 1)]));
        record.merge(&Runtimes::from([("b".to_string(), 2)]));
        assert_eq!(
            record.runtimes,
            Runtimes::from([("a".to_string(), 1), ("b".to_string(), 2)])
        );

        record.merge(&Runtimes::from([("a".to_string(), 2)]));
        assert_eq!(record.runtimes.get("a"), Some(&2));
    }

    #[test]
    fn test_record_key_display() {
        let key = RecordKey::new("mochitest-gl", "linux-opt", "42");
        assert_eq!(key.to_string(), "mochitest-gl/linux-opt/42");
    }
}
