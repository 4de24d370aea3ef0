//! Shared building blocks for the test runtime accumulator.
//!
//! Both the accumulator daemon (`runtimesd`) and the report generator
//! (`runtimes-report`) depend on this crate for the event and record types,
//! the suite registry, the record store and configuration loading.

pub mod config;
pub mod escape;
pub mod logging;
pub mod store;
pub mod suites;
pub mod types;

pub use config::{Config, ConfigError, FetchCredentials, IngestToken};
pub use escape::{DOT_ESCAPE, escape_test_name, unescape_test_name};
pub use logging::{LogConfig, LogFormat, LoggingError, LoggingGuards, init_logging};
pub use store::{GuardedStore, MemoryRecordStore, MergeOutcome, RecordStore, StoreError};
#[cfg(feature = "storage")]
pub use store::SqliteRecordStore;
pub use suites::{RegistryError, SuiteDefinition, SuiteRegistry, SuiteResolver};
pub use types::{BuildEvent, BuildPayload, RecordKey, RuntimeReport, Runtimes, TestRuntimeRecord};
