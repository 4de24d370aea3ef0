//! Runtime report generation.
//!
//! For each (platform, suite) the most recent `points` records are read from
//! the store and every test's durations are averaged over the records that
//! contain it. Tests whose mean falls below the threshold are dropped.

use runtimes_common::{
    RecordStore, RuntimeReport, StoreError, SuiteRegistry, TestRuntimeRecord, unescape_test_name,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Extension of report files.
pub const REPORT_SUFFIX: &str = ".runtimes.json";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to write report {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode report for {platform}/{suite}: {source}")]
    Encode {
        platform: String,
        suite: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("platform '{0}' is not configured")]
    UnknownPlatform(String),
}

/// Window and filter settings for a report run.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportOptions {
    /// Number of most recent records averaged per (platform, suite).
    pub points: usize,
    /// Tests with a mean strictly below this are omitted.
    pub threshold: f64,
    pub outdir: PathBuf,
}

/// Mean duration per test across `records`, counting only the records in
/// which a test appears. Names are returned unescaped.
pub fn average_runtimes(records: &[TestRuntimeRecord], threshold: f64) -> BTreeMap<String, f64> {
    let mut totals: BTreeMap<&str, (u128, u32)> = BTreeMap::new();
    for record in records {
        for (name, ms) in &record.runtimes {
            let entry = totals.entry(name.as_str()).or_default();
            entry.0 += u128::from(*ms);
            entry.1 += 1;
        }
    }

    totals
        .into_iter()
        .map(|(name, (sum, count))| (name, sum as f64 / f64::from(count)))
        .filter(|(_, mean)| *mean >= threshold)
        .map(|(name, mean)| (unescape_test_name(name), mean))
        .collect()
}

/// Build the report for one (platform, suite).
///
/// An empty history yields an empty report.
pub fn generate_runtimes(
    store: &dyn RecordStore,
    platform: &str,
    suite: &str,
    points: usize,
    threshold: f64,
) -> Result<RuntimeReport, StoreError> {
    let records = store.recent(suite, platform, points)?;
    let runtimes = average_runtimes(&records, threshold);
    debug!(
        platform,
        suite,
        samples = records.len(),
        tests = runtimes.len(),
        "Computed runtime averages"
    );
    Ok(RuntimeReport {
        platform: platform.to_string(),
        suite: suite.to_string(),
        samples: records.len(),
        runtimes,
    })
}

/// `<outdir>/<platform>/<suite>.runtimes.json`
pub fn report_path(outdir: &Path, platform: &str, suite: &str) -> PathBuf {
    outdir.join(platform).join(format!("{suite}{REPORT_SUFFIX}"))
}

/// Write the test name to mean duration mapping as pretty JSON.
pub fn write_report(outdir: &Path, report: &RuntimeReport) -> Result<PathBuf, ReportError> {
    let path = report_path(outdir, &report.platform, &report.suite);
    let json =
        serde_json::to_string_pretty(&report.runtimes).map_err(|source| ReportError::Encode {
            platform: report.platform.clone(),
            suite: report.suite.clone(),
            source,
        })?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ReportError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(&path, json + "\n").map_err(|source| ReportError::Write {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Generate and write reports for every (platform, suite) in the registry,
/// or for one platform's suites when `only_platform` is given.
pub fn generate_all(
    store: &dyn RecordStore,
    registry: &SuiteRegistry,
    options: &ReportOptions,
    only_platform: Option<&str>,
) -> Result<Vec<RuntimeReport>, ReportError> {
    if let Some(platform) = only_platform
        && !registry.is_configured(platform)
    {
        return Err(ReportError::UnknownPlatform(platform.to_string()));
    }

    let mut reports = Vec::new();
    for (platform, suites) in registry.platforms() {
        if only_platform.is_some_and(|only| only != platform) {
            continue;
        }
        for suite in suites {
            let report =
                generate_runtimes(store, platform, suite, options.points, options.threshold)?;
            let path = write_report(&options.outdir, &report)?;
            info!(
                samples = report.samples,
                tests = report.runtimes.len(),
                "Wrote {}",
                path.display()
            );
            reports.push(report);
        }
    }
    Ok(reports)
}
