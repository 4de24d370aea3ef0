//! Per-build pipeline: resolve, retrieve, parse, merge.

use crate::metrics::Metrics;
use crate::parser::{ParseError, parse_log};
use crate::retrieve::{LogRetriever, RetrieveError};
use runtimes_common::{BuildEvent, GuardedStore, RecordKey, Runtimes, StoreError, SuiteResolver};
use std::io::BufReader;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Retrieve(#[from] RetrieveError),

    #[error("failed to parse {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: ParseError,
    },

    #[error("failed to merge runtimes for {key}: {source}")]
    Store {
        key: RecordKey,
        #[source]
        source: StoreError,
    },

    #[error("{stage} task failed: {message}")]
    Task {
        stage: &'static str,
        message: String,
    },
}

impl ProcessError {
    /// Pipeline stage label used in logs and metrics.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Retrieve(_) => "retrieve",
            Self::Parse { .. } => "parse",
            Self::Store { .. } => "store",
            Self::Task { stage, .. } => *stage,
        }
    }
}

/// How a build event ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Runtimes were merged into the record for `key`.
    Merged {
        key: RecordKey,
        artifacts: usize,
        tests: usize,
        created: bool,
    },
    /// The test group matched no suite enabled on the platform.
    UnknownSuite,
    /// The build uploaded no raw logs.
    NoRawLogs,
}

impl ProcessOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Merged { .. } => "merged",
            Self::UnknownSuite => "unknown_suite",
            Self::NoRawLogs => "no_raw_logs",
        }
    }
}

/// Runs the pipeline for one event at a time. Cheap to clone.
#[derive(Clone)]
pub struct BuildProcessor {
    resolver: Arc<SuiteResolver>,
    retriever: LogRetriever,
    store: Arc<GuardedStore>,
    metrics: Metrics,
}

impl BuildProcessor {
    pub fn new(
        resolver: Arc<SuiteResolver>,
        retriever: LogRetriever,
        store: Arc<GuardedStore>,
        metrics: Metrics,
    ) -> Self {
        Self {
            resolver,
            retriever,
            store,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<GuardedStore> {
        &self.store
    }

    pub async fn process(&self, event: &BuildEvent) -> Result<ProcessOutcome, ProcessError> {
        let Some(suite) = self.resolver.resolve(&event.test_group, &event.platform) else {
            debug!(
                build_id = %event.build_id,
                platform = %event.platform,
                test_group = %event.test_group,
                built_at = %event.built_at(),
                "No suite matches test group"
            );
            return Ok(ProcessOutcome::UnknownSuite);
        };

        let urls = event.raw_log_urls();
        if urls.is_empty() {
            debug!(
                build_id = %event.build_id,
                built_at = %event.built_at(),
                suite,
                "Build has no raw logs"
            );
            return Ok(ProcessOutcome::NoRawLogs);
        }

        debug!(
            build_id = %event.build_id,
            built_at = %event.built_at(),
            suite,
            artifacts = urls.len(),
            "Fetching raw logs"
        );
        let mut combined = Runtimes::new();
        for url in &urls {
            let runtimes = self.fetch_and_parse(url).await?;
            // Later artifacts overwrite earlier ones.
            combined.extend(runtimes);
        }

        let key = RecordKey::new(suite, &event.platform, &event.build_id);
        let outcome = {
            let store = Arc::clone(&self.store);
            let key = key.clone();
            let revision = event.revision.clone();
            let timestamp = event.build_date;
            tokio::task::spawn_blocking(move || {
                store
                    .merge(&key, &revision, timestamp, &combined)
                    .map_err(|source| ProcessError::Store { key, source })
            })
            .await
            .map_err(|e| ProcessError::Task {
                stage: "store",
                message: e.to_string(),
            })??
        };

        Ok(ProcessOutcome::Merged {
            key,
            artifacts: urls.len(),
            tests: outcome.tests,
            created: outcome.created,
        })
    }

    async fn fetch_and_parse(&self, url: &str) -> Result<Runtimes, ProcessError> {
        let scratch = self.retriever.fetch(url).await?;
        self.metrics.artifacts_fetched.inc();

        let owned_url = url.to_string();
        let parsed = tokio::task::spawn_blocking(move || {
            let file = scratch.reopen().map_err(|e| ProcessError::Parse {
                url: owned_url.clone(),
                source: ParseError::Io(e),
            })?;
            let parsed = parse_log(BufReader::new(file)).map_err(|source| ProcessError::Parse {
                url: owned_url,
                source,
            })?;
            // `scratch` is dropped here, removing the file.
            Ok::<_, ProcessError>(parsed)
        })
        .await
        .map_err(|e| ProcessError::Task {
            stage: "parse",
            message: e.to_string(),
        })??;

        debug!(
            url,
            tests = parsed.runtimes.len(),
            lines = parsed.stats.lines,
            malformed = parsed.stats.malformed,
            "Parsed raw log"
        );
        Ok(parsed.runtimes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;
    use runtimes_common::{MemoryRecordStore, SuiteRegistry};
    use std::collections::BTreeMap;
    use std::time::Duration;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn processor() -> BuildProcessor {
        let resolver = SuiteResolver::new(&SuiteRegistry::builtin()).unwrap();
        BuildProcessor::new(
            Arc::new(resolver),
            LogRetriever::new(Duration::from_secs(5), None).unwrap(),
            Arc::new(GuardedStore::new(MemoryRecordStore::new())),
            Metrics::new().unwrap(),
        )
    }

    fn event(test_group: &str, artifacts: &[(&str, String)]) -> BuildEvent {
        BuildEvent {
            platform: "linux64-opt".into(),
            build_id: "20150601030203".into(),
            revision: "abcdef".into(),
            build_date: 1433127723,
            test_group: test_group.into(),
            artifacts: artifacts
                .iter()
                .map(|(name, url)| (name.to_string(), url.clone()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[tokio::test]
    async fn test_unknown_suite_is_skipped() {
        let outcome = processor()
            .process(&event("xpcshell", &[("a_raw.log", "http://unused/".into())]))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::UnknownSuite);
    }

    #[tokio::test]
    async fn test_no_raw_logs_is_skipped() {
        let outcome = processor()
            .process(&event(
                "mochitest-gl-2",
                &[("a_errorsummary.log", "http://unused/".into())],
            ))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::NoRawLogs);
    }

    #[tokio::test]
    async fn test_last_artifact_wins() {
        let base = serve(
            Router::new()
                .route(
                    "/a",
                    get(|| async {
                        "{\"action\":\"test_start\",\"test\":\"t\",\"time\":0}\n\
                         {\"action\":\"test_end\",\"test\":\"t\",\"time\":10}\n\
                         {\"action\":\"test_start\",\"test\":\"only-a\",\"time\":0}\n\
                         {\"action\":\"test_end\",\"test\":\"only-a\",\"time\":7}\n"
                    }),
                )
                .route(
                    "/b",
                    get(|| async {
                        "{\"action\":\"test_start\",\"test\":\"t\",\"time\":0}\n\
                         {\"action\":\"test_end\",\"test\":\"t\",\"time\":99}\n"
                    }),
                ),
        )
        .await;

        let processor = processor();
        let outcome = processor
            .process(&event(
                "mochitest-gl",
                &[
                    ("1_raw.log", format!("{base}/a")),
                    ("2_raw.log", format!("{base}/b")),
                ],
            ))
            .await
            .unwrap();

        let ProcessOutcome::Merged { key, artifacts, tests, created } = outcome else {
            panic!("expected merge, got {outcome:?}");
        };
        assert_eq!(artifacts, 2);
        assert_eq!(tests, 2);
        assert!(created);

        let record = processor.store().get(&key).unwrap().unwrap();
        assert_eq!(record.runtimes.get("t"), Some(&99));
        assert_eq!(record.runtimes.get("only-a"), Some(&7));
        assert_eq!(record.revision, "abcdef");
        assert_eq!(record.timestamp, 1433127723);
    }

    #[tokio::test]
    async fn test_retrieval_failure_aborts_event() {
        let base = serve(
            Router::new().route("/gone", get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "") })),
        )
        .await;

        let processor = processor();
        let err = processor
            .process(&event("mochitest-gl", &[("x_raw.log", format!("{base}/gone"))]))
            .await
            .unwrap_err();
        assert_eq!(err.stage(), "retrieve");
        assert_eq!(processor.store().count().unwrap(), 0);
    }
}
