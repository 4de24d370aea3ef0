//! End-to-end tests: payload in, runtime record out.

use axum::Router;
use axum::extract::Path;
use axum::routing::get;
use runtimes_common::{
    BuildPayload, Config, DOT_ESCAPE, GuardedStore, MemoryRecordStore, RecordKey,
    SqliteRecordStore,
};
use runtimesd::Daemon;
use runtimesd::ingest::IngestOutcome;
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

fn payload(build_id: &str, test: &str, artifacts: &[(String, String)]) -> BuildPayload {
    BuildPayload {
        platform: "linux64".into(),
        buildtype: "opt".into(),
        buildid: build_id.into(),
        revision: "abcdef123456".into(),
        builddate: 1433127723,
        test: test.into(),
        blobber_files: Some(artifacts.iter().cloned().collect::<BTreeMap<_, _>>()),
    }
}

fn config(workers: usize) -> Config {
    let mut config = Config::default();
    config.workers.count = workers;
    config.queue.capacity = 100;
    config.fetch.timeout_secs = 5;
    config
}

#[tokio::test]
async fn test_build_event_produces_record() {
    let base = serve(Router::new().route(
        "/mochitest-browser-chrome_raw.log",
        get(|| async {
            "{\"action\":\"suite_start\",\"tests\":[\"x.y\"],\"time\":90}\n\
             {\"action\":\"test_start\",\"test\":\"x.y\",\"time\":100}\n\
             {\"action\":\"test_end\",\"test\":\"x.y\",\"time\":150,\"status\":\"OK\"}\n\
             {\"action\":\"suite_end\",\"time\":160}\n"
        }),
    ))
    .await;

    let daemon = Daemon::start(&config(2), GuardedStore::new(MemoryRecordStore::new())).unwrap();
    let store = daemon.store.clone();

    let outcome = daemon.context.ingest.submit(payload(
        "20150601030203",
        "mochitest-bc-e10s",
        &[(
            "mochitest-browser-chrome_raw.log".into(),
            format!("{base}/mochitest-browser-chrome_raw.log"),
        )],
    ));
    assert_eq!(outcome, IngestOutcome::Queued);
    assert!(daemon.drain(Duration::from_secs(10)).await);

    let key = RecordKey::new("mochitest-browser-chrome-e10s", "linux64-opt", "20150601030203");
    let record = store.get(&key).unwrap().expect("record should exist");
    assert_eq!(
        record.runtimes,
        BTreeMap::from([(format!("x{DOT_ESCAPE}y"), 50)])
    );
    assert_eq!(record.revision, "abcdef123456");
    assert_eq!(record.timestamp, 1433127723);
}

#[tokio::test]
async fn test_concurrent_merges_to_same_record_are_not_lost() {
    let base = serve(Router::new().route(
        "/log/{n}",
        get(|Path(n): Path<u32>| async move {
            format!(
                "{{\"action\":\"test_start\",\"test\":\"t{n}\",\"time\":0}}\n\
                 {{\"action\":\"test_end\",\"test\":\"t{n}\",\"time\":{n}}}\n\
                 {{\"action\":\"test_start\",\"test\":\"shared\",\"time\":0}}\n\
                 {{\"action\":\"test_end\",\"test\":\"shared\",\"time\":1}}\n"
            )
        }),
    ))
    .await;

    let dir = tempfile::tempdir().unwrap();
    let db = SqliteRecordStore::open(&dir.path().join("runtimes.db")).unwrap();
    let daemon = Daemon::start(&config(8), GuardedStore::new(db)).unwrap();
    let store = daemon.store.clone();

    for n in 1..=40u32 {
        let outcome = daemon.context.ingest.submit(payload(
            "42",
            "mochitest-gl-3",
            &[(format!("chunk{n}_raw.log"), format!("{base}/log/{n}"))],
        ));
        assert_eq!(outcome, IngestOutcome::Queued);
    }
    assert!(daemon.drain(Duration::from_secs(30)).await);

    let key = RecordKey::new("mochitest-gl", "linux64-opt", "42");
    let record = store.get(&key).unwrap().expect("record should exist");
    assert_eq!(record.runtimes.len(), 41);
    for n in 1..=40u64 {
        assert_eq!(record.runtimes.get(&format!("t{n}")), Some(&n));
    }
    assert_eq!(record.runtimes.get("shared"), Some(&1));
    assert_eq!(store.count().unwrap(), 1);
}

#[tokio::test]
async fn test_unmatched_and_failed_events_leave_no_records() {
    let base = serve(Router::new()).await;

    let daemon = Daemon::start(&config(2), GuardedStore::new(MemoryRecordStore::new())).unwrap();
    let store = daemon.store.clone();
    let artifacts = [("a_raw.log".to_string(), format!("{base}/missing_raw.log"))];

    daemon.context.ingest.submit(payload("1", "reftest-3", &artifacts));
    daemon.context.ingest.submit(payload("2", "mochitest-gl", &artifacts));
    assert!(daemon.drain(Duration::from_secs(10)).await);

    assert_eq!(store.count().unwrap(), 0);
}
