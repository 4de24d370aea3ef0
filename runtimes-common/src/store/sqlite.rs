//! SQLite-backed record store.

use super::{RecordStore, StoreError};
use crate::types::{RecordKey, Runtimes, TestRuntimeRecord};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use tracing::debug;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS suite_runtimes (
    name      TEXT    NOT NULL,
    platform  TEXT    NOT NULL,
    buildid   TEXT    NOT NULL,
    revision  TEXT    NOT NULL,
    timestamp INTEGER NOT NULL,
    runtimes  TEXT    NOT NULL,
    PRIMARY KEY (name, platform, buildid)
);
CREATE INDEX IF NOT EXISTS suite_runtimes_recent
    ON suite_runtimes (name, platform, timestamp DESC);
";

/// Record store persisted in a SQLite database.
///
/// Durations are stored as a JSON object of escaped test name to
/// milliseconds in the `runtimes` column.
pub struct SqliteRecordStore {
    conn: Connection,
}

impl SqliteRecordStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        debug!("Opened record store at {:?}", path);
        Self::init(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    fn decode(
        key: RecordKey,
        revision: String,
        timestamp: i64,
        json: &str,
    ) -> Result<TestRuntimeRecord, StoreError> {
        let runtimes: Runtimes = serde_json::from_str(json)
            .map_err(|source| StoreError::Decode { key: key.clone(), source })?;
        Ok(TestRuntimeRecord {
            key,
            revision,
            timestamp,
            runtimes,
        })
    }
}

impl RecordStore for SqliteRecordStore {
    fn get(&self, key: &RecordKey) -> Result<Option<TestRuntimeRecord>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT revision, timestamp, runtimes FROM suite_runtimes
                 WHERE name = ?1 AND platform = ?2 AND buildid = ?3",
                params![key.suite, key.platform, key.build_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(revision, timestamp, json)| Self::decode(key.clone(), revision, timestamp, &json))
            .transpose()
    }

    fn upsert(&mut self, record: &TestRuntimeRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(&record.runtimes).map_err(|source| StoreError::Encode {
            key: record.key.clone(),
            source,
        })?;
        self.conn.execute(
            "INSERT INTO suite_runtimes (name, platform, buildid, revision, timestamp, runtimes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (name, platform, buildid) DO UPDATE SET
                 revision = excluded.revision,
                 timestamp = excluded.timestamp,
                 runtimes = excluded.runtimes",
            params![
                record.key.suite,
                record.key.platform,
                record.key.build_id,
                record.revision,
                record.timestamp,
                json
            ],
        )?;
        Ok(())
    }

    fn recent(
        &self,
        suite: &str,
        platform: &str,
        limit: usize,
    ) -> Result<Vec<TestRuntimeRecord>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare_cached(
            "SELECT buildid, revision, timestamp, runtimes FROM suite_runtimes
             WHERE name = ?1 AND platform = ?2
             ORDER BY timestamp DESC, buildid DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![suite, platform, limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (build_id, revision, timestamp, json) = row?;
            let key = RecordKey::new(suite, platform, build_id);
            records.push(Self::decode(key, revision, timestamp, &json)?);
        }
        Ok(records)
    }

    fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM suite_runtimes", [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or_default())
    }
}
