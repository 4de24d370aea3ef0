//! JSONL replay source: one build payload per line.

use crate::ingest::{Ingest, IngestOutcome};
use runtimes_common::BuildPayload;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub lines: usize,
    pub queued: usize,
    pub skipped: usize,
    pub malformed: usize,
}

/// Feed every payload in `reader` through `ingest`.
///
/// Only I/O failures end the replay; lines that are not UTF-8 or not a valid
/// payload are counted as malformed.
pub async fn replay<R: AsyncBufRead + Unpin>(
    mut reader: R,
    ingest: &Ingest,
) -> Result<ReplayStats, std::io::Error> {
    let mut stats = ReplayStats::default();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let Ok(line) = std::str::from_utf8(&buf) else {
            stats.lines += 1;
            stats.malformed += 1;
            warn!(line = stats.lines, "Skipping payload that is not UTF-8");
            continue;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        stats.lines += 1;

        let payload: BuildPayload = match serde_json::from_str(line) {
            Ok(p) => p,
            Err(e) => {
                warn!(line = stats.lines, "Skipping malformed payload: {}", e);
                stats.malformed += 1;
                continue;
            }
        };

        match ingest.submit(payload) {
            IngestOutcome::Queued | IngestOutcome::Evicted(_) => stats.queued += 1,
            IngestOutcome::Skipped(_) => stats.skipped += 1,
            IngestOutcome::Closed => break,
        }
    }

    info!(
        lines = stats.lines,
        queued = stats.queued,
        skipped = stats.skipped,
        malformed = stats.malformed,
        "Replay input exhausted"
    );
    Ok(stats)
}

/// Replay from a file, or from stdin when `path` is `-`.
pub async fn replay_path(path: &Path, ingest: &Ingest) -> Result<ReplayStats, std::io::Error> {
    if path == Path::new("-") {
        replay(BufReader::new(tokio::io::stdin()), ingest).await
    } else {
        let file = tokio::fs::File::open(path).await?;
        replay(BufReader::new(file), ingest).await
    }
}
