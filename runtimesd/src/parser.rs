//! Streaming parser for structured test logs.
//!
//! Each line of a raw log is one JSON object carrying an `action` tag. Only
//! `test_start` and `test_end` matter here; everything else, including lines
//! that fail to parse, is counted and skipped.

use runtimes_common::{Runtimes, escape_test_name};
use serde::Deserialize;
use std::io::BufRead;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read log: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum LogEntry {
    TestStart {
        test: String,
        time: i64,
    },
    TestEnd {
        test: String,
        time: i64,
    },
    #[serde(other)]
    Other,
}

/// Line counts gathered while parsing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub lines: usize,
    /// Lines that were not valid entries.
    pub malformed: usize,
    /// Valid entries with an action other than test start/end.
    pub ignored: usize,
    /// `test_end` entries without a matching running test.
    pub unmatched: usize,
}

/// Durations extracted from one log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedLog {
    /// Escaped test name to duration in milliseconds.
    pub runtimes: Runtimes,
    pub stats: ParseStats,
}

/// Incremental parser state.
///
/// Tracks only the currently running test. A test that starts but never
/// ends produces no duration; a test that runs twice keeps the later value.
#[derive(Debug, Default)]
pub struct RuntimeParser {
    running: Option<(String, i64)>,
    parsed: ParsedLog,
}

impl RuntimeParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one log line.
    pub fn feed_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        self.parsed.stats.lines += 1;

        match serde_json::from_str::<LogEntry>(line) {
            Ok(entry) => self.handle(entry),
            Err(e) => {
                trace!("Skipping malformed log line: {}", e);
                self.parsed.stats.malformed += 1;
            }
        }
    }

    fn handle(&mut self, entry: LogEntry) {
        match entry {
            LogEntry::TestStart { test, time } => {
                self.running = Some((test, time));
            }
            LogEntry::TestEnd { test, time } => match self.running.take() {
                Some((running, start)) if running == test => {
                    match time.checked_sub(start).and_then(|d| u64::try_from(d).ok()) {
                        Some(duration) => {
                            self.parsed.runtimes.insert(escape_test_name(&test), duration);
                        }
                        None => {
                            trace!(test = %test, start, end = time, "Skipping unusable timestamps");
                            self.parsed.stats.malformed += 1;
                        }
                    }
                }
                other => {
                    // Keep tracking a different running test.
                    self.running = other.filter(|(running, _)| *running != test);
                    self.parsed.stats.unmatched += 1;
                }
            },
            LogEntry::Other => self.parsed.stats.ignored += 1,
        }
    }

    pub fn finish(self) -> ParsedLog {
        self.parsed
    }
}

/// Parse a whole log from a reader.
///
/// Only I/O failures are errors; invalid UTF-8 and invalid JSON are skipped
/// line by line.
pub fn parse_log<R: BufRead>(mut reader: R) -> Result<ParsedLog, ParseError> {
    let mut parser = RuntimeParser::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        match std::str::from_utf8(&buf) {
            Ok(line) => parser.feed_line(line),
            Err(_) => {
                parser.parsed.stats.lines += 1;
                parser.parsed.stats.malformed += 1;
            }
        }
    }
    Ok(parser.finish())
}
