// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File-backed append-only event log for Event Bus catchup.
//!
//! Events are appended as JSONL. Catchup reads from the file and filters by
//! sequence number — no in-memory buffer, matching the teacher's
//! reconnect-catchup contract.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::model::Event;

/// A serialized event-log entry, carrying its own monotonic sequence number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: u64,
    pub event: Event,
}

/// Durable, retention-bounded event log backing the Event Bus.
///
/// `retention` bounds how many completed (non-pending) entries are kept on
/// disk; older entries are pruned on append. The log is append-only from the
/// caller's perspective — pruning rewrites the file, never the in-flight
/// append.
pub struct EventLog {
    path: Option<PathBuf>,
    seq: AtomicU64,
    retention: usize,
}

impl EventLog {
    /// `dir` is `None` in tests that don't need durability; no file is
    /// written and `catchup` always returns empty.
    pub fn new(dir: Option<&std::path::Path>, retention: usize) -> Self {
        let path = dir.map(|d| {
            let _ = std::fs::create_dir_all(d);
            d.join("events.jsonl")
        });
        Self { path, seq: AtomicU64::new(0), retention }
    }

    /// Append an event, returning its assigned sequence number.
    pub fn append(&self, event: &Event) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let Some(ref path) = self.path else {
            return seq;
        };
        let entry = LogEntry { seq, event: event.clone() };
        let Ok(mut line) = serde_json::to_string(&entry) else {
            return seq;
        };
        line.push('\n');
        if let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
            let _ = file.write_all(line.as_bytes());
        }
        self.prune();
        seq
    }

    /// Read events with seq > `since_seq`.
    pub fn catchup(&self, since_seq: u64) -> Vec<LogEntry> {
        let Some(ref path) = self.path else {
            return Vec::new();
        };
        let Ok(contents) = std::fs::read_to_string(path) else {
            return Vec::new();
        };
        contents
            .lines()
            .filter_map(|line| serde_json::from_str::<LogEntry>(line).ok())
            .filter(|e| e.seq > since_seq)
            .collect()
    }

    /// Keep only the last `retention` entries on disk.
    fn prune(&self) {
        let Some(ref path) = self.path else {
            return;
        };
        let Ok(contents) = std::fs::read_to_string(path) else {
            return;
        };
        let total = contents.lines().count();
        if total <= self.retention {
            return;
        }
        let keep: String = contents
            .lines()
            .skip(total - self.retention)
            .collect::<Vec<_>>()
            .join("\n");
        let _ = std::fs::write(path, format!("{keep}\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EventKind, SessionKey};

    fn event() -> Event {
        Event::new(EventKind::Progress, SessionKey::new("demo").unwrap(), serde_json::json!({}))
    }

    #[test]
    fn catchup_filters_by_seq() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(Some(dir.path()), 100);
        log.append(&event());
        log.append(&event());
        let entries = log.catchup(1);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].seq, 2);
    }

    #[test]
    fn retention_prunes_old_entries() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(Some(dir.path()), 2);
        for _ in 0..5 {
            log.append(&event());
        }
        let entries = log.catchup(0);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].seq, 4);
        assert_eq!(entries[1].seq, 5);
    }

    #[test]
    fn no_dir_means_no_durability() {
        let log = EventLog::new(None, 100);
        log.append(&event());
        assert!(log.catchup(0).is_empty());
    }
}
