//! Bounded, timestamped store of recent console lines.
//!
//! Every ingestion path (child stdout/stderr, tailed log files, supervisor
//! notices) appends here; every query surface reads from here.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default capacity used when no configuration overrides it.
pub const DEFAULT_MAX_LINES: usize = 2000;

/// A single captured console line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    /// Wall-clock time the line was appended.
    pub timestamp: DateTime<Utc>,
    /// Line text, trailing newline removed.
    pub text: String,
}

/// FIFO-evicting ring of [`LogLine`]s, safe to share across tasks.
#[derive(Debug)]
pub struct RollingLogBuffer {
    max_lines: usize,
    lines: Mutex<VecDeque<LogLine>>,
}

impl Default for RollingLogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINES)
    }
}

impl RollingLogBuffer {
    /// Create a buffer holding at most `max_lines` entries (minimum 1).
    pub fn new(max_lines: usize) -> Self {
        let max_lines = max_lines.max(1);
        Self {
            max_lines,
            lines: Mutex::new(VecDeque::with_capacity(max_lines.min(4096))),
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_lines
    }

    fn guard(&self) -> MutexGuard<'_, VecDeque<LogLine>> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a line stamped with the current time.
    ///
    /// Trailing `\r`/`\n` are stripped; lines that are empty or whitespace-only
    /// afterwards are dropped.
    pub fn append(&self, line: &str) {
        self.append_at(line, Utc::now());
    }

    /// Append a line with an explicit timestamp.
    pub fn append_at(&self, line: &str, timestamp: DateTime<Utc>) {
        let text = line.trim_end_matches(['\r', '\n']);
        if text.trim().is_empty() {
            return;
        }
        let mut lines = self.guard();
        while lines.len() >= self.max_lines {
            lines.pop_front();
        }
        lines.push_back(LogLine {
            timestamp,
            text: text.to_string(),
        });
    }

    /// Up to `n` most recent line texts, oldest first.
    pub fn get_recent(&self, n: usize) -> Vec<String> {
        if n == 0 {
            return Vec::new();
        }
        let lines = self.guard();
        let skip = lines.len().saturating_sub(n);
        lines.iter().skip(skip).map(|l| l.text.clone()).collect()
    }

    /// Texts of all lines stamped at or after `since`, oldest first.
    pub fn get_since(&self, since: DateTime<Utc>) -> Vec<String> {
        self.guard()
            .iter()
            .filter(|l| l.timestamp >= since)
            .map(|l| l.text.clone())
            .collect()
    }

    /// Like [`get_since`](Self::get_since) but keeps the timestamps.
    pub fn get_since_with_ts(&self, since: DateTime<Utc>) -> Vec<LogLine> {
        self.guard()
            .iter()
            .filter(|l| l.timestamp >= since)
            .cloned()
            .collect()
    }

    /// Case-insensitive substring search.
    ///
    /// Returns the `n` most recent matches in chronological order.
    pub fn search(&self, pattern: &str, n: usize) -> Vec<String> {
        if n == 0 {
            return Vec::new();
        }
        let needle = pattern.to_lowercase();
        let lines = self.guard();
        let mut hits: Vec<String> = lines
            .iter()
            .rev()
            .filter(|l| l.text.to_lowercase().contains(&needle))
            .take(n)
            .map(|l| l.text.clone())
            .collect();
        hits.reverse();
        hits
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_append_strips_newline_and_drops_blank() {
        let buffer = RollingLogBuffer::new(10);
        buffer.append("hello\n");
        buffer.append("");
        buffer.append("   \r\n");
        buffer.append("world\r\n");
        assert_eq!(buffer.get_recent(10), vec!["hello", "world"]);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let buffer = RollingLogBuffer::new(3);
        for i in 0..5 {
            buffer.append(&format!("line {i}"));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.get_recent(10), vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn test_get_recent_zero_is_empty() {
        let buffer = RollingLogBuffer::new(3);
        buffer.append("a");
        assert!(buffer.get_recent(0).is_empty());
        assert_eq!(buffer.get_recent(1), vec!["a"]);
    }

    #[test]
    fn test_get_since_is_inclusive() {
        let buffer = RollingLogBuffer::new(10);
        let t0 = Utc::now();
        buffer.append_at("before", t0 - Duration::seconds(5));
        buffer.append_at("exact", t0);
        buffer.append_at("after", t0 + Duration::seconds(1));
        assert_eq!(buffer.get_since(t0), vec!["exact", "after"]);
        let stamped = buffer.get_since_with_ts(t0);
        assert_eq!(stamped[0].timestamp, t0);
    }

    #[test]
    fn test_search_returns_latest_matches_in_order() {
        let buffer = RollingLogBuffer::new(10);
        buffer.append("Player Joined A");
        buffer.append("noise");
        buffer.append("player joined B");
        buffer.append("PLAYER JOINED C");
        assert_eq!(
            buffer.search("player joined", 2),
            vec!["player joined B", "PLAYER JOINED C"]
        );
        assert!(buffer.search("absent", 5).is_empty());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let buffer = RollingLogBuffer::new(0);
        buffer.append("a");
        buffer.append("b");
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.get_recent(5), vec!["b"]);
    }
}
