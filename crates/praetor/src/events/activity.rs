//! Join/leave detection and time-windowed deduplication.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Join,
    Leave,
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Join => "join",
            Self::Leave => "leave",
        })
    }
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("Invalid regex pattern for player activity"))
        .collect()
}

// "Player connected: Steve, xuid: 123" before "Steve joined the game".
static JOIN: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)\b(?:joined|connected)\s*:\s*(?P<name>[^\s,:]{2,32})",
        r"(?i)(?P<name>[^\s:,\[\]()<>]{2,32})\s+(?:has\s+)?(?:joined|connected)\b",
    ])
});

static LEAVE: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)\b(?:left|disconnected)\s*:\s*(?P<name>[^\s,:]{2,32})",
        r"(?i)(?P<name>[^\s:,\[\]()<>]{2,32})\s+(?:has\s+)?(?:left|disconnected)\b",
    ])
});

fn first_name(patterns: &[Regex], line: &str) -> Option<String> {
    patterns
        .iter()
        .find_map(|re| re.captures(line).map(|caps| caps["name"].to_string()))
}

/// Detect a join or leave in a raw console line.
pub fn parse_activity(line: &str) -> Option<(ActivityKind, String)> {
    if let Some(name) = first_name(&JOIN, line) {
        return Some((ActivityKind::Join, name));
    }
    first_name(&LEAVE, line).map(|name| (ActivityKind::Leave, name))
}

/// Suppresses repeats of the same (kind, player) within a window.
#[derive(Debug)]
pub struct ActivityDeduper {
    window: Duration,
    last_seen: Mutex<HashMap<(ActivityKind, String), Instant>>,
}

impl Default for ActivityDeduper {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW)
    }
}

impl ActivityDeduper {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` and records `now` if the event should be emitted.
    pub fn accept(&self, kind: ActivityKind, player: &str, now: Instant) -> bool {
        let key = (kind, player.to_lowercase());
        let mut last_seen = self.last_seen.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(prev) = last_seen.get(&key)
            && now.saturating_duration_since(*prev) < self.window
        {
            return false;
        }
        last_seen.insert(key, now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_leave_dialects() {
        assert_eq!(
            parse_activity("TestPlayer joined the server"),
            Some((ActivityKind::Join, "TestPlayer".to_string()))
        );
        assert_eq!(
            parse_activity("[12:00:00] [INFO] Alex has joined"),
            Some((ActivityKind::Join, "Alex".to_string()))
        );
        assert_eq!(
            parse_activity("[2025-01-01 12:00:00:123 INFO] Player connected: Steve, xuid: 123"),
            Some((ActivityKind::Join, "Steve".to_string()))
        );
        assert_eq!(
            parse_activity("TestPlayer left the server"),
            Some((ActivityKind::Leave, "TestPlayer".to_string()))
        );
        assert_eq!(
            parse_activity("Player disconnected: Steve, xuid: 123"),
            Some((ActivityKind::Leave, "Steve".to_string()))
        );
        assert_eq!(parse_activity("Server tick took 52ms"), None);
    }

    #[test]
    fn test_dedup_window() {
        let dedup = ActivityDeduper::new(Duration::from_secs(5));
        let t0 = Instant::now();
        assert!(dedup.accept(ActivityKind::Join, "Steve", t0));
        assert!(!dedup.accept(ActivityKind::Join, "steve", t0 + Duration::from_secs(2)));
        assert!(dedup.accept(ActivityKind::Leave, "Steve", t0 + Duration::from_secs(2)));
        assert!(dedup.accept(ActivityKind::Join, "Alex", t0 + Duration::from_secs(2)));
        assert!(dedup.accept(ActivityKind::Join, "Steve", t0 + Duration::from_secs(6)));
    }
}
