use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time view of the supervised server, rebuilt on every query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServerStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub uptime_seconds: Option<f64>,
    pub last_error: Option<String>,
    pub last_restart_time: Option<DateTime<Utc>>,
    /// Sorted by name.
    pub players_online: Vec<String>,
}

/// Seconds elapsed since `started_at`, never negative.
pub fn uptime_since(started_at: DateTime<Utc>) -> f64 {
    let elapsed = Utc::now().signed_duration_since(started_at);
    (elapsed.num_milliseconds().max(0) as f64) / 1000.0
}
