//! Structured results returned by the [`Supervisor`](super::Supervisor).
//!
//! Every fallible operation reports failure as `ok: false` plus an error
//! string instead of returning `Err`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

use crate::discovery::TerminationReason;
use crate::server::ServerStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutcome {
    pub ok: bool,
    pub output: String,
    pub error: Option<String>,
}

impl CommandOutcome {
    pub fn rejected(error: impl ToString) -> Self {
        Self {
            ok: false,
            output: String::new(),
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnounceOutcome {
    pub ok: bool,
    pub sent: bool,
    /// Recorded as a local chat event only; nothing reached the server.
    pub local_only: bool,
    pub error: Option<String>,
}

impl AnnounceOutcome {
    pub fn sent() -> Self {
        Self {
            ok: true,
            sent: true,
            local_only: false,
            error: None,
        }
    }

    pub fn local() -> Self {
        Self {
            local_only: true,
            ..Self::sent()
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            ok: false,
            sent: false,
            local_only: false,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleOutcome {
    pub ok: bool,
    pub error: Option<String>,
}

impl<E: ToString> From<Result<(), E>> for LifecycleOutcome {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self {
                ok: true,
                error: None,
            },
            Err(e) => Self {
                ok: false,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct BootstrapOutcome {
    pub ok: bool,
    pub commands_discovered: usize,
    pub allowed_count: usize,
    pub denied_count: usize,
    pub termination_reason: Option<TerminationReason>,
    pub pages_captured: u32,
    pub snapshot_path: Option<PathBuf>,
    pub allowlist_path: Option<PathBuf>,
    pub report_path: Option<PathBuf>,
    pub error: Option<String>,
}

impl BootstrapOutcome {
    pub fn failed(error: impl ToString) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct LoadAllowlistOutcome {
    pub ok: bool,
    pub allowed_count: usize,
    pub denied_count: usize,
    pub generated_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadyOutcome {
    pub ok: bool,
    pub ready: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrayCleanupOutcome {
    pub ok: bool,
    /// Patterns that matched at least one process.
    pub matched: Vec<String>,
    pub error: Option<String>,
}

impl StrayCleanupOutcome {
    pub fn failed(error: impl ToString) -> Self {
        Self {
            ok: false,
            matched: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

/// [`ServerStatus`] plus supervisor-level details.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupervisorStatus {
    #[serde(flatten)]
    pub server: ServerStatus,
    pub control_mode: String,
    pub supervisor_uptime_seconds: f64,
    pub log_buffer_lines: usize,
    pub game_host: String,
    pub game_port: Option<u16>,
    /// `None` when no game port is configured.
    pub game_port_open: Option<bool>,
}
