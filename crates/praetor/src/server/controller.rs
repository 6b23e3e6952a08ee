//! The capability interface shared by the managed and tmux backends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use super::error::{ServerError, ServerResult};
use super::status::ServerStatus;
use crate::config::ControlMode;
use crate::logs::RollingLogBuffer;

/// Lines returned by a capture at most.
pub const CAPTURE_MAX_LINES: usize = 200;

/// Pause between stop and start during a restart.
pub const RESTART_PAUSE: Duration = Duration::from_millis(200);

/// Start, stop and talk to one server session.
///
/// Output capture is timing based: a command is submitted, the controller
/// waits its output window, then returns whatever the ingestion pipeline
/// buffered since submission. Concurrent callers may see each other's output.
#[async_trait]
pub trait SessionController: Send + Sync {
    fn mode(&self) -> ControlMode;

    /// Bring the session up. Idempotent.
    async fn start(&self) -> ServerResult<()>;

    async fn stop(&self) -> ServerResult<()>;

    async fn restart(&self) -> ServerResult<()> {
        self.stop().await?;
        tokio::time::sleep(RESTART_PAUSE).await;
        self.start().await
    }

    async fn status(&self) -> ServerStatus;

    /// Submit `command` and return the output observed during the capture window.
    async fn run_command_capture(&self, command: &str) -> ServerResult<String>;

    /// Start the log-file tailer if one is configured. Returns whether a tailer is running.
    fn start_log_tailing(&self) -> bool {
        false
    }
}

/// Recent lines appended at or after `since`, newest [`CAPTURE_MAX_LINES`] kept.
pub fn capture_since(buffer: &RollingLogBuffer, since: DateTime<Utc>) -> String {
    let lines = buffer.get_since(since);
    let skip = lines.len().saturating_sub(CAPTURE_MAX_LINES);
    lines[skip..].join("\n")
}

pub(crate) fn unsupported(mode: ControlMode, operation: &'static str) -> ServerError {
    ServerError::Unsupported {
        mode: match mode {
            ControlMode::Managed => "managed",
            ControlMode::Tmux => "tmux",
        },
        operation,
    }
}
