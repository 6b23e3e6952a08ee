//! Tmux backend: drive a server running in a tmux session praetor does not own.
//!
//! Output only reaches praetor through a log file, either one the server
//! writes itself or one fed by `tmux pipe-pane`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

use super::controller::{SessionController, capture_since, unsupported};
use super::error::{ServerError, ServerResult};
use super::status::{ServerStatus, uptime_since};
use crate::config::ControlMode;
use crate::events::SessionState;
use crate::logs::{FileTailer, LineSink};

#[derive(Debug, Clone)]
pub struct TmuxOptions {
    pub binary: String,
    /// `session`, `session:window` or `session:window.pane`.
    pub target: String,
    /// Run in a new detached session when the target session is absent.
    pub start_command: Option<String>,
    pub log_path: Option<PathBuf>,
    /// Pipe the pane's output into `log_path`.
    pub pipe_output: bool,
    pub output_window: Duration,
}

impl Default for TmuxOptions {
    fn default() -> Self {
        Self {
            binary: "tmux".to_string(),
            target: "praetor".to_string(),
            start_command: None,
            log_path: None,
            pipe_output: false,
            output_window: Duration::from_secs(2),
        }
    }
}

/// Single-quote `text` for `sh -c`.
fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

pub struct TmuxController {
    options: TmuxOptions,
    sink: LineSink,
    state: Arc<SessionState>,
    tailer: Option<FileTailer>,
    attached_at: DateTime<Utc>,
}

impl TmuxController {
    pub fn new(options: TmuxOptions, sink: LineSink, state: Arc<SessionState>) -> Self {
        let tailer = options
            .log_path
            .clone()
            .map(|path| FileTailer::new(path, sink.clone()));
        Self {
            options,
            sink,
            state,
            tailer,
            attached_at: Utc::now(),
        }
    }

    /// Session part of the target, as accepted by `new-session -s`.
    pub fn session_name(&self) -> &str {
        self.options
            .target
            .split([':', '.'])
            .next()
            .unwrap_or(&self.options.target)
    }

    async fn tmux(&self, args: &[&str]) -> ServerResult<Output> {
        debug!("{} {}", self.options.binary, args.join(" "));
        Command::new(&self.options.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ServerError::ToolMissing {
                    tool: self.options.binary.clone(),
                },
                _ => ServerError::Io(e),
            })
    }

    async fn tmux_checked(&self, args: &[&str]) -> ServerResult<()> {
        let output = self.tmux(args).await?;
        if output.status.success() {
            return Ok(());
        }
        Err(ServerError::CommandFailed {
            command: format!("{} {}", self.options.binary, args.first().unwrap_or(&"")),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    pub async fn has_session(&self) -> ServerResult<bool> {
        let output = self.tmux(&["has-session", "-t", &self.options.target]).await?;
        Ok(output.status.success())
    }

    async fn pipe_output(&self) -> ServerResult<()> {
        let Some(path) = &self.options.log_path else {
            return Err(ServerError::NotConfigured(
                "tmux_pipe_output requires log_path".into(),
            ));
        };
        let shell = format!("cat >> {}", shell_quote(&path.display().to_string()));
        // -o leaves an existing pipe in place instead of toggling it off.
        self.tmux_checked(&["pipe-pane", "-o", "-t", &self.options.target, &shell])
            .await
    }
}

#[async_trait]
impl SessionController for TmuxController {
    fn mode(&self) -> ControlMode {
        ControlMode::Tmux
    }

    async fn start(&self) -> ServerResult<()> {
        if !self.has_session().await? {
            let Some(command) = &self.options.start_command else {
                return Err(ServerError::SessionNotFound(self.options.target.clone()));
            };
            info!("Creating tmux session {}", self.session_name());
            self.tmux_checked(&["new-session", "-d", "-s", self.session_name(), command])
                .await?;
        } else {
            info!("Attached to tmux target {}", self.options.target);
        }

        if self.options.pipe_output {
            self.pipe_output().await?;
        }
        self.start_log_tailing();
        Ok(())
    }

    async fn stop(&self) -> ServerResult<()> {
        Err(unsupported(ControlMode::Tmux, "stop"))
    }

    async fn restart(&self) -> ServerResult<()> {
        Err(unsupported(ControlMode::Tmux, "restart"))
    }

    async fn status(&self) -> ServerStatus {
        let running = match self.has_session().await {
            Ok(running) => running,
            Err(e) => {
                warn!("tmux status check failed: {}", e);
                false
            }
        };
        ServerStatus {
            running,
            pid: None,
            uptime_seconds: running.then(|| uptime_since(self.attached_at)),
            last_error: self.state.last_error(),
            last_restart_time: None,
            players_online: self.state.players_online(),
        }
    }

    async fn run_command_capture(&self, command: &str) -> ServerResult<String> {
        if !self.has_session().await? {
            return Err(ServerError::SessionNotFound(self.options.target.clone()));
        }
        let since = Utc::now();
        // -l sends the text literally so words like "Enter" are not key names.
        self.tmux_checked(&["send-keys", "-t", &self.options.target, "-l", command])
            .await?;
        self.tmux_checked(&["send-keys", "-t", &self.options.target, "Enter"])
            .await?;
        tokio::time::sleep(self.options.output_window).await;
        Ok(capture_since(self.sink.buffer(), since))
    }

    fn start_log_tailing(&self) -> bool {
        match &self.tailer {
            Some(tailer) => {
                tailer.start();
                true
            }
            None => false,
        }
    }
}
