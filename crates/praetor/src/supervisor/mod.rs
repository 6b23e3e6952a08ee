//! The supervisor facade.
//!
//! Wires buffer, extractor, controller, runner and policy together and
//! exposes the operations external collaborators use. Every command path
//! runs the sanitizer and then the enforcement allowlist before anything
//! reaches the controller; only [`Supervisor::startup_reply`] skips the
//! allowlist, behind the stricter startup-reply sanitizer.

pub mod outcome;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

use crate::catalog::load_command_names;
use crate::config::{AppConfig, ControlMode};
use crate::discovery::{AllowlistBootstrapper, CommandDiscoverer, GeneratedAllowlist};
use crate::events::{ActivityEvent, ChatEvent, EventBus, EventExtractor, ServerEvent, SessionState};
use crate::logs::{LineSink, LogLine, RollingLogBuffer};
use crate::safety::{CommandAllowlist, sanitize_announce, sanitize_command, sanitize_startup_reply};
use crate::server::status::uptime_since;
use crate::server::{
    CommandRunner, ManagedController, ManagedOptions, ServerError, SessionController, TmuxController,
    TmuxOptions, tcp_port_open,
};

pub use outcome::{
    AnnounceOutcome, BootstrapOutcome, CommandOutcome, LifecycleOutcome, LoadAllowlistOutcome,
    ReadyOutcome, StrayCleanupOutcome, SupervisorStatus,
};

/// Upper bound for `get_recent_logs`.
pub const MAX_RECENT_LOGS: usize = 5000;

/// Identity recorded for locally triggered mentions from announcements.
pub const ANNOUNCE_MENTION_ORIGIN: &str = "Admin";

const NOTICE_PREFIX: &str = "[praetor]";
const PORT_PROBE_TIMEOUT: Duration = Duration::from_millis(200);
const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);
const READY_SCAN_LINES: usize = 200;
const READY_MARKERS: &[&str] = &["server started", "listening", "done", "loaded", "world"];
const UNKNOWN_COMMAND_MARKERS: &[&str] = &[
    "unknown command",
    "not recognized",
    "unrecognized",
    "invalid command",
    "no such command",
];

fn looks_like_unknown_command(output: &str) -> bool {
    let lower = output.to_lowercase();
    UNKNOWN_COMMAND_MARKERS.iter().any(|m| lower.contains(m))
}

pub struct Supervisor {
    config: AppConfig,
    buffer: Arc<RollingLogBuffer>,
    bus: Arc<EventBus>,
    state: Arc<SessionState>,
    sink: LineSink,
    controller: Arc<dyn SessionController>,
    runner: CommandRunner,
    allowlist: CommandAllowlist,
    discovered: Mutex<Option<GeneratedAllowlist>>,
    started: AtomicBool,
    started_at: DateTime<Utc>,
}

impl Supervisor {
    /// Build the supervisor and the controller selected by `server.control_mode`.
    pub fn new(config: AppConfig) -> Result<Self> {
        Self::build(config, |config, sink, state| -> Arc<dyn SessionController> {
            match config.server.control_mode {
                ControlMode::Managed => Arc::new(ManagedController::new(
                    ManagedOptions {
                        server_root: config.server_root(),
                        log_path: config.log_path(),
                        output_window: config.output_window(),
                        stop_grace: config.stop_grace(),
                        stray_cleanup: config
                            .server
                            .kill_stray_on_start
                            .then(|| config.stray_cleanup()),
                    },
                    sink,
                    state,
                )),
                ControlMode::Tmux => Arc::new(TmuxController::new(
                    TmuxOptions {
                        binary: config.server.tmux_binary.clone(),
                        target: config.server.tmux_target.clone(),
                        start_command: config.server.tmux_start_command.clone(),
                        log_path: config.log_path(),
                        pipe_output: config.server.tmux_pipe_output,
                        output_window: config.output_window(),
                    },
                    sink,
                    state,
                )),
            }
        })
    }

    /// Build with a caller-provided controller. It receives the ingestion sink and session state.
    pub fn with_controller<F>(config: AppConfig, make_controller: F) -> Result<Self>
    where
        F: FnOnce(&AppConfig, LineSink, Arc<SessionState>) -> Arc<dyn SessionController>,
    {
        Self::build(config, make_controller)
    }

    fn build<F>(config: AppConfig, make_controller: F) -> Result<Self>
    where
        F: FnOnce(&AppConfig, LineSink, Arc<SessionState>) -> Arc<dyn SessionController>,
    {
        let names = load_command_names(config.commands_file().as_deref())
            .context("loading command catalog")?;
        let allowlist =
            CommandAllowlist::from_catalog(&names, &config.safety.announce_command_templates);

        let buffer = Arc::new(RollingLogBuffer::new(config.server.log_buffer_lines));
        let bus = Arc::new(EventBus::default());
        let state = Arc::new(SessionState::default());
        let extractor = Arc::new(EventExtractor::new(
            config.extractor_config(),
            state.clone(),
            bus.clone(),
        ));
        let sink = LineSink::new(buffer.clone(), Some(extractor));
        let controller = make_controller(&config, sink.clone(), state.clone());
        let runner = CommandRunner::new(controller.clone());

        Ok(Self {
            config,
            buffer,
            bus,
            state,
            sink,
            controller,
            runner,
            allowlist,
            discovered: Mutex::new(None),
            started: AtomicBool::new(false),
            started_at: Utc::now(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn allowlist(&self) -> &CommandAllowlist {
        &self.allowlist
    }

    pub fn session_state(&self) -> &Arc<SessionState> {
        &self.state
    }

    /// Feed one externally sourced line through the same path as server output.
    pub fn ingest_line(&self, line: &str) {
        self.sink.deliver(line);
    }

    fn notice(&self, text: &str) {
        info!("{}", text);
        self.buffer.append(&format!("{NOTICE_PREFIX} {text}"));
    }

    /// Bring up ingestion and, when `auto_start` is set, the server session. Idempotent.
    ///
    /// A failed server start is logged and leaves log-only ingestion running.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(
            "Supervisor starting: mode={} auto_start={} log_path={:?}",
            self.controller.mode(),
            self.config.server.auto_start,
            self.config.server.log_path
        );

        if !self.config.server.auto_start {
            self.controller.start_log_tailing();
            return;
        }
        if let Err(e) = self.controller.start().await {
            error!("Failed to start server session: {}", e);
            self.controller.start_log_tailing();
        }
    }

    pub async fn start_server(&self) -> LifecycleOutcome {
        self.started.store(true, Ordering::SeqCst);
        self.controller.start().await.into()
    }

    pub async fn stop_server(&self) -> LifecycleOutcome {
        self.controller.stop().await.into()
    }

    pub async fn restart_server(&self) -> LifecycleOutcome {
        self.controller.restart().await.into()
    }

    /// Signal leftover server processes from an earlier run.
    ///
    /// Managed mode only, and only while no server is running under praetor,
    /// since the patterns would match the live server too.
    pub async fn kill_stray_processes(&self) -> StrayCleanupOutcome {
        if self.controller.mode() == ControlMode::Tmux {
            return StrayCleanupOutcome::failed(ServerError::Unsupported {
                mode: "tmux",
                operation: "stray process cleanup",
            });
        }
        if self.controller.status().await.running {
            return StrayCleanupOutcome::failed(
                "Server is running under praetor. Stop it before cleaning up stray processes.",
            );
        }
        match self.config.stray_cleanup().run().await {
            Ok(matched) => {
                if !matched.is_empty() {
                    self.notice(&format!("Signalled stray processes: {}", matched.join(", ")));
                }
                StrayCleanupOutcome {
                    ok: true,
                    matched,
                    error: None,
                }
            }
            Err(e) => StrayCleanupOutcome::failed(e),
        }
    }

    /// Stop an owned server on the way out. Attached sessions are left alone.
    pub async fn shutdown(&self) {
        match self.controller.stop().await {
            Ok(()) | Err(ServerError::Unsupported { .. }) => {}
            Err(e) => warn!("Error stopping server during shutdown: {}", e),
        }
    }

    /// Sanitize, check against the allowlist, then run.
    pub async fn run_command(&self, command: &str) -> CommandOutcome {
        let command = match sanitize_command(command, self.config.safety.max_command_length) {
            Ok(command) => command,
            Err(e) => return CommandOutcome::rejected(e),
        };
        if let Err(e) = self.allowlist.require_allowed(&command) {
            warn!("Rejected command: {}", e);
            return CommandOutcome::rejected(e);
        }

        let result = self.runner.run(&command).await;
        CommandOutcome {
            ok: result.ok,
            output: result.output,
            error: if result.ok {
                None
            } else {
                Some(result.error.unwrap_or_else(|| "Command failed".to_string()))
            },
        }
    }

    /// Answer an interactive startup prompt. Bypasses the allowlist.
    pub async fn startup_reply(&self, reply: &str) -> CommandOutcome {
        let reply = match sanitize_startup_reply(reply, self.config.safety.max_startup_reply_length)
        {
            Ok(reply) => reply,
            Err(e) => return CommandOutcome::rejected(e),
        };
        let result = self.runner.run(&reply).await;
        CommandOutcome {
            ok: result.ok,
            output: result.output,
            error: result.error,
        }
    }

    fn templates(&self) -> Vec<String> {
        let templates: Vec<String> = self
            .config
            .safety
            .announce_command_templates
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if templates.is_empty() {
            vec!["say {message}".to_string()]
        } else {
            templates
        }
    }

    fn record_local_chat(&self, player: &str, message: &str, mention_origin: &str) {
        let event = ChatEvent {
            at: Utc::now(),
            player: player.to_string(),
            message: message.to_string(),
        };
        self.bus.publish(ServerEvent::Chat(event.clone()));

        let keyword = self.config.chat.mention_keyword.to_lowercase();
        if self.config.chat.mention_enabled
            && !keyword.is_empty()
            && message.to_lowercase().contains(&keyword)
        {
            self.bus.publish(ServerEvent::Mention(ChatEvent {
                player: mention_origin.to_string(),
                ..event
            }));
        }
    }

    /// Post `message` to server chat, trying each announce template in order.
    pub async fn announce(&self, message: &str) -> AnnounceOutcome {
        let message = match sanitize_announce(message, self.config.safety.max_announce_length) {
            Ok(message) => message,
            Err(e) => return AnnounceOutcome::failed(e),
        };

        let mut last_error = None;
        let mut last_output = String::new();
        for template in self.templates() {
            let command = template.replace("{message}", &message);
            let outcome = self.run_command(&command).await;
            if outcome.ok && !looks_like_unknown_command(&outcome.output) {
                self.record_local_chat(
                    crate::events::SERVER_IDENTITY,
                    &message,
                    ANNOUNCE_MENTION_ORIGIN,
                );
                return AnnounceOutcome::sent();
            }
            last_output = outcome.output;
            if outcome.error.is_some() {
                last_error = outcome.error;
            }
        }

        let preview: String = last_output.chars().take(120).collect();
        self.notice(&format!(
            "announce_failed (not sent): err={} out={}",
            last_error.as_deref().unwrap_or("none"),
            preview
        ));
        AnnounceOutcome::failed(
            last_error.unwrap_or_else(|| "Unable to post message to server chat".to_string()),
        )
    }

    /// Announce when the server is up; otherwise record the message as local chat from `origin`.
    pub async fn send_chat_message(&self, message: &str, origin: &str) -> AnnounceOutcome {
        if self.controller.status().await.running {
            let announced = self.announce(message).await;
            if announced.ok {
                return announced;
            }
        }

        let message = match sanitize_announce(message, self.config.safety.max_announce_length) {
            Ok(message) => message,
            Err(e) => return AnnounceOutcome::failed(e),
        };
        self.record_local_chat(origin, &message, origin);
        AnnounceOutcome::local()
    }

    pub async fn get_status(&self) -> SupervisorStatus {
        let server = self.controller.status().await;
        let game_port_open = match self.config.server.game_port {
            Some(port) => {
                Some(tcp_port_open(&self.config.server.game_host, port, PORT_PROBE_TIMEOUT).await)
            }
            None => None,
        };
        SupervisorStatus {
            server,
            control_mode: self.controller.mode().to_string(),
            supervisor_uptime_seconds: uptime_since(self.started_at),
            log_buffer_lines: self.buffer.len(),
            game_host: self.config.server.game_host.clone(),
            game_port: self.config.server.game_port,
            game_port_open,
        }
    }

    pub fn get_recent_logs(&self, n: usize) -> Vec<String> {
        self.buffer.get_recent(n.min(MAX_RECENT_LOGS))
    }

    pub fn get_logs_since(&self, since: DateTime<Utc>) -> Vec<LogLine> {
        self.buffer.get_since_with_ts(since)
    }

    pub fn search_logs(&self, pattern: &str, n: usize) -> Vec<String> {
        self.buffer.search(pattern, n.min(MAX_RECENT_LOGS))
    }

    pub fn get_chat_events(&self, since: Option<DateTime<Utc>>) -> Vec<ChatEvent> {
        self.bus.journal().chat_since(since)
    }

    pub fn get_activity_events(&self, since: Option<DateTime<Utc>>) -> Vec<ActivityEvent> {
        self.bus.journal().activity_since(since)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.bus.subscribe()
    }

    /// Discover commands via paginated help and write a default-deny allowlist.
    ///
    /// Requires a running session. Discovery bypasses the enforcement allowlist
    /// and must not run concurrently with itself.
    pub async fn bootstrap_allowlist(&self) -> BootstrapOutcome {
        if !self.controller.status().await.running {
            return BootstrapOutcome::failed(
                "Server is not running. Start the server before running discovery.",
            );
        }

        let base = self.config.discovery_output_dir();
        let snapshots_dir = base.join(&self.config.discovery.snapshots_subdir);
        let allowlist_dir = base.join(&self.config.discovery.allowlist_subdir);
        let server_root = self.config.server.server_root.clone().unwrap_or_default();

        self.notice("Starting command discovery...");
        let discoverer = CommandDiscoverer::new(
            &self.runner,
            server_root,
            self.config.discovery_options(),
        );
        let result = async {
            let (snapshot, snapshot_path) = discoverer.discover_and_save(&snapshots_dir).await?;
            self.notice(&format!(
                "Discovery complete: {} commands found, reason={}",
                snapshot.commands.len(),
                snapshot.metadata.termination_reason
            ));

            let bootstrapper = AllowlistBootstrapper::new(
                self.config.safety.max_command_length,
                self.config.safety.max_announce_length,
            );
            let artifacts = bootstrapper.bootstrap_and_save(
                &snapshot,
                &allowlist_dir,
                &snapshot_path.display().to_string(),
            )?;
            anyhow::Ok((snapshot, snapshot_path, artifacts))
        }
        .await;

        match result {
            Ok((snapshot, snapshot_path, artifacts)) => {
                let allowed_count = artifacts.allowlist.allowed.len();
                let denied_count = artifacts.allowlist.denied.len();
                self.notice(&format!(
                    "Allowlist generated: {allowed_count} allowed, {denied_count} denied"
                ));
                *self
                    .discovered
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(artifacts.allowlist);
                BootstrapOutcome {
                    ok: true,
                    commands_discovered: snapshot.commands.len(),
                    allowed_count,
                    denied_count,
                    termination_reason: Some(snapshot.metadata.termination_reason),
                    pages_captured: snapshot.metadata.pages_captured,
                    snapshot_path: Some(snapshot_path),
                    allowlist_path: Some(artifacts.json_path),
                    report_path: artifacts.report_path,
                    error: None,
                }
            }
            Err(e) => {
                error!("Discovery failed: {:#}", e);
                self.notice(&format!("Discovery failed: {e}"));
                BootstrapOutcome::failed(format!("{e:#}"))
            }
        }
    }

    /// The most recently generated or loaded allowlist artifact.
    pub fn discovered_allowlist(&self) -> Option<GeneratedAllowlist> {
        self.discovered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Load a generated allowlist. The enforcement allowlist is not changed.
    pub fn load_allowlist_from_file(&self, path: &Path) -> LoadAllowlistOutcome {
        if !path.exists() {
            return LoadAllowlistOutcome {
                error: Some(format!("File not found: {}", path.display())),
                ..LoadAllowlistOutcome::default()
            };
        }
        match GeneratedAllowlist::load(path) {
            Ok(allowlist) => {
                let outcome = LoadAllowlistOutcome {
                    ok: true,
                    allowed_count: allowlist.allowed.len(),
                    denied_count: allowlist.denied.len(),
                    generated_at: Some(allowlist.generated_at),
                    error: None,
                };
                *self
                    .discovered
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(allowlist);
                outcome
            }
            Err(e) => LoadAllowlistOutcome {
                error: Some(format!("{e:#}")),
                ..LoadAllowlistOutcome::default()
            },
        }
    }

    /// Poll recent logs for common readiness markers.
    pub async fn wait_until_ready(&self, timeout: Duration) -> ReadyOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            let recent = self.buffer.get_recent(READY_SCAN_LINES).join("\n").to_lowercase();
            if READY_MARKERS.iter().any(|m| recent.contains(m)) {
                return ReadyOutcome {
                    ok: true,
                    ready: true,
                    error: None,
                };
            }
            if Instant::now() >= deadline {
                return ReadyOutcome {
                    ok: true,
                    ready: false,
                    error: Some("Timed out waiting for ready markers in logs".to_string()),
                };
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(READY_POLL_INTERVAL.min(remaining)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_command_detection() {
        assert!(looks_like_unknown_command("Unknown command. Type help"));
        assert!(looks_like_unknown_command("'foo' is not recognized"));
        assert!(!looks_like_unknown_command("Server: hello"));
        assert!(!looks_like_unknown_command(""));
    }

    #[tokio::test]
    async fn test_startup_reply_rejects_words() {
        let supervisor = Supervisor::new(AppConfig::default()).unwrap();
        let outcome = supervisor.startup_reply("maybe").await;
        assert!(!outcome.ok);
        assert!(outcome.error.unwrap().contains("number or y/n"));
    }

    #[tokio::test]
    async fn test_run_command_rejected_before_controller() {
        let supervisor = Supervisor::new(AppConfig::default()).unwrap();
        let outcome = supervisor.run_command("help; rm -rf /").await;
        assert!(!outcome.ok);
        assert!(outcome.error.unwrap().contains("Disallowed"));

        let outcome = supervisor.run_command("kick Steve").await;
        assert!(outcome.error.unwrap().contains("not permitted"));

        // allowed, but nothing is running
        let outcome = supervisor.run_command("help").await;
        assert!(!outcome.ok);
        assert_eq!(
            outcome.error.as_deref(),
            Some("server is not running under praetor")
        );
    }

    #[tokio::test]
    async fn test_recent_logs_clamped() {
        let supervisor = Supervisor::new(AppConfig::default()).unwrap();
        supervisor.ingest_line("one");
        supervisor.ingest_line("two");
        assert_eq!(supervisor.get_recent_logs(usize::MAX), vec!["one", "two"]);
        assert!(supervisor.get_recent_logs(0).is_empty());
    }
}
