//! Application configuration.
//!
//! Sources, lowest precedence first: built-in defaults, the TOML file, then
//! `PRAETOR__SECTION__KEY` environment variables.

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::discovery::DiscoveryOptions;
use crate::events::ExtractorConfig;
use crate::server::{DEFAULT_STRAY_PATTERNS, StrayCleanup};
use crate::safety::sanitizer::{
    DEFAULT_MAX_ANNOUNCE_LENGTH, DEFAULT_MAX_COMMAND_LENGTH, DEFAULT_MAX_STARTUP_REPLY_LENGTH,
};

pub const ENV_PREFIX: &str = "PRAETOR";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub chat: ChatConfig,
    pub safety: SafetyConfig,
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when no verbosity flag is given.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// How the supervisor reaches the server console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    /// Spawn and own the server process; talk over its stdin/stdout.
    #[default]
    Managed,
    /// Send keystrokes into an existing tmux session.
    Tmux,
}

impl std::fmt::Display for ControlMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Managed => "managed",
            Self::Tmux => "tmux",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Directory holding the server launcher.
    pub server_root: Option<String>,
    pub control_mode: ControlMode,
    /// Start (managed) or attach to (tmux) the server when the supervisor starts.
    pub auto_start: bool,
    pub tmux_binary: String,
    pub tmux_target: String,
    /// Command run in a new detached session when the target does not exist.
    pub tmux_start_command: Option<String>,
    /// Pipe the tmux pane into `log_path` so the tailer can read it.
    pub tmux_pipe_output: bool,
    /// Log file to tail in addition to (or instead of) stdout.
    pub log_path: Option<String>,
    pub command_output_window_secs: f64,
    pub stop_grace_secs: f64,
    pub log_buffer_lines: usize,
    pub game_host: String,
    pub game_port: Option<u16>,
    /// Signal leftover server processes (`pkill -f`) before a managed start.
    pub kill_stray_on_start: bool,
    pub stray_process_patterns: Vec<String>,
    pub pkill_binary: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_root: None,
            control_mode: ControlMode::Managed,
            auto_start: true,
            tmux_binary: "tmux".to_string(),
            tmux_target: "praetor".to_string(),
            tmux_start_command: None,
            tmux_pipe_output: false,
            log_path: None,
            command_output_window_secs: 2.0,
            stop_grace_secs: 5.0,
            log_buffer_lines: crate::logs::buffer::DEFAULT_MAX_LINES,
            game_host: "127.0.0.1".to_string(),
            game_port: None,
            kill_stray_on_start: false,
            stray_process_patterns: DEFAULT_STRAY_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            pkill_binary: "pkill".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub mention_enabled: bool,
    pub mention_keyword: String,
    pub bot_name: String,
    pub dedup_window_secs: f64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            mention_enabled: true,
            mention_keyword: "praetor".to_string(),
            bot_name: "Praetor".to_string(),
            dedup_window_secs: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub max_command_length: usize,
    pub max_announce_length: usize,
    pub max_startup_reply_length: usize,
    /// JSON command catalog; see [`crate::catalog`].
    pub commands_file: Option<String>,
    /// Tried in order by `announce`; `{message}` is replaced with the text.
    pub announce_command_templates: Vec<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_command_length: DEFAULT_MAX_COMMAND_LENGTH,
            max_announce_length: DEFAULT_MAX_ANNOUNCE_LENGTH,
            max_startup_reply_length: DEFAULT_MAX_STARTUP_REPLY_LENGTH,
            commands_file: None,
            announce_command_templates: vec!["say {message}".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Relative paths resolve against the server root.
    pub output_dir: String,
    pub snapshots_subdir: String,
    pub allowlist_subdir: String,
    pub help_cmd: String,
    pub help_page_template: String,
    pub max_help_pages: u32,
    pub page_stable_limit: u32,
    pub inter_page_delay_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            output_dir: ".praetor".to_string(),
            snapshots_subdir: "snapshots".to_string(),
            allowlist_subdir: "allowlist".to_string(),
            help_cmd: "help".to_string(),
            help_page_template: "help {page}".to_string(),
            max_help_pages: 50,
            page_stable_limit: 2,
            inter_page_delay_ms: 500,
        }
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::ZERO)
}

impl AppConfig {
    pub fn server_root(&self) -> Option<PathBuf> {
        self.server.server_root.as_deref().map(PathBuf::from)
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        self.server.log_path.as_deref().map(PathBuf::from)
    }

    pub fn commands_file(&self) -> Option<PathBuf> {
        self.safety.commands_file.as_deref().map(PathBuf::from)
    }

    pub fn output_window(&self) -> Duration {
        secs(self.server.command_output_window_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        secs(self.server.stop_grace_secs)
    }

    pub fn stray_cleanup(&self) -> StrayCleanup {
        StrayCleanup {
            pkill_binary: self.server.pkill_binary.clone(),
            patterns: self.server.stray_process_patterns.clone(),
        }
    }

    pub fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            mention_enabled: self.chat.mention_enabled,
            mention_keyword: self.chat.mention_keyword.clone(),
            bot_name: self.chat.bot_name.clone(),
            dedup_window: secs(self.chat.dedup_window_secs),
        }
    }

    pub fn discovery_options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            max_help_pages: self.discovery.max_help_pages,
            page_stable_limit: self.discovery.page_stable_limit,
            help_cmd: self.discovery.help_cmd.clone(),
            help_page_template: self.discovery.help_page_template.clone(),
            inter_page_delay: Duration::from_millis(self.discovery.inter_page_delay_ms),
        }
    }

    /// Root for discovery artifacts: `output_dir`, under the server root when relative.
    pub fn discovery_output_dir(&self) -> PathBuf {
        let dir = PathBuf::from(&self.discovery.output_dir);
        match self.server_root() {
            Some(root) if dir.is_relative() => root.join(dir),
            _ => dir,
        }
    }

    /// Expand `~` and environment variables in every configured path.
    pub fn expand_paths(&mut self) -> Result<()> {
        for slot in [
            &mut self.server.server_root,
            &mut self.server.log_path,
            &mut self.safety.commands_file,
        ] {
            if let Some(raw) = slot.as_ref() {
                *slot = Some(expand_str_path(raw)?.display().to_string());
            }
        }
        Ok(())
    }
}

pub fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

/// Build the effective configuration from defaults, `path` (optional) and the environment.
pub fn load(path: &Path) -> Result<AppConfig> {
    let built = Config::builder()
        .set_default("logging.level", "info")?
        .set_default("server.control_mode", "managed")?
        .add_source(File::from(path).format(FileFormat::Toml).required(false))
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()
        .with_context(|| format!("loading configuration from {}", path.display()))?;

    let mut config: AppConfig = built
        .try_deserialize()
        .context("deserializing configuration")?;
    config.expand_paths()?;
    Ok(config)
}
