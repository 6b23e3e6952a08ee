//! Session controller error types.

use thiserror::Error;

/// Result type for session controller operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors raised by session controllers.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Server root, launcher or log path missing or unusable.
    #[error("not configured: {0}")]
    NotConfigured(String),

    /// A required external tool (e.g. tmux) is not installed.
    #[error("required tool not installed: {tool}")]
    ToolMissing { tool: String },

    /// The tmux target does not exist.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("server is not running under praetor")]
    NotRunning,

    #[error("{operation} is not supported in {mode} mode")]
    Unsupported {
        mode: &'static str,
        operation: &'static str,
    },

    /// An external command ran but reported failure.
    #[error("{command} failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Configuration problems as opposed to transient runtime failures.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::NotConfigured(_) | Self::ToolMissing { .. })
    }
}
