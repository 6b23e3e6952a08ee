//! Cleanup of server processes left behind by an earlier run.
//!
//! A crashed supervisor can leave the game server holding its port. The
//! cleanup signals every process whose command line matches a pattern via
//! `pkill -f`, so patterns must be specific to the server.

use log::{info, warn};
use tokio::process::Command;

use super::error::{ServerError, ServerResult};

/// Launcher patterns matched against full command lines.
pub const DEFAULT_STRAY_PATTERNS: &[&str] = &["Server.jar", "StartServer"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrayCleanup {
    pub pkill_binary: String,
    pub patterns: Vec<String>,
}

impl Default for StrayCleanup {
    fn default() -> Self {
        Self {
            pkill_binary: "pkill".to_string(),
            patterns: DEFAULT_STRAY_PATTERNS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl StrayCleanup {
    /// Signal every process matching a pattern. Returns the patterns that
    /// matched at least one process.
    pub async fn run(&self) -> ServerResult<Vec<String>> {
        let mut matched = Vec::new();
        for pattern in self.patterns.iter().filter(|p| !p.trim().is_empty()) {
            let output = Command::new(&self.pkill_binary)
                .args(["-f", pattern])
                .output()
                .await
                .map_err(|e| match e.kind() {
                    std::io::ErrorKind::NotFound => ServerError::ToolMissing {
                        tool: self.pkill_binary.clone(),
                    },
                    _ => ServerError::Io(e),
                })?;

            // pkill: 0 = signalled, 1 = nothing matched, anything else is an error
            match output.status.code() {
                Some(0) => {
                    info!("Signalled stray processes matching '{}'", pattern);
                    matched.push(pattern.clone());
                }
                Some(1) => {}
                _ => {
                    let message = String::from_utf8_lossy(&output.stderr).trim().to_string();
                    warn!("pkill -f '{}' failed: {}", pattern, message);
                    return Err(ServerError::CommandFailed {
                        command: format!("{} -f {}", self.pkill_binary, pattern),
                        message,
                    });
                }
            }
        }
        Ok(matched)
    }
}
