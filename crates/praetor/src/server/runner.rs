//! Uniform command submission over whichever controller is active.

use async_trait::async_trait;
use log::warn;
use serde::Serialize;
use std::sync::Arc;

use super::controller::SessionController;
use crate::discovery::{CommandExecutor, ConsoleResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub ok: bool,
    pub output: String,
    pub error: Option<String>,
}

impl CommandResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            ok: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }
}

#[derive(Clone)]
pub struct CommandRunner {
    controller: Arc<dyn SessionController>,
}

impl CommandRunner {
    pub fn new(controller: Arc<dyn SessionController>) -> Self {
        Self { controller }
    }

    /// Submit `command` and capture its output window. Errors become `ok: false`.
    pub async fn run(&self, command: &str) -> CommandResult {
        match self.controller.run_command_capture(command).await {
            Ok(output) => CommandResult::success(output),
            Err(e) => {
                warn!("Command {:?} failed: {}", command, e);
                CommandResult::failure(e.to_string())
            }
        }
    }
}

#[async_trait]
impl CommandExecutor for CommandRunner {
    async fn execute(&self, command: &str) -> ConsoleResult {
        let result = self.run(command).await;
        if result.ok {
            ConsoleResult::ok(result.output)
        } else {
            ConsoleResult::failed(result.error.unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControlMode;
    use crate::server::{ServerError, ServerResult, ServerStatus};

    struct Echo;

    #[async_trait]
    impl SessionController for Echo {
        fn mode(&self) -> ControlMode {
            ControlMode::Managed
        }
        async fn start(&self) -> ServerResult<()> {
            Ok(())
        }
        async fn stop(&self) -> ServerResult<()> {
            Ok(())
        }
        async fn status(&self) -> ServerStatus {
            ServerStatus::default()
        }
        async fn run_command_capture(&self, command: &str) -> ServerResult<String> {
            if command == "boom" {
                return Err(ServerError::NotRunning);
            }
            Ok(format!("ran {command}"))
        }
    }

    #[tokio::test]
    async fn test_run_success_and_failure() {
        let runner = CommandRunner::new(Arc::new(Echo));
        assert_eq!(runner.run("help").await, CommandResult::success("ran help"));

        let failed = runner.run("boom").await;
        assert!(!failed.ok);
        assert!(failed.output.is_empty());
        assert_eq!(
            failed.error.as_deref(),
            Some("server is not running under praetor")
        );
    }

    #[tokio::test]
    async fn test_executor_adapter() {
        let runner = CommandRunner::new(Arc::new(Echo));
        let result = runner.execute("list").await;
        assert!(result.exit_ok);
        assert_eq!(result.stdout, "ran list");
        assert!(!runner.execute("boom").await.exit_ok);
    }
}
