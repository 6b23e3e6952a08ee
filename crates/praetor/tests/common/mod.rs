//! Test utilities and common setup.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use praetor::config::ControlMode;
use praetor::logs::LineSink;
use praetor::server::{ServerError, ServerResult, ServerStatus, SessionController};
use praetor::{AppConfig, Supervisor};

/// In-memory controller: canned replies per command, recorded submissions.
///
/// Replies are also delivered through the ingestion sink, like real output.
pub struct FakeController {
    sink: LineSink,
    running: AtomicBool,
    replies: Mutex<HashMap<String, String>>,
    sent: Mutex<Vec<String>>,
}

impl FakeController {
    pub fn new(sink: LineSink) -> Self {
        Self {
            sink,
            running: AtomicBool::new(false),
            replies: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn reply(&self, command: &str, output: &str) {
        self.replies
            .lock()
            .unwrap()
            .insert(command.to_string(), output.to_string());
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionController for FakeController {
    fn mode(&self) -> ControlMode {
        ControlMode::Managed
    }

    async fn start(&self) -> ServerResult<()> {
        self.set_running(true);
        self.sink.deliver("Server started");
        Ok(())
    }

    async fn stop(&self) -> ServerResult<()> {
        self.set_running(false);
        Ok(())
    }

    async fn status(&self) -> ServerStatus {
        ServerStatus {
            running: self.running.load(Ordering::SeqCst),
            ..ServerStatus::default()
        }
    }

    async fn run_command_capture(&self, command: &str) -> ServerResult<String> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(ServerError::NotRunning);
        }
        self.sent.lock().unwrap().push(command.to_string());
        let output = self
            .replies
            .lock()
            .unwrap()
            .get(command)
            .cloned()
            .unwrap_or_default();
        for line in output.lines() {
            self.sink.deliver(line);
        }
        Ok(output)
    }
}

/// Config for tests: artifacts under `root`, no pauses between help pages.
pub fn test_config(root: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.server.server_root = Some(root.display().to_string());
    config.discovery.inter_page_delay_ms = 0;
    config
}

/// Supervisor wired to a [`FakeController`].
pub fn test_supervisor(config: AppConfig) -> (Supervisor, Arc<FakeController>) {
    let mut fake = None;
    let supervisor = Supervisor::with_controller(config, |_, sink, _| {
        let controller = Arc::new(FakeController::new(sink));
        fake = Some(controller.clone());
        controller as Arc<dyn SessionController>
    })
    .unwrap();
    (supervisor, fake.unwrap())
}
