//! Managed backend: praetor owns the server process and talks over its pipes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::controller::{SessionController, capture_since};
use super::error::{ServerError, ServerResult};
use super::status::{ServerStatus, uptime_since};
use super::stray::StrayCleanup;
use crate::config::ControlMode;
use crate::events::SessionState;
use crate::logs::{FileTailer, LineSink, spawn_stream_reader};

/// Script launchers, tried in order and run through `bash`.
const SCRIPT_LAUNCHERS: &[&str] = &["StartServer-nogui.sh", "StartServer.sh", "Server.sh"];
const JAR_LAUNCHER: &str = "Server.jar";
const BEDROCK_LAUNCHER: &str = "bedrock_server";

const READER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ManagedOptions {
    pub server_root: Option<PathBuf>,
    /// Optional server log file tailed alongside stdout.
    pub log_path: Option<PathBuf>,
    pub output_window: Duration,
    /// How long to wait after SIGTERM before killing.
    pub stop_grace: Duration,
    /// Signal leftover server processes before spawning a new one.
    pub stray_cleanup: Option<StrayCleanup>,
}

impl Default for ManagedOptions {
    fn default() -> Self {
        Self {
            server_root: None,
            log_path: None,
            output_window: Duration::from_secs(2),
            stop_grace: Duration::from_secs(5),
            stray_cleanup: None,
        }
    }
}

/// Program and arguments used to launch the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launcher {
    pub program: String,
    pub args: Vec<String>,
}

impl Launcher {
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Find the launcher in `root`.
///
/// Preference: the start scripts, then `Server.jar`, then `bedrock_server`.
/// A `bedrock_server` that exists but is not executable is an error, not a miss.
pub fn detect_launcher(root: Option<&Path>) -> ServerResult<Launcher> {
    let root = root.ok_or_else(|| ServerError::NotConfigured("server_root is not set".into()))?;
    if !root.is_dir() {
        return Err(ServerError::NotConfigured(format!(
            "server root does not exist: {}",
            root.display()
        )));
    }

    for name in SCRIPT_LAUNCHERS {
        let script = root.join(name);
        if script.is_file() {
            return Ok(Launcher {
                program: "bash".to_string(),
                args: vec![script.display().to_string()],
            });
        }
    }

    let jar = root.join(JAR_LAUNCHER);
    if jar.is_file() {
        return Ok(Launcher {
            program: "java".to_string(),
            args: vec!["-jar".to_string(), jar.display().to_string()],
        });
    }

    let exe = root.join(BEDROCK_LAUNCHER);
    if exe.exists() {
        if !is_executable(&exe) {
            return Err(ServerError::NotConfigured(format!(
                "{} is not executable",
                exe.display()
            )));
        }
        return Ok(Launcher {
            program: exe.display().to_string(),
            args: Vec::new(),
        });
    }

    Err(ServerError::NotConfigured(format!(
        "no server launcher found in {} (expected one of {}, {} or {})",
        root.display(),
        SCRIPT_LAUNCHERS.join(", "),
        JAR_LAUNCHER,
        BEDROCK_LAUNCHER
    )))
}

struct ManagedProcess {
    child: Child,
    pid: u32,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    readers: Vec<JoinHandle<()>>,
}

impl ManagedProcess {
    fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

#[cfg(unix)]
fn terminate(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate(_pid: u32) {}

pub struct ManagedController {
    options: ManagedOptions,
    sink: LineSink,
    state: Arc<SessionState>,
    /// Serializes start and stop against each other.
    lifecycle: Mutex<()>,
    process: Mutex<Option<ManagedProcess>>,
    /// Serializes writes so concurrent commands never interleave.
    stdin: Mutex<Option<ChildStdin>>,
    tailer: Option<FileTailer>,
    last_restart: StdMutex<Option<DateTime<Utc>>>,
}

impl ManagedController {
    pub fn new(options: ManagedOptions, sink: LineSink, state: Arc<SessionState>) -> Self {
        let tailer = options
            .log_path
            .clone()
            .map(|path| FileTailer::new(path, sink.clone()));
        Self {
            options,
            sink,
            state,
            lifecycle: Mutex::new(()),
            process: Mutex::new(None),
            stdin: Mutex::new(None),
            tailer,
            last_restart: StdMutex::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.process
            .lock()
            .await
            .as_mut()
            .is_some_and(ManagedProcess::is_running)
    }

    /// Write one line to the server's stdin without waiting for output.
    pub async fn send_command_raw(&self, command: &str) -> ServerResult<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(ServerError::NotRunning)?;
        stdin
            .write_all(command.trim_end_matches('\n').as_bytes())
            .await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn spawn(&self) -> ServerResult<ManagedProcess> {
        let launcher = detect_launcher(self.options.server_root.as_deref())?;
        let root = self
            .options
            .server_root
            .as_deref()
            .ok_or_else(|| ServerError::NotConfigured("server_root is not set".into()))?;

        info!("Starting server: {:?} in {}", launcher.argv(), root.display());
        let mut child = Command::new(&launcher.program)
            .args(&launcher.args)
            .current_dir(root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ServerError::NotConfigured(format!(
                    "launcher program not found: {}",
                    launcher.program
                )),
                _ => ServerError::Io(e),
            })?;

        let pid = child.id().ok_or_else(|| ServerError::CommandFailed {
            command: launcher.program.clone(),
            message: "process exited immediately".to_string(),
        })?;

        let cancel = CancellationToken::new();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_stream_reader(
                "stdout",
                stdout,
                self.sink.clone(),
                cancel.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_stream_reader(
                "stderr",
                stderr,
                self.sink.clone(),
                cancel.clone(),
            ));
        }
        *self.stdin.lock().await = child.stdin.take();

        Ok(ManagedProcess {
            child,
            pid,
            started_at: Utc::now(),
            cancel,
            readers,
        })
    }

    /// Stop the readers and tailer and forget process-bound state.
    async fn teardown(&self, mut process: ManagedProcess) {
        *self.stdin.lock().await = None;
        process.cancel.cancel();
        for reader in process.readers.drain(..) {
            if tokio::time::timeout(READER_SHUTDOWN_TIMEOUT, reader)
                .await
                .is_err()
            {
                warn!("Timeout waiting for output reader of PID {}", process.pid);
            }
        }
        if let Some(tailer) = &self.tailer {
            tailer.stop().await;
        }
        self.state.reset();
    }

    async fn shutdown_process(&self, process: &mut ManagedProcess) {
        if let Err(e) = self.send_command_raw("stop").await {
            debug!("Graceful stop command not delivered: {}", e);
        }

        if process.is_running() {
            terminate(process.pid);
        }

        match tokio::time::timeout(self.options.stop_grace, process.child.wait()).await {
            Ok(Ok(status)) => {
                info!("Server (PID {}) exited with {}", process.pid, status);
                return;
            }
            Ok(Err(e)) => warn!("Error waiting for server {}: {:?}", process.pid, e),
            Err(_) => warn!(
                "Server (PID {}) did not exit within {:?}, killing",
                process.pid, self.options.stop_grace
            ),
        }

        if let Err(e) = process.child.kill().await {
            warn!("Failed to kill server (PID {}): {:?}", process.pid, e);
        }
    }
}

#[async_trait]
impl SessionController for ManagedController {
    fn mode(&self) -> ControlMode {
        ControlMode::Managed
    }

    async fn start(&self) -> ServerResult<()> {
        let _lifecycle = self.lifecycle.lock().await;

        let stale = {
            let mut slot = self.process.lock().await;
            if let Some(process) = slot.as_mut()
                && process.is_running()
            {
                debug!("Server already running (PID {})", process.pid);
                return Ok(());
            }
            slot.take()
        };
        if let Some(process) = stale {
            debug!("Cleaning up exited server process {}", process.pid);
            self.teardown(process).await;
        }
        if let Some(cleanup) = &self.options.stray_cleanup
            && let Err(e) = cleanup.run().await
        {
            warn!("Stray process cleanup failed: {}", e);
        }

        let process = self.spawn().await?;
        info!("Server started (PID {})", process.pid);
        *self
            .last_restart
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(process.started_at);
        *self.process.lock().await = Some(process);

        self.start_log_tailing();
        Ok(())
    }

    async fn stop(&self) -> ServerResult<()> {
        let _lifecycle = self.lifecycle.lock().await;

        let Some(mut process) = self.process.lock().await.take() else {
            return Ok(());
        };
        info!("Stopping server (PID {})", process.pid);
        self.shutdown_process(&mut process).await;
        self.teardown(process).await;
        Ok(())
    }

    async fn status(&self) -> ServerStatus {
        let mut guard = self.process.lock().await;
        let (running, pid, uptime_seconds) = if let Some(process) = guard.as_mut()
            && process.is_running()
        {
            (
                true,
                Some(process.pid),
                Some(uptime_since(process.started_at)),
            )
        } else {
            (false, None, None)
        };
        drop(guard);
        ServerStatus {
            running,
            pid,
            uptime_seconds,
            last_error: self.state.last_error(),
            last_restart_time: *self
                .last_restart
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
            players_online: self.state.players_online(),
        }
    }

    async fn run_command_capture(&self, command: &str) -> ServerResult<String> {
        if !self.is_running().await {
            return Err(ServerError::NotRunning);
        }
        let since = Utc::now();
        self.send_command_raw(command).await?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::RollingLogBuffer;
    use std::fs;

    fn controller(root: &Path, window: Duration) -> (ManagedController, Arc<RollingLogBuffer>) {
        let buffer = Arc::new(RollingLogBuffer::new(500));
        let sink = LineSink::new(buffer.clone(), None);
        let options = ManagedOptions {
            server_root: Some(root.to_path_buf()),
            log_path: None,
            output_window: window,
            stop_grace: Duration::from_secs(2),
            stray_cleanup: None,
        };
        (
            ManagedController::new(options, sink, Arc::new(SessionState::default())),
            buffer,
        )
    }

    #[test]
    fn test_missing_root_not_configured() {
        let err = detect_launcher(Some(Path::new("/nonexistent/praetor/root"))).unwrap_err();
        assert!(matches!(err, ServerError::NotConfigured(_)));
        assert!(matches!(
            detect_launcher(None),
            Err(ServerError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_empty_root_not_configured() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            detect_launcher(Some(dir.path())),
            Err(ServerError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_launcher_preference_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Server.jar"), b"").unwrap();
        let launcher = detect_launcher(Some(dir.path())).unwrap();
        assert_eq!(launcher.program, "java");
        assert_eq!(launcher.args[0], "-jar");

        fs::write(dir.path().join("Server.sh"), b"").unwrap();
        fs::write(dir.path().join("StartServer-nogui.sh"), b"").unwrap();
        let launcher = detect_launcher(Some(dir.path())).unwrap();
        assert_eq!(launcher.program, "bash");
        assert!(launcher.args[0].ends_with("StartServer-nogui.sh"));
    }

    #[cfg(unix)]
    #[test]
    fn test_bedrock_executable_required() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("bedrock_server");
        fs::write(&exe, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&exe, fs::Permissions::from_mode(0o644)).unwrap();
        assert!(matches!(
            detect_launcher(Some(dir.path())),
            Err(ServerError::NotConfigured(_))
        ));

        fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();
        let launcher = detect_launcher(Some(dir.path())).unwrap();
        assert_eq!(launcher.argv(), vec![exe.display().to_string()]);
    }

    #[tokio::test]
    async fn test_command_when_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _buffer) = controller(dir.path(), Duration::from_millis(10));
        assert!(matches!(
            controller.run_command_capture("help").await,
            Err(ServerError::NotRunning)
        ));
        assert!(!controller.status().await.running);
        // stopping a controller that never started is a no-op
        controller.stop().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_managed_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("Server.sh"),
            r#"echo "Server started"
while read -r line; do
  if [ "$line" = "stop" ]; then echo "Stopping server"; exit 0; fi
  echo "echo: $line"
done
"#,
        )
        .unwrap();
        let (controller, buffer) = controller(dir.path(), Duration::from_millis(400));

        controller.start().await.unwrap();
        let status = controller.status().await;
        assert!(status.running);
        let pid = status.pid.unwrap();
        assert!(status.last_restart_time.is_some());

        // second start is a no-op
        controller.start().await.unwrap();
        assert_eq!(controller.status().await.pid, Some(pid));

        let output = controller.run_command_capture("hello").await.unwrap();
        assert!(output.contains("echo: hello"), "output: {output}");

        controller.stop().await.unwrap();
        let status = controller.status().await;
        assert!(!status.running);
        assert!(status.pid.is_none());
        assert!(buffer.search("Server started", 10).len() == 1);
        assert!(matches!(
            controller.send_command_raw("help").await,
            Err(ServerError::NotRunning)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_status_after_server_exits() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Server.sh"), "echo \"Server started\"\nexit 0\n").unwrap();
        let (controller, _buffer) = controller(dir.path(), Duration::from_millis(10));

        controller.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        let status = controller.status().await;
        assert!(!status.running);
        assert!(status.pid.is_none());
        assert!(status.uptime_seconds.is_none());
        assert!(!controller.is_running().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stray_cleanup_runs_before_spawn() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let calls = dir.path().join("pkill.log");
        let pkill = dir.path().join("pkill");
        fs::write(
            &pkill,
            format!("#!/bin/sh\necho \"$@\" >> '{}'\nexit 1\n", calls.display()),
        )
        .unwrap();
        fs::set_permissions(&pkill, fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(dir.path().join("Server.sh"), "while read -r line; do :; done\n").unwrap();

        let options = ManagedOptions {
            server_root: Some(dir.path().to_path_buf()),
            stop_grace: Duration::from_millis(300),
            stray_cleanup: Some(StrayCleanup {
                pkill_binary: pkill.display().to_string(),
                patterns: vec!["Server.jar".to_string()],
            }),
            ..ManagedOptions::default()
        };
        let controller = ManagedController::new(
            options,
            LineSink::new(Arc::new(RollingLogBuffer::new(10)), None),
            Arc::new(SessionState::default()),
        );
        controller.start().await.unwrap();
        assert!(controller.is_running().await);
        assert_eq!(fs::read_to_string(&calls).unwrap(), "-f Server.jar\n");

        // already running: no second cleanup
        controller.start().await.unwrap();
        assert_eq!(fs::read_to_string(&calls).unwrap(), "-f Server.jar\n");
        controller.stop().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_kills_unresponsive_server() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("Server.sh"),
            "trap '' TERM\nwhile true; do sleep 0.1; done\n",
        )
        .unwrap();
        let buffer = Arc::new(RollingLogBuffer::new(10));
        let options = ManagedOptions {
            server_root: Some(dir.path().to_path_buf()),
            log_path: None,
            output_window: Duration::from_millis(10),
            stop_grace: Duration::from_millis(300),
            stray_cleanup: None,
        };
        let controller = ManagedController::new(
            options,
            LineSink::new(buffer, None),
            Arc::new(SessionState::default()),
        );
        controller.start().await.unwrap();
        controller.stop().await.unwrap();
        assert!(!controller.status().await.running);
    }
}
