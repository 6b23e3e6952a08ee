//! Line ingestion workers.
//!
//! Two sources feed the [`RollingLogBuffer`]: a reader bound to a child's
//! output stream and a poller that tails a growing (possibly rotated) file.
//! Both pass every line through an optional [`LineHook`] before buffering.

use log::{debug, trace, warn};
use std::io::SeekFrom;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncSeekExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::buffer::RollingLogBuffer;

/// Poll interval for the file tailer.
pub const TAIL_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Per-line side effect run before the line is buffered.
pub trait LineHook: Send + Sync {
    fn on_line(&self, line: &str);
}

/// Destination shared by all ingestion workers: hook first, then buffer.
#[derive(Clone)]
pub struct LineSink {
    buffer: Arc<RollingLogBuffer>,
    hook: Option<Arc<dyn LineHook>>,
}

impl LineSink {
    pub fn new(buffer: Arc<RollingLogBuffer>, hook: Option<Arc<dyn LineHook>>) -> Self {
        Self { buffer, hook }
    }

    pub fn buffer(&self) -> &Arc<RollingLogBuffer> {
        &self.buffer
    }

    /// Deliver one raw line. A panicking hook is logged and the line is still buffered.
    pub fn deliver(&self, raw: &str) {
        let line = raw.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return;
        }
        if let Some(hook) = &self.hook
            && catch_unwind(AssertUnwindSafe(|| hook.on_line(line))).is_err()
        {
            warn!("line hook panicked; ingestion continues");
        }
        self.buffer.append(line);
    }
}

/// Spawn a task that pumps `reader` line by line into `sink` until EOF or cancellation.
///
/// Invalid UTF-8 is replaced rather than treated as an error; game servers
/// occasionally emit raw bytes in player names.
pub fn spawn_stream_reader<R>(
    label: &'static str,
    reader: R,
    sink: LineSink,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::with_capacity(512);
        loop {
            buf.clear();
            let read = tokio::select! {
                _ = cancel.cancelled() => break,
                read = reader.read_until(b'\n', &mut buf) => read,
            };
            match read {
                Ok(0) => {
                    debug!("{label} stream closed");
                    break;
                }
                Ok(_) => sink.deliver(&String::from_utf8_lossy(&buf)),
                Err(err) => {
                    warn!("{label} stream read failed: {err}");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
        trace!("{label} reader exiting");
    })
}

/// Follows a log file the way `tail -F` does.
///
/// Starts at the end of the file, reopens when the inode changes or the file
/// shrinks, and tolerates the file not existing yet.
pub struct FileTailer {
    path: PathBuf,
    sink: LineSink,
    poll_interval: Duration,
    task: Mutex<Option<TailTask>>,
}

struct TailTask {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl FileTailer {
    pub fn new(path: impl Into<PathBuf>, sink: LineSink) -> Self {
        Self {
            path: path.into(),
            sink,
            poll_interval: TAIL_POLL_INTERVAL,
            task: Mutex::new(None),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start tailing. Returns `false` if a tailer task is already running.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return false;
        }
        debug!("tailing {}", self.path.display());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(tail_loop(
            self.path.clone(),
            self.sink.clone(),
            self.poll_interval,
            cancel.clone(),
        ));
        *task = Some(TailTask { handle, cancel });
        true
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Cancel the tailer and wait for its task to exit.
    pub async fn stop(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.cancel.cancel();
            let _ = task.handle.await;
        }
    }
}

impl Drop for FileTailer {
    fn drop(&mut self) {
        if let Some(task) = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.cancel.cancel();
        }
    }
}

struct OpenLog {
    reader: BufReader<File>,
    identity: Option<u64>,
    position: u64,
    partial: Vec<u8>,
}

#[cfg(unix)]
fn file_identity(meta: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino())
}

#[cfg(not(unix))]
fn file_identity(_meta: &std::fs::Metadata) -> Option<u64> {
    None
}

async fn open_at_end(path: &Path) -> std::io::Result<OpenLog> {
    let mut file = File::open(path).await?;
    let meta = file.metadata().await?;
    let position = file.seek(SeekFrom::End(0)).await?;
    Ok(OpenLog {
        reader: BufReader::new(file),
        identity: file_identity(&meta),
        position,
        partial: Vec::new(),
    })
}

async fn tail_loop(path: PathBuf, sink: LineSink, interval: Duration, cancel: CancellationToken) {
    let mut current: Option<OpenLog> = None;
    loop {
        match tokio::fs::metadata(&path).await {
            Ok(meta) => {
                let rotated = current.as_ref().is_some_and(|open| {
                    open.identity != file_identity(&meta) || meta.len() < open.position
                });
                if rotated && let Some(open) = current.take() {
                    debug!("{} rotated; reopening", path.display());
                    retire(open, &sink).await;
                }
                if current.is_none() {
                    match open_at_end(&path).await {
                        Ok(open) => current = Some(open),
                        Err(err) => debug!("cannot open {}: {err}", path.display()),
                    }
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                if let Some(open) = current.take() {
                    retire(open, &sink).await;
                }
            }
            Err(err) => warn!("cannot stat {}: {err}", path.display()),
        }

        if let Some(open) = current.as_mut()
            && let Err(err) = drain_complete_lines(open, &sink).await
        {
            warn!("reading {} failed: {err}", path.display());
            if let Some(open) = current.take() {
                flush_partial(open, &sink);
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    trace!("tailer for {} exiting", path.display());
}

/// Drain what the old handle can still read, then deliver any held partial line.
async fn retire(mut open: OpenLog, sink: &LineSink) {
    if let Err(err) = drain_complete_lines(&mut open, sink).await {
        debug!("final read before reopen failed: {err}");
    }
    flush_partial(open, sink);
}

fn flush_partial(open: OpenLog, sink: &LineSink) {
    if !open.partial.is_empty() {
        sink.deliver(&String::from_utf8_lossy(&open.partial));
    }
}

/// Read everything appended since the last poll; hold back a trailing partial line.
async fn drain_complete_lines(open: &mut OpenLog, sink: &LineSink) -> std::io::Result<()> {
    loop {
        let read = open.reader.read_until(b'\n', &mut open.partial).await?;
        if read == 0 {
            return Ok(());
        }
        open.position += read as u64;
        if open.partial.last() == Some(&b'\n') {
            sink.deliver(&String::from_utf8_lossy(&open.partial));
            open.partial.clear();
        }
    }
}
