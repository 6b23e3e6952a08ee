//! Paginated `help` interrogation with loop and stability detection.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::parser::{extract_commands_from_page, normalize_output};
use super::registry::{
    CommandEntry, CommandRegistry, DiscoveryMetadata, DiscoverySnapshot, HELP_SOURCE,
    TerminationReason, snapshot_filename,
};

/// Hex characters kept from each page digest.
pub const PAGE_HASH_LEN: usize = 16;

/// Output of one console command as seen by the discoverer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleResult {
    pub stdout: String,
    pub exit_ok: bool,
    pub timestamp: DateTime<Utc>,
}

impl ConsoleResult {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            exit_ok: true,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            exit_ok: false,
            timestamp: Utc::now(),
        }
    }
}

/// Anything that can run a console command and hand back its output.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: &str) -> ConsoleResult;
}

/// Tunables for one discovery run.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub max_help_pages: u32,
    pub page_stable_limit: u32,
    pub help_cmd: String,
    /// Subsequent page command; `{page}` is replaced with the page number.
    pub help_page_template: String,
    pub inter_page_delay: Duration,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            max_help_pages: 50,
            page_stable_limit: 2,
            help_cmd: "help".to_string(),
            help_page_template: "help {page}".to_string(),
            inter_page_delay: Duration::from_millis(500),
        }
    }
}

/// Truncated SHA-256 of the normalized page text.
pub fn page_hash(text: &str) -> String {
    let normalized = normalize_output(text);
    let digest = Sha256::digest(normalized.trim().as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(PAGE_HASH_LEN);
    hash
}

fn is_empty_output(text: &str) -> bool {
    normalize_output(text).trim().is_empty()
}

/// Drives an executor through help pages until a stop condition fires.
///
/// Not reentrant with respect to the console: callers must not run two
/// discoveries against the same server at once.
pub struct CommandDiscoverer<'a> {
    executor: &'a dyn CommandExecutor,
    server_root: String,
    options: DiscoveryOptions,
}

struct RunState {
    registry: CommandRegistry,
    seen: HashSet<String>,
    page_hashes: BTreeMap<u32, String>,
    attempted: u32,
    captured: u32,
}

impl RunState {
    /// Add every command on the page; returns how many were new.
    fn absorb(&mut self, text: &str, page: u32) -> usize {
        let mut fresh = 0;
        for (parsed, page) in extract_commands_from_page(text, page) {
            let entry = CommandEntry::from_parsed(parsed, page, HELP_SOURCE);
            let key = entry.key.clone();
            if self.registry.add(entry) {
                debug!("discovery: found command '{key}' on page {page}");
                fresh += 1;
            }
        }
        fresh
    }
}

impl<'a> CommandDiscoverer<'a> {
    pub fn new(
        executor: &'a dyn CommandExecutor,
        server_root: impl Into<String>,
        mut options: DiscoveryOptions,
    ) -> Self {
        options.max_help_pages = options.max_help_pages.max(1);
        options.page_stable_limit = options.page_stable_limit.max(1);
        Self {
            executor,
            server_root: server_root.into(),
            options,
        }
    }

    fn page_command(&self, page: u32) -> String {
        self.options
            .help_page_template
            .replace("{page}", &page.to_string())
    }

    pub async fn discover(&self) -> DiscoverySnapshot {
        let captured_at = Utc::now();
        let mut state = RunState {
            registry: CommandRegistry::new(),
            seen: HashSet::new(),
            page_hashes: BTreeMap::new(),
            attempted: 0,
            captured: 0,
        };
        let reason = self.run_pages(&mut state).await;
        info!(
            "discovery complete: {} commands, {} pages captured, reason={reason}",
            state.registry.len(),
            state.captured
        );

        DiscoverySnapshot {
            server_root: self.server_root.clone(),
            captured_at,
            metadata: DiscoveryMetadata {
                pages_attempted: state.attempted,
                pages_captured: state.captured,
                termination_reason: reason,
                page_hashes: state.page_hashes,
            },
            commands: state.registry,
        }
    }

    async fn run_pages(&self, state: &mut RunState) -> TerminationReason {
        info!("discovery: fetching help page 1");
        let first = self.executor.execute(&self.options.help_cmd).await;
        state.attempted = 1;
        if !first.exit_ok {
            error!("discovery: help command failed");
            return TerminationReason::HelpCommandFailed;
        }

        let hash = page_hash(&first.stdout);
        state.seen.insert(hash.clone());
        state.page_hashes.insert(1, hash);
        if is_empty_output(&first.stdout) {
            warn!("discovery: help returned empty output");
            return TerminationReason::EmptyHelpOutput;
        }

        let fresh = state.absorb(&first.stdout, 1);
        state.captured = 1;
        let mut stable = if fresh == 0 { 1 } else { 0 };
        info!(
            "discovery: page 1 yielded {fresh} new commands (total: {})",
            state.registry.len()
        );

        for page in 2..=self.options.max_help_pages {
            tokio::time::sleep(self.options.inter_page_delay).await;

            let command = self.page_command(page);
            info!("discovery: fetching help page {page} via '{command}'");
            let result = self.executor.execute(&command).await;
            state.attempted = page;

            if !result.exit_ok {
                warn!("discovery: page {page} command failed, stopping");
                return TerminationReason::PageFailed(page);
            }
            if is_empty_output(&result.stdout) {
                info!("discovery: page {page} returned empty output, stopping");
                return TerminationReason::EmptyPageOutput;
            }
            let hash = page_hash(&result.stdout);
            if state.seen.contains(&hash) {
                info!("discovery: page {page} repeats an earlier page, stopping");
                return TerminationReason::PaginationLoopDetected;
            }
            state.seen.insert(hash.clone());
            state.page_hashes.insert(page, hash);
            state.captured = page;

            let fresh = state.absorb(&result.stdout, page);
            info!(
                "discovery: page {page} yielded {fresh} new commands (total: {})",
                state.registry.len()
            );
            if fresh == 0 {
                stable += 1;
                if stable >= self.options.page_stable_limit {
                    info!("discovery: {stable} consecutive pages without new commands, stopping");
                    return TerminationReason::StableNoNewCommands;
                }
            } else {
                stable = 0;
            }
        }
        TerminationReason::MaxPagesReached
    }

    /// Run discovery and write the snapshot as a timestamped file under `output_dir`.
    pub async fn discover_and_save(&self, output_dir: &Path) -> Result<(DiscoverySnapshot, PathBuf)> {
        let snapshot = self.discover().await;
        std::fs::create_dir_all(output_dir)
            .with_context(|| format!("creating snapshot directory {}", output_dir.display()))?;
        let path = output_dir.join(snapshot_filename());
        snapshot.save(&path)?;
        info!("discovery snapshot saved to {}", path.display());
        Ok((snapshot, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned pages and records which commands were issued.
    struct Scripted {
        pages: Mutex<VecDeque<ConsoleResult>>,
        issued: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(pages: Vec<ConsoleResult>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                issued: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CommandExecutor for Scripted {
        async fn execute(&self, command: &str) -> ConsoleResult {
            self.issued.lock().unwrap().push(command.to_string());
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| ConsoleResult::ok(""))
        }
    }

    fn fast(max_pages: u32) -> DiscoveryOptions {
        DiscoveryOptions {
            max_help_pages: max_pages,
            inter_page_delay: Duration::ZERO,
            ..DiscoveryOptions::default()
        }
    }

    #[test]
    fn test_page_hash_ignores_ansi_and_trailing_space() {
        assert_eq!(page_hash("help\nstatus"), page_hash("\x1b[1mhelp\x1b[0m  \r\nstatus\n"));
        assert_eq!(page_hash("help").len(), PAGE_HASH_LEN);
        assert_ne!(page_hash("help"), page_hash("list"));
    }

    #[tokio::test]
    async fn test_first_page_failure() {
        let exec = Scripted::new(vec![ConsoleResult::failed("")]);
        let snap = CommandDiscoverer::new(&exec, "/srv", fast(5)).discover().await;
        assert_eq!(snap.metadata.termination_reason, TerminationReason::HelpCommandFailed);
        assert_eq!(snap.metadata.pages_attempted, 1);
        assert_eq!(snap.metadata.pages_captured, 0);
        assert!(snap.commands.is_empty());
    }

    #[tokio::test]
    async fn test_empty_first_page() {
        let exec = Scripted::new(vec![ConsoleResult::ok("  \n\x1b[0m\n")]);
        let snap = CommandDiscoverer::new(&exec, "/srv", fast(5)).discover().await;
        assert_eq!(snap.metadata.termination_reason, TerminationReason::EmptyHelpOutput);
        assert_eq!(snap.metadata.pages_captured, 0);
        assert_eq!(snap.metadata.page_hashes.len(), 1);
    }

    #[tokio::test]
    async fn test_two_pages_then_empty() {
        let exec = Scripted::new(vec![
            ConsoleResult::ok("help - Lists commands\nstatus - Status"),
            ConsoleResult::ok("kick <player> - Kicks\nban <player> - Bans"),
            ConsoleResult::ok(""),
        ]);
        let snap = CommandDiscoverer::new(&exec, "/srv", fast(10)).discover().await;
        let keys: Vec<&str> = snap.commands.keys().collect();
        assert_eq!(keys, vec!["ban", "help", "kick", "status"]);
        assert_eq!(snap.metadata.pages_captured, 2);
        assert_eq!(snap.metadata.pages_attempted, 3);
        assert_eq!(snap.metadata.termination_reason, TerminationReason::EmptyPageOutput);
        assert_eq!(snap.commands.get("kick").unwrap().page, 2);
        assert_eq!(
            *exec.issued.lock().unwrap(),
            vec!["help", "help 2", "help 3"]
        );
    }

    #[tokio::test]
    async fn test_loop_detected_on_repeated_page() {
        let exec = Scripted::new(vec![
            ConsoleResult::ok("help - a\nstatus - b"),
            ConsoleResult::ok("list - c"),
            ConsoleResult::ok("\x1b[32mhelp - a\x1b[0m\nstatus - b  "),
        ]);
        let snap = CommandDiscoverer::new(&exec, "/srv", fast(10)).discover().await;
        assert_eq!(
            snap.metadata.termination_reason,
            TerminationReason::PaginationLoopDetected
        );
        assert_eq!(snap.metadata.pages_attempted, 3);
        assert_eq!(snap.metadata.pages_captured, 2);
        assert!(!snap.metadata.page_hashes.contains_key(&3));
    }

    #[tokio::test]
    async fn test_stable_pages_stop_run() {
        let exec = Scripted::new(vec![
            ConsoleResult::ok("help - a"),
            ConsoleResult::ok("help - a again\n-----"),
            ConsoleResult::ok("HELP - upper"),
        ]);
        let snap = CommandDiscoverer::new(&exec, "/srv", fast(10)).discover().await;
        assert_eq!(
            snap.metadata.termination_reason,
            TerminationReason::StableNoNewCommands
        );
        assert_eq!(snap.metadata.pages_captured, 3);
        assert_eq!(snap.commands.len(), 1);
        assert_eq!(snap.commands.get("help").unwrap().description, "a");
    }

    #[tokio::test]
    async fn test_page_failure_and_max_pages() {
        let exec = Scripted::new(vec![ConsoleResult::ok("help"), ConsoleResult::failed("")]);
        let snap = CommandDiscoverer::new(&exec, "/srv", fast(10)).discover().await;
        assert_eq!(snap.metadata.termination_reason, TerminationReason::PageFailed(2));
        assert_eq!(snap.metadata.termination_reason.to_string(), "page_2_failed");

        let exec = Scripted::new(vec![
            ConsoleResult::ok("help"),
            ConsoleResult::ok("list"),
            ConsoleResult::ok("status"),
        ]);
        let snap = CommandDiscoverer::new(&exec, "/srv", fast(2)).discover().await;
        assert_eq!(snap.metadata.termination_reason, TerminationReason::MaxPagesReached);
        assert_eq!(snap.metadata.pages_attempted, 2);
        assert!(snap.metadata.pages_captured <= snap.metadata.pages_attempted);
    }

    #[tokio::test]
    async fn test_discover_and_save_writes_snapshot() {
        let exec = Scripted::new(vec![ConsoleResult::ok("help - a")]);
        let dir = tempfile::tempdir().unwrap();
        let (snap, path) = CommandDiscoverer::new(&exec, "/srv", fast(3))
            .discover_and_save(&dir.path().join("snapshots"))
            .await
            .unwrap();
        assert!(path.exists());
        assert_eq!(DiscoverySnapshot::load(&path).unwrap(), snap);
    }
}
