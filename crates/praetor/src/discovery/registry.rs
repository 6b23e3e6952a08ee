//! Discovered-command registry and the snapshot written after each discovery run.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use super::parser::{ParsedCommand, normalize_key};

/// Discovery source recorded on entries found through paginated help.
pub const HELP_SOURCE: &str = "help";

/// A discovered command with provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEntry {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub syntax: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default)]
    pub raw_line: String,
}

fn default_source() -> String {
    HELP_SOURCE.to_string()
}

fn default_page() -> u32 {
    1
}

impl CommandEntry {
    pub fn from_parsed(parsed: ParsedCommand, page: u32, source: &str) -> Self {
        Self {
            key: parsed.key(),
            name: parsed.name,
            syntax: parsed.syntax,
            description: parsed.description,
            source: source.to_string(),
            page,
            raw_line: parsed.raw_line,
        }
    }
}

/// Commands keyed by normalized name. The first entry for a key wins.
///
/// Serialized as a list sorted by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<CommandEntry>", into = "Vec<CommandEntry>")]
pub struct CommandRegistry {
    commands: BTreeMap<String, CommandEntry>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `entry` unless its key is already present. Returns whether it was new.
    pub fn add(&mut self, entry: CommandEntry) -> bool {
        if self.commands.contains_key(&entry.key) {
            return false;
        }
        self.commands.insert(entry.key.clone(), entry);
        true
    }

    /// Look up by name or key; `/` and `!` prefixes and case are ignored.
    pub fn get(&self, name: &str) -> Option<&CommandEntry> {
        self.commands.get(&normalize_key(name))
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = &CommandEntry> {
        self.commands.values()
    }
}

impl From<Vec<CommandEntry>> for CommandRegistry {
    fn from(entries: Vec<CommandEntry>) -> Self {
        let mut registry = Self::new();
        for mut entry in entries {
            if entry.syntax.is_empty() {
                entry.syntax = entry.name.clone();
            }
            registry.commands.insert(entry.key.clone(), entry);
        }
        registry
    }
}

impl From<CommandRegistry> for Vec<CommandEntry> {
    fn from(registry: CommandRegistry) -> Self {
        registry.commands.into_values().collect()
    }
}

/// Why a discovery run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum TerminationReason {
    HelpCommandFailed,
    EmptyHelpOutput,
    PageFailed(u32),
    EmptyPageOutput,
    PaginationLoopDetected,
    StableNoNewCommands,
    MaxPagesReached,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HelpCommandFailed => f.write_str("help_command_failed"),
            Self::EmptyHelpOutput => f.write_str("empty_help_output"),
            Self::PageFailed(page) => write!(f, "page_{page}_failed"),
            Self::EmptyPageOutput => f.write_str("empty_page_output"),
            Self::PaginationLoopDetected => f.write_str("pagination_loop_detected"),
            Self::StableNoNewCommands => f.write_str("stable_no_new_commands"),
            Self::MaxPagesReached => f.write_str("max_pages_reached"),
        }
    }
}

impl FromStr for TerminationReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "help_command_failed" => Self::HelpCommandFailed,
            "empty_help_output" => Self::EmptyHelpOutput,
            "empty_page_output" => Self::EmptyPageOutput,
            "pagination_loop_detected" => Self::PaginationLoopDetected,
            "stable_no_new_commands" => Self::StableNoNewCommands,
            "max_pages_reached" => Self::MaxPagesReached,
            other => {
                let page = other
                    .strip_prefix("page_")
                    .and_then(|rest| rest.strip_suffix("_failed"))
                    .and_then(|n| n.parse().ok())
                    .ok_or_else(|| format!("unknown termination reason: {other}"))?;
                Self::PageFailed(page)
            }
        })
    }
}

impl From<TerminationReason> for String {
    fn from(reason: TerminationReason) -> Self {
        reason.to_string()
    }
}

impl TryFrom<String> for TerminationReason {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Per-run pagination bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryMetadata {
    pub pages_attempted: u32,
    pub pages_captured: u32,
    pub termination_reason: TerminationReason,
    /// Page number to truncated content hash. JSON object keys are the page numbers as strings.
    #[serde(default)]
    pub page_hashes: BTreeMap<u32, String>,
}

/// Durable record of one discovery run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverySnapshot {
    pub server_root: String,
    pub captured_at: DateTime<Utc>,
    #[serde(rename = "help")]
    pub metadata: DiscoveryMetadata,
    pub commands: CommandRegistry,
}

impl DiscoverySnapshot {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating snapshot directory {}", parent.display()))?;
        }
        let body = serde_json::to_string_pretty(self).context("serializing discovery snapshot")?;
        std::fs::write(path, body)
            .with_context(|| format!("writing discovery snapshot to {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading discovery snapshot {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("parsing discovery snapshot {}", path.display()))
    }
}

/// `commands-YYYYMMDD-HHMMSS.json` in local time.
pub fn snapshot_filename() -> String {
    Local::now().format("commands-%Y%m%d-%H%M%S.json").to_string()
}
