//! Default-deny allowlist generation from a discovery snapshot.
//!
//! Classification is ordered: dangerous patterns win over everything, then
//! messaging, then safe names, then read-only descriptions. Anything left is
//! denied as `unknown_unclassified`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use super::parser::normalize_key;
use super::registry::DiscoverySnapshot;
use crate::safety::DISALLOWED_CHARS;

pub const ALLOWLIST_JSON: &str = "allowlist-active.json";
pub const ALLOWLIST_REPORT: &str = "allowlist-active.md";
pub const DEFAULT_MODE: &str = "default_deny";

pub const REASON_DANGEROUS: &str = "matches_dangerous_pattern";
pub const REASON_MESSAGING: &str = "messaging_command";
pub const REASON_SAFE_NAME: &str = "safe_name_pattern";
pub const REASON_SAFE_DESCRIPTION: &str = "safe_description";
pub const REASON_UNCLASSIFIED: &str = "unknown_unclassified";

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("Invalid regex pattern for command classification"))
        .collect()
}

static SAFE_NAME: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)^help$",
        r"(?i)^version$",
        r"^\?$",
        r"(?i)^.*list$",
        r"(?i)^.*status$",
        r"(?i)^.*info$",
        r"(?i)^players?$",
        r"(?i)^online$",
        r"(?i)^uptime$",
        r"(?i)^time$",
        r"(?i)^seed$",
        r"(?i)^tps$",
        r"(?i)^ping$",
        r"(?i)^motd$",
    ])
});

static SAFE_DESCRIPTION: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)\b(show|list|display|view|print|get)\b",
        r"(?i)\b(information|status|info)\b",
    ])
});

static MESSAGING: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[r"(?i)^(say|announce|broadcast|msg|tell|whisper)$"])
});

static DANGEROUS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)\b(kick|ban|unban|pardon)\b",
        r"(?i)\b(op|deop|admin)\b",
        r"(?i)\b(save|load|backup|restore)\b",
        r"(?i)\b(stop|shutdown|restart|reload)\b",
        r"(?i)\b(give|spawn|summon|create)\b",
        r"(?i)\b(tp|teleport|warp)\b",
        r"(?i)\b(kill|damage|heal)\b",
        r"(?i)\b(set|config|configure|edit)\b",
        r"(?i)\b(add|remove|delete|clear)\b",
        r"(?i)\b(cheat|god|fly|noclip)\b",
        r"(?i)\b(world|gen|generate)\b",
        r"(?i)\b(whitelist|blacklist)\b.*\b(add|remove)\b",
        r"(?i)\bexec(ute)?\b",
    ])
});

/// Mutating verb glued to a noun, e.g. `setstatus` or `clearlist`. The word
/// patterns above cannot see these, and the `*status`/`*list` name patterns
/// would otherwise pass them as safe. Checked against names only.
static GLUED_MUTATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(set|clear|add|remove|delete|reset|edit)[a-z]")
        .expect("Invalid regex pattern for glued mutating names")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyCategory {
    Safe,
    Messaging,
    Dangerous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgPolicy {
    #[default]
    Any,
    Message,
    None,
}

impl std::fmt::Display for ArgPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Any => "any",
            Self::Message => "message",
            Self::None => "none",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowlistEntry {
    pub command: String,
    #[serde(default = "default_max_len")]
    pub max_len: usize,
    #[serde(default)]
    pub arg_policy: ArgPolicy,
    #[serde(default)]
    pub reason: String,
}

fn default_max_len() -> usize {
    200
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeniedEntry {
    pub command: String,
    pub reason: String,
}

/// Character and substring blocklist recorded alongside a generated allowlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizationRules {
    #[serde(default)]
    pub reject_chars: Vec<String>,
    #[serde(default)]
    pub reject_patterns: Vec<String>,
}

impl Default for SanitizationRules {
    fn default() -> Self {
        let mut reject_chars: Vec<String> = DISALLOWED_CHARS.iter().map(char::to_string).collect();
        reject_chars.push("\\n".to_string());
        reject_chars.push("\\r".to_string());
        Self {
            reject_chars,
            reject_patterns: ["&&", "||", "../", "~/", "`", "$("]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

fn default_mode() -> String {
    DEFAULT_MODE.to_string()
}

/// Auditable allow/deny artifact produced by one bootstrap run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedAllowlist {
    pub generated_at: DateTime<Utc>,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub source_snapshot: String,
    #[serde(default)]
    pub allowed: Vec<AllowlistEntry>,
    #[serde(default)]
    pub denied: Vec<DeniedEntry>,
    #[serde(default)]
    pub sanitization: SanitizationRules,
}

impl GeneratedAllowlist {
    pub fn new(source_snapshot: impl Into<String>) -> Self {
        Self {
            generated_at: Utc::now(),
            mode: default_mode(),
            source_snapshot: source_snapshot.into(),
            allowed: Vec::new(),
            denied: Vec::new(),
            sanitization: SanitizationRules::default(),
        }
    }

    /// Entry for `command`, matched by normalized key.
    pub fn is_allowed(&self, command: &str) -> Option<&AllowlistEntry> {
        let key = normalize_key(command);
        self.allowed.iter().find(|e| e.command == key)
    }

    pub fn allowed_commands(&self) -> Vec<&str> {
        self.allowed.iter().map(|e| e.command.as_str()).collect()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating allowlist directory {}", parent.display()))?;
        }
        let body = serde_json::to_string_pretty(self).context("serializing allowlist")?;
        std::fs::write(path, body)
            .with_context(|| format!("writing allowlist to {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading allowlist {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing allowlist {}", path.display()))
    }

    /// Human-readable report with allowed, denied and sanitization sections.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let source = if self.source_snapshot.is_empty() {
            "N/A"
        } else {
            self.source_snapshot.as_str()
        };
        let _ = writeln!(out, "# Praetor Allowlist Report\n");
        let _ = writeln!(out, "**Generated:** {}", self.generated_at.to_rfc3339());
        let _ = writeln!(out, "**Mode:** {}", self.mode);
        let _ = writeln!(out, "**Source Snapshot:** {source}\n");

        let _ = writeln!(out, "## Allowed Commands\n");
        let _ = writeln!(out, "| Command | Max Length | Arg Policy | Reason |");
        let _ = writeln!(out, "|---------|------------|------------|--------|");
        let mut allowed: Vec<&AllowlistEntry> = self.allowed.iter().collect();
        allowed.sort_by(|a, b| a.command.cmp(&b.command));
        for e in allowed {
            let _ = writeln!(
                out,
                "| `{}` | {} | {} | {} |",
                e.command, e.max_len, e.arg_policy, e.reason
            );
        }

        let _ = writeln!(out, "\n## Denied Commands\n");
        let _ = writeln!(out, "| Command | Reason |");
        let _ = writeln!(out, "|---------|--------|");
        let mut denied: Vec<&DeniedEntry> = self.denied.iter().collect();
        denied.sort_by(|a, b| a.command.cmp(&b.command));
        for e in denied {
            let _ = writeln!(out, "| `{}` | {} |", e.command, e.reason);
        }

        let _ = writeln!(out, "\n## Sanitization Rules\n");
        let _ = writeln!(
            out,
            "**Rejected Characters:** `{}`\n",
            self.sanitization.reject_chars.join(", ")
        );
        let _ = write!(
            out,
            "**Rejected Patterns:** `{}`",
            self.sanitization.reject_patterns.join(", ")
        );
        out
    }
}

/// Paths written by [`AllowlistBootstrapper::bootstrap_and_save`].
#[derive(Debug, Clone)]
pub struct BootstrapArtifacts {
    pub allowlist: GeneratedAllowlist,
    pub json_path: PathBuf,
    /// `None` when the report could not be written; the JSON is authoritative.
    pub report_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AllowlistBootstrapper {
    safe_max_len: usize,
    messaging_max_len: usize,
}

impl Default for AllowlistBootstrapper {
    fn default() -> Self {
        Self {
            safe_max_len: 200,
            messaging_max_len: 400,
        }
    }
}

impl AllowlistBootstrapper {
    pub fn new(safe_max_len: usize, messaging_max_len: usize) -> Self {
        Self {
            safe_max_len,
            messaging_max_len,
        }
    }

    /// Classify one command. Total: every input gets exactly one category.
    pub fn classify(&self, name: &str, description: &str) -> (SafetyCategory, &'static str) {
        let bare = name.trim_start_matches(['/', '!']);
        if GLUED_MUTATOR.is_match(bare)
            || DANGEROUS
                .iter()
                .any(|re| re.is_match(bare) || re.is_match(description))
        {
            return (SafetyCategory::Dangerous, REASON_DANGEROUS);
        }
        if MESSAGING.iter().any(|re| re.is_match(bare)) {
            return (SafetyCategory::Messaging, REASON_MESSAGING);
        }
        if SAFE_NAME.iter().any(|re| re.is_match(bare)) {
            return (SafetyCategory::Safe, REASON_SAFE_NAME);
        }
        if SAFE_DESCRIPTION.iter().any(|re| re.is_match(description)) {
            return (SafetyCategory::Safe, REASON_SAFE_DESCRIPTION);
        }
        (SafetyCategory::Dangerous, REASON_UNCLASSIFIED)
    }

    pub fn bootstrap(&self, snapshot: &DiscoverySnapshot, snapshot_path: &str) -> GeneratedAllowlist {
        let mut allowlist = GeneratedAllowlist::new(snapshot_path);
        for entry in snapshot.commands.iter() {
            let (category, reason) = self.classify(&entry.name, &entry.description);
            match category {
                SafetyCategory::Safe | SafetyCategory::Messaging => {
                    let (max_len, arg_policy) = if category == SafetyCategory::Safe {
                        (self.safe_max_len, ArgPolicy::Any)
                    } else {
                        (self.messaging_max_len, ArgPolicy::Message)
                    };
                    debug!("allowlist: ALLOW '{}' ({reason})", entry.key);
                    allowlist.allowed.push(AllowlistEntry {
                        command: entry.key.clone(),
                        max_len,
                        arg_policy,
                        reason: reason.to_string(),
                    });
                }
                SafetyCategory::Dangerous => {
                    debug!("allowlist: DENY '{}' ({reason})", entry.key);
                    allowlist.denied.push(DeniedEntry {
                        command: entry.key.clone(),
                        reason: reason.to_string(),
                    });
                }
            }
        }
        info!(
            "allowlist bootstrap complete: {} allowed, {} denied",
            allowlist.allowed.len(),
            allowlist.denied.len()
        );
        allowlist
    }

    /// Bootstrap and write `allowlist-active.json` plus the Markdown report into `output_dir`.
    pub fn bootstrap_and_save(
        &self,
        snapshot: &DiscoverySnapshot,
        output_dir: &Path,
        snapshot_path: &str,
    ) -> Result<BootstrapArtifacts> {
        let allowlist = self.bootstrap(snapshot, snapshot_path);
        std::fs::create_dir_all(output_dir)
            .with_context(|| format!("creating allowlist directory {}", output_dir.display()))?;

        let json_path = output_dir.join(ALLOWLIST_JSON);
        allowlist.save(&json_path)?;
        info!("allowlist saved to {}", json_path.display());

        let report = output_dir.join(ALLOWLIST_REPORT);
        let report_path = match std::fs::write(&report, allowlist.to_markdown()) {
            Ok(()) => Some(report),
            Err(err) => {
                warn!("failed to write allowlist report {}: {err}", report.display());
                None
            }
        };

        Ok(BootstrapArtifacts {
            allowlist,
            json_path,
            report_path,
        })
    }
}
