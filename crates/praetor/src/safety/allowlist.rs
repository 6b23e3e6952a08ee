//! Prefix-based enforcement allowlist checked before every console write.

use std::collections::HashSet;
use thiserror::Error;

/// Conservative prefixes every allowlist starts from.
pub const CORE_PREFIXES: &[&str] = &["help", "?", "status", "players", "list", "say "];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Command not permitted by allowlist: {command}")]
pub struct CommandNotPermitted {
    pub command: String,
}

/// Immutable, default-deny set of command prefixes and exact names.
///
/// Rebuild it to change policy; there are no mutators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandAllowlist {
    prefixes: Vec<String>,
    /// Bare command names; these match only the whole command.
    exact: HashSet<String>,
}

impl Default for CommandAllowlist {
    fn default() -> Self {
        Self::new(std::iter::empty::<String>())
    }
}

impl CommandAllowlist {
    /// Core prefixes plus `extra`, deduplicated in first-seen order.
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut prefixes: Vec<String> = Vec::new();
        let candidates = CORE_PREFIXES
            .iter()
            .map(|p| p.to_string())
            .chain(extra.into_iter().map(Into::into));
        for prefix in candidates {
            if !prefix.is_empty() && !prefixes.contains(&prefix) {
                prefixes.push(prefix);
            }
        }
        Self {
            prefixes,
            exact: HashSet::new(),
        }
    }

    /// Build from a command catalog and the configured announce templates.
    ///
    /// Each catalog name is allowed as an exact command and contributes the
    /// prefix `"<name> "`. Each template contributes its first word in the
    /// same two forms. `"say"` therefore admits `say` and `say hi`, never `saying`.
    pub fn from_catalog(names: &[String], announce_templates: &[String]) -> Self {
        let heads = announce_templates.iter().filter_map(|template| {
            template
                .split_whitespace()
                .next()
                .filter(|head| !head.contains("{message}"))
        });
        let words: Vec<&str> = names
            .iter()
            .map(|name| name.trim())
            .chain(heads)
            .filter(|word| !word.is_empty())
            .collect();

        let mut allowlist = Self::new(words.iter().map(|word| format!("{word} ")));
        allowlist.exact = words.into_iter().map(str::to_string).collect();
        allowlist
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    pub fn exact_names(&self) -> &HashSet<String> {
        &self.exact
    }

    /// True iff the left-trimmed command equals an exact name, or equals or
    /// starts with a prefix.
    pub fn is_allowed(&self, command: &str) -> bool {
        let normalized = command.trim_start();
        if normalized.is_empty() {
            return false;
        }
        self.exact.contains(normalized.trim_end())
            || self
                .prefixes
                .iter()
                .any(|p| normalized == p || normalized.starts_with(p.as_str()))
    }

    pub fn require_allowed(&self, command: &str) -> Result<(), CommandNotPermitted> {
        if self.is_allowed(command) {
            Ok(())
        } else {
            Err(CommandNotPermitted {
                command: command.trim().to_string(),
            })
        }
    }
}
