//! Command-name catalog used to seed the enforcement allowlist.
//!
//! File format: `{"commands": ["help", "status", ...]}`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Names used when no catalog file is configured or present.
pub const DEFAULT_COMMANDS: &[&str] = &["help", "?", "status", "players", "list", "say"];

static VALID_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_.-]{1,32}$").expect("Invalid regex pattern for command names")
});

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read commands file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse commands file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid commands file format (expected commands list): {0}")]
    Format(PathBuf),

    #[error("invalid command name in catalog: {0:?}")]
    InvalidName(String),
}

pub fn default_commands() -> Vec<String> {
    DEFAULT_COMMANDS.iter().map(|s| s.to_string()).collect()
}

/// Load command names, falling back to [`DEFAULT_COMMANDS`] when the path is
/// unset, the file is missing, or the list is empty after filtering.
pub fn load_command_names(path: Option<&Path>) -> Result<Vec<String>, CatalogError> {
    let Some(path) = path else {
        return Ok(default_commands());
    };
    if !path.exists() {
        return Ok(default_commands());
    }

    let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let data: Value = serde_json::from_str(&text).map_err(|source| CatalogError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let Some(commands) = data.get("commands").and_then(Value::as_array) else {
        return Err(CatalogError::Format(path.to_path_buf()));
    };

    let mut names: Vec<String> = Vec::new();
    for item in commands {
        let Some(name) = item.as_str().map(str::trim) else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        if !VALID_NAME.is_match(name) {
            return Err(CatalogError::InvalidName(name.to_string()));
        }
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }

    if names.is_empty() {
        Ok(default_commands())
    } else {
        Ok(names)
    }
}
