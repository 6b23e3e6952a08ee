//! Synchronous gatekeepers applied to every outbound console write.
//!
//! Order matters: sanitize first, then check the allowlist.

pub mod allowlist;
pub mod sanitizer;

pub use allowlist::{CORE_PREFIXES, CommandAllowlist, CommandNotPermitted};
pub use sanitizer::{
    DISALLOWED_CHARS, UnsafeInputError, sanitize_announce, sanitize_command, sanitize_startup_reply,
};
