//! Praetor supervises an interactive game dedicated server.
//!
//! It owns the server process (or drives an existing tmux session), turns the
//! console output into structured events, discovers the command surface by
//! paging through `help`, and gates every outbound command through a
//! sanitizer and a default-deny allowlist.

pub mod catalog;
pub mod config;
pub mod discovery;
pub mod events;
pub mod logs;
pub mod safety;
pub mod server;
pub mod supervisor;

pub use config::{AppConfig, ControlMode};
pub use supervisor::Supervisor;
