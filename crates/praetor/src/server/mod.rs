//! Session control over the supervised server.
//!
//! Two interchangeable backends implement [`SessionController`]:
//! [`ManagedController`] owns the process, [`TmuxController`] drives an
//! existing tmux session. [`CommandRunner`] sits on top of either.

pub mod controller;
pub mod error;
pub mod managed;
pub mod probe;
pub mod runner;
pub mod status;
pub mod stray;
pub mod tmux;

pub use controller::{CAPTURE_MAX_LINES, SessionController, capture_since};
pub use error::{ServerError, ServerResult};
pub use managed::{Launcher, ManagedController, ManagedOptions, detect_launcher};
pub use probe::tcp_port_open;
pub use runner::{CommandResult, CommandRunner};
pub use status::ServerStatus;
pub use stray::{DEFAULT_STRAY_PATTERNS, StrayCleanup};
pub use tmux::{TmuxController, TmuxOptions};
