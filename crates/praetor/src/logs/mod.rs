//! Log capture: the rolling buffer and the workers that feed it.

pub mod buffer;
pub mod ingest;

pub use buffer::{LogLine, RollingLogBuffer};
pub use ingest::{FileTailer, LineHook, LineSink, spawn_stream_reader};
