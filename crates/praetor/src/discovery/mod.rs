//! Command discovery: help-page parsing, the paginated discoverer, and the
//! allowlist bootstrapper that turns a discovery snapshot into policy.

pub mod bootstrap;
pub mod discoverer;
pub mod parser;
pub mod registry;

pub use bootstrap::{
    AllowlistBootstrapper, AllowlistEntry, ArgPolicy, BootstrapArtifacts, DeniedEntry,
    GeneratedAllowlist, SafetyCategory, SanitizationRules,
};
pub use discoverer::{CommandDiscoverer, CommandExecutor, ConsoleResult, DiscoveryOptions};
pub use parser::{ParsedCommand, parse_command_line};
pub use registry::{
    CommandEntry, CommandRegistry, DiscoveryMetadata, DiscoverySnapshot, TerminationReason,
};
