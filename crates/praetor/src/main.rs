use std::env;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use log::{LevelFilter, debug, info, warn};
use tokio::sync::broadcast::error::RecvError;

use praetor::config::{self, AppConfig, expand_str_path};
use praetor::discovery::{AllowlistBootstrapper, DiscoverySnapshot};
use praetor::events::ServerEvent;
use praetor::safety::{
    CommandAllowlist, sanitize_announce, sanitize_command, sanitize_startup_reply,
};
use praetor::Supervisor;

const APP_NAME: &str = "praetor";

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_serve(ctx: RuntimeContext, cmd: ServeCommand) -> Result<()> {
    handle_serve(&ctx, cmd).await
}

#[tokio::main]
async fn async_discover(ctx: RuntimeContext, cmd: DiscoverCommand) -> Result<()> {
    handle_discover(&ctx, cmd).await
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("resolved config file: {}", ctx.config_file.display());

    match cli.command {
        Command::Serve(cmd) => async_serve(ctx, cmd),
        Command::Discover(cmd) => async_discover(ctx, cmd),
        Command::Check(cmd) => handle_check(&ctx, cmd),
        Command::Classify(cmd) => handle_classify(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => handle_completions(shell),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Praetor - game dedicated server supervisor.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Output machine readable JSON
    #[arg(long, global = true)]
    json: bool,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    no_color: bool,
    /// Control color output (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    color: ColorOption,
    /// Do not change anything on disk
    #[arg(long = "dry-run", global = true)]
    dry_run: bool,
    /// Emit additional diagnostics for troubleshooting
    #[arg(long = "diagnostics", global = true)]
    diagnostics: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the supervisor and stream events until interrupted
    Serve(ServeCommand),
    /// Run command discovery against the server and write the allowlist artifacts
    Discover(DiscoverCommand),
    /// Check a command against the sanitizer and enforcement allowlist without sending it
    Check(CheckCommand),
    /// Classify a saved discovery snapshot offline
    Classify(ClassifyCommand),
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Args)]
struct ServeCommand {
    /// Do not start or attach to the server; only ingest the configured log file
    #[arg(long = "no-start")]
    no_start: bool,
}

#[derive(Debug, Args)]
struct DiscoverCommand {
    /// Seconds to wait for readiness markers before discovery
    #[arg(long = "ready-timeout", default_value = "60")]
    ready_timeout: u64,
    /// Leave the server running afterwards (managed mode)
    #[arg(long = "keep-running")]
    keep_running: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CheckKind {
    Command,
    Announce,
    StartupReply,
}

#[derive(Debug, Args)]
struct CheckCommand {
    /// Text to check
    #[arg(value_name = "TEXT")]
    text: String,
    /// Which outbound path to check against
    #[arg(long, value_enum, default_value_t = CheckKind::Command)]
    kind: CheckKind,
}

#[derive(Debug, Args)]
struct ClassifyCommand {
    /// Discovery snapshot JSON file
    #[arg(value_name = "SNAPSHOT")]
    snapshot: PathBuf,
    /// Write allowlist artifacts into this directory
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
    /// Regenerate the default configuration file
    Reset,
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    config_file: PathBuf,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let config_file = resolve_config_file(common.config.clone())?;
        let config = load_or_init_config(&config_file, &common)?;
        Ok(Self {
            common,
            config_file,
            config,
        })
    }

    fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }

        let level = match self.effective_log_level() {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        };

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{APP_NAME}={level}")));

        if self.common.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
                .try_init()
                .ok();
        } else {
            let force_color = matches!(self.common.color, ColorOption::Always)
                || env::var_os("FORCE_COLOR").is_some();
            let disable_color = self.common.no_color
                || matches!(self.common.color, ColorOption::Never)
                || env::var_os("NO_COLOR").is_some()
                || (!force_color && !io::stderr().is_terminal());

            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(io::stderr)
                        .with_ansi(!disable_color)
                        .with_target(self.common.diagnostics)
                        .with_file(self.common.diagnostics)
                        .with_line_number(self.common.diagnostics),
                )
                .try_init()
                .ok();
        }

        // The library logs through the `log` facade.
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
        builder.filter_level(self.effective_log_level());
        builder.try_init().ok();

        Ok(())
    }

    fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => self
                    .config
                    .logging
                    .level
                    .parse()
                    .unwrap_or(LevelFilter::Info),
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    fn print_json<T: serde::Serialize>(&self, value: &T) -> Result<()> {
        println!(
            "{}",
            serde_json::to_string_pretty(value).context("serializing output to JSON")?
        );
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn describe_event(event: &ServerEvent) -> String {
    match event {
        ServerEvent::Chat(chat) => format!("chat    <{}> {}", chat.player, chat.message),
        ServerEvent::Mention(chat) => format!("mention <{}> {}", chat.player, chat.message),
        ServerEvent::Activity(activity) => format!("{:<7} {}", activity.kind, activity.player),
        ServerEvent::Error(err) => format!("error   {}", err.line),
    }
}

async fn handle_serve(ctx: &RuntimeContext, cmd: ServeCommand) -> Result<()> {
    let mut config = ctx.config.clone();
    if cmd.no_start {
        config.server.auto_start = false;
    }
    let supervisor = Supervisor::new(config)?;
    let mut events = supervisor.subscribe();
    supervisor.start().await;

    let status = supervisor.get_status().await;
    info!(
        "Supervisor up: mode={} running={} pid={:?}",
        status.control_mode, status.server.running, status.server.pid
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            received = events.recv() => match received {
                Ok(event) => {
                    if ctx.common.json {
                        println!("{}", serde_json::to_string(&event).context("serializing event")?);
                    } else {
                        println!("{}", describe_event(&event));
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!("event stream lagged, {skipped} events dropped"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!("Shutdown signal received, stopping server...");
    supervisor.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

async fn handle_discover(ctx: &RuntimeContext, cmd: DiscoverCommand) -> Result<()> {
    if ctx.common.dry_run {
        info!("dry-run: would run command discovery against the configured server");
        return Ok(());
    }

    let supervisor = Supervisor::new(ctx.config.clone())?;
    let started = supervisor.start_server().await;
    if !started.ok {
        bail!(
            "unable to start server: {}",
            started.error.unwrap_or_default()
        );
    }

    let ready = supervisor
        .wait_until_ready(Duration::from_secs(cmd.ready_timeout))
        .await;
    if !ready.ready {
        warn!("server did not report ready; attempting discovery anyway");
    }

    let outcome = supervisor.bootstrap_allowlist().await;
    if !cmd.keep_running {
        supervisor.shutdown().await;
    }

    ctx.print_json(&outcome)?;
    if !outcome.ok {
        bail!("discovery failed: {}", outcome.error.unwrap_or_default());
    }
    Ok(())
}

fn handle_check(ctx: &RuntimeContext, cmd: CheckCommand) -> Result<()> {
    let safety = &ctx.config.safety;
    let names = praetor::catalog::load_command_names(ctx.config.commands_file().as_deref())
        .context("loading command catalog")?;
    let allowlist = CommandAllowlist::from_catalog(&names, &safety.announce_command_templates);

    let checked = match cmd.kind {
        CheckKind::Command => sanitize_command(&cmd.text, safety.max_command_length)
            .map_err(anyhow::Error::from)
            .and_then(|c| {
                allowlist.require_allowed(&c)?;
                Ok(c)
            }),
        CheckKind::Announce => {
            sanitize_announce(&cmd.text, safety.max_announce_length).map_err(anyhow::Error::from)
        }
        CheckKind::StartupReply => {
            sanitize_startup_reply(&cmd.text, safety.max_startup_reply_length)
                .map_err(anyhow::Error::from)
        }
    };

    match checked {
        Ok(cleaned) => {
            if ctx.common.json {
                ctx.print_json(&serde_json::json!({ "ok": true, "command": cleaned }))?;
            } else {
                println!("allowed: {cleaned}");
            }
            Ok(())
        }
        Err(e) => {
            if ctx.common.json {
                ctx.print_json(&serde_json::json!({ "ok": false, "error": e.to_string() }))?;
            }
            Err(e.context(format!("rejected: {:?}", cmd.text)))
        }
    }
}

fn handle_classify(ctx: &RuntimeContext, cmd: ClassifyCommand) -> Result<()> {
    let snapshot = DiscoverySnapshot::load(&cmd.snapshot)?;
    let bootstrapper = AllowlistBootstrapper::new(
        ctx.config.safety.max_command_length,
        ctx.config.safety.max_announce_length,
    );
    let source = cmd.snapshot.display().to_string();

    let allowlist = match cmd.output {
        Some(dir) if !ctx.common.dry_run => {
            let dir = expand_path(dir)?;
            let artifacts = bootstrapper.bootstrap_and_save(&snapshot, &dir, &source)?;
            info!("allowlist written to {}", artifacts.json_path.display());
            artifacts.allowlist
        }
        Some(dir) => {
            info!("dry-run: would write allowlist artifacts to {}", dir.display());
            bootstrapper.bootstrap(&snapshot, &source)
        }
        None => bootstrapper.bootstrap(&snapshot, &source),
    };

    if ctx.common.json {
        ctx.print_json(&allowlist)
    } else {
        print!("{}", allowlist.to_markdown());
        Ok(())
    }
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if ctx.common.json {
                ctx.print_json(&ctx.config)
            } else {
                print!(
                    "{}",
                    toml::to_string_pretty(&ctx.config).context("serializing config to TOML")?
                );
                Ok(())
            }
        }
        ConfigCommand::Path => {
            println!("{}", ctx.config_file.display());
            Ok(())
        }
        ConfigCommand::Reset => {
            if ctx.common.dry_run {
                info!(
                    "dry-run: would reset config at {}",
                    ctx.config_file.display()
                );
                return Ok(());
            }
            write_default_config(&ctx.config_file)
        }
    }
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}

fn resolve_config_file(override_path: Option<PathBuf>) -> Result<PathBuf> {
    let config_file = match override_path {
        Some(path) => {
            let expanded = expand_path(path)?;
            if expanded.is_dir() {
                expanded.join("config.toml")
            } else {
                expanded
            }
        }
        None => default_config_dir()?.join("config.toml"),
    };

    if config_file.parent().is_none() {
        return Err(anyhow!("invalid config file path: {config_file:?}"));
    }
    Ok(config_file)
}

fn load_or_init_config(path: &Path, common: &CommonOpts) -> Result<AppConfig> {
    if !path.exists() {
        if common.dry_run {
            info!("dry-run: would create default config at {}", path.display());
        } else {
            write_default_config(path)?;
        }
    }
    debug!("config env prefix: {}", config::ENV_PREFIX);
    config::load(path)
}

fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = default_config_header(path);
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn default_config_header(path: &Path) -> String {
    let mut buffer = String::new();
    buffer.push_str("# Configuration for ");
    buffer.push_str(APP_NAME);
    buffer.push('\n');
    buffer.push_str("# File: ");
    buffer.push_str(&path.display().to_string());
    buffer.push('\n');
    buffer.push_str("# Environment overrides: PRAETOR__SECTION__KEY\n");
    buffer.push('\n');
    buffer
}

fn expand_path(path: PathBuf) -> Result<PathBuf> {
    if let Some(text) = path.to_str() {
        expand_str_path(text)
    } else {
        Ok(path)
    }
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        let mut path = PathBuf::from(dir);
        path.push(APP_NAME);
        return Ok(path);
    }

    if let Some(mut dir) = dirs::config_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}
