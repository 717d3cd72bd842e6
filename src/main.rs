//! tandem: run multiple commands in tandem.
//!
//! Parses the command line, merges it with an optional `tandem.toml`, and
//! hands the result to a `ProcessManager`. SIGINT and SIGTERM are forwarded
//! to the manager as operator interrupts.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use tandem::ansi::Palette;
use tandem::config::{self, FileConfig};
use tandem::{Config, Interrupter, ProcessManager, Summary};

const MAX_TIMEOUT_SECS: u64 = 65535;

const EXAMPLES: &str = "\
Examples:
  tandem 'php -S localhost:8000' 'make watch'
  tandem -d ./web 'npm run watch-js' 'npm run watch-css'
  tandem 'npm:watch-js' 'npm:watch-css'
  tandem 'npm:watch-*'";

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "tandem",
    version,
    about = "Run multiple commands in tandem",
    styles = help_styles(),
    after_help = EXAMPLES
)]
struct Cli {
    /// Commands to run; `npm:<script>` runs a package.json script.
    #[arg(value_name = "COMMAND")]
    commands: Vec<String>,
    /// Directory to run commands from.
    #[arg(short = 'd', long, value_name = "PATH")]
    directory: Option<PathBuf>,
    /// Seconds to wait for commands to exit gracefully before killing them.
    #[arg(
        short = 't',
        long,
        value_name = "SECONDS",
        value_parser = clap::value_parser!(u64).range(0..=65535)
    )]
    timeout: Option<u64>,
    /// Silence "Starting..." and other status lines.
    #[arg(long)]
    silent: bool,
    /// Disable ANSI colors.
    #[arg(long)]
    no_color: bool,
    /// Print command output without labels.
    #[arg(long)]
    raw: bool,
    /// Path to a config file (defaults to ./tandem.toml when present).
    #[arg(long, value_name = "FILE", conflicts_with = "no_config")]
    config: Option<PathBuf>,
    /// Ignore ./tandem.toml.
    #[arg(long)]
    no_config: bool,
}

/// Effective settings after merging the command line over the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RunSettings {
    commands: Vec<String>,
    directory: PathBuf,
    timeout: Duration,
    silent: bool,
    no_color: bool,
    raw: bool,
}

impl RunSettings {
    fn from_cli(cli: &Cli, file: FileConfig) -> Result<Self> {
        let timeout = cli.timeout.or(file.timeout).unwrap_or(5);
        if timeout > MAX_TIMEOUT_SECS {
            bail!("timeout must be between 0 and {MAX_TIMEOUT_SECS} seconds, got {timeout}");
        }
        let commands = if cli.commands.is_empty() {
            file.commands.unwrap_or_default()
        } else {
            cli.commands.clone()
        };
        let directory = cli
            .directory
            .clone()
            .or(file.directory)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Self {
            commands,
            directory,
            timeout: Duration::from_secs(timeout),
            silent: cli.silent || file.silent.unwrap_or(false),
            no_color: cli.no_color || file.no_color.unwrap_or(false),
            raw: cli.raw || file.raw.unwrap_or(false),
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let palette = Palette::from_env(cli.no_color);
    match run(&cli).await {
        Ok(summary) if summary.success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("{} {err:#}", palette.bold(&palette.red("Error:")));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<Summary> {
    let file = load_file_config(cli)?;
    let settings = RunSettings::from_cli(cli, file)?;
    tracing::debug!(?settings, "resolved settings");

    let mut config = Config::new(settings.commands, settings.directory);
    config.timeout = settings.timeout;
    config.silent = settings.silent;
    config.raw = settings.raw;
    config.palette = Palette::from_env(settings.no_color);

    let manager = ProcessManager::new(config, Box::new(std::io::stdout()))?;
    spawn_signal_listener(manager.interrupter());
    Ok(manager.run().await)
}

fn load_file_config(cli: &Cli) -> Result<FileConfig> {
    if cli.no_config {
        return Ok(FileConfig::default());
    }
    match cli.config.clone().or_else(config::default_config_path) {
        Some(path) => config::load_config(&path),
        None => Ok(FileConfig::default()),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tandem=warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Forwards every SIGINT and SIGTERM to the manager until the process ends.
fn spawn_signal_listener(interrupter: Interrupter) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(signal) => signal,
            Err(err) => {
                tracing::warn!("cannot listen for SIGINT: {err}");
                return;
            }
        };
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                tracing::warn!("cannot listen for SIGTERM: {err}");
                return;
            }
        };
        loop {
            tokio::select! {
                Some(()) = sigint.recv() => tracing::debug!("received SIGINT"),
                Some(()) = sigterm.recv() => tracing::debug!("received SIGTERM"),
                else => break,
            }
            interrupter.interrupt();
        }
    });
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
        .invalid(
            Style::new()
                .fg_color(Some(AnsiColor::Red.into()))
                .effects(Effects::BOLD),
        )
}
