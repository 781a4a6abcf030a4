//! gpsrelay - GPS capture and relay service
//!
//! Headless binary: runs the capture pipeline and offers a few inspection
//! commands for setting up a receiver.

use anyhow::Context;
use clap::{Parser, Subcommand};
use gpsrelay_core::cli::{format_sentence, CliResult, ExitCodes, OutputFormat};
use gpsrelay_core::config::{self, AppConfig, ConfigError};
use gpsrelay_core::core::capture::CaptureExit;
use gpsrelay_core::core::discovery::{candidate_ports, DiscoveryConfig, PortDiscovery};
use gpsrelay_core::core::position::PositionState;
use gpsrelay_core::core::protocol::decode;
use gpsrelay_core::core::replay::ReplayOpener;
use gpsrelay_core::core::service::Service;
use gpsrelay_core::core::transport::{list_ports, PortOpener, SerialOpener};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// gpsrelay CLI
#[derive(Parser, Debug)]
#[command(
    name = "gpsrelay",
    version,
    about = "Capture NMEA GPS positions and relay them to file, HTTP, object storage and SQLite sinks",
    long_about = None
)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, env = "GPSRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write JSON logs to a daily rolled file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture positions and relay them to the enabled sinks
    Run {
        /// Serial port (disables auto-detect)
        #[arg(short, long)]
        port: Option<String>,

        /// Baud rate
        #[arg(short, long)]
        baud: Option<u32>,

        /// Replay a recorded NMEA log instead of a live receiver
        #[arg(long, conflicts_with = "port")]
        replay: Option<PathBuf>,
    },

    /// List available serial ports
    ListPorts {
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Probe candidate ports and print the one carrying NMEA traffic
    Detect {
        /// Baud rate
        #[arg(short, long)]
        baud: Option<u32>,
    },

    /// Decode NMEA lines from stdin
    Decode {
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,

        /// Print the accumulated position after the last line
        #[arg(long)]
        summary: bool,
    },

    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_logging(cli: &Cli) -> anyhow::Result<Option<WorkerGuard>> {
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let (file_layer, guard) = match &cli.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "gpsrelay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().json().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

fn load_config(cli: &Cli) -> Result<AppConfig, ConfigError> {
    match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
}

/// Cancellation token triggered by Ctrl-C
fn cancel_on_ctrlc() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Interrupt received, shutting down");
        token.cancel();
    }) {
        warn!("Failed to install Ctrl-C handler: {}", e);
    }
    cancel
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = match init_logging(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(ExitCodes::ERROR);
        }
    };

    let result = match &cli.command {
        Commands::Run { port, baud, replay } => {
            run(&cli, port.clone(), *baud, replay.clone()).await
        }
        Commands::ListPorts { format } => show_ports(*format),
        Commands::Detect { baud } => detect(&cli, *baud),
        Commands::Decode { format, summary } => decode_stdin(*format, *summary),
        Commands::InitConfig { force } => init_config(&cli, *force),
    };

    match &result {
        CliResult::Success(Some(msg)) => println!("{}", msg),
        CliResult::Success(None) => {}
        CliResult::Error(code, msg) => {
            error!("{}", msg);
            eprintln!("Error ({}): {}", code, msg);
        }
    }
    result.to_exit_code()
}

async fn run(
    cli: &Cli,
    port: Option<String>,
    baud: Option<u32>,
    replay: Option<PathBuf>,
) -> CliResult {
    let mut config = match load_config(cli) {
        Ok(config) => config,
        Err(e) => return CliResult::from(&e),
    };

    if let Some(port) = port {
        config.serial.port = Some(port);
        config.serial.auto_detect = false;
    }
    if let Some(baud) = baud {
        config.serial.baud_rate = baud;
    }

    let opener: Arc<dyn PortOpener> = match replay {
        Some(path) => {
            if !path.is_file() {
                return CliResult::error(
                    ExitCodes::ERROR,
                    format!("Replay file not found: {}", path.display()),
                );
            }
            config.serial.port = Some(path.display().to_string());
            config.serial.auto_detect = false;
            Arc::new(ReplayOpener::new(path))
        }
        None => Arc::new(SerialOpener),
    };

    if let Err(e) = config.validate() {
        return CliResult::from(&e);
    }

    info!("Starting gpsrelay v{}", gpsrelay_core::VERSION);
    let service = match Service::new(config, opener) {
        Ok(service) => service,
        Err(e) => return CliResult::from(&e),
    };

    match service.run(cancel_on_ctrlc()).await {
        Ok(summary) => {
            let lost = summary.shutdown.lost_records();
            if lost > 0 {
                warn!("{} records were not delivered before shutdown", lost);
            }
            let reason = match summary.capture.exit {
                CaptureExit::Cancelled => "cancelled",
                CaptureExit::EndOfStream => "end of stream",
                CaptureExit::ConsumerClosed => "consumer closed",
            };
            info!(
                "Stopped ({}): {} snapshots dispatched",
                reason, summary.filter.dispatched
            );
            CliResult::success()
        }
        Err(e) => CliResult::from(&e),
    }
}

fn show_ports(format: OutputFormat) -> CliResult {
    let ports = match list_ports() {
        Ok(ports) => ports,
        Err(e) => return CliResult::from(&e),
    };

    match format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = ports
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "name": p.port_name,
                        "type": format!("{:?}", p.port_type)
                    })
                })
                .collect();
            match serde_json::to_string_pretty(&json) {
                Ok(text) => CliResult::success_with_message(text),
                Err(e) => CliResult::error(ExitCodes::ERROR, e.to_string()),
            }
        }
        OutputFormat::Text => {
            if ports.is_empty() {
                return CliResult::success_with_message("No serial ports found.");
            }
            let names: Vec<&str> = ports.iter().map(|p| p.port_name.as_str()).collect();
            CliResult::success_with_message(names.join("\n"))
        }
    }
}

fn detect(cli: &Cli, baud: Option<u32>) -> CliResult {
    let config = match load_config(cli) {
        Ok(config) => config,
        Err(e) => return CliResult::from(&e),
    };

    let candidates = candidate_ports();
    info!("Probing {} candidate ports", candidates.len());

    let opener = SerialOpener;
    let discovery = PortDiscovery::new(
        &opener,
        DiscoveryConfig {
            baud_rate: baud.unwrap_or(config.serial.baud_rate),
            read_timeout: Duration::from_millis(config.serial.read_timeout_ms),
            probe_window: Duration::from_secs(config.serial.probe_window_secs),
        },
    );

    match discovery.discover(&candidates, &cancel_on_ctrlc()) {
        Ok(port) => CliResult::success_with_message(port),
        Err(e) => CliResult::from(&e),
    }
}

fn decode_stdin(format: OutputFormat, summary: bool) -> CliResult {
    let mut position = PositionState::default();
    let today = chrono::Utc::now().date_naive();

    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => return CliResult::error(ExitCodes::ERROR, e.to_string()),
        };
        let Some(sentence) = decode(line.trim()) else {
            tracing::debug!("Skipped: {}", line);
            continue;
        };

        match format_sentence(&sentence, format) {
            Ok(text) => println!("{}", text),
            Err(e) => return CliResult::error(ExitCodes::ERROR, e.to_string()),
        }
        position.apply(&sentence, today);
    }

    if !summary {
        return CliResult::success();
    }
    match serde_json::to_string_pretty(&position) {
        Ok(text) => CliResult::success_with_message(text),
        Err(e) => CliResult::error(ExitCodes::ERROR, e.to_string()),
    }
}

fn init_config(cli: &Cli, force: bool) -> CliResult {
    let Some(path) = cli.config.clone().or_else(config::config_file) else {
        return CliResult::error(
            ExitCodes::CONFIG_ERROR,
            "Could not determine config directory",
        );
    };

    if path.exists() && !force {
        return CliResult::error(
            ExitCodes::CONFIG_ERROR,
            format!("{} already exists (use --force to overwrite)", path.display()),
        );
    }

    match AppConfig::default().save_to(&path) {
        Ok(()) => CliResult::success_with_message(format!("Wrote {}", path.display())),
        Err(e) => CliResult::from(&e),
    }
}
