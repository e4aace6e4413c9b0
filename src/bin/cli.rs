//! gnsslink CLI
//!
//! Command-line client for GNSS receivers.
//!
//! Usage:
//!   gnsslink ports
//!   gnsslink listen serial:/dev/ttyACM0?br=115200
//!   gnsslink version tcp://192.168.1.20:5000
//!   gnsslink decode capture.bin --protocols ubx,nmea,rtcm3

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use gnsslink_core::config::log_dir;
use gnsslink_core::core::transport::list_ports;
use gnsslink_core::{
    AppConfig, Completion, Connection, Device, GnssMessage, Protocol, Transport, VirtualPort,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// gnsslink - GNSS receiver stream client
#[derive(Parser, Debug)]
#[command(name = "gnsslink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    format: OutputFormat,

    /// Configuration file (defaults to the per-user config)
    #[arg(short, long, global = true, env = "GNSSLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Also write daily log files to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Write daily log files to the default log directory
    #[arg(long, global = true)]
    log_files: bool,

    /// Quiet mode (only output data)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// One line per message
    Text,
    /// One JSON object per message
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    Ports,

    /// Print every message decoded from a receiver
    Listen {
        /// Connection string (serial:PORT?br=BAUD or tcp://HOST:PORT)
        connection: Option<String>,

        /// Enabled protocols (comma separated, overrides the config)
        #[arg(short, long, value_delimiter = ',')]
        protocols: Vec<Protocol>,

        /// Stop after this many messages
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Also print parse errors
        #[arg(short, long)]
        errors: bool,
    },

    /// Read the software and hardware version of a u-blox receiver
    Version {
        /// Connection string
        connection: Option<String>,

        /// Attempts before giving up
        #[arg(short, long)]
        attempts: Option<u32>,

        /// Per-attempt timeout (ms)
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Decode a captured byte stream
    Decode {
        /// Capture file
        #[arg(required_unless_present = "hex")]
        file: Option<PathBuf>,

        /// Hex data to decode instead of a file
        #[arg(long, conflicts_with = "file")]
        hex: Option<String>,

        /// Enabled protocols (comma separated, overrides the config)
        #[arg(short, long, value_delimiter = ',')]
        protocols: Vec<Protocol>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load().unwrap_or_default(),
    };
    let _guard = init_tracing(&cli, &config);

    match &cli.command {
        Commands::Ports => show_ports(&cli)?,
        Commands::Listen {
            connection,
            protocols,
            count,
            errors,
        } => {
            let transport = resolve_transport(connection.as_deref(), &config)?;
            let parsers = select_parsers(protocols, &config);
            listen(&cli, &transport, parsers, *count, *errors).await?;
        }
        Commands::Version {
            connection,
            attempts,
            timeout,
        } => {
            let transport = resolve_transport(connection.as_deref(), &config)?;
            let mut device_config = config.device.clone();
            if let Some(attempts) = attempts {
                device_config.attempt_count = *attempts;
            }
            if let Some(timeout) = timeout {
                device_config.command_timeout_ms = *timeout;
            }
            read_version(&cli, &transport, device_config).await?;
        }
        Commands::Decode {
            file,
            hex,
            protocols,
        } => {
            let data = match (file, hex) {
                (_, Some(text)) => hex::decode(text.replace(' ', "")).context("invalid hex data")?,
                (Some(path), None) => std::fs::read(path)
                    .with_context(|| format!("cannot read {}", path.display()))?,
                (None, None) => anyhow::bail!("nothing to decode"),
            };
            decode(&cli, &data, select_parsers(protocols, &config))?;
        }
    }

    Ok(())
}

fn init_tracing(cli: &Cli, config: &AppConfig) -> Option<WorkerGuard> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let json = cli.log_json || config.logging.json;
    let directory = if cli.log_files {
        cli.log_dir
            .clone()
            .or_else(|| config.logging.directory.clone())
            .or_else(log_dir)
    } else {
        cli.log_dir.clone().or_else(|| config.logging.directory.clone())
    };

    let (file_writer, guard) = match directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "gnsslink.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match (json, file_writer) {
        (true, Some(file)) => builder
            .json()
            .with_writer(std::io::stderr.and(file))
            .try_init(),
        (true, None) => builder.json().with_writer(std::io::stderr).try_init(),
        (false, Some(file)) => builder
            .with_writer(std::io::stderr.and(file))
            .try_init(),
        (false, None) => builder.with_writer(std::io::stderr).try_init(),
    };
    if let Err(e) = result {
        eprintln!("Failed to initialize logging: {e}");
    }
    guard
}

fn resolve_transport(connection: Option<&str>, config: &AppConfig) -> anyhow::Result<Transport> {
    match connection {
        Some(s) => Ok(s.parse()?),
        None => config
            .connection
            .clone()
            .context("no connection given and none configured"),
    }
}

fn select_parsers(
    protocols: &[Protocol],
    config: &AppConfig,
) -> Vec<Box<dyn gnsslink_core::ProtocolParser>> {
    if protocols.is_empty() {
        config.parsers()
    } else {
        protocols.iter().filter_map(Protocol::parser).collect()
    }
}

fn show_ports(cli: &Cli) -> anyhow::Result<()> {
    let ports = list_ports()?;

    if ports.is_empty() {
        if !cli.quiet {
            println!("No serial ports found.");
        }
        return Ok(());
    }

    match cli.format {
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
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            for port in &ports {
                println!("{}", port.port_name);
            }
        }
    }

    Ok(())
}

fn print_message(cli: &Cli, message: &GnssMessage) -> anyhow::Result<()> {
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string(message)?),
        OutputFormat::Text => {
            let time = chrono::Local::now().format("%H:%M:%S%.3f");
            println!("[{time}] {message}");
        }
    }
    Ok(())
}

async fn listen(
    cli: &Cli,
    transport: &Transport,
    parsers: Vec<Box<dyn gnsslink_core::ProtocolParser>>,
    count: Option<usize>,
    show_errors: bool,
) -> anyhow::Result<()> {
    let source = transport.open().await?;
    let connection = Connection::open(source, parsers)?;

    if !cli.quiet {
        eprintln!("Listening on {} (Ctrl+C to stop)", connection.name());
    }

    let mut messages = connection.subscribe_messages();
    let mut errors = connection.subscribe_errors();
    let mut received = 0usize;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            message = messages.recv() => match message {
                Ok(message) => {
                    print_message(cli, &message)?;
                    received += 1;
                    if count.is_some_and(|n| received >= n) {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => tracing::warn!("Output lagged, {} messages skipped", n),
                Err(RecvError::Closed) => break,
            },
            error = errors.recv(), if show_errors => match error {
                Ok(error) => eprintln!("error: {error}"),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    if !cli.quiet {
        let counters = connection.counters();
        eprintln!(
            "{} messages, {} bytes received",
            received, counters.rx_bytes
        );
    }
    connection.close().await;
    Ok(())
}

async fn read_version(
    cli: &Cli,
    transport: &Transport,
    config: gnsslink_core::DeviceConfig,
) -> anyhow::Result<()> {
    let source = transport.open().await?;
    let parsers = vec![Protocol::Ubx.parser().context("UBX parser unavailable")?];
    let connection = Arc::new(Connection::open(source, parsers)?);
    let device = Device::new(connection.clone(), config);

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let result = device.initialize(&cancel).await;
    ctrl_c.abort();
    device.dispose();
    connection.close().await;

    match result? {
        Completion::Done(version) => match cli.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&version)?),
            OutputFormat::Text => {
                println!("Software: {}", version.sw_version);
                println!("Hardware: {}", version.hw_version);
                for extension in &version.extensions {
                    println!("  {extension}");
                }
            }
        },
        Completion::Stopped => {
            if !cli.quiet {
                eprintln!("Stopped");
            }
        }
    }
    Ok(())
}

fn decode(
    cli: &Cli,
    data: &[u8],
    parsers: Vec<Box<dyn gnsslink_core::ProtocolParser>>,
) -> anyhow::Result<()> {
    let port = VirtualPort::new("capture");
    let connection = Connection::open(port, parsers)?;
    let mut messages = connection.subscribe_messages();
    let mut errors = connection.subscribe_errors();

    let frames = connection.feed(data);

    while let Ok(message) = messages.try_recv() {
        print_message(cli, &message)?;
    }
    while let Ok(error) = errors.try_recv() {
        if !cli.quiet {
            eprintln!("error: {error}");
        }
    }

    let stats = connection.parser_stats();
    match cli.format {
        OutputFormat::Json => {
            let mut summary = serde_json::Map::new();
            for (protocol, stats) in &stats {
                summary.insert(protocol.to_string(), serde_json::to_value(stats)?);
            }
            eprintln!("{}", serde_json::Value::Object(summary));
        }
        OutputFormat::Text if !cli.quiet => {
            eprintln!("{} bytes, {} frames", data.len(), frames);
            for (protocol, stats) in &stats {
                eprintln!(
                    "  {:<12} {:>6} messages {:>4} errors",
                    protocol.to_string(),
                    stats.messages,
                    stats.errors()
                );
            }
        }
        OutputFormat::Text => {}
    }

    Ok(())
}
