use std::io::{self, BufRead, Write};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use moisture_core::{
    Gateway, GatewayConfig, ProvisionConfig, Provisioner, TracingConsumer, find_first_serial_port,
};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Moisture sensor provisioning and gateway tool", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the first USB serial device
    Scan {
        /// Directory scanned for serial nodes
        #[arg(long, default_value = "/dev")]
        device_dir: PathBuf,
    },
    /// Flash a sensor and wait for it to register
    Provision {
        /// TOML provisioning config; FLASH_* variables override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Firmware sketch directory
        #[arg(long)]
        firmware: Option<PathBuf>,

        /// Explicit arduino-cli binary
        #[arg(long)]
        toolchain: Option<PathBuf>,

        /// Registration wait in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Run the UDP gateway and accept commands on stdin
    Serve {
        /// TOML gateway config
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Port to bind on all interfaces, overriding the config
        #[arg(short, long)]
        port: Option<u16>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    match args.command {
        Commands::Scan { device_dir } => scan(device_dir),
        Commands::Provision {
            config,
            firmware,
            toolchain,
            timeout,
        } => provision(config, firmware, toolchain, timeout),
        Commands::Serve { config, port } => serve(config, port),
    }
}

fn scan(device_dir: PathBuf) -> Result<()> {
    let port = find_first_serial_port(&device_dir).context("No serial device found")?;
    println!("{}", port.display());
    Ok(())
}

fn provision(
    config_path: Option<PathBuf>,
    firmware: Option<PathBuf>,
    toolchain: Option<PathBuf>,
    timeout: Option<u64>,
) -> Result<()> {
    let mut config = match &config_path {
        Some(path) => ProvisionConfig::load_from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ProvisionConfig::default(),
    }
    .with_env(|key| std::env::var(key).ok());

    if let Some(firmware) = firmware {
        config.firmware_path = firmware;
    }
    if toolchain.is_some() {
        config.toolchain_path = toolchain;
    }
    if let Some(timeout) = timeout {
        config.registration_timeout_secs = timeout;
    }

    info!(firmware = %config.firmware_path.display(), fqbn = %config.fqbn, "Starting provisioning");

    let attempt = Provisioner::new(config, Arc::new(TracingConsumer))
        .spawn()
        .context("Failed to start provisioning")?
        .join()
        .context("Provisioning thread failed")?;

    match (&attempt.identifier, &attempt.failure) {
        (Some(id), _) => println!("{}", id),
        (None, Some(e)) => {
            warn!(error = %e, "Sensor added as unassigned");
            println!("unassigned");
        }
        (None, None) => println!("unassigned"),
    }
    Ok(())
}

fn serve(config_path: Option<PathBuf>, port: Option<u16>) -> Result<()> {
    let mut config = match &config_path {
        Some(path) => GatewayConfig::load_from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => GatewayConfig::default(),
    };
    if let Some(port) = port {
        config.bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    }

    let mut gateway = Gateway::start(&config, Arc::new(TracingConsumer))
        .context("Failed to start gateway")?;
    println!("Listening on {}", gateway.local_addr());

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read stdin")?;
        match parse_command(&line) {
            Ok(Some(ServeCommand::Quit)) => break,
            Ok(Some(command)) => {
                if let Err(e) = execute(&gateway, command, &mut stdout) {
                    error!("Error: {}", e);
                }
            }
            Ok(None) => {}
            Err(usage) => writeln!(stdout, "{}", usage)?,
        }
        stdout.flush()?;
    }

    gateway.stop();
    Ok(())
}

/// Operator command read by `serve`.
#[derive(Debug, PartialEq)]
enum ServeCommand {
    Digital { id: String, activate: bool },
    Send { id: String, text: String },
    Logs(String),
    Live(String),
    State(String),
    List,
    Quit,
}

const USAGE: &str = "commands: on <id> | off <id> | send <id> <text> | logs <id> | live <id> | state <id> | list | quit";

/// Parse one stdin line; blank lines yield `None`.
fn parse_command(line: &str) -> Result<Option<ServeCommand>, &'static str> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim_start();
    let id = || {
        let id = rest.split_whitespace().next().ok_or(USAGE)?;
        Ok::<_, &'static str>(id.to_string())
    };

    let command = match verb {
        "on" => ServeCommand::Digital {
            id: id()?,
            activate: true,
        },
        "off" => ServeCommand::Digital {
            id: id()?,
            activate: false,
        },
        "send" => {
            let (id, text) = rest.split_once(char::is_whitespace).ok_or(USAGE)?;
            ServeCommand::Send {
                id: id.to_string(),
                text: text.trim_start().to_string(),
            }
        }
        "logs" => ServeCommand::Logs(id()?),
        "live" => ServeCommand::Live(id()?),
        "state" => ServeCommand::State(id()?),
        "list" => ServeCommand::List,
        "quit" | "exit" => ServeCommand::Quit,
        _ => return Err(USAGE),
    };
    Ok(Some(command))
}

fn execute(gateway: &Gateway, command: ServeCommand, out: &mut impl Write) -> Result<()> {
    match command {
        ServeCommand::Digital { id, activate } => {
            gateway.send_digital(&id, activate)?;
            writeln!(out, "ok")?;
        }
        ServeCommand::Send { id, text } => {
            gateway.send_text(&id, &text)?;
            writeln!(out, "ok")?;
        }
        ServeCommand::Logs(id) => {
            for line in gateway.recent_lines(&id)? {
                writeln!(out, "{}", line)?;
            }
        }
        ServeCommand::Live(id) => writeln!(out, "{}", gateway.live_text(&id)?)?,
        ServeCommand::State(id) => writeln!(out, "{}", gateway.output_state(&id)?)?,
        ServeCommand::List => {
            let registry = gateway.registry();
            for session in registry
                .identifiers()
                .iter()
                .filter_map(|id| registry.snapshot(id))
            {
                writeln!(
                    out,
                    "{} {} {} lines={}",
                    session.id(),
                    session.last_address(),
                    session.output_state(),
                    session.recent_lines().count()
                )?;
            }
        }
        ServeCommand::Quit => {}
    }
    Ok(())
}
