//! Arturo node: station runtime and operator tools over the message bus.

use anyhow::{bail, Context};
use arturo_core::{logging, Config};
use arturo_protocol::{EstopReason, SCHEMA_VERSION};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod control;
mod loopback;
mod node;
mod station;

use node::Node;

const NODE_PROTOCOL_VERSION: u32 = 1;
const NODE_RUNTIME_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct NodeVersionHandshake {
    version: &'static str,
    runtime_version: u32,
    protocol_version: u32,
    schema_version: &'static str,
}

#[derive(Parser)]
#[command(name = "arturo-node")]
#[command(about = "Station runtime and operator tools for the Arturo message bus", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "ARTURO_CONFIG")]
    config: Option<PathBuf>,

    /// Print the version handshake as JSON and exit
    #[arg(long)]
    version_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a station: answer commands, heartbeat, honor emergency stops
    Station,

    /// Send one device command and print the correlated response
    Send {
        /// Target station instance
        station: String,
        /// Device on that station
        device: String,
        /// Command name
        command: String,
        /// Command parameter, repeatable
        #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
        params: Vec<(String, String)>,
        /// Response timeout (defaults to controller.default_timeout_ms)
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Total attempts, each with a fresh correlation id
        #[arg(long, default_value = "1")]
        attempts: u32,
    },

    /// Publish an emergency stop to every station
    Estop {
        #[arg(long, value_enum, default_value = "operator-command")]
        reason: ReasonArg,
        #[arg(long)]
        description: Option<String>,
    },

    /// Watch heartbeats and emergency stops and print station state changes
    Monitor {
        /// Only show this station
        #[arg(long)]
        station: Option<String>,
        /// One JSON object per line instead of text
        #[arg(long)]
        json: bool,
    },

    /// Check schema documents and their examples
    CheckSchemas {
        /// Schema directory (defaults to schemas.dir, then the bundled set)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ReasonArg {
    ButtonPress,
    OperatorCommand,
    SafetyInterlock,
    DeviceFault,
    SoftwareError,
}

impl From<ReasonArg> for EstopReason {
    fn from(reason: ReasonArg) -> Self {
        match reason {
            ReasonArg::ButtonPress => EstopReason::ButtonPress,
            ReasonArg::OperatorCommand => EstopReason::OperatorCommand,
            ReasonArg::SafetyInterlock => EstopReason::SafetyInterlock,
            ReasonArg::DeviceFault => EstopReason::DeviceFault,
            ReasonArg::SoftwareError => EstopReason::SoftwareError,
        }
    }
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {:?}", raw)),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => {
            let mut config = Config::default_config();
            config.apply_env_overrides();
            config.validate().context("default configuration")?;
            Ok(config)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.version_json {
        let handshake = NodeVersionHandshake {
            version: env!("CARGO_PKG_VERSION"),
            runtime_version: NODE_RUNTIME_VERSION,
            protocol_version: NODE_PROTOCOL_VERSION,
            schema_version: SCHEMA_VERSION,
        };
        println!("{}", serde_json::to_string(&handshake)?);
        return Ok(());
    }

    let Some(command) = cli.command else {
        bail!("no subcommand given; run with --help");
    };

    let config = load_config(cli.config.as_deref())?;
    logging::init_from_config(&config.logging);

    match command {
        Command::CheckSchemas { dir } => {
            let dir = dir.or_else(|| config.schemas.dir.clone());
            control::check_schemas(dir.as_deref())
        }
        Command::Station => {
            let node = Node::connect(config).await?;
            station::run(&node).await
        }
        Command::Send {
            station,
            device,
            command,
            params,
            timeout_ms,
            attempts,
        } => {
            let node = Node::connect(config).await?;
            let timeout = timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| node.config.controller.default_timeout());
            let request = control::SendRequest {
                station,
                device,
                command,
                params,
                timeout,
                attempts,
            };
            control::send(&node, request).await
        }
        Command::Estop {
            reason,
            description,
        } => {
            let node = Node::connect(config).await?;
            control::estop(&node, reason.into(), description).await
        }
        Command::Monitor { station, json } => {
            let node = Node::connect(config).await?;
            control::monitor(&node, station.as_deref(), json).await
        }
    }
}
