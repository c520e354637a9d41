//! Array Volume Adapters
//!
//! Operator command line for a Dell Storage Center backend: check the
//! Data Collector session and run single map, unmap and clone operations.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use array_volume_adapters::backends::dellsc::HttpClient;
use array_volume_adapters::{
    AdapterConfig, BackendConfig, Connector, LoggingConfig, Protocol, ScConfig,
    StorageCenterDriver, VolumeDriver, VolumeProvisioner, VolumeRef,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Volume driver adapters for Dell Storage Center and EMC VMAX arrays
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Adapter configuration file (YAML)
    #[arg(long, env = "ADAPTER_CONFIG", default_value = "/etc/array-volume-adapters/config.yaml")]
    config: PathBuf,

    /// Backend to use when the file configures several
    #[arg(long, env = "ADAPTER_BACKEND")]
    backend: Option<String>,

    /// Log level (trace, debug, info, warn, error); overrides the file
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and confirm the Storage Center is managed by the Data Collector
    Check,

    /// Map a volume to a host, creating the server if needed
    Map {
        #[arg(long)]
        volume: String,
        #[arg(long)]
        provider_id: Option<String>,
        #[arg(long)]
        host: String,
        /// WWPN or IQN; repeat for several
        #[arg(long = "initiator", required = true)]
        initiators: Vec<String>,
    },

    /// Unmap a volume from one host, or from every host without initiators
    Unmap {
        #[arg(long)]
        volume: String,
        #[arg(long)]
        provider_id: Option<String>,
        #[arg(long = "initiator")]
        initiators: Vec<String>,
    },

    /// Clone a volume through copy-mirror-migrate
    Clone {
        #[arg(long)]
        source: String,
        #[arg(long)]
        provider_id: Option<String>,
        /// Name of the new volume
        #[arg(long)]
        name: String,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = AdapterConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    init_logging(&args, &config.logging);

    info!("Starting {} {}", array_volume_adapters::NAME, array_volume_adapters::VERSION);

    let (name, backend) = config.backend(args.backend.as_deref())?;
    let sc_config = match backend {
        BackendConfig::Dellsc(sc) => sc.clone(),
        other => bail!("backend {} is {}; only dellsc backends are supported here", name, other.kind()),
    };
    info!("Using backend {} ({}:{})", name, sc_config.san_ip, sc_config.san_port);

    let client = Arc::new(HttpClient::new(sc_config.http_client_config())?);
    client.login().await.context("logging in to the Data Collector")?;
    let driver = StorageCenterDriver::new(client.clone(), sc_config.clone());

    let result = run(&driver, &sc_config, args.command).await;
    client.logout().await;

    if let Err(e) = &result {
        error!("Command failed: {:#}", e);
    }
    result
}

async fn run(driver: &StorageCenterDriver, config: &ScConfig, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Check => {
            if !driver.health_check().await? {
                bail!("Storage Center {} is not managed by this Data Collector", config.ssn);
            }
            println!("Storage Center {}: ok", config.ssn);
        }
        Command::Map {
            volume,
            provider_id,
            host,
            initiators,
        } => {
            let connector = Connector {
                host,
                protocol: protocol_of(&initiators),
                initiators,
            };
            let info = driver
                .initialize_connection(&volume_ref(volume, provider_id), &connector)
                .await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Unmap {
            volume,
            provider_id,
            initiators,
        } => {
            let connector = (!initiators.is_empty()).then(|| Connector {
                host: String::new(),
                protocol: protocol_of(&initiators),
                initiators,
            });
            driver
                .terminate_connection(&volume_ref(volume, provider_id), connector.as_ref())
                .await?;
            println!("unmapped");
        }
        Command::Clone {
            source,
            provider_id,
            name,
        } => {
            let update = driver
                .create_cloned_volume(&VolumeRef::new(name, 0), &volume_ref(source, provider_id))
                .await?;
            println!("{}", serde_json::to_string_pretty(&update)?);
        }
    }
    Ok(())
}

fn volume_ref(name: String, provider_id: Option<String>) -> VolumeRef {
    let volume = VolumeRef::new(name, 0);
    match provider_id {
        Some(id) => volume.with_provider_id(id),
        None => volume,
    }
}

fn protocol_of(initiators: &[String]) -> Protocol {
    if initiators.iter().any(|i| i.starts_with("iqn.")) {
        Protocol::Iscsi
    } else {
        Protocol::FibreChannel
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args, file: &LoggingConfig) {
    let level = args.log_level.as_deref().unwrap_or(&file.level);
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json || file.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
