//! Waypost CLI

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use waypost_config::{load_config, Config};
use waypost_registry::{FileStore, ServiceInfo, ServiceRegistry};
use waypost_runtime::{ServerBuilder, SignalHandler};

#[derive(Parser)]
#[command(name = "waypost")]
#[command(about = "Waypost API gateway", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the gateway (start the server)
    Serve {
        /// Path to configuration file
        #[arg(short, long, env = "WAYPOST_CONFIG")]
        config: Option<PathBuf>,

        /// Log level (trace, debug, info, warn, error); overrides the config
        #[arg(short, long)]
        log_level: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,
    },

    /// Inspect or edit the shared registry file
    Registry {
        #[command(flatten)]
        target: RegistryTarget,

        #[command(subcommand)]
        command: RegistryCommand,
    },

    /// Show version information
    Version,
}

#[derive(Args)]
struct RegistryTarget {
    /// Registry file; defaults to `registry.path` from the configuration
    #[arg(short, long, global = true)]
    path: Option<PathBuf>,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "WAYPOST_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum RegistryCommand {
    /// List registered services
    List,

    /// Show aggregate statistics
    Stats,

    /// Register or overwrite a service record
    Register {
        /// Logical service name
        name: String,

        /// Base URL the gateway should forward to
        base_url: String,

        /// Advertised version
        #[arg(long)]
        version: Option<String>,

        /// Free-form description
        #[arg(long)]
        description: Option<String>,
    },

    /// Remove a service record
    Unregister {
        /// Logical service name
        name: String,
    },

    /// Remove records not checked within the timeout
    Cleanup {
        /// Inactivity timeout, e.g. `300s` or `5m`
        #[arg(long, default_value = "300s", value_parser = parse_duration)]
        timeout: Duration,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, log_level } => {
            let config = load_config(config.as_deref())?;

            let logging = &config.observability.logging;
            init_tracing(
                log_level.as_deref().unwrap_or(&logging.level),
                &logging.format,
            )?;

            tracing::info!(
                listen = %config.gateway.listen,
                registry = %config.registry.path.display(),
                routes = config.effective_routes().len(),
                "Configuration loaded"
            );

            let server = ServerBuilder::new().config(config).build()?;

            let shutdown_signal = server.shutdown_signal();
            tokio::spawn(async move {
                let handler = SignalHandler::new(shutdown_signal);
                handler.run().await;
            });

            server.run().await?;
            Ok(())
        }

        Commands::Validate { config } => {
            init_tracing("info", "text")?;

            tracing::info!("Validating configuration: {}", config.display());

            match load_config(Some(&config)) {
                Ok(cfg) => {
                    tracing::info!("Configuration is valid");
                    tracing::info!("  Listen: {}", cfg.gateway.listen);
                    tracing::info!("  Registry: {}", cfg.registry.path.display());
                    tracing::info!("  Routes: {}", cfg.effective_routes().len());
                    Ok(())
                }
                Err(e) => {
                    tracing::error!("Configuration validation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Registry { target, command } => {
            init_tracing("warn", "text")?;
            let registry = open_registry(&target)?;
            run_registry(&registry, command).await
        }

        Commands::Version => {
            println!("Waypost API gateway");
            println!("Version: {}", env!("CARGO_PKG_VERSION"));
            println!("Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
            Ok(())
        }
    }
}

fn open_registry(target: &RegistryTarget) -> Result<ServiceRegistry> {
    let path = match &target.path {
        Some(path) => path.clone(),
        None => registry_path(target.config.as_deref())?,
    };
    Ok(ServiceRegistry::new(FileStore::new(path)))
}

fn registry_path(config: Option<&Path>) -> Result<PathBuf> {
    let config: Config = load_config(config).context("Failed to load configuration")?;
    Ok(config.registry.path)
}

async fn run_registry(registry: &ServiceRegistry, command: RegistryCommand) -> Result<()> {
    match command {
        RegistryCommand::List => print_json(&registry.list_services().await?),
        RegistryCommand::Stats => print_json(&registry.get_stats().await?),
        RegistryCommand::Register {
            name,
            base_url,
            version,
            description,
        } => {
            let mut info = ServiceInfo::new(base_url);
            if let Some(version) = version {
                info = info.version(version);
            }
            if let Some(description) = description {
                info = info.description(description);
            }
            print_json(&registry.register(&name, info).await?)
        }
        RegistryCommand::Unregister { name } => {
            let removed = registry.unregister(&name).await?;
            print_json(&serde_json::json!({ "service": name, "removed": removed }))
        }
        RegistryCommand::Cleanup { timeout } => {
            let removed = registry.cleanup_inactive(timeout).await?;
            print_json(&serde_json::json!({ "removed": removed }))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime_serde::deserialize(serde_json::Value::String(value.to_string()))
        .map_err(|e| e.to_string())
}

fn init_tracing(level: &str, format: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let registry = tracing_subscriber::registry().with(filter);

    if format.eq_ignore_ascii_case("json") {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_level(true),
            )
            .init();
    }

    Ok(())
}
