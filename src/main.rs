//! taskd - stores shell commands and runs them on a cluster or locally.
//!
//! Usage:
//!   taskd serve [--config <file>]   Run the HTTP API
//!   taskd check-config <file>       Validate a configuration file
//!   taskd execute <command>         Run one command without storing it

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use taskd::api::{create_api_state, start_server};
use taskd::{
    InMemoryStore, Orchestrator, ServiceConfig, ServiceConfigBuilder, StorageConfig, TaskId,
    TaskStore, YamlLoader,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// taskd - run stored shell commands on Kubernetes, or locally as a fallback
#[derive(Parser)]
#[command(name = "taskd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API until Ctrl+C
    Serve {
        /// Path to a YAML configuration file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Address to bind to (overrides the config file)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,

        /// SQLite database path (overrides the config file's storage)
        #[arg(short, long, value_name = "PATH")]
        database: Option<String>,
    },

    /// Validate a configuration file without running
    CheckConfig {
        /// Path to the YAML configuration file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Validate and run a single command through the cluster/local fallback
    Execute {
        /// Path to a YAML configuration file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// The shell command to run
        #[arg(value_name = "COMMAND")]
        command: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            host,
            port,
            database,
        } => {
            let mut config = load_config(config)?;
            if let Some(host) = host {
                config.api.host = host;
            }
            if let Some(port) = port {
                config.api.port = port;
            }
            if let Some(path) = database {
                config.storage = StorageConfig::Sqlite { path };
            }
            YamlLoader::validate_service_config(&config)?;
            serve(config).await?;
        }
        Commands::CheckConfig { file } => {
            check_config(file)?;
        }
        Commands::Execute { config, command } => {
            let config = load_config(config)?;
            execute_once(config, command).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<ServiceConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(YamlLoader::load_service_config(&path)?)
        }
        None => Ok(ServiceConfig::default()),
    }
}

fn orchestrator<S: TaskStore>(config: &ServiceConfig, store: Arc<S>) -> Orchestrator<S> {
    Orchestrator::new(
        store,
        ServiceConfigBuilder::validator(config),
        ServiceConfigBuilder::dispatcher(config),
        ServiceConfigBuilder::runner(config),
    )
}

/// Open the configured store and run the API server on it.
async fn serve(config: ServiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.cluster.enabled {
        info!(
            namespace = %config.cluster.namespace,
            image = %config.cluster.image,
            "Cluster dispatch enabled"
        );
    } else {
        info!("Cluster dispatch disabled, commands run locally");
    }

    match &config.storage {
        StorageConfig::Memory => {
            warn!("Using in-memory storage; tasks are lost on exit");
            run_server(&config, Arc::new(InMemoryStore::new())).await
        }
        #[cfg(feature = "sqlite")]
        StorageConfig::Sqlite { path } => {
            info!("Using SQLite storage at {}", path);
            let store = Arc::new(taskd::SqliteStore::new(path).await?);
            let result = run_server(&config, Arc::clone(&store)).await;
            store.close().await;
            result
        }
        #[cfg(not(feature = "sqlite"))]
        StorageConfig::Sqlite { .. } => {
            Err("SQLite storage requested but taskd was built without the `sqlite` feature".into())
        }
    }
}

async fn run_server<S: TaskStore + 'static>(
    config: &ServiceConfig,
    store: Arc<S>,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = create_api_state(orchestrator(config, store));
    let shutdown = CancellationToken::new();
    let server = start_server(&config.api, state, shutdown.clone()).await?;

    info!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    shutdown.cancel();
    server.await?;

    info!("Goodbye!");
    Ok(())
}

/// Validate a configuration file without running.
fn check_config(file: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating configuration: {}", file.display());

    match YamlLoader::load_service_config(&file) {
        Ok(config) => {
            info!("Configuration is valid:");
            info!("  api: {}", config.api.bind_address());
            match &config.storage {
                StorageConfig::Memory => info!("  storage: memory"),
                StorageConfig::Sqlite { path } => info!("  storage: sqlite ({})", path),
            }
            if config.cluster.enabled {
                info!(
                    "  cluster: namespace '{}', image '{}'",
                    config.cluster.namespace, config.cluster.image
                );
            } else {
                info!("  cluster: disabled");
            }
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// Run one command through the dispatcher/runner fallback without storing it.
async fn execute_once(
    config: ServiceConfig,
    command: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let orchestrator = orchestrator(&config, Arc::new(InMemoryStore::new()));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let execution = orchestrator
        .run_command(&TaskId::generate(), &command, &cancel)
        .await?;

    println!("{}", execution.output);
    info!(
        backend = %execution.backend,
        exit_code = execution.exit_code,
        "Command finished"
    );

    if execution.succeeded() {
        Ok(())
    } else {
        Err(format!("command failed with exit code {}", execution.exit_code).into())
    }
}
