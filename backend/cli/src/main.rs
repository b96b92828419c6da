mod builtin;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use persona_config::PersonaConfig;
use persona_gateway::{start_server, GatewayState};
use persona_plugins::{PluginManager, PluginRegistry, StaticArtifactSource};

#[derive(Parser)]
#[command(name = "persona")]
#[command(about = "Persona — plugin hot-reload manager for the digital-human platform")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Persona plugin manager server
    Serve {
        /// Port to bind the HTTP server to
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Show current server status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = persona_config::config_file_path(&persona_config::config_dir());
    let config = persona_config::load_and_prepare(&config_path).await?;

    match cli.command {
        Commands::Serve { port } => {
            let mut config = config;
            if let Some(port) = port {
                config.gateway.port = port;
            }
            run_server(config).await?;
        }
        Commands::Status => {
            let client = reqwest::Client::new();
            let url = format!(
                "http://{}:{}/api/plugins",
                config.gateway.host, config.gateway.port
            );
            match client.get(&url).send().await {
                Ok(resp) => {
                    let body: serde_json::Value = resp.json().await?;
                    println!("{}", serde_json::to_string_pretty(&body)?);
                }
                Err(_) => {
                    println!("Persona server is not running on {url}");
                }
            }
        }
    }

    Ok(())
}

async fn run_server(config: PersonaConfig) -> Result<()> {
    logging::init_logger(&config.log_dir, &config.log_level);

    let registry = Arc::new(
        PluginRegistry::open(&config.plugins.registry_path)
            .context("Failed to open plugin registry")?,
    );

    let source = StaticArtifactSource::default();
    builtin::register_builtin(&source);

    let manager = Arc::new(PluginManager::new(
        registry,
        Arc::new(source),
        Duration::from_secs(config.plugins.hook_timeout_secs),
    ));

    let addr: SocketAddr = format!("{}:{}", config.gateway.host, config.gateway.port)
        .parse()
        .context("Invalid gateway address")?;

    info!(addr = %addr, "Starting Persona plugin manager");
    start_server(addr, GatewayState { manager }).await
}
