use std::fs;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::UdpSocket;
use tracing::info;

mod broadcast;
mod config;
mod engine;
mod error;
mod handlers;
mod privilege;
mod reliability;
mod state;
mod store;
mod udp;

use config::ServerConfig;
use engine::Engine;
use store::MemoryStore;

#[derive(Parser)]
#[command(name = "palaver-server", about = "palaver group-voice control server")]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<String>,

    /// Bind address (IP), overrides config
    #[arg(long)]
    host: Option<String>,

    /// UDP port, overrides config
    #[arg(long)]
    udp_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "palaver_server=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = if let Some(config_path) = &args.config {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read config file: {}", config_path))?;
        toml::from_str(&content)?
    } else {
        ServerConfig::default()
    };

    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.udp_port {
        config.udp_port = port;
    }

    info!(
        host = %config.host,
        udp_port = config.udp_port,
        max_users = config.max_users,
        guest_channels = config.allow_guest_channels,
        "palaver server starting"
    );

    // the in-memory store keeps a fresh server functional; deployments
    // that want durable registrations plug a database-backed
    // RegistrationStore in here
    let store = Box::new(MemoryStore::new());
    let engine = Engine::new(config.clone(), store)?;

    let socket = UdpSocket::bind((config.host.as_str(), config.udp_port))
        .await
        .with_context(|| format!("failed to bind UDP on {}:{}", config.host, config.udp_port))?;
    info!("control socket bound on {}:{}", config.host, config.udp_port);

    udp::run_control_loop(socket, engine).await
}
