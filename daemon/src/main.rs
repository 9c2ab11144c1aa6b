//! Keysmith Daemon

use anyhow::Result;
use clap::Parser;
use keysmith_daemon::{AppState, DaemonConfig, serve};
use keysmith_panel::PanelClient;
use keysmith_provision::Provisioner;
use keysmith_storage::KeyStore;
use std::sync::Arc;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

/// Keysmith Daemon - VPN key issuance API
#[derive(Parser, Debug)]
#[command(name = "keysmithd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "keysmith.toml")]
    config: String,

    /// Run in verbose mode
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Keysmith Daemon v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = DaemonConfig::load(&args.config).await?;
    config.validate()?;
    info!("Loaded configuration from {}", args.config);

    let registry = Arc::new(config.registry()?);
    info!("{} servers configured", registry.len());

    let store = KeyStore::connect(&config.database.url).await?;
    store.migrate().await?;
    let rows: Vec<(i64, &str, &str)> = registry
        .iter()
        .map(|s| (i64::from(s.id), s.region.as_str(), s.public_address().unwrap_or("")))
        .collect();
    store.sync_servers(&rows).await?;

    let panel = Arc::new(PanelClient::new(config.panel.clone())?);
    let provisioner = Arc::new(Provisioner::new(
        registry.clone(),
        panel,
        config.provisioner_options(),
    )?);

    let state = AppState::new(
        provisioner,
        store,
        config.limits.clone(),
        config.provisioning.compensate_orphans,
    );

    serve(config.server.bind, state, shutdown_signal()).await?;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
