//! hubkeeper - multi-tenant administration gateway for Hive communities

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hubkeeper::{server, AppState, Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("hubkeeper={},info", args.log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if args.json_logs() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  hubkeeper - Hive community gateway");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    let nodes = args.chain.rpc_node_list();
    info!("RPC nodes: {}", nodes.len());
    for (i, node) in nodes.iter().enumerate() {
        info!("  node-{}: {}", i, node);
    }
    info!("Hubs dir: {}", args.hubs.hubs_dir.display());
    info!("Default hub: {}", args.hubs.default_hub_slug);
    match &args.hubs.registry_url {
        Some(url) => info!("Hub directory: {}", url),
        None => info!("Hub directory: local registry file"),
    }
    info!(
        "Fallback posting key: {}",
        if args.chain.posting_key.is_some() { "configured" } else { "none" }
    );
    info!("======================================");

    let state = Arc::new(AppState::new(args)?);
    server::run(state).await?;

    Ok(())
}
