//! EchoLink signaling server binary.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use echolink_server::{transport, EventRouter, ServerConfig};
use echolink_store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,echolink_server=debug")),
        )
        .init();

    info!("Starting EchoLink signaling server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration and open the store
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    let store = match &config.db_path {
        Some(path) => Store::open_at(path)
            .with_context(|| format!("open database at {}", path.display()))?,
        None => Store::open_default().context("open default database")?,
    };

    // -----------------------------------------------------------------------
    // 3. Build the router and spawn maintenance tasks
    // -----------------------------------------------------------------------
    let router = EventRouter::new(store, config.clone())
        .await
        .context("initialize event router")?;
    router.spawn_background_tasks();

    // -----------------------------------------------------------------------
    // 4. Run the TCP transport (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = transport::serve(config.listen_addr, Arc::clone(&router)) => {
            result.context("transport listener failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
