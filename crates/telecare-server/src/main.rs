use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use telecare_server::{AppState, DatabaseLocation, ServerConfig};
use telecare_store::{ChatStore, Database, SqliteChatStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,telecare_server=debug")),
        )
        .init();

    info!("Starting Telecare relay v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the chat store
    // -----------------------------------------------------------------------
    let db = match &config.database {
        DatabaseLocation::Default => Database::new()?,
        DatabaseLocation::Path(path) => Database::open_at(path)?,
        DatabaseLocation::Memory => {
            tracing::warn!("Using an in-memory chat store; history is lost on exit");
            Database::open_in_memory()?
        }
    };
    if let Some(path) = db.path() {
        info!(path = %path.display(), "Chat store ready");
    }
    let store: Arc<dyn ChatStore> = Arc::new(SqliteChatStore::new(db));

    // -----------------------------------------------------------------------
    // 4. Run the HTTP / WebSocket server until Ctrl+C
    // -----------------------------------------------------------------------
    let http_addr = config.http_addr;
    let state = AppState::new(config, store);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    if let Err(e) = telecare_server::serve(state, http_addr, shutdown).await {
        tracing::error!(error = %e, "Server failed");
        return Err(e);
    }

    Ok(())
}
