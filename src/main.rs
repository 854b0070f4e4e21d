//! bookledger - Atomic purchase engine for the bookstore backend
//!
//! The binary is a deployment preflight: it connects to the configured
//! ledger endpoints and verifies the schema the engine needs. The engine
//! itself is consumed as a library by the surrounding services.

use bookledger::store::PgLedgerStore;
use bookledger::{db, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bookledger=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let config = Config::from_env()?;

    tracing::info!("Connecting to ledger database...");
    let store = PgLedgerStore::connect(&config.database_urls, config.database_max_connections)
        .await?;

    db::verify_connection(store.pool()).await?;
    if !db::check_schema(store.pool()).await? {
        tracing::error!("Ledger schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Ledger schema incomplete"));
    }

    tracing::info!(
        "Ledger store ready (environment: {})",
        config.environment
    );

    store.pool().close().await;
    Ok(())
}
