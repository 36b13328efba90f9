//! Notify relay router binary entrypoint.

use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use relay_common::config::RouterConfig;

use relay_router::directory::{Directory, MemoryDirectory, PgDirectory};
use relay_router::routes::create_router;
use relay_router::state::AppState;

/// Largest accepted REST body; comfortably above the message length limit.
const MAX_BODY_BYTES: usize = 256 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("relay_router=info,tower_http=info")),
        )
        .json()
        .init();

    tracing::info!("Starting notify relay router...");

    // Load configuration
    let config = RouterConfig::from_env()?;

    let directory = match &config.database_url {
        Some(url) => Directory::Postgres(PgDirectory::connect(url, config.db_max_connections).await?),
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory principal directory");
            Directory::Memory(MemoryDirectory::new())
        }
    };
    directory.seed(&config.seed_principals).await?;

    let addr = config.bind_addr;
    let state = AppState::new(directory, config);

    let app = create_router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("Router listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received shutdown signal, stopping gracefully...");
        })
        .await?;

    tracing::info!("Router stopped.");
    Ok(())
}
