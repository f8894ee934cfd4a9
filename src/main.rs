use std::sync::Arc;

use prompthub::config::Settings;
use prompthub::gateway::HttpGateway;
use prompthub::server::{AppState, create_app};
use prompthub::storage::Database;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // .env 里放各 LLM 提供商的密钥
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("failed to read .env: {e}");
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("prompthub=info,tower_http=info")),
        )
        .init();

    let config = Settings::load()?;

    let db = Arc::new(Database::open(&config.database.path).await?);
    let gateway = Arc::new(HttpGateway::new(config.llm.timeout()));

    // Use configured host/port to bind the server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app = create_app(AppState::new(config, db.clone(), gateway));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("PromptHub server running on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down");
    if let Ok(db) = Arc::try_unwrap(db) {
        db.close().await?;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
