//! Junction server - main entry point

use anyhow::Result;
use junction_common::logging::init_logging;
use junction_core::avalon::AvalonClient;
use junction_core::collections::CollectionResolver;
use junction_core::orchestrator::Orchestrator;
use junction_core::router::Router as TargetRouter;
use junction_core::store::{CollectionStore, SubmissionStore};
use junction_server::config::Config;
use junction_server::db::{self, SqliteStore};
use junction_server::routes::{self, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_logging(&config.log)?;

    info!("Starting Junction server");
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let pool = db::connect(&config.database).await?;
    db::MIGRATOR
        .run(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {e}"))?;
    info!("Database ready");

    let store = Arc::new(SqliteStore::new(pool));
    let policy = config.retry.policy();
    let client = Arc::new(AvalonClient::new(policy.clone())?);

    let resolver = CollectionResolver::new(
        store.clone() as Arc<dyn CollectionStore>,
        client.clone(),
        config.units.clone(),
        policy.clone(),
    );
    let orchestrator = Arc::new(Orchestrator::new(
        store as Arc<dyn SubmissionStore>,
        resolver,
        TargetRouter::new(config.targets.clone()),
        client,
        policy,
    ));

    let state = AppState {
        orchestrator,
        api_tokens: config.api_tokens.iter().cloned().collect(),
    };
    let app = routes::router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
        .await?;

    info!("Server shut down gracefully");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    info!("Waiting up to {timeout_secs} seconds for connections to close");
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
