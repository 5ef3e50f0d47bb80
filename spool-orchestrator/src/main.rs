use anyhow::Context;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spool_orchestrator::config::Config;
use spool_orchestrator::repository::{JobStore, MemoryJobStore, PgJobStore};
use spool_orchestrator::service::job_service;
use spool_orchestrator::state::AppState;
use spool_orchestrator::{api, background, db};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spool_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Spool Orchestrator...");

    let config = Config::from_env()?;
    config.validate()?;

    let store: Arc<dyn JobStore> = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");

            let pool = db::create_pool(database_url)
                .await
                .context("Failed to create database pool")?;

            tracing::info!("Database connection pool created");

            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;

            Arc::new(PgJobStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory job store");
            Arc::new(MemoryJobStore::new())
        }
    };

    let state = AppState::new(store, config);

    let recovered = job_service::recover_interrupted(&state)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to recover interrupted jobs: {}", e))?;
    if recovered > 0 {
        tracing::warn!("Marked {} interrupted jobs as failed", recovered);
    }

    // Background tasks
    let cancel = CancellationToken::new();
    let tasks = vec![
        tokio::spawn(background::subscriptions::run(state.clone(), cancel.clone())),
        tokio::spawn(background::stale_jobs::run(state.clone(), cancel.clone())),
        tokio::spawn(background::retention::run(state.clone(), cancel.clone())),
    ];

    // Build router with all API endpoints
    let app = api::create_router(state.clone());

    let addr = state.config.bind_addr.clone();
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let publisher = state.publisher.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Open streams would otherwise hold the server until they expire.
            publisher.close_all();
        })
        .await
        .context("Server error")?;

    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
