//! Spool Runner
//!
//! A stateless worker process that executes generation jobs.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Repository: HTTP communication with the orchestrator
//! - Registry: style/model resolution and executor routing
//! - Executors: calls to the generation providers
//! - Scheduler: the worker pool (claim, execute, retry, report)
//!
//! Workers claim queued jobs through the orchestrator, which arbitrates
//! concurrent claims, and report progress and outcomes back to it.

mod config;
mod executor;
mod registry;
mod repository;
mod retry;
mod scheduler;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::executor::HttpStageExecutor;
use crate::registry::{ExecutorRegistry, StyleMap};
use crate::repository::HttpJobRepository;
use crate::scheduler::{Dispatcher, WorkerSettings};
use spool_client::OrchestratorClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spool_runner=info,spool_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Spool Runner");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate()?;
    info!(
        "Loaded configuration: worker_id={}, orchestrator_url={}, pool_size={}",
        config.worker_id, config.orchestrator_url, config.pool_size
    );

    // Style map and executors
    let style_map = match &config.style_map_path {
        Some(path) => {
            info!("Loading style map from {}", path.display());
            StyleMap::from_file(path)?
        }
        None => {
            info!("No SPOOL_STYLE_MAP set, using the built-in style map");
            StyleMap::builtin()
        }
    };
    let gateway = Arc::new(HttpStageExecutor::new("gateway", config.provider_url.clone()));
    let mut registry = ExecutorRegistry::new(style_map, gateway);
    for (kind, url) in &config.kind_provider_urls {
        info!("Routing {} jobs to {}", kind, url);
        let name = format!("{}-provider", kind);
        registry = registry.with_executor(*kind, Arc::new(HttpStageExecutor::new(name, url.clone())));
    }
    let registry = Arc::new(registry);

    // Orchestrator access
    let client = OrchestratorClient::new(config.orchestrator_url.clone());
    let repo = Arc::new(HttpJobRepository::new(client));

    let dispatcher = Dispatcher::new(
        config.worker_id.clone(),
        config.pool_size,
        repo,
        registry,
        WorkerSettings::from_config(&config),
    );

    info!(
        "Stage timeout: {:?}, max attempts: {}",
        config.stage_timeout, config.retry.max_attempts
    );

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            warn!("Shutdown requested, waiting for workers to finish their current attempt");
            cancel.cancel();
        }
    });

    dispatcher.run(cancel).await;

    info!("Runner stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
