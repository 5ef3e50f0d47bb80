//! Worker pool
//!
//! Spawns a fixed number of [`Worker`]s on a `JoinSet` and waits for all of
//! them after shutdown is requested. Workers share nothing but the
//! repository and the registry; claims are arbitrated by the orchestrator.

use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::registry::ExecutorRegistry;
use crate::repository::JobRepository;
use crate::scheduler::worker::{Worker, WorkerSettings};

pub struct Dispatcher {
    runner_id: String,
    pool_size: usize,
    repo: Arc<dyn JobRepository>,
    registry: Arc<ExecutorRegistry>,
    settings: WorkerSettings,
}

impl Dispatcher {
    pub fn new(
        runner_id: String,
        pool_size: usize,
        repo: Arc<dyn JobRepository>,
        registry: Arc<ExecutorRegistry>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            runner_id,
            pool_size,
            repo,
            registry,
            settings,
        }
    }

    /// Worker ids are the runner id plus the slot number
    pub fn worker_id(&self, slot: usize) -> String {
        format!("{}-{}", self.runner_id, slot)
    }

    /// Run the pool until `cancel` fires and every worker has stopped
    ///
    /// Workers finish the attempt in flight before stopping.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "Starting {} worker(s) (poll interval: {:?})",
            self.pool_size, self.settings.poll_interval
        );

        let mut workers = JoinSet::new();
        for slot in 0..self.pool_size {
            let worker = Worker::new(
                self.worker_id(slot),
                Arc::clone(&self.repo),
                Arc::clone(&self.registry),
                self.settings.clone(),
            );
            workers.spawn(worker.run(cancel.clone()));
        }

        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!("Worker task panicked: {}", e);
            }
        }

        info!("All workers stopped");
    }
}
