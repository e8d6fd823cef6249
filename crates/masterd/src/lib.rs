//! masterd - Security Scan Orchestration Daemon
//!
//! Library components for the Master daemon: Task Store, Asset Store,
//! Result Queue, Task Dispatcher, Workflow Engine, Result Mapper, Asset
//! Merger, ETL Processor and DLQ/Replay (Section 4), wired together behind
//! one HTTP surface (Section 6).

pub mod dispatcher;
pub mod dlq;
pub mod errors;
pub mod etl;
pub mod mapper;
pub mod merger;
pub mod queue;
pub mod server;
pub mod storage;
pub mod workflow;

use dispatcher::Dispatcher;
use dlq::DeadLetterReplayer;
use etl::EtlProcessor;
use queue::ResultQueue;
use scan_core::Config;
use std::sync::Arc;
use std::time::Duration;
use storage::Storage;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use workflow::WorkflowEngine;

/// Type alias for application-level errors with context and backtraces.
pub type AppResult<T> = eyre::Result<T>;

/// Grace period for in-flight ETL work to drain during shutdown. After
/// cancellation fires, the daemon waits this long before abandoning the
/// HTTP server and worker tasks; whatever is still mid-merge when the grace
/// period elapses is simply left for the DLQ / reclaim sweep to pick up
/// after restart (Section 4.9 shutdown semantics).
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// The running daemon: owns the shared storage handle, the Result Queue,
/// and the components layered on top of them. `run()` spawns the HTTP
/// server, the ETL worker pool, and the lease sweeper, and returns once
/// `shutdown()` has been called and the grace period has elapsed.
pub struct Daemon {
    config: Config,
    storage: Storage,
    queue: Arc<ResultQueue>,
    dispatcher: Arc<Dispatcher>,
    workflow_engine: Arc<WorkflowEngine>,
    dlq_replayer: Arc<DeadLetterReplayer>,
    cancel: CancellationToken,
}

impl Daemon {
    /// Opens (creating if absent) the SQLite database, runs embedded
    /// migrations, and wires the Result Queue, Dispatcher, Workflow Engine
    /// and DLQ replayer on top of it.
    pub async fn new(config: Config) -> AppResult<Self> {
        let storage = Storage::new(&config.database_path).await?;
        storage.migrate_embedded().await?;

        let queue = Arc::new(ResultQueue::new(config.result_queue_capacity));
        let dispatcher = Arc::new(Dispatcher::new(
            storage.clone(),
            queue.clone(),
            config.lease_duration_secs,
        ));
        let workflow_engine = Arc::new(WorkflowEngine::new(storage.clone(), config.default_max_attempts));
        let dlq_replayer = Arc::new(DeadLetterReplayer::new(storage.clone(), queue.clone()));

        Ok(Self {
            config,
            storage,
            queue,
            dispatcher,
            workflow_engine,
            dlq_replayer,
            cancel: CancellationToken::new(),
        })
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn workflow_engine(&self) -> &Arc<WorkflowEngine> {
        &self.workflow_engine
    }

    pub fn dlq_replayer(&self) -> &Arc<DeadLetterReplayer> {
        &self.dlq_replayer
    }

    pub fn queue(&self) -> &Arc<ResultQueue> {
        &self.queue
    }

    /// Runs the daemon until `shutdown()` is called. Spawns `config.workers`
    /// ETL worker loops, the background lease sweeper, and the HTTP server;
    /// awaits the cancellation signal, then waits out the shutdown grace
    /// period before returning.
    pub async fn run(&self) -> AppResult<()> {
        info!(bind_addr = %self.config.bind_addr, "masterd starting");
        info!(database = %self.config.database_path.display(), "database path");
        info!(workers = self.config.workers, "starting etl worker pool");
        if self.config.auth_token.is_some() {
            info!("auth token: enabled");
        }

        let mut worker_handles = Vec::with_capacity(self.config.workers as usize);
        for worker_id in 0..self.config.workers {
            let processor = Arc::new(EtlProcessor::new(
                self.storage.clone(),
                self.queue.clone(),
                self.config.max_retries,
                self.config.backoff_initial_ms,
            ));
            let cancel = self.cancel.clone();
            worker_handles.push(tokio::spawn(async move {
                info!(worker_id, "etl worker started");
                processor.run_worker(cancel).await;
                info!(worker_id, "etl worker exited");
            }));
        }

        let sweeper_dispatcher = Arc::clone(&self.dispatcher);
        let sweeper_interval = Duration::from_millis(self.config.sweeper_interval_ms);
        let sweeper_cancel = self.cancel.clone();
        let sweeper_handle = tokio::spawn(async move {
            sweeper_dispatcher.run_lease_sweeper(sweeper_interval, sweeper_cancel).await;
        });

        let app_state = Arc::new(server::AppState {
            storage: self.storage.clone(),
            dispatcher: Arc::clone(&self.dispatcher),
            workflow_engine: Arc::clone(&self.workflow_engine),
            dlq_replayer: Arc::clone(&self.dlq_replayer),
            auth_token: self.config.auth_token.clone(),
            default_max_attempts: self.config.default_max_attempts,
        });
        let bind_addr = self.config.bind_addr.clone();
        let http_cancel = self.cancel.clone();
        let http_handle = tokio::spawn(async move {
            if let Err(err) = server::start_server(app_state, &bind_addr, http_cancel).await {
                error!(error = %err, "HTTP server error");
            }
        });

        self.cancel.cancelled().await;
        info!(
            grace_period_secs = SHUTDOWN_GRACE_PERIOD.as_secs(),
            "shutdown requested; waiting for in-flight work to drain"
        );
        tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await;

        http_handle.abort();
        sweeper_handle.abort();
        for handle in worker_handles {
            handle.abort();
        }

        Ok(())
    }

    /// Signals every worker loop, the lease sweeper, and the HTTP server to
    /// stop (Section 5: cancellation propagates from the top-level
    /// orchestrator into every worker loop and outstanding database call).
    pub fn shutdown(&self) {
        info!("shutdown requested");
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn daemon_initializes_against_in_memory_style_temp_db() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.database_path = dir.path().join("masterd-test.db");
        config.bind_addr = "127.0.0.1:0".to_string();

        let daemon = Daemon::new(config).await.unwrap();
        let projects = daemon.storage().list_projects().await.unwrap();
        assert!(projects.is_empty());
    }
}
