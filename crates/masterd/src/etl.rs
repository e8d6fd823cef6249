//! ETL Processor (C9): a pool of worker tasks draining the Result Queue,
//! applying the Mapper then the Merger to each item, with a capped
//! exponential backoff retry around the Merger step and dead-lettering on
//! exhaustion (Section 4.9).

use crate::dlq;
use crate::errors::MasterError;
use crate::mapper;
use crate::merger::AssetMerger;
use crate::queue::ResultQueue;
use crate::storage::Storage;
use scan_core::{AssetBundle, ErrorKind, StageResult};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct EtlProcessor {
    storage: Storage,
    queue: Arc<ResultQueue>,
    max_retries: u32,
    backoff_initial_ms: u64,
}

impl EtlProcessor {
    pub fn new(storage: Storage, queue: Arc<ResultQueue>, max_retries: u32, backoff_initial_ms: u64) -> Self {
        Self {
            storage,
            queue,
            max_retries,
            backoff_initial_ms,
        }
    }

    /// Runs one worker loop. Spawn `Config::workers` of these. Each exits
    /// once the queue is cancelled or drained of senders (Section 4.9
    /// shutdown: workers finish their current item, then exit; anything
    /// still queued in-process is lost, the DLQ is the durability boundary).
    pub async fn run_worker(&self, cancel: CancellationToken) {
        while let Some(result) = self.queue.pop(&cancel).await {
            self.process_one(result).await;
        }
    }

    async fn process_one(&self, result: StageResult) {
        let bundles = match mapper::map_result(&result) {
            Ok(bundles) => bundles,
            Err(err) => {
                warn!(task_id = %result.task_id, error = %err, "mapper rejected result");
                self.dead_letter(&result, scan_core::EtlErrorStage::Mapper, &err.to_string())
                    .await;
                return;
            }
        };

        let bundle_count = bundles.len();
        for bundle in bundles {
            if !self.merge_with_retry(&result, bundle).await {
                return;
            }
        }
        info!(
            task_id = %result.task_id,
            result_type = ?result.result_type,
            bundle_count,
            "result merged"
        );
    }

    /// Returns `false` if the bundle was ultimately dead-lettered (so the
    /// caller stops processing the remaining bundles of this result: once
    /// one bundle's merge is persistent-broken, later bundles of the same
    /// result are very likely to fail the same way and would just pile up
    /// duplicate dead letters).
    async fn merge_with_retry(&self, result: &StageResult, bundle: AssetBundle) -> bool {
        let merger = AssetMerger::new(self.storage.clone());
        let mut attempt = 0;
        let mut backoff_ms = self.backoff_initial_ms;

        loop {
            match merger.merge_bundle(bundle.clone()).await {
                Ok(_) => return true,
                Err(err) => {
                    let message = err.to_string();
                    let kind = MasterError::from(err).kind();
                    if kind != ErrorKind::Transient || attempt >= self.max_retries {
                        self.dead_letter(result, scan_core::EtlErrorStage::Merger, &message).await;
                        return false;
                    }
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }

    async fn dead_letter(&self, result: &StageResult, stage: scan_core::EtlErrorStage, message: &str) {
        if let Err(err) = dlq::record(&self.storage, result, stage, message).await {
            error!(task_id = %result.task_id, error = %err, "failed to record dead letter");
        }
    }
}
