//! Dead Letter Queue & Replay (C10): durable home for results the ETL
//! Processor gave up on, plus the admin-triggered replay that feeds them
//! back through the same Mapper/Merger code path (Section 4.10).

use crate::errors::Result;
use crate::queue::ResultQueue;
use crate::storage::{Storage, StorageError};
use chrono::Utc;
use scan_core::events::{DlqReplayInvokedPayload, EventType};
use scan_core::{EtlError, EtlErrorStage, EtlErrorStatus, Id, StageResult};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[cfg(test)]
use scan_core::ResultType;
#[cfg(test)]
use tokio_util::sync::CancellationToken;

/// How many `new` dead letters one `replay_all` call drains. Larger batches
/// would need pagination; this platform's dead-letter volume is expected to
/// stay small enough that one pass clears it.
const REPLAY_BATCH: u32 = 500;

/// Inserts a dead letter for a result the ETL Processor could not merge
/// after exhausting its retries (Section 4.9 step 3c). Shared by the
/// Processor's live path and nothing else — replay re-enters through
/// `ResultQueue`, not through this function.
pub async fn record(
    storage: &Storage,
    result: &StageResult,
    stage: EtlErrorStage,
    message: &str,
) -> Result<()> {
    let now = Utc::now();
    let raw_data_json = serde_json::to_string(result).map_err(StorageError::from)?;
    let etl_error = EtlError {
        id: Id::new(),
        project_id: result.project_id.clone(),
        task_id: result.task_id.clone(),
        result_type: result.result_type,
        raw_data_json,
        error_stage: stage,
        error_message: message.to_string(),
        status: EtlErrorStatus::New,
        created_at: now,
        updated_at: now,
    };
    storage.create_etl_error(&etl_error).await?;
    Ok(())
}

/// Serializes concurrent `replay_all` invocations process-wide so a second
/// admin call can never re-push a dead letter the first call already
/// claimed (Section 4.10: replay must be safe under concurrent invocation).
pub struct DeadLetterReplayer {
    storage: Storage,
    queue: Arc<ResultQueue>,
    lock: Mutex<()>,
}

impl DeadLetterReplayer {
    pub fn new(storage: Storage, queue: Arc<ResultQueue>) -> Self {
        Self {
            storage,
            queue,
            lock: Mutex::new(()),
        }
    }

    /// Iterates `new`-status dead letters, re-pushes each deserialized
    /// `StageResult` onto the Result Queue, and advances its status:
    /// `retrying` on a successful push, `ignored` if the stored payload no
    /// longer deserializes (Section 4.10). Returns the number re-queued.
    pub async fn replay_all(&self) -> Result<usize> {
        let _guard = self.lock.lock().await;

        let pending = self
            .storage
            .list_etl_errors_by_status(EtlErrorStatus::New, REPLAY_BATCH)
            .await?;

        let mut replayed = 0usize;
        for entry in pending {
            match serde_json::from_str::<StageResult>(&entry.raw_data_json) {
                Ok(result) => match self.queue.push(result) {
                    Ok(()) => {
                        self.storage
                            .update_etl_error_status(&entry.id, EtlErrorStatus::Retrying)
                            .await?;
                        replayed += 1;
                    }
                    Err(err) => {
                        // Queue is at capacity or closed; leave this entry
                        // `new` so the next replay call picks it up again.
                        warn!(etl_error_id = %entry.id, error = %err, "replay push failed, leaving entry for retry");
                    }
                },
                Err(err) => {
                    warn!(etl_error_id = %entry.id, error = %err, "dead letter payload no longer deserializes, ignoring");
                    self.storage
                        .update_etl_error_status(&entry.id, EtlErrorStatus::Ignored)
                        .await?;
                }
            }
        }

        self.storage
            .record_event(
                EventType::DlqReplayInvoked,
                &DlqReplayInvokedPayload { replayed_count: replayed },
            )
            .await?;
        info!(replayed_count = replayed, "dlq replay invoked");
        Ok(replayed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TestStorage;
    use scan_core::TargetType;

    fn sample_result() -> StageResult {
        StageResult {
            task_id: Id::new(),
            project_id: Id::new(),
            stage_id: Id::new(),
            result_type: ResultType::IpAlive,
            target_type: TargetType::Ip,
            target_value: "10.0.0.1".to_string(),
            attributes: serde_json::json!({"hosts": []}),
            evidence: None,
        }
    }

    #[tokio::test]
    async fn replay_all_is_noop_on_empty_queue() {
        let ts = TestStorage::new().await;
        let replayer = DeadLetterReplayer::new(ts.storage.clone(), Arc::new(ResultQueue::new(16)));

        let replayed = replayer.replay_all().await.unwrap();
        assert_eq!(replayed, 0);
    }

    #[tokio::test]
    async fn replay_all_requeues_new_dead_letters_and_marks_retrying() {
        let ts = TestStorage::new().await;
        let queue = Arc::new(ResultQueue::new(16));
        let replayer = DeadLetterReplayer::new(ts.storage.clone(), queue.clone());

        let result = sample_result();
        record(&ts.storage, &result, EtlErrorStage::Merger, "merge conflict").await.unwrap();

        let replayed = replayer.replay_all().await.unwrap();
        assert_eq!(replayed, 1);

        let cancel = CancellationToken::new();
        let popped = queue.pop(&cancel).await.unwrap();
        assert_eq!(popped.task_id, result.task_id);

        let remaining = ts
            .storage
            .list_etl_errors_by_status(EtlErrorStatus::New, 10)
            .await
            .unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn replay_all_ignores_entries_that_no_longer_deserialize() {
        let ts = TestStorage::new().await;
        let replayer = DeadLetterReplayer::new(ts.storage.clone(), Arc::new(ResultQueue::new(16)));

        let now = Utc::now();
        let bad_entry = EtlError {
            id: Id::new(),
            project_id: Id::new(),
            task_id: Id::new(),
            result_type: ResultType::IpAlive,
            raw_data_json: "not valid json".to_string(),
            error_stage: EtlErrorStage::Mapper,
            error_message: "boom".to_string(),
            status: EtlErrorStatus::New,
            created_at: now,
            updated_at: now,
        };
        ts.storage.create_etl_error(&bad_entry).await.unwrap();

        let replayed = replayer.replay_all().await.unwrap();
        assert_eq!(replayed, 0);

        let remaining = ts
            .storage
            .list_etl_errors_by_status(EtlErrorStatus::New, 10)
            .await
            .unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn replay_all_leaves_entry_new_when_queue_is_full() {
        let ts = TestStorage::new().await;
        let queue = Arc::new(ResultQueue::new(1));
        queue.push(sample_result()).unwrap();
        let replayer = DeadLetterReplayer::new(ts.storage.clone(), queue.clone());

        let result = sample_result();
        record(&ts.storage, &result, EtlErrorStage::Merger, "merge conflict").await.unwrap();

        let replayed = replayer.replay_all().await.unwrap();
        assert_eq!(replayed, 0);

        let remaining = ts
            .storage
            .list_etl_errors_by_status(EtlErrorStatus::New, 10)
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
    }
}
