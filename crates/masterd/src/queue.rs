//! Result Queue (C2): a bounded FIFO of StageResults shared by the
//! ingestion endpoint (one producer path) and the ETL worker pool
//! (N consumers). Section 4.2.

use scan_core::StageResult;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("result queue is at capacity")]
    Backpressure,
    #[error("result queue is closed")]
    Closed,
}

/// `push` never blocks: a full queue is rejected immediately so the
/// ingestion endpoint can translate it to HTTP 503 (Section 7).
pub struct ResultQueue {
    tx: mpsc::Sender<StageResult>,
    rx: tokio::sync::Mutex<mpsc::Receiver<StageResult>>,
}

impl ResultQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    pub fn push(&self, result: StageResult) -> Result<(), QueueError> {
        self.tx.try_send(result).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Blocks until an item is available or `cancel` fires. Returns `None`
    /// on cancellation or once every sender has dropped.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<StageResult> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            item = rx.recv() => item,
            () = cancel.cancelled() => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scan_core::{Id, ResultType, TargetType};

    fn sample_result() -> StageResult {
        StageResult {
            task_id: Id::new(),
            project_id: Id::new(),
            stage_id: Id::new(),
            result_type: ResultType::IpAlive,
            target_type: TargetType::Cidr,
            target_value: "10.0.0.0/30".to_string(),
            attributes: serde_json::json!({}),
            evidence: None,
        }
    }

    #[tokio::test]
    async fn push_then_pop_is_fifo() {
        let queue = ResultQueue::new(4);
        let a = sample_result();
        let b = sample_result();
        let a_task = a.task_id.clone();
        let b_task = b.task_id.clone();

        queue.push(a).unwrap();
        queue.push(b).unwrap();

        let cancel = CancellationToken::new();
        let first = queue.pop(&cancel).await.unwrap();
        let second = queue.pop(&cancel).await.unwrap();

        assert_eq!(first.task_id, a_task);
        assert_eq!(second.task_id, b_task);
    }

    #[tokio::test]
    async fn push_rejects_when_full() {
        let queue = ResultQueue::new(1);
        queue.push(sample_result()).unwrap();
        let result = queue.push(sample_result());
        assert!(matches!(result, Err(QueueError::Backpressure)));
    }

    #[tokio::test]
    async fn pop_returns_none_on_cancellation() {
        let queue = ResultQueue::new(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = queue.pop(&cancel).await;
        assert!(result.is_none());
    }
}
