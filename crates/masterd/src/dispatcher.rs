//! Task Dispatcher (C5): hands queued tasks to polling agents, validates
//! status reports against lease ownership, and forwards completed work into
//! the Result Queue (Section 4.5).

use crate::errors::{MasterError, Result};
use crate::queue::ResultQueue;
use crate::storage::Storage;
use chrono::Utc;
use scan_core::events::{EventType, TaskClaimedPayload};
use scan_core::{Agent, AgentStatus, Id, ResultType, StageResult, Task, TaskStatus, TargetType};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Dispatcher {
    storage: Storage,
    queue: Arc<ResultQueue>,
    lease_duration_secs: u64,
}

/// What an agent posts back for one task (Section 6 `POST .../tasks/{id}/status`).
pub struct TaskStatusReport {
    pub status: TaskStatus,
    pub result: Option<StageResultReport>,
    pub error_msg: Option<String>,
}

/// The `result` half of a status report: the raw fields needed to build a
/// `StageResult` for the Result Queue. `task_id`/`project_id`/`stage_id` are
/// filled in by the dispatcher from the claimed task, not the agent.
pub struct StageResultReport {
    pub result_type: ResultType,
    pub target_type: TargetType,
    pub target_value: String,
    pub attributes: serde_json::Value,
    pub evidence: Option<String>,
}

impl Dispatcher {
    pub fn new(storage: Storage, queue: Arc<ResultQueue>, lease_duration_secs: u64) -> Self {
        Self {
            storage,
            queue,
            lease_duration_secs,
        }
    }

    /// Registers or re-registers an agent (Section 6 `POST .../agent/register`).
    pub async fn register_agent(&self, agent: &Agent) -> Result<()> {
        self.storage.upsert_agent(agent).await?;
        Ok(())
    }

    /// Section 6 `POST .../agent/heartbeat`. Load is accepted but not
    /// persisted; only liveness and status matter to the lease sweeper.
    pub async fn heartbeat(&self, agent_id: &Id, status: AgentStatus) -> Result<()> {
        self.storage.record_heartbeat(agent_id, status).await?;
        Ok(())
    }

    /// Section 6 `GET .../orchestrator/agents/{agent_id}/tasks`: claims up to
    /// `limit` tasks matching the agent's declared capabilities.
    pub async fn fetch_tasks(&self, agent_id: &Id, limit: u32) -> Result<Vec<Task>> {
        let agent = self.storage.get_agent(agent_id).await?;
        let capabilities: BTreeSet<ResultType> = agent.capabilities.iter().copied().collect();
        let claimed = self
            .storage
            .claim_tasks(agent_id, &capabilities, limit, self.lease_duration_secs)
            .await?;

        for task in &claimed {
            self.storage
                .record_event(
                    EventType::TaskClaimed,
                    &TaskClaimedPayload {
                        task_id: task.id.clone(),
                        agent_id: agent_id.clone(),
                    },
                )
                .await?;
        }
        info!(agent_id = %agent_id, claimed = claimed.len(), "tasks dispatched");
        Ok(claimed)
    }

    /// Section 6 `POST .../orchestrator/tasks/{task_id}/status`. Validates
    /// ownership and lease freshness via `report_task_status`, then — for a
    /// terminal `succeeded` report carrying a result — pushes the derived
    /// `StageResult` onto the Result Queue so the ETL Processor picks it up.
    ///
    /// A late report for a task whose stage was already stopped is rejected
    /// by `report_task_status` itself (the task is no longer `Running` under
    /// that agent), satisfying the cancelled-task rejection rule (Section 5).
    pub async fn update_task_status(
        &self,
        task_id: &Id,
        agent_id: &Id,
        report: TaskStatusReport,
    ) -> Result<Task> {
        let task = self
            .storage
            .report_task_status(task_id, agent_id, report.status, report.error_msg.as_deref())
            .await?;

        if task.status == TaskStatus::Succeeded {
            if let Some(result) = report.result {
                let stage_result = StageResult {
                    task_id: task.id.clone(),
                    project_id: task.project_id.clone(),
                    stage_id: task.stage_id.clone(),
                    result_type: result.result_type,
                    target_type: result.target_type,
                    target_value: result.target_value,
                    attributes: result.attributes,
                    evidence: result.evidence,
                };
                self.queue.push(stage_result)?;
            }
        }
        Ok(task)
    }

    /// Background lease sweeper (Section 4.5, Section 5): periodically
    /// requeues or fails tasks whose claim deadline has passed. Runs until
    /// `cancel` fires.
    pub async fn run_lease_sweeper(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep_once().await {
                        warn!(error = %err, "lease sweep failed");
                    }
                }
                () = cancel.cancelled() => break,
            }
        }
    }

    async fn sweep_once(&self) -> Result<()> {
        let reclaimed = self.storage.reclaim_expired(Utc::now()).await?;
        if !reclaimed.is_empty() {
            info!(count = reclaimed.len(), "reclaimed expired task leases");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TestStorage;
    use scan_core::{Stage, StageStatus, TaskStatus};
    use std::collections::BTreeSet;

    async fn seed_agent(storage: &Storage, capabilities: &[ResultType]) -> Id {
        let agent = Agent {
            id: Id::new(),
            name: "agent-1".to_string(),
            capabilities: capabilities.iter().copied().collect(),
            version: "1.0.0".to_string(),
            status: AgentStatus::Idle,
            last_heartbeat: Utc::now(),
            created_at: Utc::now(),
        };
        storage.upsert_agent(&agent).await.unwrap();
        agent.id
    }

    async fn seed_stage(storage: &Storage, kind: ResultType) -> (Stage, Id) {
        let project_id = Id::new();
        let now = Utc::now();
        let stage = Stage {
            id: Id::new(),
            workflow_id: Id::new(),
            order: 0,
            kind,
            name: format!("{:?}", kind),
            target_spec: "10.0.0.0/30".to_string(),
            parameters_json: "{}".to_string(),
            status: StageStatus::Running,
            max_attempts: 3,
            created_at: now,
            updated_at: now,
        };
        storage.create_stage(&stage).await.unwrap();
        (stage, project_id)
    }

    async fn enqueue_one(storage: &Storage, stage: &Stage, project_id: &Id) -> Task {
        let now = Utc::now();
        let task = Task {
            id: Id::new(),
            stage_id: stage.id.clone(),
            project_id: project_id.clone(),
            target_type: TargetType::Ip,
            target_value: "10.0.0.1".to_string(),
            params_json: "{}".to_string(),
            status: TaskStatus::Queued,
            attempts: 0,
            last_error: None,
            assigned_agent_id: None,
            claim_deadline: None,
            created_at: now,
            updated_at: now,
        };
        storage.enqueue_tasks(&[task.clone()]).await.unwrap();
        task
    }

    #[tokio::test]
    async fn fetch_tasks_claims_matching_capability() {
        let ts = TestStorage::new().await;
        let dispatcher = Dispatcher::new(ts.storage.clone(), Arc::new(ResultQueue::new(16)), 300);
        let agent_id = seed_agent(&ts.storage, &[ResultType::IpAlive]).await;
        let (stage, project_id) = seed_stage(&ts.storage, ResultType::IpAlive).await;
        enqueue_one(&ts.storage, &stage, &project_id).await;

        let claimed = dispatcher.fetch_tasks(&agent_id, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].assigned_agent_id.as_ref(), Some(&agent_id));
    }

    #[tokio::test]
    async fn fetch_tasks_ignores_mismatched_capability() {
        let ts = TestStorage::new().await;
        let dispatcher = Dispatcher::new(ts.storage.clone(), Arc::new(ResultQueue::new(16)), 300);
        let agent_id = seed_agent(&ts.storage, &[ResultType::WebEndpoint]).await;
        let (stage, project_id) = seed_stage(&ts.storage, ResultType::IpAlive).await;
        enqueue_one(&ts.storage, &stage, &project_id).await;

        let claimed = dispatcher.fetch_tasks(&agent_id, 10).await.unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn succeeded_report_pushes_result_onto_queue() {
        let ts = TestStorage::new().await;
        let queue = Arc::new(ResultQueue::new(16));
        let dispatcher = Dispatcher::new(ts.storage.clone(), queue.clone(), 300);
        let agent_id = seed_agent(&ts.storage, &[ResultType::IpAlive]).await;
        let (stage, project_id) = seed_stage(&ts.storage, ResultType::IpAlive).await;
        enqueue_one(&ts.storage, &stage, &project_id).await;
        let claimed = dispatcher.fetch_tasks(&agent_id, 10).await.unwrap();
        let task = &claimed[0];

        let report = TaskStatusReport {
            status: TaskStatus::Succeeded,
            result: Some(StageResultReport {
                result_type: ResultType::IpAlive,
                target_type: TargetType::Ip,
                target_value: "10.0.0.1".to_string(),
                attributes: serde_json::json!({"hosts": []}),
                evidence: None,
            }),
            error_msg: None,
        };
        dispatcher
            .update_task_status(&task.id, &agent_id, report)
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let popped = queue.pop(&cancel).await.unwrap();
        assert_eq!(popped.task_id, task.id);
    }

    #[tokio::test]
    async fn status_report_from_wrong_agent_is_rejected() {
        let ts = TestStorage::new().await;
        let dispatcher = Dispatcher::new(ts.storage.clone(), Arc::new(ResultQueue::new(16)), 300);
        let agent_id = seed_agent(&ts.storage, &[ResultType::IpAlive]).await;
        let other_agent = seed_agent(&ts.storage, &[ResultType::IpAlive]).await;
        let (stage, project_id) = seed_stage(&ts.storage, ResultType::IpAlive).await;
        enqueue_one(&ts.storage, &stage, &project_id).await;
        let claimed = dispatcher.fetch_tasks(&agent_id, 10).await.unwrap();
        let task = &claimed[0];

        let report = TaskStatusReport {
            status: TaskStatus::Succeeded,
            result: None,
            error_msg: None,
        };
        let result = dispatcher.update_task_status(&task.id, &other_agent, report).await;
        assert!(matches!(result, Err(MasterError::Storage(_))));
    }

    #[tokio::test]
    async fn lease_sweeper_reclaims_expired_tasks() {
        let ts = TestStorage::new().await;
        let dispatcher = Dispatcher::new(ts.storage.clone(), Arc::new(ResultQueue::new(16)), 0);
        let agent_id = seed_agent(&ts.storage, &[ResultType::IpAlive]).await;
        let (stage, project_id) = seed_stage(&ts.storage, ResultType::IpAlive).await;
        enqueue_one(&ts.storage, &stage, &project_id).await;
        dispatcher.fetch_tasks(&agent_id, 10).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        dispatcher.sweep_once().await.unwrap();

        let tasks = ts.storage.list_tasks_for_stage(&stage.id).await.unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Queued);
    }
}
