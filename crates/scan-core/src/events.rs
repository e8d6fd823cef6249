//! Audit event types (Section 10.1).
//!
//! Lifecycle-significant transitions are appended to a durable audit log
//! for operators and postmortem debugging. The ETL pipeline never reads
//! this log back; it exists purely for observability.

use crate::types::Id;
use serde::{Deserialize, Serialize};

/// Event type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    WorkflowExecuted,
    WorkflowPaused,
    WorkflowResumed,
    WorkflowStopped,
    WorkflowRetried,
    StageStarted,
    StageCompleted,
    TaskClaimed,
    TaskDeadLettered,
    DlqReplayInvoked,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkflowExecuted => "WORKFLOW_EXECUTED",
            Self::WorkflowPaused => "WORKFLOW_PAUSED",
            Self::WorkflowResumed => "WORKFLOW_RESUMED",
            Self::WorkflowStopped => "WORKFLOW_STOPPED",
            Self::WorkflowRetried => "WORKFLOW_RETRIED",
            Self::StageStarted => "STAGE_STARTED",
            Self::StageCompleted => "STAGE_COMPLETED",
            Self::TaskClaimed => "TASK_CLAIMED",
            Self::TaskDeadLettered => "TASK_DEAD_LETTERED",
            Self::DlqReplayInvoked => "DLQ_REPLAY_INVOKED",
        }
    }
}

/// Payload for `WORKFLOW_EXECUTED`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecutedPayload {
    pub workflow_id: Id,
    pub project_id: Id,
}

/// Payload for `WORKFLOW_PAUSED` / `WORKFLOW_RESUMED` / `WORKFLOW_STOPPED` / `WORKFLOW_RETRIED`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowControlPayload {
    pub workflow_id: Id,
}

/// Payload for `STAGE_STARTED`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageStartedPayload {
    pub stage_id: Id,
    pub workflow_id: Id,
    pub task_count: usize,
}

/// Payload for `STAGE_COMPLETED`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageCompletedPayload {
    pub stage_id: Id,
    pub workflow_id: Id,
    pub status: String,
    pub advanced_to: Option<Id>,
}

/// Payload for `TASK_CLAIMED`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskClaimedPayload {
    pub task_id: Id,
    pub agent_id: Id,
}

/// Payload for `TASK_DEAD_LETTERED`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDeadLetteredPayload {
    pub task_id: Id,
    pub error_stage: String,
    pub error_message: String,
}

/// Payload for `DLQ_REPLAY_INVOKED`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqReplayInvokedPayload {
    pub replayed_count: usize,
}

/// Enum wrapping every event payload, so a single `record(...)` call site
/// can serialize whichever kind occurred.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    WorkflowExecuted(WorkflowExecutedPayload),
    WorkflowControl(WorkflowControlPayload),
    StageStarted(StageStartedPayload),
    StageCompleted(StageCompletedPayload),
    TaskClaimed(TaskClaimedPayload),
    TaskDeadLettered(TaskDeadLetteredPayload),
    DlqReplayInvoked(DlqReplayInvokedPayload),
}
