//! Workflow Engine (C6): transforms project → workflow → stages → tasks,
//! advances stages, and gates transitions (Section 4.6).

use crate::errors::{MasterError, Result};
use crate::storage::Storage;
use chrono::Utc;
use scan_core::events::{EventType, StageCompletedPayload, StageStartedPayload, WorkflowControlPayload, WorkflowExecutedPayload};
use scan_core::steps::{GateRule, StageFilter, TargetSource, WorkflowSteps};
use scan_core::{Id, ResultType, Stage, StageStatus, Task, TargetType, TaskStatus, Workflow, WorkflowStatus};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use tracing::info;

pub struct WorkflowEngine {
    storage: Storage,
    default_max_attempts: u32,
}

impl WorkflowEngine {
    pub fn new(storage: Storage, default_max_attempts: u32) -> Self {
        Self {
            storage,
            default_max_attempts,
        }
    }

    /// Validates the workflow is `active`, enumerates its stages, and
    /// enqueues tasks for the first stage from its literal target set.
    pub async fn execute_workflow(&self, workflow_id: &Id) -> Result<()> {
        let workflow = self.storage.get_workflow(workflow_id).await?;
        if workflow.status != WorkflowStatus::Active {
            return Err(MasterError::WorkflowNotActive(workflow_id.to_string()));
        }

        let steps = WorkflowSteps::parse(&workflow.steps_json)?;
        let stages = self.storage.list_stages(workflow_id).await?;
        let Some(first_stage) = stages.first() else {
            return Err(MasterError::Validation(format!(
                "workflow {workflow_id} has no stages"
            )));
        };
        let Some(first_step) = steps.steps.first() else {
            return Err(MasterError::Validation(format!(
                "workflow {workflow_id} has no steps"
            )));
        };

        let TargetSource::Literal { values } = &first_step.targets else {
            return Err(MasterError::Validation(
                "first step must carry literal targets".to_string(),
            ));
        };

        let targets = expand_literal_targets(values);
        self.enqueue_stage(first_stage, &workflow.project_id, &targets).await?;

        self.storage
            .record_event(
                EventType::WorkflowExecuted,
                &WorkflowExecutedPayload {
                    workflow_id: workflow.id.clone(),
                    project_id: workflow.project_id.clone(),
                },
            )
            .await?;
        info!(workflow_id = %workflow_id, stage_id = %first_stage.id, "workflow executed");
        Ok(())
    }

    async fn enqueue_stage(&self, stage: &Stage, project_id: &Id, targets: &[String]) -> Result<()> {
        self.storage
            .update_stage_status(&stage.id, StageStatus::Running)
            .await?;

        let now = Utc::now();
        let tasks: Vec<Task> = targets
            .iter()
            .map(|value| Task {
                id: Id::new(),
                stage_id: stage.id.clone(),
                project_id: project_id.clone(),
                target_type: classify_target_type(value),
                target_value: value.clone(),
                params_json: stage.parameters_json.clone(),
                status: TaskStatus::Queued,
                attempts: 0,
                last_error: None,
                assigned_agent_id: None,
                claim_deadline: None,
                created_at: now,
                updated_at: now,
            })
            .collect();

        self.storage.enqueue_tasks(&tasks).await?;
        self.storage
            .record_event(
                EventType::StageStarted,
                &StageStartedPayload {
                    stage_id: stage.id.clone(),
                    workflow_id: stage.workflow_id.clone(),
                    task_count: tasks.len(),
                },
            )
            .await?;
        Ok(())
    }

    /// Called once every task of `stage_id` has reached a terminal status.
    /// Marks the stage `succeeded`/`failed` per its gate rule, then either
    /// advances the next stage (feeding it this stage's outputs) or leaves
    /// the run at rest.
    pub async fn observe_stage_completion(&self, stage_id: &Id) -> Result<()> {
        let stage = self.storage.get_stage(stage_id).await?;
        let tasks = self.storage.list_tasks_for_stage(stage_id).await?;
        if !tasks.iter().all(|t| t.status.is_terminal()) {
            return Ok(());
        }

        let workflow = self.storage.get_workflow(&stage.workflow_id).await?;
        let steps = WorkflowSteps::parse(&workflow.steps_json)?;
        let this_step = steps
            .steps
            .iter()
            .find(|s| ResultType::parse(&s.stage_kind) == Some(stage.kind))
            .ok_or_else(|| MasterError::Validation(format!("no step for stage {stage_id}")))?;

        let succeeded = tasks.iter().filter(|t| t.status == TaskStatus::Succeeded).count();
        let stage_ok = match this_step.gate {
            GateRule::AnySucceeded => succeeded > 0,
            GateRule::AllSucceeded => succeeded == tasks.len(),
        };
        let new_status = if stage_ok {
            StageStatus::Succeeded
        } else {
            StageStatus::Failed
        };
        self.storage.update_stage_status(stage_id, new_status).await?;

        let stages = self.storage.list_stages(&stage.workflow_id).await?;
        let next_stage = stages.iter().find(|s| s.order == stage.order + 1);

        let advanced_to = if stage_ok {
            if let Some(next) = next_stage {
                let next_step = steps
                    .steps
                    .iter()
                    .find(|s| ResultType::parse(&s.stage_kind) == Some(next.kind));
                let targets = self
                    .resolve_next_targets(next_step, &tasks, &stages, &steps)
                    .await?;
                if !targets.is_empty() {
                    self.enqueue_stage(next, &workflow.project_id, &targets).await?;
                    Some(next.id.clone())
                } else {
                    None
                }
            } else {
                None
            }
        } else {
            None
        };

        self.storage
            .record_event(
                EventType::StageCompleted,
                &StageCompletedPayload {
                    stage_id: stage.id.clone(),
                    workflow_id: stage.workflow_id.clone(),
                    status: new_status.as_str().to_string(),
                    advanced_to,
                },
            )
            .await?;
        Ok(())
    }

    async fn resolve_next_targets(
        &self,
        next_step: Option<&scan_core::steps::StepSpec>,
        predecessor_tasks: &[Task],
        stages: &[Stage],
        _steps: &WorkflowSteps,
    ) -> Result<Vec<String>> {
        let Some(step) = next_step else {
            return Ok(Vec::new());
        };
        let TargetSource::FromStage { filter, .. } = &step.targets else {
            return Ok(Vec::new());
        };

        // Every predecessor task belongs to the same just-completed stage.
        let predecessor_kind = predecessor_tasks
            .first()
            .and_then(|t| stages.iter().find(|s| s.id == t.stage_id))
            .map(|s| s.kind);

        let succeeded = predecessor_tasks.iter().filter(|t| t.status == TaskStatus::Succeeded);
        let values: Vec<String> = match filter {
            StageFilter::AliveIps => succeeded
                .filter(|_| predecessor_kind == Some(ResultType::IpAlive))
                .map(|t| t.target_value.clone())
                .collect(),
            StageFilter::AllSucceeded => succeeded.map(|t| t.target_value.clone()).collect(),
        };
        Ok(dedup(values))
    }

    pub async fn pause_workflow(&self, workflow_id: &Id) -> Result<()> {
        self.storage
            .update_workflow_status(workflow_id, WorkflowStatus::Inactive)
            .await?;
        self.storage
            .record_event(
                EventType::WorkflowPaused,
                &WorkflowControlPayload {
                    workflow_id: workflow_id.clone(),
                },
            )
            .await?;
        Ok(())
    }

    pub async fn resume_workflow(&self, workflow_id: &Id) -> Result<()> {
        self.storage
            .update_workflow_status(workflow_id, WorkflowStatus::Active)
            .await?;
        self.storage
            .record_event(
                EventType::WorkflowResumed,
                &WorkflowControlPayload {
                    workflow_id: workflow_id.clone(),
                },
            )
            .await?;
        Ok(())
    }

    /// Cancels queued tasks of every non-terminal stage; running tasks are
    /// marked cancelled too (Section 4.6) — their in-flight lease still
    /// expires normally, but a late result the dispatcher sees for them
    /// must be rejected rather than merged (Section 5).
    pub async fn stop_workflow(&self, workflow_id: &Id) -> Result<()> {
        let stages = self.storage.list_stages(workflow_id).await?;
        for stage in &stages {
            if stage.status.is_terminal() {
                continue;
            }
            let tasks = self.storage.list_tasks_for_stage(&stage.id).await?;
            for task in tasks {
                if !task.status.is_terminal() {
                    self.storage.cancel_task(&task.id).await?;
                }
            }
            self.storage
                .update_stage_status(&stage.id, StageStatus::Cancelled)
                .await?;
        }
        self.storage
            .update_workflow_status(workflow_id, WorkflowStatus::Archived)
            .await?;
        self.storage
            .record_event(
                EventType::WorkflowStopped,
                &WorkflowControlPayload {
                    workflow_id: workflow_id.clone(),
                },
            )
            .await?;
        Ok(())
    }

    /// Re-activates the workflow and re-runs it from stage 0.
    pub async fn retry_workflow(&self, workflow_id: &Id) -> Result<()> {
        self.storage
            .update_workflow_status(workflow_id, WorkflowStatus::Active)
            .await?;
        self.storage
            .record_event(
                EventType::WorkflowRetried,
                &WorkflowControlPayload {
                    workflow_id: workflow_id.clone(),
                },
            )
            .await?;
        self.execute_workflow(workflow_id).await
    }
}

/// Section 4.6 input expansion: duplicates eliminated, IPv4 CIDRs expanded
/// by mask, everything else passed through (the file/URL-list cases are
/// already flattened to one value per line by the caller that built the
/// steps spec, per the literal Non-goal that this core does no file I/O).
fn expand_literal_targets(values: &[String]) -> Vec<String> {
    let mut expanded = Vec::new();
    for value in values {
        if let Some((base, expanded_values)) = expand_cidr(value) {
            let _ = base;
            expanded.extend(expanded_values);
        } else {
            expanded.push(value.clone());
        }
    }
    dedup(expanded)
}

fn expand_cidr(value: &str) -> Option<(Ipv4Addr, Vec<String>)> {
    let (addr_part, mask_part) = value.split_once('/')?;
    let addr: Ipv4Addr = addr_part.parse().ok()?;
    let prefix: u32 = mask_part.parse().ok()?;
    if prefix > 32 {
        return None;
    }

    let base = u32::from(addr);
    let host_bits = 32 - prefix;
    let network = if host_bits == 32 { 0 } else { (base >> host_bits) << host_bits };
    let count: u64 = 1u64 << host_bits;

    // Cap expansion to avoid pathological memory use on a bad /0-/7 input.
    let count = count.min(1 << 20);
    let values = (0..count)
        .map(|i| Ipv4Addr::from((network as u64 + i) as u32).to_string())
        .collect();
    Some((addr, values))
}

fn dedup(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values.into_iter().filter(|v| seen.insert(v.clone())).collect()
}

fn classify_target_type(value: &str) -> TargetType {
    if value.contains('/') && value.parse::<Ipv4Addr>().is_err() {
        if value.starts_with("http://") || value.starts_with("https://") {
            TargetType::Url
        } else {
            TargetType::Cidr
        }
    } else if value.parse::<Ipv4Addr>().is_ok() {
        TargetType::Ip
    } else if value.starts_with("http://") || value.starts_with("https://") {
        TargetType::Url
    } else {
        TargetType::Domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_small_cidr_block() {
        let expanded = expand_literal_targets(&["10.0.0.0/30".to_string()]);
        assert_eq!(
            expanded,
            vec!["10.0.0.0", "10.0.0.1", "10.0.0.2", "10.0.0.3"]
        );
    }

    #[test]
    fn dedups_repeated_literal_targets() {
        let expanded = expand_literal_targets(&[
            "10.0.0.1".to_string(),
            "10.0.0.1".to_string(),
            "example.com".to_string(),
        ]);
        assert_eq!(expanded, vec!["10.0.0.1", "example.com"]);
    }

    #[test]
    fn classifies_target_types() {
        assert_eq!(classify_target_type("10.0.0.1"), TargetType::Ip);
        assert_eq!(classify_target_type("10.0.0.0/24"), TargetType::Cidr);
        assert_eq!(classify_target_type("https://example.com"), TargetType::Url);
        assert_eq!(classify_target_type("example.com"), TargetType::Domain);
    }
}
