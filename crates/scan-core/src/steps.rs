//! Workflow steps-spec schema (Section 3.4).
//!
//! A Workflow's opaque `steps_json` deserializes into this shape. It names
//! the initial target set for the first stage, how later stages derive
//! their targets from a predecessor, and the gating rule that decides
//! whether a stage's completion advances the run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StepsError {
    #[error("invalid steps JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("workflow has no steps")]
    Empty,
    #[error("first step must use literal targets, got {0:?}")]
    FirstStepNotLiteral(TargetSource),
    #[error("step {0:?} references unknown predecessor stage {1:?}")]
    UnknownPredecessor(String, String),
}

/// How a stage's target list is derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetSource {
    /// A fixed set of values expanded per Section 4.6 (CIDR, URL list,
    /// target-file reference).
    Literal { values: Vec<String> },
    /// Derived from a named predecessor stage's terminal tasks.
    FromStage {
        stage: String,
        #[serde(default)]
        filter: StageFilter,
    },
}

/// Which of a predecessor stage's tasks contribute target values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageFilter {
    /// Targets of succeeded tasks whose stage kind is `ip_alive`.
    #[default]
    AliveIps,
    /// Targets of every succeeded task regardless of kind.
    AllSucceeded,
}

/// Whether a stage's completion is gated on all of its tasks succeeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateRule {
    #[default]
    AnySucceeded,
    AllSucceeded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,
    pub stage_kind: String,
    pub targets: TargetSource,
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub gate: GateRule,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSteps {
    pub steps: Vec<StepSpec>,
}

impl WorkflowSteps {
    pub fn parse(steps_json: &str) -> Result<Self, StepsError> {
        let parsed: Self = serde_json::from_str(steps_json)?;
        parsed.validate()?;
        Ok(parsed)
    }

    fn validate(&self) -> Result<(), StepsError> {
        let first = self.steps.first().ok_or(StepsError::Empty)?;
        if !matches!(first.targets, TargetSource::Literal { .. }) {
            return Err(StepsError::FirstStepNotLiteral(first.targets.clone()));
        }
        let names: std::collections::HashSet<&str> =
            self.steps.iter().map(|s| s.name.as_str()).collect();
        for step in &self.steps {
            if let TargetSource::FromStage { stage, .. } = &step.targets {
                if !names.contains(stage.as_str()) {
                    return Err(StepsError::UnknownPredecessor(
                        step.name.clone(),
                        stage.clone(),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_step_pipeline() {
        let json = r#"{
            "steps": [
                {"name": "discover", "stage_kind": "ip_alive",
                 "targets": {"kind": "literal", "values": ["10.0.0.0/24"]}},
                {"name": "ports", "stage_kind": "fast_port_scan",
                 "targets": {"kind": "from_stage", "stage": "discover", "filter": "alive_ips"},
                 "gate": "any_succeeded"}
            ]
        }"#;
        let parsed = WorkflowSteps::parse(json).unwrap();
        assert_eq!(parsed.steps.len(), 2);
        assert_eq!(parsed.steps[1].gate, GateRule::AnySucceeded);
    }

    #[test]
    fn rejects_non_literal_first_step() {
        let json = r#"{
            "steps": [
                {"name": "ports", "stage_kind": "fast_port_scan",
                 "targets": {"kind": "from_stage", "stage": "discover", "filter": "alive_ips"}}
            ]
        }"#;
        assert!(matches!(
            WorkflowSteps::parse(json),
            Err(StepsError::FirstStepNotLiteral(_))
        ));
    }

    #[test]
    fn rejects_unknown_predecessor() {
        let json = r#"{
            "steps": [
                {"name": "discover", "stage_kind": "ip_alive",
                 "targets": {"kind": "literal", "values": ["10.0.0.0/24"]}},
                {"name": "ports", "stage_kind": "fast_port_scan",
                 "targets": {"kind": "from_stage", "stage": "missing", "filter": "alive_ips"}}
            ]
        }"#;
        assert!(matches!(
            WorkflowSteps::parse(json),
            Err(StepsError::UnknownPredecessor(_, _))
        ));
    }
}
