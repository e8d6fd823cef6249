pub mod assets;
pub mod config;
pub mod contracts;
pub mod errors;
pub mod events;
pub mod steps;
pub mod types;

pub use assets::{
    AssetBundle, AssetHost, AssetService, AssetUnified, AssetVuln, AssetWeb, AssetWebDetail,
    EtlError, HostDraft, ServiceDraft, VulnDraft, WebDraft,
};
pub use config::Config;
pub use errors::ErrorKind;
pub use steps::{GateRule, StageFilter, StepSpec, StepsError, TargetSource, WorkflowSteps};
pub use types::{
    Agent, AgentStatus, EtlErrorStage, EtlErrorStatus, Id, Project, ProjectStatus, ResultType,
    Severity, Stage, StageResult, StageStatus, Task, TaskStatus, TargetType, TriggerType,
    VerifyStatus, VulnStatus, VulnTargetType, Workflow, WorkflowStatus,
};
