//! Core domain types for the scan orchestration platform.
//!
//! These types match the data model in Section 3 of the design: the
//! Project/Workflow/Stage/Task hierarchy, Agents, in-flight StageResults,
//! and the asset entities produced by the ETL pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Unique identifier shared across every entity in this crate.
/// Uses `UUIDv7` for time-ordered lexicographic sorting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(pub String);

impl Id {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// --- Enumerations (Section 3) ---

/// Project lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Draft,
    Active,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "active" => Some(Self::Active),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// Workflow lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Draft,
    Active,
    Inactive,
    Archived,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// How a workflow run is triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Manual,
    Scheduled,
    Event,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
            Self::Event => "event",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(Self::Manual),
            "scheduled" => Some(Self::Scheduled),
            "event" => Some(Self::Event),
            _ => None,
        }
    }
}

/// Stage lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// Task target type (Section 3, Task entity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Ip,
    Cidr,
    Url,
    Domain,
    ServiceEndpoint,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Cidr => "cidr",
            Self::Url => "url",
            Self::Domain => "domain",
            Self::ServiceEndpoint => "service_endpoint",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ip" => Some(Self::Ip),
            "cidr" => Some(Self::Cidr),
            "url" => Some(Self::Url),
            "domain" => Some(Self::Domain),
            "service_endpoint" => Some(Self::ServiceEndpoint),
            _ => None,
        }
    }
}

/// Task lifecycle status. Monotone except for retry, which creates a new
/// attempt rather than a back-transition (Section 3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Claimed,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Claimed => "claimed",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "claimed" => Some(Self::Claimed),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// Agent health/availability status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Online,
    Idle,
    Busy,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "idle" => Some(Self::Idle),
            "busy" => Some(Self::Busy),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

/// The closed set of result kinds an Agent may report (Section 3.1).
/// `Reserved` wraps the six kinds named but not yet implemented by the
/// Mapper; the Mapper must still return a typed not-implemented error for
/// them rather than silently dropping the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    IpAlive,
    FastPortScan,
    FullPortScan,
    ServiceFingerprint,
    VulnFinding,
    PocScan,
    WebEndpoint,
    PasswordAudit,
    ProxyDetection,
    DirectoryScan,
    SubdomainDiscovery,
    ApiDiscovery,
    FileDiscovery,
    OtherScan,
}

impl ResultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IpAlive => "ip_alive",
            Self::FastPortScan => "fast_port_scan",
            Self::FullPortScan => "full_port_scan",
            Self::ServiceFingerprint => "service_fingerprint",
            Self::VulnFinding => "vuln_finding",
            Self::PocScan => "poc_scan",
            Self::WebEndpoint => "web_endpoint",
            Self::PasswordAudit => "password_audit",
            Self::ProxyDetection => "proxy_detection",
            Self::DirectoryScan => "directory_scan",
            Self::SubdomainDiscovery => "subdomain_discovery",
            Self::ApiDiscovery => "api_discovery",
            Self::FileDiscovery => "file_discovery",
            Self::OtherScan => "other_scan",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ip_alive" => Some(Self::IpAlive),
            "fast_port_scan" => Some(Self::FastPortScan),
            "full_port_scan" => Some(Self::FullPortScan),
            "service_fingerprint" => Some(Self::ServiceFingerprint),
            "vuln_finding" => Some(Self::VulnFinding),
            "poc_scan" => Some(Self::PocScan),
            "web_endpoint" => Some(Self::WebEndpoint),
            "password_audit" => Some(Self::PasswordAudit),
            "proxy_detection" => Some(Self::ProxyDetection),
            "directory_scan" => Some(Self::DirectoryScan),
            "subdomain_discovery" => Some(Self::SubdomainDiscovery),
            "api_discovery" => Some(Self::ApiDiscovery),
            "file_discovery" => Some(Self::FileDiscovery),
            "other_scan" => Some(Self::OtherScan),
            _ => None,
        }
    }

    /// True for the six kinds named in Section 3.1 as reserved for future
    /// implementation; the Mapper must reject these with a typed error.
    pub fn is_reserved(&self) -> bool {
        matches!(
            self,
            Self::ProxyDetection
                | Self::DirectoryScan
                | Self::SubdomainDiscovery
                | Self::ApiDiscovery
                | Self::FileDiscovery
                | Self::OtherScan
        )
    }
}

/// Vulnerability severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "low" => Self::Low,
            "medium" => Self::Medium,
            "high" => Self::High,
            "critical" => Self::Critical,
            _ => Self::Info,
        }
    }
}

/// Vulnerability disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VulnStatus {
    Open,
    Verified,
    Fixed,
    Ignored,
}

impl VulnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Verified => "verified",
            Self::Fixed => "fixed",
            Self::Ignored => "ignored",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "verified" => Some(Self::Verified),
            "fixed" => Some(Self::Fixed),
            "ignored" => Some(Self::Ignored),
            _ => None,
        }
    }
}

/// Whether a vuln has been confirmed by a PoC run (Section 4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStatus {
    Unverified,
    Verified,
}

impl VerifyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unverified => "unverified",
            Self::Verified => "verified",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unverified" => Some(Self::Unverified),
            "verified" => Some(Self::Verified),
            _ => None,
        }
    }
}

/// Which asset table a vuln's `target_ref_id` points into (Section 4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VulnTargetType {
    Host,
    Service,
    Web,
}

impl VulnTargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Service => "service",
            Self::Web => "web",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "host" => Some(Self::Host),
            "service" => Some(Self::Service),
            "web" => Some(Self::Web),
            _ => None,
        }
    }
}

/// Status of an ETL dead letter (Section 4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EtlErrorStatus {
    New,
    Retrying,
    Ignored,
    Resolved,
}

impl EtlErrorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Retrying => "retrying",
            Self::Ignored => "ignored",
            Self::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "retrying" => Some(Self::Retrying),
            "ignored" => Some(Self::Ignored),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }
}

/// Which ETL stage produced a dead letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EtlErrorStage {
    Mapper,
    Merger,
}

impl EtlErrorStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mapper => "mapper",
            Self::Merger => "merger",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mapper" => Some(Self::Mapper),
            "merger" => Some(Self::Merger),
            _ => None,
        }
    }
}

// --- Entities (Section 3) ---

/// A logical scan campaign owning zero or more Workflows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Id,
    pub name: String,
    pub status: ProjectStatus,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An ordered sequence of Stages belonging to a Project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Id,
    pub project_id: Id,
    pub name: String,
    pub status: WorkflowStatus,
    pub trigger_type: TriggerType,
    /// Opaque to storage; parsed by the Workflow Engine (Section 3.4).
    pub steps_json: String,
    pub schedule: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One step of a workflow pinned to a result kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub id: Id,
    pub workflow_id: Id,
    pub order: i64,
    pub kind: ResultType,
    pub name: String,
    /// Raw target specification before expansion (Section 4.6).
    pub target_spec: String,
    pub parameters_json: String,
    pub status: StageStatus,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One concrete unit of work for one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Id,
    pub stage_id: Id,
    pub project_id: Id,
    pub target_type: TargetType,
    pub target_value: String,
    pub params_json: String,
    pub status: TaskStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub assigned_agent_id: Option<Id>,
    pub claim_deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A worker node identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Id,
    pub name: String,
    pub capabilities: BTreeSet<ResultType>,
    pub version: String,
    pub status: AgentStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// An in-flight message carrying one Agent's raw result for one task.
/// Wire shape matches Section 6's StageResult payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub task_id: Id,
    pub project_id: Id,
    pub stage_id: Id,
    pub result_type: ResultType,
    pub target_type: TargetType,
    pub target_value: String,
    /// Per-result-type payload (Section 4.1), kept as raw JSON so the
    /// Result Queue need not know every contract shape.
    pub attributes: serde_json::Value,
    pub evidence: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_generates_unique_values() {
        let id1 = Id::new();
        let id2 = Id::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn task_status_serializes_correctly() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Claimed).unwrap(),
            "\"claimed\""
        );
    }

    #[test]
    fn result_type_round_trips() {
        for rt in [
            ResultType::IpAlive,
            ResultType::FastPortScan,
            ResultType::VulnFinding,
            ResultType::PocScan,
            ResultType::PasswordAudit,
            ResultType::OtherScan,
        ] {
            assert_eq!(ResultType::parse(rt.as_str()), Some(rt));
        }
    }

    #[test]
    fn reserved_result_types_are_flagged() {
        assert!(ResultType::ProxyDetection.is_reserved());
        assert!(ResultType::OtherScan.is_reserved());
        assert!(!ResultType::IpAlive.is_reserved());
        assert!(!ResultType::VulnFinding.is_reserved());
    }

    #[test]
    fn task_status_terminal() {
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Claimed.is_terminal());
    }

    #[test]
    fn severity_parse_defaults_to_info() {
        assert_eq!(Severity::parse("bogus"), Severity::Info);
        assert_eq!(Severity::parse("high"), Severity::High);
    }
}
