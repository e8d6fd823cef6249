//! Asset entity types produced by the Result Mapper and persisted by the
//! Asset Merger (Section 3, Section 4.7, Section 4.8).

use crate::types::{
    EtlErrorStage, EtlErrorStatus, Id, ResultType, Severity, VerifyStatus, VulnStatus,
    VulnTargetType,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical host record, identity = `(project_id, ip)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetHost {
    pub id: Id,
    pub project_id: Id,
    pub ip: String,
    pub hostname: Option<String>,
    pub os: Option<String>,
    pub tags: Vec<String>,
    pub source_stage_ids: Vec<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Canonical service record, identity = `(host_id, port, proto)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetService {
    pub id: Id,
    pub host_id: Id,
    pub port: u16,
    pub proto: String,
    pub name: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
    pub cpe: Option<String>,
    pub banner: Option<String>,
    pub fingerprint: Option<String>,
    pub last_seen: DateTime<Utc>,
}

/// Canonical web asset record, identity = `url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetWeb {
    pub id: Id,
    pub host_id: Id,
    pub url: String,
    pub domain: Option<String>,
    pub tech_stack: Vec<String>,
    /// Serialized `{title, status_code, headers, favicon}`.
    pub basic_info_json: String,
    pub last_seen: DateTime<Utc>,
}

/// Detail record 1:1 with an `AssetWeb`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetWebDetail {
    pub web_id: Id,
    /// Serialized response-body summary / header dump.
    pub content_details_json: String,
    pub screenshot_ref: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Canonical vulnerability record, identity = `(target_type, target_ref_id, id_alias)`.
/// See Section 9 for the id-alias rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetVuln {
    pub id: Id,
    pub project_id: Id,
    pub target_type: VulnTargetType,
    pub target_ref_id: Id,
    pub id_alias: String,
    pub cve: Option<String>,
    pub severity: Severity,
    pub confidence: f64,
    pub status: VulnStatus,
    pub verify_status: VerifyStatus,
    /// Merged, never replaced wholesale (Section 4.8 step 5).
    pub attributes_json: String,
    pub evidence: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Read-optimized flat projection, identity = `(project_id, ip, port)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetUnified {
    pub project_id: Id,
    pub ip: String,
    pub port: u16,
    pub hostname: Option<String>,
    pub os: Option<String>,
    pub service_name: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
    pub url: Option<String>,
    pub fingerprint: Option<String>,
    pub last_seen: DateTime<Utc>,
}

/// A persisted dead letter from the ETL pipeline (Section 4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlError {
    pub id: Id,
    pub project_id: Id,
    pub task_id: Id,
    pub result_type: ResultType,
    /// Serialized original `StageResult`, re-used verbatim on replay.
    pub raw_data_json: String,
    pub error_stage: EtlErrorStage,
    pub error_message: String,
    pub status: EtlErrorStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ephemeral grouping of derived entities for one host, produced by the
/// Mapper (C7) and consumed whole by the Merger (C8).
#[derive(Debug, Clone, Default)]
pub struct AssetBundle {
    pub project_id: Option<Id>,
    pub host: Option<HostDraft>,
    pub services: Vec<ServiceDraft>,
    pub webs: Vec<WebDraft>,
    pub vulns: Vec<VulnDraft>,
}

/// Unsaved host fields the Mapper can produce without touching storage.
#[derive(Debug, Clone, Default)]
pub struct HostDraft {
    pub ip: String,
    pub hostname: Option<String>,
    pub os: Option<String>,
    pub source_stage_id: Option<Id>,
}

#[derive(Debug, Clone, Default)]
pub struct ServiceDraft {
    pub port: u16,
    pub proto: String,
    pub name: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
    pub cpe: Option<String>,
    pub banner: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct WebDraft {
    pub url: String,
    pub domain: Option<String>,
    pub tech_stack: Vec<String>,
    pub title: Option<String>,
    pub status_code: Option<u16>,
    pub headers: Option<serde_json::Value>,
    pub favicon: Option<String>,
    pub screenshot_ref: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VulnDraft {
    pub target_type: VulnTargetType,
    /// Resolved by the Merger, not the Mapper: a port for `service` targets,
    /// a URL for `web` targets. `None` for `host` targets.
    pub target_port: Option<u16>,
    pub target_url: Option<String>,
    pub id_alias: String,
    pub cve: Option<String>,
    pub severity: Severity,
    pub confidence: f64,
    pub status: VulnStatus,
    pub verify_status: VerifyStatus,
    pub attributes: serde_json::Value,
    pub evidence: Option<String>,
}
