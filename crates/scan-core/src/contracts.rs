//! Result payload contracts (Section 4.1 / C1).
//!
//! One typed shape per result kind. These are the schemas the Mapper (C7)
//! deserializes `StageResult.attributes` into; they are intentionally
//! permissive (most fields optional) since an Agent may omit fields the
//! Mapper recovers heuristically.

use serde::{Deserialize, Serialize};

fn default_proto() -> String {
    "tcp".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpAliveHost {
    pub ip: String,
    pub rtt_ms: Option<f64>,
    pub ttl: Option<u32>,
    pub hostname: Option<String>,
    pub os: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpAliveSummary {
    pub alive_count: u32,
    pub scanned_count: u32,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpAlivePayload {
    pub hosts: Vec<IpAliveHost>,
    pub summary: Option<IpAliveSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PortState {
    Open,
    Closed,
    Filtered,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PortScanRecord {
    pub ip: Option<String>,
    pub port: u16,
    #[serde(default = "default_proto")]
    pub proto: String,
    pub state: PortState,
    pub service_hint: Option<String>,
    pub banner: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PortScanPayload {
    pub records: Vec<PortScanRecord>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FingerprintRecord {
    pub ip: Option<String>,
    pub port: u16,
    #[serde(default = "default_proto")]
    pub proto: String,
    pub name: String,
    pub version: Option<String>,
    pub cpe: Option<String>,
    pub banner: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FingerprintPayload {
    pub records: Vec<FingerprintRecord>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebEndpointRecord {
    pub url: String,
    pub ip: Option<String>,
    pub title: Option<String>,
    pub status_code: Option<u16>,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    pub headers: Option<serde_json::Value>,
    pub screenshot: Option<String>,
    pub favicon: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebEndpointPayload {
    pub records: Vec<WebEndpointRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VulnFindingTargetType {
    Host,
    Service,
    Web,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VulnFindingRecord {
    pub id: String,
    pub cve: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub vuln_type: String,
    pub severity: String,
    pub description: Option<String>,
    pub solution: Option<String>,
    #[serde(default)]
    pub confidence: f64,
    pub target_type: VulnFindingTargetType,
    pub port: Option<u16>,
    pub url: Option<String>,
    pub ip: Option<String>,
    pub evidence: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VulnFindingPayload {
    pub records: Vec<VulnFindingRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PocStatus {
    Confirmed,
    NotVulnerable,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PocScanRecord {
    pub poc_id: String,
    pub target: String,
    pub status: PocStatus,
    pub severity: String,
    pub evidence_ref: Option<String>,
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PocScanPayload {
    pub records: Vec<PocScanRecord>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PasswordAuditRecord {
    pub username: String,
    pub service: String,
    pub host: String,
    pub port: u16,
    pub weak_password: bool,
    pub credential: Option<String>,
    pub success: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PasswordAuditPayload {
    pub records: Vec<PasswordAuditRecord>,
}
