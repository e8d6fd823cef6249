//! Result Mapper (C7): a total function from a typed StageResult to a list
//! of AssetBundles, one per distinct host discovered in the payload
//! (Section 4.7). Reserved result kinds are rejected with a typed error
//! rather than silently dropped.
//!
//! Must not perform I/O other than reading its input.

use chrono::Utc;
use scan_core::contracts::{
    FingerprintPayload, IpAlivePayload, PasswordAuditPayload, PocScanPayload, PocStatus,
    PortScanPayload, PortState, VulnFindingPayload, VulnFindingTargetType, WebEndpointPayload,
};
use scan_core::{
    AssetBundle, HostDraft, Id, ResultType, Severity, ServiceDraft, StageResult, VerifyStatus,
    VulnDraft, VulnStatus, VulnTargetType, WebDraft,
};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MapperError {
    #[error("result type {0:?} is reserved, not yet implemented")]
    NotImplemented(ResultType),
    #[error("invalid result payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

/// Resolves the host IP a record should be attributed to. Returns `None`
/// (meaning: emit no bundle for this record) when the task's own target is
/// a CIDR and the record carries no explicit IP — there is no way to
/// attribute it to a single host.
fn resolve_ip(record_ip: Option<&str>, target_value: &str) -> Option<String> {
    if let Some(ip) = record_ip {
        if !ip.is_empty() {
            return Some(ip.to_string());
        }
    }
    if target_value.contains('/') {
        return None;
    }
    Some(target_value.to_string())
}

pub fn map_result(result: &StageResult) -> Result<Vec<AssetBundle>, MapperError> {
    if result.result_type.is_reserved() {
        return Err(MapperError::NotImplemented(result.result_type));
    }

    match result.result_type {
        ResultType::IpAlive => map_ip_alive(result),
        ResultType::FastPortScan | ResultType::FullPortScan => map_port_scan(result),
        ResultType::ServiceFingerprint => map_fingerprint(result),
        ResultType::WebEndpoint => map_web_endpoint(result),
        ResultType::VulnFinding => map_vuln_finding(result),
        ResultType::PocScan => map_poc_scan(result),
        ResultType::PasswordAudit => map_password_audit(result),
        _ => unreachable!("reserved kinds rejected above"),
    }
}

fn map_ip_alive(result: &StageResult) -> Result<Vec<AssetBundle>, MapperError> {
    let payload: IpAlivePayload = serde_json::from_value(result.attributes.clone())?;
    Ok(payload
        .hosts
        .into_iter()
        .map(|host| AssetBundle {
            project_id: Some(result.project_id.clone()),
            host: Some(HostDraft {
                ip: host.ip,
                hostname: host.hostname,
                os: host.os,
                source_stage_id: Some(result.stage_id.clone()),
            }),
            ..Default::default()
        })
        .collect())
}

fn map_port_scan(result: &StageResult) -> Result<Vec<AssetBundle>, MapperError> {
    let payload: PortScanPayload = serde_json::from_value(result.attributes.clone())?;
    let mut by_ip: BTreeMap<String, Vec<ServiceDraft>> = BTreeMap::new();

    for record in payload.records {
        let Some(ip) = resolve_ip(record.ip.as_deref(), &result.target_value) else {
            continue;
        };
        if record.state != PortState::Open {
            continue;
        }
        by_ip.entry(ip).or_default().push(ServiceDraft {
            port: record.port,
            proto: record.proto,
            name: record.service_hint,
            product: None,
            version: None,
            cpe: None,
            banner: record.banner,
        });
    }

    Ok(by_ip
        .into_iter()
        .map(|(ip, services)| AssetBundle {
            project_id: Some(result.project_id.clone()),
            host: Some(HostDraft {
                ip,
                hostname: None,
                os: None,
                source_stage_id: Some(result.stage_id.clone()),
            }),
            services,
            ..Default::default()
        })
        .collect())
}

fn map_fingerprint(result: &StageResult) -> Result<Vec<AssetBundle>, MapperError> {
    let payload: FingerprintPayload = serde_json::from_value(result.attributes.clone())?;
    let mut by_ip: BTreeMap<String, Vec<ServiceDraft>> = BTreeMap::new();

    for record in payload.records {
        let Some(ip) = resolve_ip(record.ip.as_deref(), &result.target_value) else {
            continue;
        };
        by_ip.entry(ip).or_default().push(ServiceDraft {
            port: record.port,
            proto: record.proto,
            name: None,
            product: Some(record.name),
            version: record.version,
            cpe: record.cpe,
            banner: record.banner,
        });
    }

    Ok(by_ip
        .into_iter()
        .map(|(ip, services)| AssetBundle {
            project_id: Some(result.project_id.clone()),
            host: Some(HostDraft {
                ip,
                hostname: None,
                os: None,
                source_stage_id: Some(result.stage_id.clone()),
            }),
            services,
            ..Default::default()
        })
        .collect())
}

fn map_web_endpoint(result: &StageResult) -> Result<Vec<AssetBundle>, MapperError> {
    let payload: WebEndpointPayload = serde_json::from_value(result.attributes.clone())?;
    let mut by_ip: BTreeMap<String, Vec<WebDraft>> = BTreeMap::new();

    for record in payload.records {
        let host_hint = record.ip.clone().or_else(|| url_hostname(&record.url));
        let Some(ip) = resolve_ip(host_hint.as_deref(), &result.target_value) else {
            continue;
        };
        by_ip.entry(ip).or_default().push(WebDraft {
            url: record.url.clone(),
            domain: url_hostname(&record.url),
            tech_stack: record.tech_stack,
            title: record.title,
            status_code: record.status_code,
            headers: record.headers,
            favicon: record.favicon,
            screenshot_ref: record.screenshot,
        });
    }

    Ok(by_ip
        .into_iter()
        .map(|(ip, webs)| AssetBundle {
            project_id: Some(result.project_id.clone()),
            host: Some(HostDraft {
                ip,
                hostname: None,
                os: None,
                source_stage_id: Some(result.stage_id.clone()),
            }),
            webs,
            ..Default::default()
        })
        .collect())
}

fn url_hostname(url: &str) -> Option<String> {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or(without_scheme);
    let host = host.rsplit_once('@').map_or(host, |(_, h)| h);
    let host = host.split(':').next().unwrap_or(host);
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

fn map_vuln_finding(result: &StageResult) -> Result<Vec<AssetBundle>, MapperError> {
    let payload: VulnFindingPayload = serde_json::from_value(result.attributes.clone())?;
    let mut by_ip: BTreeMap<String, Vec<VulnDraft>> = BTreeMap::new();

    for finding in payload.records {
        let Some(ip) = resolve_ip(finding.ip.as_deref(), &result.target_value) else {
            continue;
        };

        let cve = finding.cve.clone().or_else(|| extract_cve(&finding.id));
        let id_alias = vuln_id_alias(
            &finding.id,
            cve.as_deref(),
            &finding.vuln_type,
            &finding.name,
            finding.port,
            finding.url.as_deref(),
        );

        let target_type = match finding.target_type {
            VulnFindingTargetType::Host => VulnTargetType::Host,
            VulnFindingTargetType::Service => VulnTargetType::Service,
            VulnFindingTargetType::Web => VulnTargetType::Web,
        };

        let attributes = serde_json::json!({
            "target_type": finding.target_type,
            "port": finding.port,
            "url": finding.url,
            "description": finding.description,
            "solution": finding.solution,
        });

        by_ip.entry(ip).or_default().push(VulnDraft {
            target_type,
            target_port: finding.port,
            target_url: finding.url.clone(),
            id_alias,
            cve,
            severity: Severity::parse(&finding.severity),
            confidence: finding.confidence,
            status: VulnStatus::Open,
            verify_status: VerifyStatus::Unverified,
            attributes,
            evidence: finding.evidence,
        });
    }

    Ok(by_ip
        .into_iter()
        .map(|(ip, vulns)| AssetBundle {
            project_id: Some(result.project_id.clone()),
            host: Some(HostDraft {
                ip,
                hostname: None,
                os: None,
                source_stage_id: Some(result.stage_id.clone()),
            }),
            vulns,
            ..Default::default()
        })
        .collect())
}

fn map_poc_scan(result: &StageResult) -> Result<Vec<AssetBundle>, MapperError> {
    let payload: PocScanPayload = serde_json::from_value(result.attributes.clone())?;
    let mut by_ip: BTreeMap<String, Vec<VulnDraft>> = BTreeMap::new();

    for record in payload.records {
        if record.status != PocStatus::Confirmed {
            continue;
        }
        let Some(ip) = resolve_ip(record.ip.as_deref(), &result.target_value) else {
            continue;
        };

        let target_type = if record.target.starts_with("http") {
            VulnTargetType::Web
        } else if record.target.contains(':') {
            VulnTargetType::Service
        } else {
            VulnTargetType::Host
        };

        let attributes = serde_json::json!({
            "target": record.target,
            "verified_by": "poc_scanner",
            "verified_at": Utc::now().to_rfc3339(),
            "evidence_ref": record.evidence_ref,
        });

        by_ip.entry(ip).or_default().push(VulnDraft {
            target_type,
            target_port: None,
            target_url: if target_type == VulnTargetType::Web {
                Some(record.target.clone())
            } else {
                None
            },
            id_alias: record.poc_id,
            cve: None,
            severity: Severity::parse(&record.severity),
            confidence: 1.0,
            status: VulnStatus::Open,
            verify_status: VerifyStatus::Verified,
            attributes,
            evidence: record.evidence_ref,
        });
    }

    Ok(by_ip
        .into_iter()
        .map(|(ip, vulns)| AssetBundle {
            project_id: Some(result.project_id.clone()),
            host: Some(HostDraft {
                ip,
                hostname: None,
                os: None,
                source_stage_id: Some(result.stage_id.clone()),
            }),
            vulns,
            ..Default::default()
        })
        .collect())
}

fn map_password_audit(result: &StageResult) -> Result<Vec<AssetBundle>, MapperError> {
    let payload: PasswordAuditPayload = serde_json::from_value(result.attributes.clone())?;
    let mut by_host_service: BTreeMap<(String, String), Vec<_>> = BTreeMap::new();

    for record in payload.records {
        if !record.weak_password {
            continue;
        }
        by_host_service
            .entry((record.host.clone(), record.service.clone()))
            .or_default()
            .push(record);
    }

    let mut by_ip: BTreeMap<String, Vec<VulnDraft>> = BTreeMap::new();
    for ((host, service), accounts) in by_host_service {
        let id_alias = format!("neosc:neosc-rules:weak-password:{service}");
        let attributes = serde_json::json!({
            "service": service,
            "accounts": accounts
                .iter()
                .map(|a| serde_json::json!({
                    "username": a.username,
                    "port": a.port,
                    "success": a.success,
                }))
                .collect::<Vec<_>>(),
        });
        let port = accounts.first().map(|a| a.port);

        by_ip.entry(host).or_default().push(VulnDraft {
            target_type: VulnTargetType::Service,
            target_port: port,
            target_url: None,
            id_alias,
            cve: None,
            severity: Severity::High,
            confidence: 1.0,
            status: VulnStatus::Open,
            verify_status: VerifyStatus::Unverified,
            attributes,
            evidence: None,
        });
    }

    Ok(by_ip
        .into_iter()
        .map(|(ip, vulns)| AssetBundle {
            project_id: Some(result.project_id.clone()),
            host: Some(HostDraft {
                ip,
                hostname: None,
                os: None,
                source_stage_id: Some(result.stage_id.clone()),
            }),
            vulns,
            ..Default::default()
        })
        .collect())
}

/// Mandatory fallback chain (Section 9): `id → cve → type|name|port|url →
/// hash(canonical-attrs)`. Evidence never participates in identity.
fn vuln_id_alias(
    id: &str,
    cve: Option<&str>,
    vuln_type: &str,
    name: &str,
    port: Option<u16>,
    url: Option<&str>,
) -> String {
    if !id.is_empty() {
        return id.to_string();
    }
    if let Some(cve) = cve {
        if !cve.is_empty() {
            return cve.to_string();
        }
    }
    let composite = format!(
        "{vuln_type}|{name}|{}|{}",
        port.map(|p| p.to_string()).unwrap_or_default(),
        url.unwrap_or_default()
    );
    if composite != "|||" {
        return composite;
    }
    let mut hasher = Sha256::new();
    hasher.update(vuln_type.as_bytes());
    hasher.update(name.as_bytes());
    format!("hash:{:x}", hasher.finalize())
}

/// Heuristic CVE extraction from an engine-specific id string, e.g.
/// `nuclei:nuclei-templates:CVE-2021-44228` → `CVE-2021-44228`.
fn extract_cve(id: &str) -> Option<String> {
    let upper = id.to_uppercase();
    let idx = upper.find("CVE-")?;
    let candidate = &id[idx..];
    let end = candidate
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '-'))
        .map_or(candidate.len(), |(i, _)| i);
    let token = &candidate[..end];
    let mut parts = token.splitn(3, '-');
    let prefix = parts.next()?;
    let year = parts.next()?;
    let number = parts.next()?;
    if prefix.eq_ignore_ascii_case("cve")
        && year.len() == 4
        && year.chars().all(|c| c.is_ascii_digit())
        && !number.is_empty()
        && number.chars().all(|c| c.is_ascii_digit())
    {
        Some(token.to_uppercase())
    } else {
        None
    }
}
