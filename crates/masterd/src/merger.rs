//! Asset Merger (C8): turns one AssetBundle into idempotent upserts across
//! the normalized asset tables plus the Unified projection (Section 4.8).
//!
//! Order is fixed: host, then services, then webs/details, then the
//! Unified projection, then vulns — vulns resolve against rows the earlier
//! steps just created, including synthesizing stub service/web rows when a
//! vuln's attributes name a port or URL the scan never otherwise reported.

use crate::storage::{Storage, StorageError};
use scan_core::{AssetBundle, AssetUnified, HostDraft, Id, ServiceDraft, VulnDraft, VulnTargetType, WebDraft};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MergerError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("bundle carries no host to merge against")]
    MissingHost,
}

type Result<T> = std::result::Result<T, MergerError>;

/// Counts of rows touched, for the Processor's per-item success log
/// (Section 4.9 step 4).
#[derive(Debug, Default)]
pub struct MergeSummary {
    pub host_id: Option<Id>,
    pub service_count: usize,
    pub web_count: usize,
    pub vuln_count: usize,
}

pub struct AssetMerger {
    storage: Storage,
}

impl AssetMerger {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub async fn merge_bundle(&self, bundle: AssetBundle) -> Result<MergeSummary> {
        let Some(host_draft) = bundle.host.as_ref() else {
            return Err(MergerError::MissingHost);
        };
        let project_id = bundle
            .project_id
            .clone()
            .ok_or(MergerError::MissingHost)?;

        let host_id = self.merge_host(&project_id, host_draft).await?;

        let mut service_ports: BTreeMap<u16, &ServiceDraft> = BTreeMap::new();
        for service in &bundle.services {
            self.merge_service(&host_id, service).await?;
            service_ports.insert(service.port, service);
        }

        let mut web_ports: BTreeMap<u16, &WebDraft> = BTreeMap::new();
        for web in &bundle.webs {
            self.merge_web(&host_id, web).await?;
            if let Some(port) = web_port(&web.url) {
                web_ports.insert(port, web);
            }
        }

        self.project_unified(&project_id, host_draft, &service_ports, &web_ports)
            .await?;

        for vuln in &bundle.vulns {
            self.merge_vuln(&project_id, &host_id, vuln).await?;
        }

        Ok(MergeSummary {
            host_id: Some(host_id),
            service_count: bundle.services.len(),
            web_count: bundle.webs.len(),
            vuln_count: bundle.vulns.len(),
        })
    }

    async fn merge_host(&self, project_id: &Id, host: &HostDraft) -> Result<Id> {
        Ok(self
            .storage
            .upsert_host(
                project_id,
                &host.ip,
                host.hostname.as_deref(),
                host.os.as_deref(),
                host.source_stage_id.as_ref(),
            )
            .await?)
    }

    async fn merge_service(&self, host_id: &Id, service: &ServiceDraft) -> Result<Id> {
        Ok(self
            .storage
            .upsert_service(
                host_id,
                service.port,
                &service.proto,
                service.name.as_deref(),
                service.product.as_deref(),
                service.version.as_deref(),
                service.cpe.as_deref(),
                service.banner.as_deref(),
            )
            .await?)
    }

    async fn merge_web(&self, host_id: &Id, web: &WebDraft) -> Result<Id> {
        let basic_info = serde_json::json!({
            "title": web.title,
            "status_code": web.status_code,
            "favicon": web.favicon,
        });
        let web_id = self
            .storage
            .upsert_web(
                host_id,
                &web.url,
                web.domain.as_deref(),
                &web.tech_stack,
                &basic_info.to_string(),
            )
            .await?;

        if web.headers.is_some() || web.screenshot_ref.is_some() {
            let content_details = serde_json::json!({ "headers": web.headers });
            self.storage
                .create_or_update_web_detail(
                    &web_id,
                    &content_details.to_string(),
                    web.screenshot_ref.as_deref(),
                )
                .await?;
        }
        Ok(web_id)
    }

    /// Builds one row per distinct port observed across services and webs
    /// (Section 4.8 step 4). A web with no resolvable port (non-http(s)
    /// scheme, or a URL without a host) contributes nothing here — it is
    /// still persisted in `asset_webs`, just not reachable from the flat
    /// projection by port.
    async fn project_unified(
        &self,
        project_id: &Id,
        host: &HostDraft,
        services: &BTreeMap<u16, &ServiceDraft>,
        webs: &BTreeMap<u16, &WebDraft>,
    ) -> Result<()> {
        let mut ports: Vec<u16> = services.keys().copied().collect();
        for port in webs.keys() {
            if !ports.contains(port) {
                ports.push(*port);
            }
        }

        for port in ports {
            let service = services.get(&port).copied();
            let web = webs.get(&port).copied();
            let row = AssetUnified {
                project_id: project_id.clone(),
                ip: host.ip.clone(),
                port,
                hostname: host.hostname.clone(),
                os: host.os.clone(),
                service_name: service.and_then(|s| s.name.clone()),
                product: service.and_then(|s| s.product.clone()),
                version: service.and_then(|s| s.version.clone()),
                url: web.map(|w| w.url.clone()),
                fingerprint: service.and_then(|s| s.cpe.clone()),
                last_seen: chrono::Utc::now(),
            };
            self.storage.upsert_unified(&row).await?;
        }
        Ok(())
    }

    /// Resolves `target-ref-id` per Section 4.8 step 5, synthesizing stub
    /// service/web rows when the vuln names a port/URL the scan itself
    /// never reported a service or web endpoint for.
    async fn merge_vuln(&self, project_id: &Id, host_id: &Id, vuln: &VulnDraft) -> Result<()> {
        let target_ref_id = match vuln.target_type {
            VulnTargetType::Host => host_id.clone(),
            VulnTargetType::Service => match vuln.target_port {
                Some(port) => match self
                    .storage
                    .get_service_by_identity(host_id, port, "tcp")
                    .await?
                {
                    Some(existing) => existing.id,
                    None => {
                        self.storage
                            .upsert_service(host_id, port, "tcp", None, None, None, None, None)
                            .await?
                    }
                },
                None => host_id.clone(),
            },
            VulnTargetType::Web => match vuln.target_url.as_deref() {
                Some(url) => match self.storage.get_web_by_url(url).await? {
                    Some(existing) => existing.id,
                    None => self.storage.upsert_web(host_id, url, None, &[], "{}").await?,
                },
                None => host_id.clone(),
            },
        };

        self.storage
            .upsert_vuln(
                project_id,
                vuln.target_type,
                &target_ref_id,
                &vuln.id_alias,
                vuln.cve.as_deref(),
                vuln.severity,
                vuln.confidence,
                vuln.status,
                vuln.verify_status,
                &vuln.attributes,
                vuln.evidence.as_deref(),
            )
            .await?;
        Ok(())
    }
}

fn web_port(url: &str) -> Option<u16> {
    let (scheme, rest) = url.split_once("://")?;
    let host_and_port = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let host_and_port = host_and_port.rsplit_once('@').map_or(host_and_port, |(_, h)| h);
    if let Some((_, port)) = host_and_port.split_once(':') {
        return port.parse().ok();
    }
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TestStorage;
    use scan_core::{Severity, VerifyStatus, VulnStatus};

    fn sample_bundle(project_id: &Id) -> AssetBundle {
        AssetBundle {
            project_id: Some(project_id.clone()),
            host: Some(HostDraft {
                ip: "10.0.0.5".to_string(),
                hostname: Some("box5".to_string()),
                os: None,
                source_stage_id: None,
            }),
            services: vec![ServiceDraft {
                port: 443,
                proto: "tcp".to_string(),
                name: Some("https".to_string()),
                product: Some("nginx".to_string()),
                version: None,
                cpe: None,
                banner: None,
            }],
            webs: vec![WebDraft {
                url: "https://10.0.0.5/".to_string(),
                domain: None,
                tech_stack: vec!["nginx".to_string()],
                title: Some("home".to_string()),
                status_code: Some(200),
                headers: Some(serde_json::json!({"server": "nginx"})),
                favicon: None,
                screenshot_ref: Some("evidence/shot1.png".to_string()),
            }],
            vulns: vec![],
        }
    }

    #[tokio::test]
    async fn merge_bundle_projects_host_service_and_web_into_unified() {
        let ts = TestStorage::new().await;
        let merger = AssetMerger::new(ts.storage.clone());
        let project_id = Id::new();
        let bundle = sample_bundle(&project_id);

        let summary = merger.merge_bundle(bundle).await.unwrap();
        assert_eq!(summary.service_count, 1);
        assert_eq!(summary.web_count, 1);

        let host = ts.storage.get_host(summary.host_id.as_ref().unwrap()).await.unwrap();
        assert_eq!(host.hostname.as_deref(), Some("box5"));

        let web = ts
            .storage
            .get_web_by_url("https://10.0.0.5/")
            .await
            .unwrap()
            .unwrap();
        let detail = ts.storage.get_web_detail(&web.id).await.unwrap();
        assert!(detail.is_some());
    }

    #[tokio::test]
    async fn merge_bundle_is_idempotent_on_row_identity() {
        let ts = TestStorage::new().await;
        let merger = AssetMerger::new(ts.storage.clone());
        let project_id = Id::new();

        let first = merger.merge_bundle(sample_bundle(&project_id)).await.unwrap();
        let second = merger.merge_bundle(sample_bundle(&project_id)).await.unwrap();

        assert_eq!(first.host_id, second.host_id);
        let service = ts
            .storage
            .get_service_by_identity(first.host_id.as_ref().unwrap(), 443, "tcp")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(service.product.as_deref(), Some("nginx"));
    }

    #[tokio::test]
    async fn vuln_with_port_only_creates_stub_service() {
        let ts = TestStorage::new().await;
        let merger = AssetMerger::new(ts.storage.clone());
        let project_id = Id::new();
        let mut bundle = sample_bundle(&project_id);
        bundle.services.clear();
        bundle.webs.clear();
        bundle.vulns.push(VulnDraft {
            target_type: VulnTargetType::Service,
            target_port: Some(8080),
            target_url: None,
            id_alias: "misconfig|weak-tls|8080|".to_string(),
            cve: None,
            severity: Severity::Medium,
            confidence: 0.6,
            status: VulnStatus::Open,
            verify_status: VerifyStatus::Unverified,
            attributes: serde_json::json!({}),
            evidence: None,
        });

        let summary = merger.merge_bundle(bundle).await.unwrap();
        let service = ts
            .storage
            .get_service_by_identity(summary.host_id.as_ref().unwrap(), 8080, "tcp")
            .await
            .unwrap();
        assert!(service.is_some());
    }

    #[tokio::test]
    async fn vuln_without_port_falls_back_to_host() {
        let ts = TestStorage::new().await;
        let merger = AssetMerger::new(ts.storage.clone());
        let project_id = Id::new();
        let mut bundle = sample_bundle(&project_id);
        bundle.services.clear();
        bundle.webs.clear();
        bundle.vulns.push(VulnDraft {
            target_type: VulnTargetType::Service,
            target_port: None,
            target_url: None,
            id_alias: "generic-finding".to_string(),
            cve: None,
            severity: Severity::Low,
            confidence: 0.3,
            status: VulnStatus::Open,
            verify_status: VerifyStatus::Unverified,
            attributes: serde_json::json!({}),
            evidence: None,
        });

        let summary = merger.merge_bundle(bundle).await.unwrap();
        let vuln = ts
            .storage
            .get_vuln_by_identity(
                VulnTargetType::Service,
                summary.host_id.as_ref().unwrap(),
                "generic-finding",
            )
            .await
            .unwrap();
        assert!(vuln.is_some());
    }

    #[test]
    fn web_port_defaults_by_scheme() {
        assert_eq!(web_port("https://example.com/"), Some(443));
        assert_eq!(web_port("http://example.com:8080/x"), Some(8080));
        assert_eq!(web_port("ftp://example.com/"), None);
    }
}
