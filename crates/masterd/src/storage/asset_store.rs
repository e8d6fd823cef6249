//! Asset Store (C4): persistence and upsert semantics for the normalized
//! asset tables plus the read-optimized Unified projection (Section 4.4,
//! Section 4.8).

use super::{Storage, StorageError};
use chrono::{DateTime, Utc};
use scan_core::{
    AssetHost, AssetService, AssetUnified, AssetVuln, AssetWeb, AssetWebDetail, EtlError,
    EtlErrorStage, EtlErrorStatus, Id, ResultType, Severity, VerifyStatus, VulnStatus,
    VulnTargetType,
};

type Result<T> = super::Result<T>;

impl Storage {
    // --- Host (identity: project_id, ip) ---

    pub async fn get_host_by_project_and_ip(
        &self,
        project_id: &Id,
        ip: &str,
    ) -> Result<Option<AssetHost>> {
        let row = sqlx::query_as::<_, HostRow>(
            "SELECT * FROM asset_hosts WHERE project_id = ?1 AND ip = ?2",
        )
        .bind(project_id.as_ref())
        .bind(ip)
        .fetch_optional(self.pool())
        .await?;
        row.map(HostRow::into_host).transpose()
    }

    /// On update, refreshes `last_seen`; merges `hostname`/`os` only if
    /// currently empty (Section 4.8 step 1).
    pub async fn upsert_host(
        &self,
        project_id: &Id,
        ip: &str,
        hostname: Option<&str>,
        os: Option<&str>,
        source_stage_id: Option<&Id>,
    ) -> Result<Id> {
        let now = Utc::now();
        match self.get_host_by_project_and_ip(project_id, ip).await? {
            Some(existing) => {
                let hostname = existing.hostname.clone().or_else(|| hostname.map(String::from));
                let os = existing.os.clone().or_else(|| os.map(String::from));
                let mut source_stage_ids = existing.source_stage_ids.clone();
                if let Some(stage_id) = source_stage_id {
                    let stage_id = stage_id.to_string();
                    if !source_stage_ids.contains(&stage_id) {
                        source_stage_ids.push(stage_id);
                    }
                }
                sqlx::query(
                    "UPDATE asset_hosts SET hostname = ?1, os = ?2, source_stage_ids_json = ?3,
                         last_seen = ?4 WHERE id = ?5",
                )
                .bind(&hostname)
                .bind(&os)
                .bind(serde_json::to_string(&source_stage_ids)?)
                .bind(now.timestamp_millis())
                .bind(existing.id.as_ref())
                .execute(self.pool())
                .await?;
                Ok(existing.id)
            }
            None => {
                let id = Id::new();
                let source_stage_ids: Vec<String> =
                    source_stage_id.map(|s| vec![s.to_string()]).unwrap_or_default();
                sqlx::query(
                    "INSERT INTO asset_hosts
                        (id, project_id, ip, hostname, os, tags_json, source_stage_ids_json,
                         first_seen, last_seen)
                     VALUES (?1, ?2, ?3, ?4, ?5, '[]', ?6, ?7, ?7)",
                )
                .bind(id.as_ref())
                .bind(project_id.as_ref())
                .bind(ip)
                .bind(hostname)
                .bind(os)
                .bind(serde_json::to_string(&source_stage_ids)?)
                .bind(now.timestamp_millis())
                .execute(self.pool())
                .await?;
                Ok(id)
            }
        }
    }

    pub async fn get_host(&self, id: &Id) -> Result<AssetHost> {
        let row = sqlx::query_as::<_, HostRow>("SELECT * FROM asset_hosts WHERE id = ?1")
            .bind(id.as_ref())
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StorageError::HostNotFound(id.to_string()))?;
        row.into_host()
    }

    // --- Service (identity: host_id, port, proto) ---

    pub async fn get_service_by_identity(
        &self,
        host_id: &Id,
        port: u16,
        proto: &str,
    ) -> Result<Option<AssetService>> {
        let row = sqlx::query_as::<_, ServiceRow>(
            "SELECT * FROM asset_services WHERE host_id = ?1 AND port = ?2 AND proto = ?3",
        )
        .bind(host_id.as_ref())
        .bind(port)
        .bind(proto)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(ServiceRow::into_service))
    }

    /// Overwrites `name`/`product`/`version`/`cpe`/`banner` only when the
    /// new value is non-empty (Section 4.8 step 2).
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_service(
        &self,
        host_id: &Id,
        port: u16,
        proto: &str,
        name: Option<&str>,
        product: Option<&str>,
        version: Option<&str>,
        cpe: Option<&str>,
        banner: Option<&str>,
    ) -> Result<Id> {
        let now = Utc::now();
        fn pick(existing: Option<String>, incoming: Option<&str>) -> Option<String> {
            match incoming {
                Some(v) if !v.is_empty() => Some(v.to_string()),
                _ => existing,
            }
        }

        match self.get_service_by_identity(host_id, port, proto).await? {
            Some(existing) => {
                let name = pick(existing.name, name);
                let product = pick(existing.product, product);
                let version = pick(existing.version, version);
                let cpe = pick(existing.cpe, cpe);
                let banner = pick(existing.banner, banner);
                sqlx::query(
                    "UPDATE asset_services SET name = ?1, product = ?2, version = ?3, cpe = ?4,
                         banner = ?5, last_seen = ?6 WHERE id = ?7",
                )
                .bind(&name)
                .bind(&product)
                .bind(&version)
                .bind(&cpe)
                .bind(&banner)
                .bind(now.timestamp_millis())
                .bind(existing.id.as_ref())
                .execute(self.pool())
                .await?;
                Ok(existing.id)
            }
            None => {
                let id = Id::new();
                sqlx::query(
                    "INSERT INTO asset_services
                        (id, host_id, port, proto, name, product, version, cpe, banner, last_seen)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                )
                .bind(id.as_ref())
                .bind(host_id.as_ref())
                .bind(port)
                .bind(proto)
                .bind(name)
                .bind(product)
                .bind(version)
                .bind(cpe)
                .bind(banner)
                .bind(now.timestamp_millis())
                .execute(self.pool())
                .await?;
                Ok(id)
            }
        }
    }

    // --- Web (identity: url) ---

    pub async fn get_web_by_url(&self, url: &str) -> Result<Option<AssetWeb>> {
        let row = sqlx::query_as::<_, WebRow>("SELECT * FROM asset_webs WHERE url = ?1")
            .bind(url)
            .fetch_optional(self.pool())
            .await?;
        row.map(WebRow::into_web).transpose()
    }

    pub async fn upsert_web(
        &self,
        host_id: &Id,
        url: &str,
        domain: Option<&str>,
        tech_stack: &[String],
        basic_info_json: &str,
    ) -> Result<Id> {
        let now = Utc::now();
        match self.get_web_by_url(url).await? {
            Some(existing) => {
                sqlx::query(
                    "UPDATE asset_webs SET domain = ?1, tech_stack_json = ?2,
                         basic_info_json = ?3, last_seen = ?4 WHERE id = ?5",
                )
                .bind(domain)
                .bind(serde_json::to_string(tech_stack)?)
                .bind(basic_info_json)
                .bind(now.timestamp_millis())
                .bind(existing.id.as_ref())
                .execute(self.pool())
                .await?;
                Ok(existing.id)
            }
            None => {
                let id = Id::new();
                sqlx::query(
                    "INSERT INTO asset_webs
                        (id, host_id, url, domain, tech_stack_json, basic_info_json, last_seen)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )
                .bind(id.as_ref())
                .bind(host_id.as_ref())
                .bind(url)
                .bind(domain)
                .bind(serde_json::to_string(tech_stack)?)
                .bind(basic_info_json)
                .bind(now.timestamp_millis())
                .execute(self.pool())
                .await?;
                Ok(id)
            }
        }
    }

    pub async fn create_or_update_web_detail(
        &self,
        web_id: &Id,
        content_details_json: &str,
        screenshot_ref: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            "INSERT INTO asset_web_details (web_id, content_details_json, screenshot_ref, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(web_id) DO UPDATE SET
                content_details_json = excluded.content_details_json,
                screenshot_ref = excluded.screenshot_ref,
                updated_at = excluded.updated_at",
        )
        .bind(web_id.as_ref())
        .bind(content_details_json)
        .bind(screenshot_ref)
        .bind(now)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_web_detail(&self, web_id: &Id) -> Result<Option<AssetWebDetail>> {
        let row = sqlx::query_as::<_, WebDetailRow>(
            "SELECT * FROM asset_web_details WHERE web_id = ?1",
        )
        .bind(web_id.as_ref())
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(WebDetailRow::into_detail))
    }

    // --- Unified projection (identity: project_id, ip, port) ---

    pub async fn upsert_unified(&self, row: &AssetUnified) -> Result<()> {
        sqlx::query(
            "INSERT INTO asset_unified
                (project_id, ip, port, hostname, os, service_name, product, version, url,
                 fingerprint, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(project_id, ip, port) DO UPDATE SET
                hostname = excluded.hostname,
                os = excluded.os,
                service_name = excluded.service_name,
                product = excluded.product,
                version = excluded.version,
                url = excluded.url,
                fingerprint = excluded.fingerprint,
                last_seen = excluded.last_seen",
        )
        .bind(row.project_id.as_ref())
        .bind(&row.ip)
        .bind(row.port)
        .bind(&row.hostname)
        .bind(&row.os)
        .bind(&row.service_name)
        .bind(&row.product)
        .bind(&row.version)
        .bind(&row.url)
        .bind(&row.fingerprint)
        .bind(row.last_seen.timestamp_millis())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    // --- Vuln (identity: target_type, target_ref_id, id_alias) ---

    pub async fn get_vuln_by_identity(
        &self,
        target_type: VulnTargetType,
        target_ref_id: &Id,
        id_alias: &str,
    ) -> Result<Option<AssetVuln>> {
        let row = sqlx::query_as::<_, VulnRow>(
            "SELECT * FROM asset_vulns WHERE target_type = ?1 AND target_ref_id = ?2 AND id_alias = ?3",
        )
        .bind(target_type.as_str())
        .bind(target_ref_id.as_ref())
        .bind(id_alias)
        .fetch_optional(self.pool())
        .await?;
        row.map(VulnRow::into_vuln).transpose()
    }

    /// Merges `evidence`/`attributes` into the existing row rather than
    /// replacing them (Section 4.8 step 5).
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_vuln(
        &self,
        project_id: &Id,
        target_type: VulnTargetType,
        target_ref_id: &Id,
        id_alias: &str,
        cve: Option<&str>,
        severity: Severity,
        confidence: f64,
        status: VulnStatus,
        verify_status: VerifyStatus,
        attributes: &serde_json::Value,
        evidence: Option<&str>,
    ) -> Result<Id> {
        let now = Utc::now();
        match self
            .get_vuln_by_identity(target_type, target_ref_id, id_alias)
            .await?
        {
            Some(existing) => {
                let mut merged: serde_json::Value =
                    serde_json::from_str(&existing.attributes_json).unwrap_or(serde_json::json!({}));
                if let (Some(merged_obj), Some(incoming_obj)) =
                    (merged.as_object_mut(), attributes.as_object())
                {
                    for (k, v) in incoming_obj {
                        merged_obj.insert(k.clone(), v.clone());
                    }
                }
                let merged_evidence = evidence.or(existing.evidence.as_deref());

                sqlx::query(
                    "UPDATE asset_vulns SET cve = ?1, severity = ?2, confidence = ?3, status = ?4,
                         verify_status = ?5, attributes_json = ?6, evidence = ?7, last_seen = ?8
                     WHERE id = ?9",
                )
                .bind(cve)
                .bind(severity.as_str())
                .bind(confidence)
                .bind(status.as_str())
                .bind(verify_status.as_str())
                .bind(serde_json::to_string(&merged)?)
                .bind(merged_evidence)
                .bind(now.timestamp_millis())
                .bind(existing.id.as_ref())
                .execute(self.pool())
                .await?;
                Ok(existing.id)
            }
            None => {
                let id = Id::new();
                sqlx::query(
                    "INSERT INTO asset_vulns
                        (id, project_id, target_type, target_ref_id, id_alias, cve, severity,
                         confidence, status, verify_status, attributes_json, evidence,
                         first_seen, last_seen)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
                )
                .bind(id.as_ref())
                .bind(project_id.as_ref())
                .bind(target_type.as_str())
                .bind(target_ref_id.as_ref())
                .bind(id_alias)
                .bind(cve)
                .bind(severity.as_str())
                .bind(confidence)
                .bind(status.as_str())
                .bind(verify_status.as_str())
                .bind(serde_json::to_string(attributes)?)
                .bind(evidence)
                .bind(now.timestamp_millis())
                .execute(self.pool())
                .await?;
                Ok(id)
            }
        }
    }

    // --- ETL errors (DLQ rows are listed here; replay flow lives in dlq.rs) ---

    pub async fn create_etl_error(&self, error: &EtlError) -> Result<()> {
        sqlx::query(
            "INSERT INTO etl_errors
                (id, project_id, task_id, result_type, raw_data_json, error_stage,
                 error_message, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(error.id.as_ref())
        .bind(error.project_id.as_ref())
        .bind(error.task_id.as_ref())
        .bind(error.result_type.as_str())
        .bind(&error.raw_data_json)
        .bind(error.error_stage.as_str())
        .bind(&error.error_message)
        .bind(error.status.as_str())
        .bind(error.created_at.timestamp_millis())
        .bind(error.updated_at.timestamp_millis())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_etl_errors_by_status(
        &self,
        status: EtlErrorStatus,
        limit: u32,
    ) -> Result<Vec<EtlError>> {
        let rows = sqlx::query_as::<_, EtlErrorRow>(
            "SELECT * FROM etl_errors WHERE status = ?1 ORDER BY created_at LIMIT ?2",
        )
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(EtlErrorRow::into_error).collect()
    }

    pub async fn update_etl_error_status(&self, id: &Id, status: EtlErrorStatus) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query("UPDATE etl_errors SET status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(now)
            .bind(id.as_ref())
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::EtlErrorNotFound(id.to_string()));
        }
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct HostRow {
    id: String,
    project_id: String,
    ip: String,
    hostname: Option<String>,
    os: Option<String>,
    tags_json: String,
    source_stage_ids_json: String,
    first_seen: i64,
    last_seen: i64,
}

impl HostRow {
    fn into_host(self) -> Result<AssetHost> {
        Ok(AssetHost {
            id: Id::from_string(self.id),
            project_id: Id::from_string(self.project_id),
            ip: self.ip,
            hostname: self.hostname,
            os: self.os,
            tags: serde_json::from_str(&self.tags_json)?,
            source_stage_ids: serde_json::from_str(&self.source_stage_ids_json)?,
            first_seen: DateTime::from_timestamp_millis(self.first_seen).unwrap_or_default(),
            last_seen: DateTime::from_timestamp_millis(self.last_seen).unwrap_or_default(),
        })
    }
}

#[derive(sqlx::FromRow)]
struct ServiceRow {
    id: String,
    host_id: String,
    port: i64,
    proto: String,
    name: Option<String>,
    product: Option<String>,
    version: Option<String>,
    cpe: Option<String>,
    banner: Option<String>,
    fingerprint: Option<String>,
    last_seen: i64,
}

impl ServiceRow {
    fn into_service(self) -> AssetService {
        AssetService {
            id: Id::from_string(self.id),
            host_id: Id::from_string(self.host_id),
            port: self.port as u16,
            proto: self.proto,
            name: self.name,
            product: self.product,
            version: self.version,
            cpe: self.cpe,
            banner: self.banner,
            fingerprint: self.fingerprint,
            last_seen: DateTime::from_timestamp_millis(self.last_seen).unwrap_or_default(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct WebRow {
    id: String,
    host_id: String,
    url: String,
    domain: Option<String>,
    tech_stack_json: String,
    basic_info_json: String,
    last_seen: i64,
}

impl WebRow {
    fn into_web(self) -> Result<AssetWeb> {
        Ok(AssetWeb {
            id: Id::from_string(self.id),
            host_id: Id::from_string(self.host_id),
            url: self.url,
            domain: self.domain,
            tech_stack: serde_json::from_str(&self.tech_stack_json)?,
            basic_info_json: self.basic_info_json,
            last_seen: DateTime::from_timestamp_millis(self.last_seen).unwrap_or_default(),
        })
    }
}

#[derive(sqlx::FromRow)]
struct WebDetailRow {
    web_id: String,
    content_details_json: String,
    screenshot_ref: Option<String>,
    updated_at: i64,
}

impl WebDetailRow {
    fn into_detail(self) -> AssetWebDetail {
        AssetWebDetail {
            web_id: Id::from_string(self.web_id),
            content_details_json: self.content_details_json,
            screenshot_ref: self.screenshot_ref,
            updated_at: DateTime::from_timestamp_millis(self.updated_at).unwrap_or_default(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct VulnRow {
    id: String,
    project_id: String,
    target_type: String,
    target_ref_id: String,
    id_alias: String,
    cve: Option<String>,
    severity: String,
    confidence: f64,
    status: String,
    verify_status: String,
    attributes_json: String,
    evidence: Option<String>,
    first_seen: i64,
    last_seen: i64,
}

impl VulnRow {
    fn into_vuln(self) -> Result<AssetVuln> {
        Ok(AssetVuln {
            id: Id::from_string(self.id),
            project_id: Id::from_string(self.project_id),
            target_type: VulnTargetType::parse(&self.target_type).unwrap_or(VulnTargetType::Host),
            target_ref_id: Id::from_string(self.target_ref_id),
            id_alias: self.id_alias,
            cve: self.cve,
            severity: Severity::parse(&self.severity),
            confidence: self.confidence,
            status: VulnStatus::parse(&self.status).unwrap_or(VulnStatus::Open),
            verify_status: VerifyStatus::parse(&self.verify_status)
                .unwrap_or(VerifyStatus::Unverified),
            attributes_json: self.attributes_json,
            evidence: self.evidence,
            first_seen: DateTime::from_timestamp_millis(self.first_seen).unwrap_or_default(),
            last_seen: DateTime::from_timestamp_millis(self.last_seen).unwrap_or_default(),
        })
    }
}

#[derive(sqlx::FromRow)]
struct EtlErrorRow {
    id: String,
    project_id: String,
    task_id: String,
    result_type: String,
    raw_data_json: String,
    error_stage: String,
    error_message: String,
    status: String,
    created_at: i64,
    updated_at: i64,
}

impl EtlErrorRow {
    fn into_error(self) -> Result<EtlError> {
        Ok(EtlError {
            id: Id::from_string(self.id),
            project_id: Id::from_string(self.project_id),
            task_id: Id::from_string(self.task_id),
            result_type: ResultType::parse(&self.result_type).unwrap_or(ResultType::OtherScan),
            raw_data_json: self.raw_data_json,
            error_stage: EtlErrorStage::parse(&self.error_stage).unwrap_or(EtlErrorStage::Mapper),
            error_message: self.error_message,
            status: EtlErrorStatus::parse(&self.status).unwrap_or(EtlErrorStatus::New),
            created_at: DateTime::from_timestamp_millis(self.created_at).unwrap_or_default(),
            updated_at: DateTime::from_timestamp_millis(self.updated_at).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::TestStorage;
    use super::*;

    #[tokio::test]
    async fn upsert_host_is_idempotent_on_identity() {
        let ts = TestStorage::new().await;
        let storage = &ts.storage;
        let project_id = Id::new();

        let id1 = storage
            .upsert_host(&project_id, "10.0.0.1", None, None, None)
            .await
            .unwrap();
        let id2 = storage
            .upsert_host(&project_id, "10.0.0.1", Some("box1"), None, None)
            .await
            .unwrap();

        assert_eq!(id1, id2);
        let host = storage.get_host(&id1).await.unwrap();
        assert_eq!(host.hostname.as_deref(), Some("box1"));
    }

    #[tokio::test]
    async fn upsert_host_does_not_overwrite_existing_hostname() {
        let ts = TestStorage::new().await;
        let storage = &ts.storage;
        let project_id = Id::new();

        let id = storage
            .upsert_host(&project_id, "10.0.0.2", Some("first"), None, None)
            .await
            .unwrap();
        storage
            .upsert_host(&project_id, "10.0.0.2", Some("second"), None, None)
            .await
            .unwrap();

        let host = storage.get_host(&id).await.unwrap();
        assert_eq!(host.hostname.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn upsert_service_overwrites_only_non_empty_fields() {
        let ts = TestStorage::new().await;
        let storage = &ts.storage;
        let host_id = Id::new();

        storage
            .upsert_service(&host_id, 443, "tcp", Some("https"), None, None, None, None)
            .await
            .unwrap();
        let id = storage
            .upsert_service(&host_id, 443, "tcp", Some(""), Some("nginx"), None, None, None)
            .await
            .unwrap();

        let service = storage
            .get_service_by_identity(&host_id, 443, "tcp")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(service.id, id);
        assert_eq!(service.name.as_deref(), Some("https"));
        assert_eq!(service.product.as_deref(), Some("nginx"));
    }

    #[tokio::test]
    async fn upsert_vuln_merges_attributes_instead_of_replacing() {
        let ts = TestStorage::new().await;
        let storage = &ts.storage;
        let project_id = Id::new();
        let target_ref_id = Id::new();

        storage
            .upsert_vuln(
                &project_id,
                VulnTargetType::Host,
                &target_ref_id,
                "cve-2024-0001",
                Some("CVE-2024-0001"),
                Severity::High,
                0.8,
                VulnStatus::Open,
                VerifyStatus::Unverified,
                &serde_json::json!({"description": "first pass"}),
                Some("ev1"),
            )
            .await
            .unwrap();

        storage
            .upsert_vuln(
                &project_id,
                VulnTargetType::Host,
                &target_ref_id,
                "cve-2024-0001",
                Some("CVE-2024-0001"),
                Severity::High,
                0.9,
                VulnStatus::Verified,
                VerifyStatus::Verified,
                &serde_json::json!({"solution": "patch"}),
                None,
            )
            .await
            .unwrap();

        let vuln = storage
            .get_vuln_by_identity(VulnTargetType::Host, &target_ref_id, "cve-2024-0001")
            .await
            .unwrap()
            .unwrap();

        let attrs: serde_json::Value = serde_json::from_str(&vuln.attributes_json).unwrap();
        assert_eq!(attrs["description"], "first pass");
        assert_eq!(attrs["solution"], "patch");
        assert_eq!(vuln.evidence.as_deref(), Some("ev1"));
        assert_eq!(vuln.status, VulnStatus::Verified);
    }
}
