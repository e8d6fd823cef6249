//! Append-only audit log (Section 10.1). Distinct from tracing spans: this
//! is durable, queryable history of control-plane events, not diagnostics.

use super::Storage;
use chrono::{DateTime, Utc};
use scan_core::events::EventType;
use scan_core::Id;

type Result<T> = super::Result<T>;

impl Storage {
    pub async fn record_event(&self, event_type: EventType, payload: &impl serde::Serialize) -> Result<()> {
        let id = Id::new();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO audit_events (id, event_type, payload_json, created_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(id.as_ref())
        .bind(event_type.as_str())
        .bind(serde_json::to_string(payload)?)
        .bind(now.timestamp_millis())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_recent_events(&self, limit: u32) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query_as::<_, AuditEventRow>(
            "SELECT * FROM audit_events ORDER BY created_at DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(AuditEventRow::into_event).collect())
    }
}

#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub id: Id,
    pub event_type: String,
    pub payload_json: String,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct AuditEventRow {
    id: String,
    event_type: String,
    payload_json: String,
    created_at: i64,
}

impl AuditEventRow {
    fn into_event(self) -> AuditEvent {
        AuditEvent {
            id: Id::from_string(self.id),
            event_type: self.event_type,
            payload_json: self.payload_json,
            created_at: DateTime::from_timestamp_millis(self.created_at).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::TestStorage;
    use scan_core::events::{EventType, WorkflowExecutedPayload};
    use scan_core::Id;

    #[tokio::test]
    async fn record_and_list_events() {
        let ts = TestStorage::new().await;
        let storage = &ts.storage;
        let payload = WorkflowExecutedPayload {
            workflow_id: Id::new(),
            project_id: Id::new(),
        };
        storage
            .record_event(EventType::WorkflowExecuted, &payload)
            .await
            .unwrap();

        let events = storage.list_recent_events(10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "WORKFLOW_EXECUTED");
    }
}
