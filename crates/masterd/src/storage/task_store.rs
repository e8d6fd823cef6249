//! Task Store (C3): Project/Workflow/Stage/Task persistence and the
//! claim/reclaim protocol of Section 4.3.

use super::{Storage, StorageError};
use chrono::{DateTime, Utc};
use scan_core::{
    Agent, AgentStatus, Project, ProjectStatus, ResultType, Stage, StageStatus, Task, TaskStatus,
    TargetType, TriggerType, Workflow, WorkflowStatus,
};
use std::collections::BTreeSet;

type Result<T> = super::Result<T>;

impl Storage {
    // --- Projects ---

    pub async fn create_project(&self, project: &Project) -> Result<()> {
        sqlx::query(
            "INSERT INTO projects (id, name, status, owner, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(project.id.as_ref())
        .bind(&project.name)
        .bind(project.status.as_str())
        .bind(&project.owner)
        .bind(project.created_at.timestamp_millis())
        .bind(project.updated_at.timestamp_millis())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_project(&self, id: &scan_core::Id) -> Result<Project> {
        sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE id = ?1")
            .bind(id.as_ref())
            .fetch_optional(self.pool())
            .await?
            .map(ProjectRow::into_project)
            .ok_or_else(|| StorageError::ProjectNotFound(id.to_string()))
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects ORDER BY created_at")
            .fetch_all(self.pool())
            .await?;
        Ok(rows.into_iter().map(ProjectRow::into_project).collect())
    }

    // --- Workflows ---

    pub async fn create_workflow(&self, workflow: &Workflow) -> Result<()> {
        sqlx::query(
            "INSERT INTO workflows
                (id, project_id, name, status, trigger_type, steps_json, schedule,
                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(workflow.id.as_ref())
        .bind(workflow.project_id.as_ref())
        .bind(&workflow.name)
        .bind(workflow.status.as_str())
        .bind(workflow.trigger_type.as_str())
        .bind(&workflow.steps_json)
        .bind(&workflow.schedule)
        .bind(workflow.created_at.timestamp_millis())
        .bind(workflow.updated_at.timestamp_millis())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_workflow(&self, id: &scan_core::Id) -> Result<Workflow> {
        sqlx::query_as::<_, WorkflowRow>("SELECT * FROM workflows WHERE id = ?1")
            .bind(id.as_ref())
            .fetch_optional(self.pool())
            .await?
            .map(WorkflowRow::into_workflow)
            .ok_or_else(|| StorageError::WorkflowNotFound(id.to_string()))
    }

    pub async fn list_workflows(&self, project_id: &scan_core::Id) -> Result<Vec<Workflow>> {
        let rows = sqlx::query_as::<_, WorkflowRow>(
            "SELECT * FROM workflows WHERE project_id = ?1 ORDER BY created_at",
        )
        .bind(project_id.as_ref())
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(WorkflowRow::into_workflow).collect())
    }

    pub async fn update_workflow_status(
        &self,
        id: &scan_core::Id,
        status: WorkflowStatus,
    ) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query("UPDATE workflows SET status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(now)
            .bind(id.as_ref())
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::WorkflowNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Overwrites the mutable admin-editable fields of a workflow (name,
    /// schedule, steps). Status transitions go through
    /// `update_workflow_status` instead, which is the only writer the
    /// Workflow Engine itself uses.
    pub async fn update_workflow(&self, workflow: &Workflow) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query(
            "UPDATE workflows SET name = ?1, trigger_type = ?2, steps_json = ?3,
                 schedule = ?4, updated_at = ?5 WHERE id = ?6",
        )
        .bind(&workflow.name)
        .bind(workflow.trigger_type.as_str())
        .bind(&workflow.steps_json)
        .bind(&workflow.schedule)
        .bind(now)
        .bind(workflow.id.as_ref())
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::WorkflowNotFound(workflow.id.to_string()));
        }
        Ok(())
    }

    pub async fn delete_workflow(&self, id: &scan_core::Id) -> Result<()> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?1")
            .bind(id.as_ref())
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::WorkflowNotFound(id.to_string()));
        }
        Ok(())
    }

    // --- Stages ---

    pub async fn create_stage(&self, stage: &Stage) -> Result<()> {
        sqlx::query(
            "INSERT INTO stages
                (id, workflow_id, order_idx, kind, name, target_spec, parameters_json,
                 status, max_attempts, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(stage.id.as_ref())
        .bind(stage.workflow_id.as_ref())
        .bind(stage.order)
        .bind(stage.kind.as_str())
        .bind(&stage.name)
        .bind(&stage.target_spec)
        .bind(&stage.parameters_json)
        .bind(stage.status.as_str())
        .bind(stage.max_attempts)
        .bind(stage.created_at.timestamp_millis())
        .bind(stage.updated_at.timestamp_millis())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_stage(&self, id: &scan_core::Id) -> Result<Stage> {
        sqlx::query_as::<_, StageRow>("SELECT * FROM stages WHERE id = ?1")
            .bind(id.as_ref())
            .fetch_optional(self.pool())
            .await?
            .map(StageRow::into_stage)
            .ok_or_else(|| StorageError::StageNotFound(id.to_string()))
    }

    pub async fn list_stages(&self, workflow_id: &scan_core::Id) -> Result<Vec<Stage>> {
        let rows = sqlx::query_as::<_, StageRow>(
            "SELECT * FROM stages WHERE workflow_id = ?1 ORDER BY order_idx",
        )
        .bind(workflow_id.as_ref())
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(StageRow::into_stage).collect())
    }

    pub async fn update_stage_status(&self, id: &scan_core::Id, status: StageStatus) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query("UPDATE stages SET status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(now)
            .bind(id.as_ref())
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::StageNotFound(id.to_string()));
        }
        Ok(())
    }

    // --- Tasks (Section 4.3) ---

    /// Atomically inserts tasks for one stage in `queued` state.
    pub async fn enqueue_tasks(&self, tasks: &[Task]) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        for task in tasks {
            sqlx::query(
                "INSERT INTO tasks
                    (id, stage_id, project_id, target_type, target_value, params_json,
                     status, attempts, last_error, assigned_agent_id, claim_deadline,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            )
            .bind(task.id.as_ref())
            .bind(task.stage_id.as_ref())
            .bind(task.project_id.as_ref())
            .bind(task.target_type.as_str())
            .bind(&task.target_value)
            .bind(&task.params_json)
            .bind(task.status.as_str())
            .bind(task.attempts)
            .bind(&task.last_error)
            .bind(task.assigned_agent_id.as_ref().map(|id| id.as_ref()))
            .bind(task.claim_deadline.map(|d| d.timestamp_millis()))
            .bind(task.created_at.timestamp_millis())
            .bind(task.updated_at.timestamp_millis())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Selects up to `limit` queued tasks whose stage kind is in `capabilities`,
    /// flips them to `claimed`. One transaction per call makes concurrent
    /// claimers serialize on SQLite's writer lock, so no task is ever
    /// returned to two callers (Section 8, claim-exclusivity property).
    pub async fn claim_tasks(
        &self,
        agent_id: &scan_core::Id,
        capabilities: &BTreeSet<ResultType>,
        limit: u32,
        lease_duration_secs: u64,
    ) -> Result<Vec<Task>> {
        if capabilities.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut tx = self.pool().begin().await?;

        let mut builder = sqlx::QueryBuilder::new(
            "SELECT t.* FROM tasks t JOIN stages s ON s.id = t.stage_id \
             WHERE t.status = 'queued' AND s.kind IN (",
        );
        let mut separated = builder.separated(", ");
        for kind in capabilities {
            separated.push_bind(kind.as_str());
        }
        separated.push_unseparated(") ORDER BY t.created_at LIMIT ");
        builder.push_bind(limit as i64);

        let candidates = builder
            .build_query_as::<TaskRow>()
            .fetch_all(&mut *tx)
            .await?;

        let now = Utc::now();
        let deadline = now + chrono::Duration::seconds(lease_duration_secs as i64);
        let mut claimed = Vec::with_capacity(candidates.len());

        for row in candidates {
            let result = sqlx::query(
                "UPDATE tasks SET status = 'claimed', assigned_agent_id = ?1,
                     claim_deadline = ?2, updated_at = ?3
                 WHERE id = ?4 AND status = 'queued'",
            )
            .bind(agent_id.as_ref())
            .bind(deadline.timestamp_millis())
            .bind(now.timestamp_millis())
            .bind(&row.id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 1 {
                let mut task = row.into_task();
                task.status = TaskStatus::Claimed;
                task.assigned_agent_id = Some(agent_id.clone());
                task.claim_deadline = Some(deadline);
                task.updated_at = now;
                claimed.push(task);
            }
        }

        tx.commit().await?;
        Ok(claimed)
    }

    /// Administrative cancellation, bypassing lease ownership (used by
    /// `stopWorkflow`; Section 4.6). No-op on tasks already terminal.
    pub async fn cancel_task(&self, task_id: &scan_core::Id) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            "UPDATE tasks SET status = 'cancelled', updated_at = ?1
             WHERE id = ?2 AND status NOT IN ('succeeded', 'failed', 'cancelled')",
        )
        .bind(now)
        .bind(task_id.as_ref())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Validates and applies a status transition reported by an agent.
    /// Rejects reports against a task whose lease has expired or that is
    /// already in a terminal state (Section 4.5 failure model).
    pub async fn report_task_status(
        &self,
        task_id: &scan_core::Id,
        agent_id: &scan_core::Id,
        new_status: TaskStatus,
        error: Option<&str>,
    ) -> Result<Task> {
        let task = self.get_task(task_id).await?;

        if task.status.is_terminal() {
            return Err(StorageError::TaskNotFound(format!(
                "{task_id} already terminal"
            )));
        }
        if task.assigned_agent_id.as_ref() != Some(agent_id) {
            return Err(StorageError::TaskNotFound(format!(
                "{task_id} not leased to {agent_id}"
            )));
        }
        if let Some(deadline) = task.claim_deadline {
            if deadline < Utc::now() {
                return Err(StorageError::TaskNotFound(format!(
                    "{task_id} lease expired"
                )));
            }
        }

        let now = Utc::now();
        sqlx::query(
            "UPDATE tasks SET status = ?1, attempts = attempts + 1, last_error = ?2, updated_at = ?3 WHERE id = ?4",
        )
        .bind(new_status.as_str())
        .bind(error)
        .bind(now.timestamp_millis())
        .bind(task_id.as_ref())
        .execute(self.pool())
        .await?;

        self.get_task(task_id).await
    }

    pub async fn get_task(&self, id: &scan_core::Id) -> Result<Task> {
        sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE id = ?1")
            .bind(id.as_ref())
            .fetch_optional(self.pool())
            .await?
            .map(TaskRow::into_task)
            .ok_or_else(|| StorageError::TaskNotFound(id.to_string()))
    }

    pub async fn list_tasks_for_stage(&self, stage_id: &scan_core::Id) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM tasks WHERE stage_id = ?1 ORDER BY created_at",
        )
        .bind(stage_id.as_ref())
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(TaskRow::into_task).collect())
    }

    /// Returns claimed tasks whose deadline is strictly past to `queued`,
    /// bumping the attempt counter. A task that has now exceeded
    /// `max_attempts` is marked `failed` instead (Section 4.3, 4.5).
    pub async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM tasks WHERE status = 'claimed' AND claim_deadline < ?1",
        )
        .bind(now.timestamp_millis())
        .fetch_all(self.pool())
        .await?;

        let mut reclaimed = Vec::with_capacity(rows.len());
        for row in rows {
            let mut task = row.into_task();
            let stage = self.get_stage(&task.stage_id).await?;
            let new_attempts = task.attempts + 1;

            let terminal = new_attempts >= stage.max_attempts;
            let new_status = if terminal {
                TaskStatus::Failed
            } else {
                TaskStatus::Queued
            };

            sqlx::query(
                "UPDATE tasks SET status = ?1, attempts = ?2, assigned_agent_id = NULL,
                     claim_deadline = NULL, last_error = ?3, updated_at = ?4
                 WHERE id = ?5",
            )
            .bind(new_status.as_str())
            .bind(new_attempts)
            .bind(terminal.then_some("max attempts exceeded after lease expiry"))
            .bind(now.timestamp_millis())
            .bind(task.id.as_ref())
            .execute(self.pool())
            .await?;

            task.status = new_status;
            task.attempts = new_attempts;
            task.assigned_agent_id = None;
            task.claim_deadline = None;
            reclaimed.push(task);
        }
        Ok(reclaimed)
    }

    // --- Agents (Section 3.3: self-registered, expire on missed heartbeats) ---

    pub async fn upsert_agent(&self, agent: &Agent) -> Result<()> {
        let capabilities_json = serde_json::to_string(
            &agent
                .capabilities
                .iter()
                .map(|k| k.as_str())
                .collect::<Vec<_>>(),
        )?;
        sqlx::query(
            "INSERT INTO agents (id, name, capabilities_json, version, status, last_heartbeat, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                capabilities_json = excluded.capabilities_json,
                version = excluded.version,
                status = excluded.status,
                last_heartbeat = excluded.last_heartbeat",
        )
        .bind(agent.id.as_ref())
        .bind(&agent.name)
        .bind(&capabilities_json)
        .bind(&agent.version)
        .bind(agent.status.as_str())
        .bind(agent.last_heartbeat.timestamp_millis())
        .bind(agent.created_at.timestamp_millis())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_agent(&self, id: &scan_core::Id) -> Result<Agent> {
        sqlx::query_as::<_, AgentRow>("SELECT * FROM agents WHERE id = ?1")
            .bind(id.as_ref())
            .fetch_optional(self.pool())
            .await?
            .map(AgentRow::into_agent)
            .transpose()?
            .ok_or_else(|| StorageError::AgentNotFound(id.to_string()))
    }

    pub async fn record_heartbeat(&self, id: &scan_core::Id, status: AgentStatus) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let result =
            sqlx::query("UPDATE agents SET status = ?1, last_heartbeat = ?2 WHERE id = ?3")
                .bind(status.as_str())
                .bind(now)
                .bind(id.as_ref())
                .execute(self.pool())
                .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::AgentNotFound(id.to_string()));
        }
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: String,
    name: String,
    status: String,
    owner: String,
    created_at: i64,
    updated_at: i64,
}

impl ProjectRow {
    fn into_project(self) -> Project {
        Project {
            id: scan_core::Id::from_string(self.id),
            name: self.name,
            status: ProjectStatus::parse(&self.status).unwrap_or(ProjectStatus::Draft),
            owner: self.owner,
            created_at: DateTime::from_timestamp_millis(self.created_at).unwrap_or_default(),
            updated_at: DateTime::from_timestamp_millis(self.updated_at).unwrap_or_default(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct WorkflowRow {
    id: String,
    project_id: String,
    name: String,
    status: String,
    trigger_type: String,
    steps_json: String,
    schedule: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl WorkflowRow {
    fn into_workflow(self) -> Workflow {
        Workflow {
            id: scan_core::Id::from_string(self.id),
            project_id: scan_core::Id::from_string(self.project_id),
            name: self.name,
            status: WorkflowStatus::parse(&self.status).unwrap_or(WorkflowStatus::Draft),
            trigger_type: TriggerType::parse(&self.trigger_type).unwrap_or(TriggerType::Manual),
            steps_json: self.steps_json,
            schedule: self.schedule,
            created_at: DateTime::from_timestamp_millis(self.created_at).unwrap_or_default(),
            updated_at: DateTime::from_timestamp_millis(self.updated_at).unwrap_or_default(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct StageRow {
    id: String,
    workflow_id: String,
    order_idx: i64,
    kind: String,
    name: String,
    target_spec: String,
    parameters_json: String,
    status: String,
    max_attempts: i64,
    created_at: i64,
    updated_at: i64,
}

impl StageRow {
    fn into_stage(self) -> Stage {
        Stage {
            id: scan_core::Id::from_string(self.id),
            workflow_id: scan_core::Id::from_string(self.workflow_id),
            order: self.order_idx,
            kind: ResultType::parse(&self.kind).unwrap_or(ResultType::OtherScan),
            name: self.name,
            target_spec: self.target_spec,
            parameters_json: self.parameters_json,
            status: StageStatus::parse(&self.status).unwrap_or(StageStatus::Pending),
            max_attempts: self.max_attempts as u32,
            created_at: DateTime::from_timestamp_millis(self.created_at).unwrap_or_default(),
            updated_at: DateTime::from_timestamp_millis(self.updated_at).unwrap_or_default(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    stage_id: String,
    project_id: String,
    target_type: String,
    target_value: String,
    params_json: String,
    status: String,
    attempts: i64,
    last_error: Option<String>,
    assigned_agent_id: Option<String>,
    claim_deadline: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl TaskRow {
    fn into_task(self) -> Task {
        Task {
            id: scan_core::Id::from_string(self.id),
            stage_id: scan_core::Id::from_string(self.stage_id),
            project_id: scan_core::Id::from_string(self.project_id),
            target_type: TargetType::parse(&self.target_type).unwrap_or(TargetType::Ip),
            target_value: self.target_value,
            params_json: self.params_json,
            status: TaskStatus::parse(&self.status).unwrap_or(TaskStatus::Queued),
            attempts: self.attempts as u32,
            last_error: self.last_error,
            assigned_agent_id: self.assigned_agent_id.map(scan_core::Id::from_string),
            claim_deadline: self.claim_deadline.and_then(DateTime::from_timestamp_millis),
            created_at: DateTime::from_timestamp_millis(self.created_at).unwrap_or_default(),
            updated_at: DateTime::from_timestamp_millis(self.updated_at).unwrap_or_default(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct AgentRow {
    id: String,
    name: String,
    capabilities_json: String,
    version: String,
    status: String,
    last_heartbeat: i64,
    created_at: i64,
}

impl AgentRow {
    fn into_agent(self) -> std::result::Result<Agent, serde_json::Error> {
        let kinds: Vec<String> = serde_json::from_str(&self.capabilities_json)?;
        let capabilities = kinds.iter().filter_map(|k| ResultType::parse(k)).collect();
        Ok(Agent {
            id: scan_core::Id::from_string(self.id),
            name: self.name,
            capabilities,
            version: self.version,
            status: AgentStatus::parse(&self.status).unwrap_or(AgentStatus::Offline),
            last_heartbeat: DateTime::from_timestamp_millis(self.last_heartbeat).unwrap_or_default(),
            created_at: DateTime::from_timestamp_millis(self.created_at).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::TestStorage;
    use super::*;
    use scan_core::Id;
    use std::collections::BTreeSet;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    async fn seed_stage(storage: &Storage, kind: ResultType, max_attempts: u32) -> (Stage, Id) {
        let project = Project {
            id: Id::new(),
            name: "proj".into(),
            status: ProjectStatus::Active,
            owner: "tester".into(),
            created_at: now(),
            updated_at: now(),
        };
        storage.create_project(&project).await.unwrap();

        let workflow = Workflow {
            id: Id::new(),
            project_id: project.id.clone(),
            name: "wf".into(),
            status: WorkflowStatus::Active,
            trigger_type: TriggerType::Manual,
            steps_json: "{}".into(),
            schedule: None,
            created_at: now(),
            updated_at: now(),
        };
        storage.create_workflow(&workflow).await.unwrap();

        let stage = Stage {
            id: Id::new(),
            workflow_id: workflow.id.clone(),
            order: 0,
            kind,
            name: "stage".into(),
            target_spec: "10.0.0.0/30".into(),
            parameters_json: "{}".into(),
            status: StageStatus::Running,
            max_attempts,
            created_at: now(),
            updated_at: now(),
        };
        storage.create_stage(&stage).await.unwrap();
        (stage, project.id)
    }

    fn new_task(stage: &Stage, project_id: &Id) -> Task {
        Task {
            id: Id::new(),
            stage_id: stage.id.clone(),
            project_id: project_id.clone(),
            target_type: TargetType::Ip,
            target_value: "10.0.0.1".into(),
            params_json: "{}".into(),
            status: TaskStatus::Queued,
            attempts: 0,
            last_error: None,
            assigned_agent_id: None,
            claim_deadline: None,
            created_at: now(),
            updated_at: now(),
        }
    }

    #[tokio::test]
    async fn claim_tasks_is_exclusive_and_sets_deadline() {
        let ts = TestStorage::new().await;
        let storage = &ts.storage;
        let (stage, project_id) = seed_stage(storage, ResultType::IpAlive, 3).await;
        let task = new_task(&stage, &project_id);
        storage.enqueue_tasks(&[task.clone()]).await.unwrap();

        let mut caps = BTreeSet::new();
        caps.insert(ResultType::IpAlive);

        let agent_a = Id::new();
        let agent_b = Id::new();
        let claimed_a = storage.claim_tasks(&agent_a, &caps, 10, 300).await.unwrap();
        let claimed_b = storage.claim_tasks(&agent_b, &caps, 10, 300).await.unwrap();

        assert_eq!(claimed_a.len(), 1);
        assert_eq!(claimed_b.len(), 0);
        assert_eq!(claimed_a[0].status, TaskStatus::Claimed);
        assert!(claimed_a[0].claim_deadline.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn reclaim_expired_requeues_until_max_attempts() {
        let ts = TestStorage::new().await;
        let storage = &ts.storage;
        let (stage, project_id) = seed_stage(storage, ResultType::IpAlive, 1).await;
        let task = new_task(&stage, &project_id);
        storage.enqueue_tasks(&[task.clone()]).await.unwrap();

        let mut caps = BTreeSet::new();
        caps.insert(ResultType::IpAlive);
        let agent = Id::new();
        storage.claim_tasks(&agent, &caps, 10, 0).await.unwrap();

        let reclaimed = storage
            .reclaim_expired(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();

        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].status, TaskStatus::Failed);
        assert_eq!(reclaimed[0].attempts, 1);
    }

    #[tokio::test]
    async fn report_task_status_rejects_wrong_agent() {
        let ts = TestStorage::new().await;
        let storage = &ts.storage;
        let (stage, project_id) = seed_stage(storage, ResultType::IpAlive, 3).await;
        let task = new_task(&stage, &project_id);
        storage.enqueue_tasks(&[task.clone()]).await.unwrap();

        let mut caps = BTreeSet::new();
        caps.insert(ResultType::IpAlive);
        let agent_a = Id::new();
        let claimed = storage.claim_tasks(&agent_a, &caps, 10, 300).await.unwrap();
        let task_id = &claimed[0].id;

        let agent_b = Id::new();
        let result = storage
            .report_task_status(task_id, &agent_b, TaskStatus::Succeeded, None)
            .await;
        assert!(result.is_err());
    }
}
