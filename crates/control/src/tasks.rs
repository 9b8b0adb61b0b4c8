//! Transactional facade over dashboard task rows plus the in-memory
//! fleet summary cache.
//!
//! System tasks are keyed by fingerprint: at most one row per fingerprint
//! is ever in an active status, new observations update that row, and a
//! fingerprint that stops being observed resolves it. Manual tasks never
//! transition automatically.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use flotilla_common::{
    DashboardTask, FleetError, HOST_STATUS_ERROR, HOST_STATUS_ONLINE, NewManualTask, Result,
    Summary, SystemTaskSpec, TaskFilter, TaskPatch, TaskSeverity, TaskSource, TaskStatus,
};
use flotilla_storage::FleetStore;

pub struct TaskManager {
    store: Arc<dyn FleetStore>,
    summary: RwLock<Summary>,
}

impl TaskManager {
    pub fn new(store: Arc<dyn FleetStore>) -> Self {
        Self {
            store,
            summary: RwLock::new(Summary::default()),
        }
    }

    // --- Manual lifecycle ---

    /// Create an operator-owned task. Status starts `open`; unknown
    /// severities normalise to `info`.
    pub async fn create_manual_task(&self, input: NewManualTask) -> Result<DashboardTask> {
        let title = input.title.trim();
        if title.is_empty() {
            return Err(FleetError::validation("task title must not be empty"));
        }
        let severity = input
            .severity
            .as_deref()
            .map(TaskSeverity::normalize)
            .unwrap_or(TaskSeverity::Info);

        let task = DashboardTask {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: input.description,
            severity,
            status: TaskStatus::Open,
            source: TaskSource::Manual,
            category: input.category.unwrap_or_default(),
            task_type: input.task_type.unwrap_or_else(|| "manual".to_string()),
            fingerprint: None,
            metadata: input.metadata.unwrap_or(serde_json::Value::Null),
            host_id: input.host_id,
            stack_id: input.stack_id,
            container_id: input.container_id,
            due_at: input.due_at,
            snoozed_until: None,
            created_at: Utc::now(),
            created_by: input.created_by,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
        };
        self.store.insert_task(&task).await?;
        Ok(task)
    }

    /// Partial field update, manual tasks only.
    pub async fn update_task(&self, id: Uuid, patch: TaskPatch) -> Result<DashboardTask> {
        let mut task = self.get_task(id).await?;
        if task.source != TaskSource::Manual {
            return Err(FleetError::validation(
                "system tasks are updated by their producers, not by hand",
            ));
        }
        if let Some(title) = patch.title {
            let title = title.trim().to_string();
            if title.is_empty() {
                return Err(FleetError::validation("task title must not be empty"));
            }
            task.title = title;
        }
        if let Some(description) = patch.description {
            task.description = description;
        }
        if let Some(severity) = patch.severity {
            task.severity = TaskSeverity::normalize(&severity);
        }
        if let Some(category) = patch.category {
            task.category = category;
        }
        if let Some(metadata) = patch.metadata {
            task.metadata = metadata;
        }
        if patch.due_at.is_some() {
            task.due_at = patch.due_at;
        }
        if patch.snoozed_until.is_some() {
            task.snoozed_until = patch.snoozed_until;
        }
        self.store.update_task(&task).await?;
        Ok(task)
    }

    /// Operator status transition with audit stamping.
    pub async fn update_task_status(
        &self,
        id: Uuid,
        status: &str,
        actor: Option<&str>,
    ) -> Result<DashboardTask> {
        let target = TaskStatus::normalize(status)
            .ok_or_else(|| FleetError::validation(format!("unknown task status: {status:?}")))?;
        let mut task = self.get_task(id).await?;
        if task.status == target {
            return Ok(task);
        }
        apply_transition(&mut task, target, actor);
        self.store.update_task(&task).await?;
        Ok(task)
    }

    /// Delete a manual row. System rows resolve, never delete.
    pub async fn delete_task(&self, id: Uuid) -> Result<()> {
        let task = self.get_task(id).await?;
        if task.source != TaskSource::Manual {
            return Err(FleetError::validation("system tasks cannot be deleted"));
        }
        self.store.delete_task(id).await?;
        Ok(())
    }

    pub async fn get_task(&self, id: Uuid) -> Result<DashboardTask> {
        self.store
            .get_task(id)
            .await?
            .ok_or_else(|| FleetError::not_found("task", id))
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<(Vec<DashboardTask>, i64)> {
        self.store.list_tasks(filter).await
    }

    // --- System lifecycle ---

    /// Insert or update the active row for a fingerprint.
    ///
    /// An existing row keeps operator acknowledgement: severity and detail
    /// fields refresh on every observation, but an acknowledged task is
    /// never demoted back to open by automation.
    pub async fn upsert_system_task(&self, spec: SystemTaskSpec) -> Result<DashboardTask> {
        if spec.fingerprint.trim().is_empty() {
            return Err(FleetError::validation(
                "system tasks require a fingerprint",
            ));
        }

        let existing = self
            .store
            .latest_active_by_fingerprint(&spec.fingerprint)
            .await?;
        let Some(mut task) = existing else {
            let task = DashboardTask {
                id: Uuid::new_v4(),
                title: spec.title,
                description: spec.description,
                severity: spec.severity,
                status: spec.status,
                source: TaskSource::System,
                category: spec.category,
                task_type: spec.task_type,
                fingerprint: Some(spec.fingerprint),
                metadata: spec.metadata,
                host_id: spec.host_id,
                stack_id: spec.stack_id,
                container_id: spec.container_id,
                due_at: None,
                snoozed_until: None,
                created_at: Utc::now(),
                created_by: None,
                acknowledged_at: None,
                acknowledged_by: None,
                resolved_at: None,
                resolved_by: None,
            };
            self.store.insert_task(&task).await?;
            return Ok(task);
        };

        if !spec.title.is_empty() && spec.title != task.title {
            task.title = spec.title;
        }
        if !spec.description.is_empty() && spec.description != task.description {
            task.description = spec.description;
        }
        if !spec.category.is_empty() && spec.category != task.category {
            task.category = spec.category;
        }
        if !spec.task_type.is_empty() && spec.task_type != task.task_type {
            task.task_type = spec.task_type;
        }
        if !spec.metadata.is_null() && spec.metadata != task.metadata {
            task.metadata = spec.metadata;
        }
        if spec.host_id.is_some() && spec.host_id != task.host_id {
            task.host_id = spec.host_id;
        }
        if spec.stack_id.is_some() && spec.stack_id != task.stack_id {
            task.stack_id = spec.stack_id;
        }
        if spec.container_id.is_some() && spec.container_id != task.container_id {
            task.container_id = spec.container_id;
        }
        // Severity follows the latest observation even while acknowledged.
        task.severity = spec.severity;

        // Operator intent wins over automation: an acknowledged row keeps
        // its status.
        if spec.status != task.status && task.status != TaskStatus::Acknowledged {
            apply_transition(&mut task, spec.status, None);
        }

        self.store.update_task(&task).await?;
        Ok(task)
    }

    /// Resolve every active system row carrying this fingerprint. Empty
    /// fingerprints are a no-op.
    pub async fn resolve_by_fingerprint(
        &self,
        fingerprint: &str,
        target_status: Option<TaskStatus>,
    ) -> Result<u64> {
        if fingerprint.trim().is_empty() {
            return Ok(0);
        }
        let target = target_status.unwrap_or(TaskStatus::Resolved);
        let affected = self
            .store
            .resolve_by_fingerprint(fingerprint, target, Utc::now())
            .await?;
        if affected > 0 {
            debug!(fingerprint, affected, "resolved system tasks");
        }
        Ok(affected)
    }

    // --- Summary cache ---

    /// Copy of the current summary snapshot.
    pub async fn get_summary(&self) -> Summary {
        self.summary.read().await.clone()
    }

    /// Atomically replace the summary. The scanner is the single writer.
    pub async fn update_summary(&self, summary: Summary) {
        *self.summary.write().await = summary;
    }

    /// Read-through: compute the summary from the store when the cache has
    /// never been written, otherwise return the cached copy.
    pub async fn refresh_summary(&self) -> Result<Summary> {
        {
            let cached = self.summary.read().await;
            if cached.updated_at.is_some() {
                return Ok(cached.clone());
            }
        }

        let mut summary = Summary {
            updated_at: Some(Utc::now()),
            ..Default::default()
        };
        for (status, count) in self.store.host_status_counts().await? {
            summary.hosts_total += count;
            if status == HOST_STATUS_ONLINE {
                summary.hosts_online += count;
            }
            if status == HOST_STATUS_ERROR {
                summary.hosts_error += count;
            }
        }
        summary.hosts_offline = (summary.hosts_total - summary.hosts_online).max(0);
        summary.stacks_total = self.store.count_stacks().await?;

        let mut cached = self.summary.write().await;
        // Another writer may have published while we were computing.
        if cached.updated_at.is_none() {
            *cached = summary.clone();
        }
        Ok(summary)
    }
}

fn apply_transition(task: &mut DashboardTask, target: TaskStatus, actor: Option<&str>) {
    task.status = target;
    match target {
        TaskStatus::Open => {
            task.acknowledged_at = None;
            task.acknowledged_by = None;
            task.resolved_at = None;
            task.resolved_by = None;
        }
        TaskStatus::Acknowledged => {
            task.acknowledged_at = Some(Utc::now());
            task.acknowledged_by = actor.map(str::to_string);
        }
        TaskStatus::Resolved | TaskStatus::Dismissed => {
            task.resolved_at = Some(Utc::now());
            task.resolved_by = actor.map(str::to_string);
            task.acknowledged_at = None;
            task.acknowledged_by = None;
        }
    }
}
