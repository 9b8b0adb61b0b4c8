//! Postgres-backed `FleetStore`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use flotilla_common::{
    DashboardTask, FleetError, Host, NetworkTopologyRecord, Result, StackRecord, TaskFilter,
    TaskSeverity, TaskSource, TaskStatus, VolumeTopologyRecord,
};

use crate::store::FleetStore;

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(FleetError::persistence)?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(FleetError::persistence)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const TASK_COLUMNS: &str = "id, title, description, severity, status, source, category, \
     task_type, fingerprint, metadata, host_id, stack_id, container_id, due_at, \
     snoozed_until, created_at, created_by, acknowledged_at, acknowledged_by, \
     resolved_at, resolved_by";

fn task_from_row(row: &PgRow) -> Result<DashboardTask> {
    let severity: String = row.try_get("severity").map_err(FleetError::persistence)?;
    let status: String = row.try_get("status").map_err(FleetError::persistence)?;
    let source: String = row.try_get("source").map_err(FleetError::persistence)?;
    Ok(DashboardTask {
        id: row.try_get("id").map_err(FleetError::persistence)?,
        title: row.try_get("title").map_err(FleetError::persistence)?,
        description: row
            .try_get("description")
            .map_err(FleetError::persistence)?,
        severity: TaskSeverity::normalize(&severity),
        status: TaskStatus::normalize(&status).unwrap_or(TaskStatus::Open),
        source: if source == "manual" {
            TaskSource::Manual
        } else {
            TaskSource::System
        },
        category: row.try_get("category").map_err(FleetError::persistence)?,
        task_type: row.try_get("task_type").map_err(FleetError::persistence)?,
        fingerprint: row
            .try_get("fingerprint")
            .map_err(FleetError::persistence)?,
        metadata: row.try_get("metadata").map_err(FleetError::persistence)?,
        host_id: row.try_get("host_id").map_err(FleetError::persistence)?,
        stack_id: row.try_get("stack_id").map_err(FleetError::persistence)?,
        container_id: row
            .try_get("container_id")
            .map_err(FleetError::persistence)?,
        due_at: row.try_get("due_at").map_err(FleetError::persistence)?,
        snoozed_until: row
            .try_get("snoozed_until")
            .map_err(FleetError::persistence)?,
        created_at: row.try_get("created_at").map_err(FleetError::persistence)?,
        created_by: row.try_get("created_by").map_err(FleetError::persistence)?,
        acknowledged_at: row
            .try_get("acknowledged_at")
            .map_err(FleetError::persistence)?,
        acknowledged_by: row
            .try_get("acknowledged_by")
            .map_err(FleetError::persistence)?,
        resolved_at: row.try_get("resolved_at").map_err(FleetError::persistence)?,
        resolved_by: row.try_get("resolved_by").map_err(FleetError::persistence)?,
    })
}

fn host_from_row(row: &PgRow) -> Result<Host> {
    Ok(Host {
        id: row.try_get("id").map_err(FleetError::persistence)?,
        name: row.try_get("name").map_err(FleetError::persistence)?,
        status: row.try_get("status").map_err(FleetError::persistence)?,
        last_seen: row.try_get("last_seen").map_err(FleetError::persistence)?,
    })
}

fn push_task_filters(qb: &mut QueryBuilder<Postgres>, filter: &TaskFilter) {
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(severity) = filter.severity {
        qb.push(" AND severity = ").push_bind(severity.as_str());
    }
    if let Some(source) = filter.source {
        qb.push(" AND source = ").push_bind(source.as_str());
    }
}

#[async_trait]
impl FleetStore for PostgresStore {
    async fn list_hosts(&self) -> Result<Vec<Host>> {
        let rows = sqlx::query("SELECT id, name, status, last_seen FROM hosts ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(FleetError::persistence)?;
        rows.iter().map(host_from_row).collect()
    }

    async fn get_host(&self, id: Uuid) -> Result<Option<Host>> {
        let row = sqlx::query("SELECT id, name, status, last_seen FROM hosts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(FleetError::persistence)?;
        row.as_ref().map(host_from_row).transpose()
    }

    async fn upsert_host(&self, host: &Host) -> Result<()> {
        sqlx::query(
            "INSERT INTO hosts (id, name, status, last_seen) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET \
               name = EXCLUDED.name, status = EXCLUDED.status, last_seen = EXCLUDED.last_seen",
        )
        .bind(host.id)
        .bind(&host.name)
        .bind(&host.status)
        .bind(host.last_seen)
        .execute(&self.pool)
        .await
        .map_err(FleetError::persistence)?;
        Ok(())
    }

    async fn touch_host(&self, id: Uuid, last_seen: DateTime<Utc>, status: &str) -> Result<()> {
        sqlx::query("UPDATE hosts SET last_seen = $2, status = $3 WHERE id = $1")
            .bind(id)
            .bind(last_seen)
            .bind(status)
            .execute(&self.pool)
            .await
            .map_err(FleetError::persistence)?;
        Ok(())
    }

    async fn set_host_status(&self, id: Uuid, status: &str) -> Result<()> {
        sqlx::query("UPDATE hosts SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&self.pool)
            .await
            .map_err(FleetError::persistence)?;
        Ok(())
    }

    async fn host_status_counts(&self) -> Result<Vec<(String, i64)>> {
        sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM hosts GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(FleetError::persistence)
    }

    async fn insert_task(&self, task: &DashboardTask) -> Result<()> {
        sqlx::query(
            "INSERT INTO dashboard_tasks (id, title, description, severity, status, source, \
               category, task_type, fingerprint, metadata, host_id, stack_id, container_id, \
               due_at, snoozed_until, created_at, created_by, acknowledged_at, acknowledged_by, \
               resolved_at, resolved_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
               $17, $18, $19, $20, $21)",
        )
        .bind(task.id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.severity.as_str())
        .bind(task.status.as_str())
        .bind(task.source.as_str())
        .bind(&task.category)
        .bind(&task.task_type)
        .bind(&task.fingerprint)
        .bind(&task.metadata)
        .bind(task.host_id)
        .bind(task.stack_id)
        .bind(&task.container_id)
        .bind(task.due_at)
        .bind(task.snoozed_until)
        .bind(task.created_at)
        .bind(&task.created_by)
        .bind(task.acknowledged_at)
        .bind(&task.acknowledged_by)
        .bind(task.resolved_at)
        .bind(&task.resolved_by)
        .execute(&self.pool)
        .await
        .map_err(FleetError::persistence)?;
        Ok(())
    }

    async fn update_task(&self, task: &DashboardTask) -> Result<()> {
        sqlx::query(
            "UPDATE dashboard_tasks SET title = $2, description = $3, severity = $4, \
               status = $5, category = $6, task_type = $7, metadata = $8, host_id = $9, \
               stack_id = $10, container_id = $11, due_at = $12, snoozed_until = $13, \
               acknowledged_at = $14, acknowledged_by = $15, resolved_at = $16, \
               resolved_by = $17 \
             WHERE id = $1",
        )
        .bind(task.id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.severity.as_str())
        .bind(task.status.as_str())
        .bind(&task.category)
        .bind(&task.task_type)
        .bind(&task.metadata)
        .bind(task.host_id)
        .bind(task.stack_id)
        .bind(&task.container_id)
        .bind(task.due_at)
        .bind(task.snoozed_until)
        .bind(task.acknowledged_at)
        .bind(&task.acknowledged_by)
        .bind(task.resolved_at)
        .bind(&task.resolved_by)
        .execute(&self.pool)
        .await
        .map_err(FleetError::persistence)?;
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<DashboardTask>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM dashboard_tasks WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(FleetError::persistence)?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<(Vec<DashboardTask>, i64)> {
        let mut count_qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM dashboard_tasks WHERE 1=1");
        push_task_filters(&mut count_qb, filter);
        let total: i64 = count_qb
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(FleetError::persistence)?
            .try_get(0)
            .map_err(FleetError::persistence)?;

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {TASK_COLUMNS} FROM dashboard_tasks WHERE 1=1"
        ));
        push_task_filters(&mut qb, filter);
        qb.push(
            " ORDER BY CASE severity WHEN 'critical' THEN 3 WHEN 'warning' THEN 2 ELSE 1 END \
             DESC, created_at DESC LIMIT ",
        )
        .push_bind(filter.effective_limit());
        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(FleetError::persistence)?;
        let tasks = rows.iter().map(task_from_row).collect::<Result<Vec<_>>>()?;
        Ok((tasks, total))
    }

    async fn latest_active_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<DashboardTask>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM dashboard_tasks \
             WHERE fingerprint = $1 AND source = 'system' \
               AND status IN ('open', 'acknowledged') \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await
        .map_err(FleetError::persistence)?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn active_system_tasks_for_host(
        &self,
        host_id: Uuid,
        task_types: &[&str],
    ) -> Result<Vec<DashboardTask>> {
        let types: Vec<String> = task_types.iter().map(|t| t.to_string()).collect();
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM dashboard_tasks \
             WHERE host_id = $1 AND source = 'system' \
               AND status IN ('open', 'acknowledged') AND task_type = ANY($2)"
        ))
        .bind(host_id)
        .bind(&types)
        .fetch_all(&self.pool)
        .await
        .map_err(FleetError::persistence)?;
        rows.iter().map(task_from_row).collect()
    }

    async fn resolve_by_fingerprint(
        &self,
        fingerprint: &str,
        target_status: TaskStatus,
        resolved_at: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE dashboard_tasks SET status = $2, resolved_at = $3, resolved_by = NULL, \
               acknowledged_at = NULL, acknowledged_by = NULL \
             WHERE fingerprint = $1 AND source = 'system' \
               AND status IN ('open', 'acknowledged')",
        )
        .bind(fingerprint)
        .bind(target_status.as_str())
        .bind(resolved_at)
        .execute(&self.pool)
        .await
        .map_err(FleetError::persistence)?;
        Ok(result.rows_affected())
    }

    async fn delete_task(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM dashboard_tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(FleetError::persistence)?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_network_topology(&self, record: &NetworkTopologyRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO network_topology (host_id, network_id, snapshot, refreshed_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (host_id, network_id) DO UPDATE SET \
               snapshot = EXCLUDED.snapshot, refreshed_at = EXCLUDED.refreshed_at",
        )
        .bind(record.host_id)
        .bind(&record.network_id)
        .bind(&record.snapshot)
        .bind(record.refreshed_at)
        .execute(&self.pool)
        .await
        .map_err(FleetError::persistence)?;
        Ok(())
    }

    async fn upsert_volume_topology(&self, record: &VolumeTopologyRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO volume_topology (host_id, volume_name, snapshot, refreshed_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (host_id, volume_name) DO UPDATE SET \
               snapshot = EXCLUDED.snapshot, refreshed_at = EXCLUDED.refreshed_at",
        )
        .bind(record.host_id)
        .bind(&record.volume_name)
        .bind(&record.snapshot)
        .bind(record.refreshed_at)
        .execute(&self.pool)
        .await
        .map_err(FleetError::persistence)?;
        Ok(())
    }

    async fn network_topology(&self, host_id: Uuid) -> Result<Vec<NetworkTopologyRecord>> {
        let rows = sqlx::query_as::<_, (Uuid, String, serde_json::Value, DateTime<Utc>)>(
            "SELECT host_id, network_id, snapshot, refreshed_at FROM network_topology \
             WHERE host_id = $1",
        )
        .bind(host_id)
        .fetch_all(&self.pool)
        .await
        .map_err(FleetError::persistence)?;
        Ok(rows
            .into_iter()
            .map(
                |(host_id, network_id, snapshot, refreshed_at)| NetworkTopologyRecord {
                    host_id,
                    network_id,
                    snapshot,
                    refreshed_at,
                },
            )
            .collect())
    }

    async fn volume_topology(&self, host_id: Uuid) -> Result<Vec<VolumeTopologyRecord>> {
        let rows = sqlx::query_as::<_, (Uuid, String, serde_json::Value, DateTime<Utc>)>(
            "SELECT host_id, volume_name, snapshot, refreshed_at FROM volume_topology \
             WHERE host_id = $1",
        )
        .bind(host_id)
        .fetch_all(&self.pool)
        .await
        .map_err(FleetError::persistence)?;
        Ok(rows
            .into_iter()
            .map(
                |(host_id, volume_name, snapshot, refreshed_at)| VolumeTopologyRecord {
                    host_id,
                    volume_name,
                    snapshot,
                    refreshed_at,
                },
            )
            .collect())
    }

    async fn purge_host_topology(&self, host_id: Uuid) -> Result<u64> {
        let networks = sqlx::query("DELETE FROM network_topology WHERE host_id = $1")
            .bind(host_id)
            .execute(&self.pool)
            .await
            .map_err(FleetError::persistence)?;
        let volumes = sqlx::query("DELETE FROM volume_topology WHERE host_id = $1")
            .bind(host_id)
            .execute(&self.pool)
            .await
            .map_err(FleetError::persistence)?;
        Ok(networks.rows_affected() + volumes.rows_affected())
    }

    async fn upsert_stack(&self, record: &StackRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO stacks (host_id, name, status, managed, updated_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (host_id, name) DO UPDATE SET \
               status = EXCLUDED.status, managed = EXCLUDED.managed, \
               updated_at = EXCLUDED.updated_at",
        )
        .bind(record.host_id)
        .bind(&record.name)
        .bind(&record.status)
        .bind(record.managed)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(FleetError::persistence)?;
        Ok(())
    }

    async fn count_stacks(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) FROM stacks")
            .fetch_one(&self.pool)
            .await
            .map_err(FleetError::persistence)?;
        row.try_get(0).map_err(FleetError::persistence)
    }
}
