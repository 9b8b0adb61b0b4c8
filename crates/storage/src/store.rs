use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use flotilla_common::{
    DashboardTask, Host, NetworkTopologyRecord, Result, StackRecord, TaskFilter, TaskStatus,
    VolumeTopologyRecord,
};

/// CRUD surface over the persistent fleet state.
///
/// All methods take effect independently; there are no long-lived
/// transactions across command round-trips.
#[async_trait]
pub trait FleetStore: Send + Sync {
    // --- Hosts ---

    async fn list_hosts(&self) -> Result<Vec<Host>>;

    async fn get_host(&self, id: Uuid) -> Result<Option<Host>>;

    async fn upsert_host(&self, host: &Host) -> Result<()>;

    /// Heartbeat bookkeeping: stamp `last_seen` and set the status string.
    async fn touch_host(&self, id: Uuid, last_seen: DateTime<Utc>, status: &str) -> Result<()>;

    async fn set_host_status(&self, id: Uuid, status: &str) -> Result<()>;

    /// Host count per status string, for the summary read-through.
    async fn host_status_counts(&self) -> Result<Vec<(String, i64)>>;

    // --- Dashboard tasks ---

    async fn insert_task(&self, task: &DashboardTask) -> Result<()>;

    /// Full-row update keyed by `task.id`.
    async fn update_task(&self, task: &DashboardTask) -> Result<()>;

    async fn get_task(&self, id: Uuid) -> Result<Option<DashboardTask>>;

    /// Filtered list sorted severity desc then `created_at` desc, plus the
    /// unlimited total count.
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<(Vec<DashboardTask>, i64)>;

    /// Latest system row with this fingerprint still in an active status.
    async fn latest_active_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<DashboardTask>>;

    /// Active system rows for a host restricted to the given task types.
    async fn active_system_tasks_for_host(
        &self,
        host_id: Uuid,
        task_types: &[&str],
    ) -> Result<Vec<DashboardTask>>;

    /// Transition every active system row with this fingerprint to
    /// `target_status`, stamping `resolved_at`. Returns rows affected.
    async fn resolve_by_fingerprint(
        &self,
        fingerprint: &str,
        target_status: TaskStatus,
        resolved_at: DateTime<Utc>,
    ) -> Result<u64>;

    async fn delete_task(&self, id: Uuid) -> Result<bool>;

    // --- Topology snapshots ---

    async fn upsert_network_topology(&self, record: &NetworkTopologyRecord) -> Result<()>;

    async fn upsert_volume_topology(&self, record: &VolumeTopologyRecord) -> Result<()>;

    async fn network_topology(&self, host_id: Uuid) -> Result<Vec<NetworkTopologyRecord>>;

    async fn volume_topology(&self, host_id: Uuid) -> Result<Vec<VolumeTopologyRecord>>;

    /// Drop all topology rows for a decommissioned host. Returns rows removed.
    async fn purge_host_topology(&self, host_id: Uuid) -> Result<u64>;

    // --- Stacks ---

    async fn upsert_stack(&self, record: &StackRecord) -> Result<()>;

    async fn count_stacks(&self) -> Result<i64>;
}
