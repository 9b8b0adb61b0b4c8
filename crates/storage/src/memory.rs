//! In-memory `FleetStore` used by DEV mode and the test suites.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use flotilla_common::{
    DashboardTask, Host, NetworkTopologyRecord, Result, StackRecord, TaskFilter, TaskSource,
    TaskStatus, VolumeTopologyRecord,
};

use crate::store::FleetStore;

#[derive(Default)]
struct Inner {
    hosts: HashMap<Uuid, Host>,
    tasks: HashMap<Uuid, DashboardTask>,
    networks: HashMap<(Uuid, String), NetworkTopologyRecord>,
    volumes: HashMap<(Uuid, String), VolumeTopologyRecord>,
    stacks: HashMap<(Uuid, String), StackRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sort_tasks(tasks: &mut [DashboardTask]) {
    tasks.sort_by(|a, b| {
        b.severity
            .rank()
            .cmp(&a.severity.rank())
            .then(b.created_at.cmp(&a.created_at))
    });
}

fn matches(task: &DashboardTask, filter: &TaskFilter) -> bool {
    filter.status.map_or(true, |s| task.status == s)
        && filter.severity.map_or(true, |s| task.severity == s)
        && filter.source.map_or(true, |s| task.source == s)
}

#[async_trait]
impl FleetStore for MemoryStore {
    async fn list_hosts(&self) -> Result<Vec<Host>> {
        let inner = self.inner.read().await;
        let mut hosts: Vec<Host> = inner.hosts.values().cloned().collect();
        hosts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(hosts)
    }

    async fn get_host(&self, id: Uuid) -> Result<Option<Host>> {
        Ok(self.inner.read().await.hosts.get(&id).cloned())
    }

    async fn upsert_host(&self, host: &Host) -> Result<()> {
        self.inner.write().await.hosts.insert(host.id, host.clone());
        Ok(())
    }

    async fn touch_host(&self, id: Uuid, last_seen: DateTime<Utc>, status: &str) -> Result<()> {
        if let Some(host) = self.inner.write().await.hosts.get_mut(&id) {
            host.last_seen = Some(last_seen);
            host.status = status.to_string();
        }
        Ok(())
    }

    async fn set_host_status(&self, id: Uuid, status: &str) -> Result<()> {
        if let Some(host) = self.inner.write().await.hosts.get_mut(&id) {
            host.status = status.to_string();
        }
        Ok(())
    }

    async fn host_status_counts(&self) -> Result<Vec<(String, i64)>> {
        let inner = self.inner.read().await;
        let mut counts: HashMap<String, i64> = HashMap::new();
        for host in inner.hosts.values() {
            *counts.entry(host.status.clone()).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn insert_task(&self, task: &DashboardTask) -> Result<()> {
        self.inner.write().await.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn update_task(&self, task: &DashboardTask) -> Result<()> {
        self.inner.write().await.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<DashboardTask>> {
        Ok(self.inner.read().await.tasks.get(&id).cloned())
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<(Vec<DashboardTask>, i64)> {
        let inner = self.inner.read().await;
        let mut rows: Vec<DashboardTask> = inner
            .tasks
            .values()
            .filter(|t| matches(t, filter))
            .cloned()
            .collect();
        let total = rows.len() as i64;
        sort_tasks(&mut rows);
        rows.truncate(filter.effective_limit() as usize);
        Ok((rows, total))
    }

    async fn latest_active_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<DashboardTask>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tasks
            .values()
            .filter(|t| {
                t.source == TaskSource::System
                    && t.status.is_active()
                    && t.fingerprint.as_deref() == Some(fingerprint)
            })
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    async fn active_system_tasks_for_host(
        &self,
        host_id: Uuid,
        task_types: &[&str],
    ) -> Result<Vec<DashboardTask>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tasks
            .values()
            .filter(|t| {
                t.source == TaskSource::System
                    && t.status.is_active()
                    && t.host_id == Some(host_id)
                    && task_types.contains(&t.task_type.as_str())
            })
            .cloned()
            .collect())
    }

    async fn resolve_by_fingerprint(
        &self,
        fingerprint: &str,
        target_status: TaskStatus,
        resolved_at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let mut affected = 0;
        for task in inner.tasks.values_mut() {
            if task.source == TaskSource::System
                && task.status.is_active()
                && task.fingerprint.as_deref() == Some(fingerprint)
            {
                task.status = target_status;
                task.resolved_at = Some(resolved_at);
                task.resolved_by = None;
                task.acknowledged_at = None;
                task.acknowledged_by = None;
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn delete_task(&self, id: Uuid) -> Result<bool> {
        Ok(self.inner.write().await.tasks.remove(&id).is_some())
    }

    async fn upsert_network_topology(&self, record: &NetworkTopologyRecord) -> Result<()> {
        self.inner
            .write()
            .await
            .networks
            .insert((record.host_id, record.network_id.clone()), record.clone());
        Ok(())
    }

    async fn upsert_volume_topology(&self, record: &VolumeTopologyRecord) -> Result<()> {
        self.inner
            .write()
            .await
            .volumes
            .insert((record.host_id, record.volume_name.clone()), record.clone());
        Ok(())
    }

    async fn network_topology(&self, host_id: Uuid) -> Result<Vec<NetworkTopologyRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .networks
            .values()
            .filter(|r| r.host_id == host_id)
            .cloned()
            .collect())
    }

    async fn volume_topology(&self, host_id: Uuid) -> Result<Vec<VolumeTopologyRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .volumes
            .values()
            .filter(|r| r.host_id == host_id)
            .cloned()
            .collect())
    }

    async fn purge_host_topology(&self, host_id: Uuid) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let before = inner.networks.len() + inner.volumes.len();
        inner.networks.retain(|(h, _), _| *h != host_id);
        inner.volumes.retain(|(h, _), _| *h != host_id);
        Ok((before - inner.networks.len() - inner.volumes.len()) as u64)
    }

    async fn upsert_stack(&self, record: &StackRecord) -> Result<()> {
        self.inner
            .write()
            .await
            .stacks
            .insert((record.host_id, record.name.clone()), record.clone());
        Ok(())
    }

    async fn count_stacks(&self) -> Result<i64> {
        Ok(self.inner.read().await.stacks.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_common::{TaskSeverity, TaskSource};

    fn task(fingerprint: &str, severity: TaskSeverity, created_at: DateTime<Utc>) -> DashboardTask {
        DashboardTask {
            id: Uuid::new_v4(),
            title: fingerprint.to_string(),
            description: String::new(),
            severity,
            status: TaskStatus::Open,
            source: TaskSource::System,
            category: "health".into(),
            task_type: "test".into(),
            fingerprint: Some(fingerprint.to_string()),
            metadata: serde_json::Value::Null,
            host_id: None,
            stack_id: None,
            container_id: None,
            due_at: None,
            snoozed_until: None,
            created_at,
            created_by: None,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
        }
    }

    #[tokio::test]
    async fn list_sorts_by_severity_then_recency() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let old_critical = task("a", TaskSeverity::Critical, now - chrono::Duration::hours(1));
        let new_info = task("b", TaskSeverity::Info, now);
        let new_warning = task("c", TaskSeverity::Warning, now);
        for t in [&old_critical, &new_info, &new_warning] {
            store.insert_task(t).await.unwrap();
        }

        let (rows, total) = store.list_tasks(&TaskFilter::default()).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(rows[0].id, old_critical.id);
        assert_eq!(rows[1].id, new_warning.id);
        assert_eq!(rows[2].id, new_info.id);
    }

    #[tokio::test]
    async fn resolve_by_fingerprint_touches_all_active_rows() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert_task(&task("fp", TaskSeverity::Info, now)).await.unwrap();
        store
            .insert_task(&task("fp", TaskSeverity::Warning, now))
            .await
            .unwrap();
        store
            .insert_task(&task("other", TaskSeverity::Info, now))
            .await
            .unwrap();

        let affected = store
            .resolve_by_fingerprint("fp", TaskStatus::Resolved, now)
            .await
            .unwrap();
        assert_eq!(affected, 2);
        assert!(store
            .latest_active_by_fingerprint("fp")
            .await
            .unwrap()
            .is_none());
        assert!(store
            .latest_active_by_fingerprint("other")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn topology_upsert_replaces_on_key() {
        let store = MemoryStore::new();
        let host = Uuid::new_v4();
        let t1 = Utc::now();
        let record = NetworkTopologyRecord {
            host_id: host,
            network_id: "n1".into(),
            snapshot: serde_json::json!({"driver": "bridge"}),
            refreshed_at: t1,
        };
        store.upsert_network_topology(&record).await.unwrap();
        let t2 = t1 + chrono::Duration::minutes(1);
        store
            .upsert_network_topology(&NetworkTopologyRecord {
                refreshed_at: t2,
                ..record.clone()
            })
            .await
            .unwrap();

        let rows = store.network_topology(host).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].refreshed_at, t2);
    }
}
