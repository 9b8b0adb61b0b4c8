//! Dashboard scanner: computes the fleet summary and emits/clears
//! fingerprint-keyed system tasks for offline hosts, unhealthy or
//! unmanaged stacks, low disk, and low memory.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use flotilla_common::protocol::actions;
use flotilla_common::util::humanize_since;
use flotilla_common::{
    ContainerListReply, DockerInfoReply, Envelope, FleetError, Host, Result, ScannerConfig,
    StackInfo, StackListReply, StackRecord, Summary, SystemTaskSpec, TaskSeverity,
    HOST_STATUS_ERROR,
};
use flotilla_hub::{AgentConnection, CommandClient, Hub};
use flotilla_storage::{FleetStore, MetricsProvider};

use crate::tasks::TaskManager;

pub const TASK_HOST_OFFLINE: &str = "host_offline";
pub const TASK_STACK_UNMANAGED: &str = "stack_unmanaged";
pub const TASK_STACK_UNHEALTHY: &str = "stack_unhealthy";
pub const TASK_HOST_LOW_DISK: &str = "host_low_disk";
pub const TASK_HOST_LOW_MEMORY: &str = "host_low_memory";

/// Aggregation window for the memory signal; the lookback is 15 minutes.
const METRICS_WINDOW: Duration = Duration::from_secs(5 * 60);

pub struct DashboardScanner {
    client: CommandClient,
    store: Arc<dyn FleetStore>,
    tasks: Arc<TaskManager>,
    metrics: Arc<dyn MetricsProvider>,
    config: ScannerConfig,
}

fn offline_fingerprint(host_id: Uuid) -> String {
    format!("{TASK_HOST_OFFLINE}:{host_id}")
}

fn stack_key(name: &str) -> String {
    name.to_lowercase().replace(' ', "_")
}

impl DashboardScanner {
    pub fn new(
        hub: Arc<Hub>,
        store: Arc<dyn FleetStore>,
        tasks: Arc<TaskManager>,
        metrics: Arc<dyn MetricsProvider>,
        config: ScannerConfig,
    ) -> Self {
        let client = CommandClient::new(hub, config.command_timeout());
        Self {
            client,
            store,
            tasks,
            metrics,
            config,
        }
    }

    /// Launch the background scan loop. Cancellation stops it cleanly.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let scanner = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scanner.config.interval());
            info!(
                interval_secs = scanner.config.interval_secs,
                "dashboard scanner started"
            );
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("dashboard scanner stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = scanner.scan_once(&cancel).await {
                            if matches!(err, FleetError::Cancelled) {
                                return;
                            }
                            warn!("scan tick failed: {err}");
                        }
                    }
                }
            }
        })
    }

    /// One full scan tick. Also reused by the manual refresh endpoint.
    pub async fn scan_once(&self, cancel: &CancellationToken) -> Result<Summary> {
        if cancel.is_cancelled() {
            return Err(FleetError::Cancelled);
        }

        let hosts = self.store.list_hosts().await?;
        let connected: HashSet<Uuid> = self.client.hub().connected_host_ids().into_iter().collect();

        let mut summary = Summary {
            updated_at: Some(Utc::now()),
            ..Default::default()
        };

        for host in &hosts {
            summary.hosts_total += 1;
            if host.status == HOST_STATUS_ERROR {
                summary.hosts_error += 1;
            }
            if connected.contains(&host.id) {
                summary.hosts_online += 1;
                self.tasks
                    .resolve_by_fingerprint(&offline_fingerprint(host.id), None)
                    .await?;
            } else {
                self.ensure_host_offline_task(host).await?;
            }
        }

        // Sequential across agents to cap fleet load.
        for agent in self.client.hub().get_agents() {
            if cancel.is_cancelled() {
                return Err(FleetError::Cancelled);
            }
            self.process_agent(&mut summary, &agent, cancel).await;
        }

        summary.stacks_total = self.store.count_stacks().await?;
        summary.hosts_offline = (summary.hosts_total - summary.hosts_online).max(0);

        self.tasks.update_summary(summary.clone()).await;
        self.client.hub().publish_ui(Envelope::event(
            "summary_updated",
            serde_json::to_value(&summary)?,
        ));
        Ok(summary)
    }

    /// Upsert the offline task for a host with no live session. Severity
    /// escalates once the host has been unseen long enough.
    async fn ensure_host_offline_task(&self, host: &Host) -> Result<()> {
        let (severity, last_seen) = match host.last_seen {
            None => (TaskSeverity::Critical, "never".to_string()),
            Some(at) => {
                let age = Utc::now().signed_duration_since(at);
                let severity = if age >= self.config.offline_critical_after() {
                    TaskSeverity::Critical
                } else {
                    TaskSeverity::Warning
                };
                (severity, humanize_since(age))
            }
        };

        let mut spec = SystemTaskSpec::new(
            offline_fingerprint(host.id),
            format!("Host {} is offline", host.name),
            severity,
        );
        spec.description = format!(
            "No live agent session for host {} (last seen {last_seen})",
            host.name
        );
        spec.category = "availability".into();
        spec.task_type = TASK_HOST_OFFLINE.into();
        spec.host_id = Some(host.id);
        self.tasks.upsert_system_task(spec).await?;
        Ok(())
    }

    /// Evaluate one connected agent: stacks, container count, disk, memory.
    /// Each probe fails independently; a transient failure only suppresses
    /// this tick's signal for that probe.
    async fn process_agent(
        &self,
        summary: &mut Summary,
        agent: &AgentConnection,
        cancel: &CancellationToken,
    ) {
        let host_id = agent.host_id;

        match self
            .client
            .invoke_parsed::<StackListReply>(agent.agent_id, actions::LIST_STACKS, json!({}), cancel)
            .await
        {
            Ok(reply) => {
                if let Err(err) = self.evaluate_stacks(host_id, &reply.stacks).await {
                    warn!(%host_id, "stack evaluation failed: {err}");
                }
            }
            Err(err) => debug!(%host_id, "list_stacks unavailable this tick: {err}"),
        }

        match self
            .client
            .invoke_parsed::<ContainerListReply>(
                agent.agent_id,
                actions::LIST_CONTAINERS,
                json!({"all": true}),
                cancel,
            )
            .await
        {
            Ok(reply) => summary.containers_total += reply.containers.len() as i64,
            Err(err) => debug!(%host_id, "list_containers unavailable this tick: {err}"),
        }

        match self
            .client
            .invoke_parsed::<DockerInfoReply>(
                agent.agent_id,
                actions::GET_DOCKER_INFO,
                json!({}),
                cancel,
            )
            .await
        {
            Ok(info) => {
                if let Err(err) = self.evaluate_disk(host_id, &info).await {
                    warn!(%host_id, "disk evaluation failed: {err}");
                }
            }
            Err(err) => debug!(%host_id, "get_docker_info unavailable this tick: {err}"),
        }

        if let Err(err) = self.evaluate_memory(host_id).await {
            warn!(%host_id, "memory evaluation failed: {err}");
        }
    }

    /// Emit/resolve per-stack tasks, then sweep stale ones for the host.
    async fn evaluate_stacks(&self, host_id: Uuid, stacks: &[StackInfo]) -> Result<()> {
        let now = Utc::now();
        let mut touched: HashSet<String> = HashSet::new();

        for stack in stacks {
            let key = stack_key(&stack.name);

            self.store
                .upsert_stack(&StackRecord {
                    host_id,
                    name: stack.name.clone(),
                    status: stack.status.clone(),
                    managed: stack.managed_by_flotilla.unwrap_or(true),
                    updated_at: now,
                })
                .await?;

            let unmanaged = format!("{TASK_STACK_UNMANAGED}:{host_id}:{key}");
            if stack.managed_by_flotilla == Some(false) {
                let mut spec = SystemTaskSpec::new(
                    unmanaged.clone(),
                    format!("Stack {} is not managed", stack.name),
                    TaskSeverity::Info,
                );
                spec.description = format!(
                    "Stack {} was deployed outside the control plane and cannot be managed",
                    stack.name
                );
                spec.category = "stacks".into();
                spec.task_type = TASK_STACK_UNMANAGED.into();
                spec.host_id = Some(host_id);
                self.tasks.upsert_system_task(spec).await?;
                touched.insert(unmanaged);
            } else {
                self.tasks.resolve_by_fingerprint(&unmanaged, None).await?;
            }

            let unhealthy = format!("{TASK_STACK_UNHEALTHY}:{host_id}:{key}");
            let severity = match stack.status.as_str() {
                "error" => Some(TaskSeverity::Critical),
                "partial" | "stopped" => Some(TaskSeverity::Warning),
                _ => None,
            };
            if let Some(severity) = severity {
                let mut spec = SystemTaskSpec::new(
                    unhealthy.clone(),
                    format!("Stack {} is {}", stack.name, stack.status),
                    severity,
                );
                spec.description = format!(
                    "Stack {}: {}/{} containers running (status {})",
                    stack.name, stack.running, stack.containers, stack.status
                );
                spec.category = "stacks".into();
                spec.task_type = TASK_STACK_UNHEALTHY.into();
                spec.host_id = Some(host_id);
                spec.metadata = json!({
                    "stack": stack.name,
                    "status": stack.status,
                    "containers": stack.containers,
                    "running": stack.running,
                });
                self.tasks.upsert_system_task(spec).await?;
                touched.insert(unhealthy);
            } else {
                self.tasks.resolve_by_fingerprint(&unhealthy, None).await?;
            }
        }

        self.resolve_missing_stack_tasks(host_id, &touched).await
    }

    /// Any active stack task whose fingerprint was not touched this tick
    /// refers to a stack that disappeared; resolve it.
    async fn resolve_missing_stack_tasks(
        &self,
        host_id: Uuid,
        touched: &HashSet<String>,
    ) -> Result<()> {
        let active = self
            .store
            .active_system_tasks_for_host(host_id, &[TASK_STACK_UNMANAGED, TASK_STACK_UNHEALTHY])
            .await?;
        for task in active {
            if let Some(fingerprint) = task.fingerprint {
                if !touched.contains(&fingerprint) {
                    self.tasks.resolve_by_fingerprint(&fingerprint, None).await?;
                }
            }
        }
        Ok(())
    }

    async fn evaluate_disk(&self, host_id: Uuid, info: &DockerInfoReply) -> Result<()> {
        let fingerprint = format!("{TASK_HOST_LOW_DISK}:{host_id}");
        if info.disk_total == 0 {
            // No data, no alert.
            self.tasks.resolve_by_fingerprint(&fingerprint, None).await?;
            return Ok(());
        }
        let free_percent = info.disk_free as f64 / info.disk_total as f64 * 100.0;
        let severity = if free_percent <= self.config.disk_critical_percent {
            Some(TaskSeverity::Critical)
        } else if free_percent <= self.config.disk_warning_percent {
            Some(TaskSeverity::Warning)
        } else {
            None
        };

        match severity {
            Some(severity) => {
                let mut spec = SystemTaskSpec::new(
                    fingerprint,
                    "Host is low on disk space".to_string(),
                    severity,
                );
                spec.description = format!(
                    "{free_percent:.1}% of docker storage free ({} of {} bytes)",
                    info.disk_free, info.disk_total
                );
                spec.category = "resources".into();
                spec.task_type = TASK_HOST_LOW_DISK.into();
                spec.host_id = Some(host_id);
                spec.metadata = json!({
                    "disk_free": info.disk_free,
                    "disk_total": info.disk_total,
                    "free_percent": free_percent,
                });
                self.tasks.upsert_system_task(spec).await?;
            }
            None => {
                self.tasks.resolve_by_fingerprint(&fingerprint, None).await?;
            }
        }
        Ok(())
    }

    async fn evaluate_memory(&self, host_id: Uuid) -> Result<()> {
        let fingerprint = format!("{TASK_HOST_LOW_MEMORY}:{host_id}");
        if !self.metrics.is_enabled() {
            self.tasks.resolve_by_fingerprint(&fingerprint, None).await?;
            return Ok(());
        }

        let end = Utc::now();
        let start = end - chrono::Duration::minutes(15);
        let samples = self
            .metrics
            .query_host_metrics(host_id, start, end, METRICS_WINDOW)
            .await?;

        let latest = match samples.last() {
            Some(sample) if sample.memory_total > 0 => sample,
            _ => {
                // No samples in the window, or a degenerate total.
                self.tasks.resolve_by_fingerprint(&fingerprint, None).await?;
                return Ok(());
            }
        };

        let usage_percent = latest.memory_usage as f64 / latest.memory_total as f64 * 100.0;
        let free_percent = 100.0 - usage_percent;
        let severity = if free_percent <= self.config.memory_critical_percent {
            Some(TaskSeverity::Critical)
        } else if free_percent <= self.config.memory_warning_percent {
            Some(TaskSeverity::Warning)
        } else {
            None
        };

        match severity {
            Some(severity) => {
                let mut spec = SystemTaskSpec::new(
                    fingerprint,
                    "Host is low on memory".to_string(),
                    severity,
                );
                spec.description = format!(
                    "{free_percent:.1}% of memory free ({} of {} bytes in use)",
                    latest.memory_usage, latest.memory_total
                );
                spec.category = "resources".into();
                spec.task_type = TASK_HOST_LOW_MEMORY.into();
                spec.host_id = Some(host_id);
                spec.metadata = json!({
                    "memory_usage": latest.memory_usage,
                    "memory_total": latest.memory_total,
                    "free_percent": free_percent,
                });
                self.tasks.upsert_system_task(spec).await?;
            }
            None => {
                self.tasks.resolve_by_fingerprint(&fingerprint, None).await?;
            }
        }
        Ok(())
    }
}
