use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Task severity, ordered `critical > warning > info` for sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskSeverity {
    Info,
    Warning,
    Critical,
}

impl TaskSeverity {
    /// Normalise arbitrary input into the allowed set; anything unknown
    /// falls back to `info`.
    pub fn normalize(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "warning" => Self::Warning,
            "critical" => Self::Critical,
            _ => Self::Info,
        }
    }

    /// Sort rank, highest first.
    pub fn rank(&self) -> i32 {
        match self {
            Self::Critical => 3,
            Self::Warning => 2,
            Self::Info => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for TaskSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Open,
    Acknowledged,
    Resolved,
    Dismissed,
}

impl TaskStatus {
    /// Normalise input to a known status; `None` for anything outside the
    /// allowed set.
    pub fn normalize(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" => Some(Self::Open),
            "acknowledged" => Some(Self::Acknowledged),
            "resolved" => Some(Self::Resolved),
            "dismissed" => Some(Self::Dismissed),
            _ => None,
        }
    }

    /// Active statuses participate in fingerprint dedupe and automatic
    /// resolution.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Open | Self::Acknowledged)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
            Self::Dismissed => "dismissed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskSource {
    System,
    Manual,
}

impl TaskSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for TaskSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dashboard task row. System tasks are fingerprint-deduped and resolved
/// automatically; manual tasks are operator-owned for their whole lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardTask {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub severity: TaskSeverity,
    pub status: TaskStatus,
    pub source: TaskSource,
    pub category: String,
    pub task_type: String,
    pub fingerprint: Option<String>,
    pub metadata: serde_json::Value,
    pub host_id: Option<Uuid>,
    pub stack_id: Option<Uuid>,
    pub container_id: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub snoozed_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
}

/// Input for `create_manual_task`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewManualTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Free-form; normalised to the allowed set (unknown -> info).
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub task_type: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub host_id: Option<Uuid>,
    #[serde(default)]
    pub stack_id: Option<Uuid>,
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Input for `upsert_system_task`. The fingerprint is required and keys the
/// at-most-one-active-row invariant.
#[derive(Debug, Clone)]
pub struct SystemTaskSpec {
    pub fingerprint: String,
    pub title: String,
    pub description: String,
    pub severity: TaskSeverity,
    pub status: TaskStatus,
    pub category: String,
    pub task_type: String,
    pub metadata: serde_json::Value,
    pub host_id: Option<Uuid>,
    pub stack_id: Option<Uuid>,
    pub container_id: Option<String>,
}

impl SystemTaskSpec {
    pub fn new(
        fingerprint: impl Into<String>,
        title: impl Into<String>,
        severity: TaskSeverity,
    ) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            title: title.into(),
            description: String::new(),
            severity,
            status: TaskStatus::Open,
            category: String::new(),
            task_type: String::new(),
            metadata: serde_json::Value::Null,
            host_id: None,
            stack_id: None,
            container_id: None,
        }
    }
}

/// Partial update for a manual task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub snoozed_until: Option<DateTime<Utc>>,
}

/// List filter for dashboard tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub severity: Option<TaskSeverity>,
    #[serde(default)]
    pub source: Option<TaskSource>,
    #[serde(default)]
    pub limit: Option<i64>,
}

impl TaskFilter {
    pub const DEFAULT_LIMIT: i64 = 100;
    pub const MAX_LIMIT: i64 = 500;

    /// Requested limit clamped to `[1, MAX_LIMIT]`, defaulting to
    /// `DEFAULT_LIMIT`.
    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }
}

/// A managed container host as seen by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: Uuid,
    pub name: String,
    pub status: String,
    pub last_seen: Option<DateTime<Utc>>,
}

pub const HOST_STATUS_ONLINE: &str = "online";
pub const HOST_STATUS_OFFLINE: &str = "offline";
pub const HOST_STATUS_ERROR: &str = "error";

/// Fleet-level counter snapshot shown on the operator dashboard.
/// Written atomically as a whole; readers always copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub hosts_total: i64,
    pub hosts_online: i64,
    pub hosts_offline: i64,
    pub hosts_error: i64,
    pub containers_total: i64,
    pub stacks_total: i64,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Cached point-in-time view of one Docker network on one host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkTopologyRecord {
    pub host_id: Uuid,
    pub network_id: String,
    pub snapshot: serde_json::Value,
    pub refreshed_at: DateTime<Utc>,
}

/// Cached point-in-time view of one Docker volume on one host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeTopologyRecord {
    pub host_id: Uuid,
    pub volume_name: String,
    pub snapshot: serde_json::Value,
    pub refreshed_at: DateTime<Utc>,
}

/// A compose stack observed on a host, unique per `(host_id, name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackRecord {
    pub host_id: Uuid,
    pub name: String,
    pub status: String,
    pub managed: bool,
    pub updated_at: DateTime<Utc>,
}

/// One aggregated time-series sample for a host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSample {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_usage: u64,
    pub memory_total: u64,
    pub disk_usage: u64,
    pub disk_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_normalize_covers_any_input() {
        assert_eq!(TaskSeverity::normalize("critical"), TaskSeverity::Critical);
        assert_eq!(TaskSeverity::normalize(" WARNING "), TaskSeverity::Warning);
        assert_eq!(TaskSeverity::normalize("info"), TaskSeverity::Info);
        assert_eq!(TaskSeverity::normalize("sev1"), TaskSeverity::Info);
        assert_eq!(TaskSeverity::normalize(""), TaskSeverity::Info);
    }

    #[test]
    fn status_normalize_rejects_unknown() {
        assert_eq!(TaskStatus::normalize("open"), Some(TaskStatus::Open));
        assert_eq!(
            TaskStatus::normalize("Acknowledged"),
            Some(TaskStatus::Acknowledged)
        );
        assert_eq!(TaskStatus::normalize("resolved"), Some(TaskStatus::Resolved));
        assert_eq!(TaskStatus::normalize("dismissed"), Some(TaskStatus::Dismissed));
        assert_eq!(TaskStatus::normalize("closed"), None);
        assert_eq!(TaskStatus::normalize(""), None);
    }

    #[test]
    fn severity_ordering_for_sort() {
        assert!(TaskSeverity::Critical.rank() > TaskSeverity::Warning.rank());
        assert!(TaskSeverity::Warning.rank() > TaskSeverity::Info.rank());
    }

    #[test]
    fn filter_limit_clamps() {
        assert_eq!(TaskFilter::default().effective_limit(), 100);
        let f = TaskFilter {
            limit: Some(9999),
            ..Default::default()
        };
        assert_eq!(f.effective_limit(), 500);
        let f = TaskFilter {
            limit: Some(0),
            ..Default::default()
        };
        assert_eq!(f.effective_limit(), 1);
    }
}
