//! Agent protocol envelope and per-action reply schemas.
//!
//! The envelope is symmetric over the bidirectional channel: the control
//! plane sends `command` frames, agents answer with `response` frames
//! carrying the same `id`, and push `event` frames (heartbeats, metrics)
//! with fresh ids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{FleetError, Result};

/// Frame kind discriminator, wire format is lowercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Command,
    Response,
    Event,
}

/// Error detail carried by a failed response frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

/// Actions understood by the agents.
pub mod actions {
    pub const LIST_NETWORKS: &str = "list_networks";
    pub const INSPECT_NETWORKS: &str = "inspect_networks";
    pub const LIST_VOLUMES: &str = "list_volumes";
    pub const INSPECT_VOLUMES: &str = "inspect_volumes";
    pub const LIST_STACKS: &str = "list_stacks";
    pub const LIST_CONTAINERS: &str = "list_containers";
    pub const GET_DOCKER_INFO: &str = "get_docker_info";

    // Pushed by agents
    pub const HEARTBEAT: &str = "heartbeat";
    pub const METRICS: &str = "metrics";
}

/// The wire envelope. `id` uniquely identifies a request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub action: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// New command frame with a fresh correlation id.
    pub fn command(action: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: MessageType::Command,
            action: action.into(),
            payload,
            agent_id: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// New event frame (push telemetry, UI notifications).
    pub fn event(action: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: MessageType::Event,
            action: action.into(),
            payload,
            agent_id: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Successful response to `command_id`.
    pub fn response(command_id: Uuid, action: impl Into<String>, payload: Value) -> Self {
        Self {
            id: command_id,
            kind: MessageType::Response,
            action: action.into(),
            payload,
            agent_id: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Error response to `command_id`.
    pub fn error_response(
        command_id: Uuid,
        action: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: command_id,
            kind: MessageType::Response,
            action: action.into(),
            payload: Value::Null,
            agent_id: None,
            error: Some(ErrorInfo {
                code: code.into(),
                message: message.into(),
            }),
            timestamp: Utc::now(),
        }
    }

    /// The reply data: `payload.data` when present as a mapping, otherwise
    /// the payload itself.
    pub fn data(&self) -> &Value {
        match self.payload.get("data") {
            Some(data) if data.is_object() => data,
            _ => &self.payload,
        }
    }

    /// Decode the reply data into an action schema. A response carrying an
    /// error envelope surfaces `AgentActionFailed` instead.
    pub fn parse_data<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        if let Some(err) = &self.error {
            return Err(FleetError::agent_action(&err.code, &err.message));
        }
        serde_json::from_value(self.data().clone()).map_err(FleetError::from)
    }
}

// --- Numeric coercion -------------------------------------------------------
//
// Agent payloads carry heterogeneous numerics (ints, floats, numeric
// strings depending on the agent build). All coercion funnels through
// `coerce_f64`; negative values clamp to 0, values beyond u64 clamp to max.

pub fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub fn coerce_u64(value: &Value) -> Option<u64> {
    let f = coerce_f64(value)?;
    if !f.is_finite() {
        return None;
    }
    Some(if f <= 0.0 {
        0
    } else if f >= u64::MAX as f64 {
        u64::MAX
    } else {
        f as u64
    })
}

fn de_u64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(coerce_u64(&value).unwrap_or(0))
}

fn de_f64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(coerce_f64(&value).unwrap_or(0.0))
}

// --- Reply schemas per action ----------------------------------------------

/// One network as reported by `list_networks` / `inspect_networks`; the id
/// is lifted out, everything else stays opaque for snapshot storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub id: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// One volume as reported by `list_volumes` / `inspect_volumes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeSnapshot {
    pub name: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// Per-item failure reported alongside inspect results.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceError {
    pub id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkListReply {
    #[serde(default)]
    pub networks: Vec<NetworkSnapshot>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkInspectReply {
    #[serde(default)]
    pub networks: Vec<NetworkSnapshot>,
    #[serde(default)]
    pub errors: Vec<ResourceError>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VolumeListReply {
    #[serde(default)]
    pub volumes: Vec<VolumeSnapshot>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VolumeInspectReply {
    #[serde(default)]
    pub volumes: Vec<VolumeSnapshot>,
    #[serde(default)]
    pub errors: Vec<ResourceError>,
}

/// One compose stack as reported by `list_stacks`.
#[derive(Debug, Clone, Deserialize)]
pub struct StackInfo {
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "de_u64")]
    pub containers: u64,
    #[serde(default, deserialize_with = "de_u64")]
    pub running: u64,
    #[serde(default)]
    pub managed_by_flotilla: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StackListReply {
    #[serde(default)]
    pub stacks: Vec<StackInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerListReply {
    #[serde(default)]
    pub containers: Vec<Value>,
}

/// Host-level docker daemon info, byte counts coerced.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DockerInfoReply {
    #[serde(default, deserialize_with = "de_u64")]
    pub disk_total: u64,
    #[serde(default, deserialize_with = "de_u64")]
    pub disk_free: u64,
}

/// Metrics sample pushed by an agent as an `event` frame.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsPush {
    #[serde(default, deserialize_with = "de_f64")]
    pub cpu_percent: f64,
    #[serde(default, deserialize_with = "de_u64")]
    pub memory_usage: u64,
    #[serde(default, deserialize_with = "de_u64")]
    pub memory_total: u64,
    #[serde(default, deserialize_with = "de_u64")]
    pub disk_usage: u64,
    #[serde(default, deserialize_with = "de_u64")]
    pub disk_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_round_trip() {
        let cmd = Envelope::command(actions::LIST_STACKS, json!({}));
        let raw = serde_json::to_string(&cmd).unwrap();
        assert!(raw.contains("\"type\":\"command\""));
        let back: Envelope = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.id, cmd.id);
        assert_eq!(back.action, actions::LIST_STACKS);
    }

    #[test]
    fn data_prefers_nested_mapping() {
        let resp = Envelope::response(
            Uuid::new_v4(),
            actions::GET_DOCKER_INFO,
            json!({"data": {"disk_total": 100, "disk_free": 40}}),
        );
        let info: DockerInfoReply = resp.parse_data().unwrap();
        assert_eq!(info.disk_total, 100);
        assert_eq!(info.disk_free, 40);
    }

    #[test]
    fn data_falls_back_to_payload() {
        let resp = Envelope::response(
            Uuid::new_v4(),
            actions::GET_DOCKER_INFO,
            json!({"disk_total": "250", "disk_free": 10.5}),
        );
        let info: DockerInfoReply = resp.parse_data().unwrap();
        assert_eq!(info.disk_total, 250);
        assert_eq!(info.disk_free, 10);
    }

    #[test]
    fn error_envelope_surfaces_action_failure() {
        let resp = Envelope::error_response(
            Uuid::new_v4(),
            actions::LIST_STACKS,
            "docker_error",
            "daemon unreachable",
        );
        let err = resp.parse_data::<StackListReply>().unwrap_err();
        assert!(matches!(
            err,
            FleetError::AgentActionFailed { code, .. } if code == "docker_error"
        ));
    }

    #[test]
    fn coercion_handles_ints_floats_and_strings() {
        assert_eq!(coerce_u64(&json!(42)), Some(42));
        assert_eq!(coerce_u64(&json!(42.9)), Some(42));
        assert_eq!(coerce_u64(&json!("1024")), Some(1024));
        assert_eq!(coerce_u64(&json!("  7.5 ")), Some(7));
        assert_eq!(coerce_u64(&json!(-5)), Some(0));
        assert_eq!(coerce_u64(&json!(1e300)), Some(u64::MAX));
        assert_eq!(coerce_u64(&json!("bogus")), None);
        assert_eq!(coerce_u64(&json!(null)), None);
    }

    #[test]
    fn stack_info_tolerates_mixed_numeric_shapes() {
        let reply: StackListReply = serde_json::from_value(json!({
            "stacks": [
                {"name": "web", "status": "running", "containers": "3", "running": 3},
                {"name": "db", "status": "partial", "containers": 2, "running": 1.0,
                 "managed_by_flotilla": false},
            ]
        }))
        .unwrap();
        assert_eq!(reply.stacks.len(), 2);
        assert_eq!(reply.stacks[0].containers, 3);
        assert_eq!(reply.stacks[1].running, 1);
        assert_eq!(reply.stacks[1].managed_by_flotilla, Some(false));
    }

    #[test]
    fn network_snapshot_keeps_extra_fields() {
        let snap: NetworkSnapshot =
            serde_json::from_value(json!({"id": "n1", "driver": "bridge", "scope": "local"}))
                .unwrap();
        assert_eq!(snap.id, "n1");
        let value = serde_json::to_value(&snap).unwrap();
        assert_eq!(value["driver"], "bridge");
    }
}
