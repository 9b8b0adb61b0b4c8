use std::time::Duration;

use thiserror::Error;

/// Core error type for all control-plane failures
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FleetError {
    #[error("agent unavailable: {0}")]
    AgentUnavailable(String),

    #[error("agent backpressure: outbound queue full for {0}")]
    AgentBackpressure(String),

    #[error("command timed out after {timeout:?}: {action}")]
    CommandTimeout { action: String, timeout: Duration },

    #[error("agent action failed - {code}: {message}")]
    AgentActionFailed { code: String, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("resource not found: {resource_type}:{resource_id}")]
    NotFound {
        resource_type: String,
        resource_id: String,
    },

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("TOML deserialization error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FleetError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(resource_type: impl Into<String>, resource_id: impl ToString) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            resource_id: resource_id.to_string(),
        }
    }

    /// Wrap a storage-layer error
    pub fn persistence(err: impl ToString) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn agent_action(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AgentActionFailed {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Transient failures: background loops log these and retry on the next
    /// tick rather than surfacing a task or terminating.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::CommandTimeout { .. }
                | Self::AgentActionFailed { .. }
                | Self::AgentBackpressure(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;
