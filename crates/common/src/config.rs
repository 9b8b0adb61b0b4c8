use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Deployment mode. DEV runs against the in-memory store with metrics
/// disabled; PROD requires a database URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Mode {
    #[serde(rename = "DEV")]
    #[default]
    Dev,
    #[serde(rename = "PROD")]
    Prod,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FleetConfig {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub topology: TopologyConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub database_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            database_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Seconds between background refresh ticks.
    #[serde(default = "default_topology_refresh_secs")]
    pub refresh_interval_secs: u64,
    /// Snapshots older than this are stale. Defaults to twice the refresh
    /// interval when unset.
    #[serde(default)]
    pub stale_after_secs: Option<u64>,
    #[serde(default = "default_topology_batch_size")]
    pub batch_size: usize,
    /// Per-command deadline for topology refresh commands.
    #[serde(default = "default_topology_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_topology_refresh_secs(),
            stale_after_secs: None,
            batch_size: default_topology_batch_size(),
            command_timeout_secs: default_topology_command_timeout_secs(),
        }
    }
}

impl TopologyConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(
            self.stale_after_secs
                .unwrap_or(self.refresh_interval_secs * 2),
        )
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Seconds between scanner ticks.
    #[serde(default = "default_scanner_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_disk_warning_percent")]
    pub disk_warning_percent: f64,
    #[serde(default = "default_disk_critical_percent")]
    pub disk_critical_percent: f64,
    #[serde(default = "default_memory_warning_percent")]
    pub memory_warning_percent: f64,
    #[serde(default = "default_memory_critical_percent")]
    pub memory_critical_percent: f64,
    /// An offline host escalates to critical after its last_seen is this old.
    #[serde(default = "default_offline_critical_after_secs")]
    pub offline_critical_after_secs: u64,
    /// Per-command deadline for scanner commands.
    #[serde(default = "default_scanner_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_scanner_interval_secs(),
            disk_warning_percent: default_disk_warning_percent(),
            disk_critical_percent: default_disk_critical_percent(),
            memory_warning_percent: default_memory_warning_percent(),
            memory_critical_percent: default_memory_critical_percent(),
            offline_critical_after_secs: default_offline_critical_after_secs(),
            command_timeout_secs: default_scanner_command_timeout_secs(),
        }
    }
}

impl ScannerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn offline_critical_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.offline_critical_after_secs as i64)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl FleetConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FleetConfig = toml::from_str(&content)?;
        Ok(config)
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_topology_refresh_secs() -> u64 {
    600
}

fn default_topology_batch_size() -> usize {
    20
}

fn default_topology_command_timeout_secs() -> u64 {
    45
}

fn default_scanner_interval_secs() -> u64 {
    30
}

fn default_disk_warning_percent() -> f64 {
    15.0
}

fn default_disk_critical_percent() -> f64 {
    5.0
}

fn default_memory_warning_percent() -> f64 {
    15.0
}

fn default_memory_critical_percent() -> f64 {
    5.0
}

fn default_offline_critical_after_secs() -> u64 {
    300
}

fn default_scanner_command_timeout_secs() -> u64 {
    20
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = FleetConfig::default();
        assert_eq!(config.mode, Mode::Dev);
        assert_eq!(config.topology.refresh_interval_secs, 600);
        assert_eq!(config.topology.batch_size, 20);
        assert_eq!(
            config.topology.stale_after(),
            Duration::from_secs(1200),
            "stale_after defaults to twice the refresh interval"
        );
        assert_eq!(config.scanner.interval_secs, 30);
        assert_eq!(config.scanner.disk_warning_percent, 15.0);
        assert_eq!(config.scanner.disk_critical_percent, 5.0);
        assert_eq!(config.scanner.offline_critical_after_secs, 300);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: FleetConfig = toml::from_str(
            r#"
            mode = "PROD"

            [topology]
            refresh_interval_secs = 120
            "#,
        )
        .unwrap();
        assert_eq!(config.mode, Mode::Prod);
        assert_eq!(config.topology.refresh_interval_secs, 120);
        assert_eq!(config.topology.stale_after(), Duration::from_secs(240));
        assert_eq!(config.scanner.interval_secs, 30);
    }
}
