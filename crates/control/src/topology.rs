//! Periodic refresher for per-host network and volume snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use flotilla_common::protocol::actions;
use flotilla_common::util::chunk;
use flotilla_common::{
    NetworkInspectReply, NetworkListReply, NetworkTopologyRecord, Result, TopologyConfig,
    VolumeInspectReply, VolumeListReply, VolumeTopologyRecord,
};
use flotilla_hub::{CommandClient, Hub};
use flotilla_storage::FleetStore;

pub struct TopologyManager {
    client: CommandClient,
    store: Arc<dyn FleetStore>,
    config: TopologyConfig,
}

impl TopologyManager {
    pub fn new(hub: Arc<Hub>, store: Arc<dyn FleetStore>, config: TopologyConfig) -> Self {
        let client = CommandClient::new(hub, config.command_timeout());
        Self {
            client,
            store,
            config,
        }
    }

    /// Refresh network snapshots for one host. An empty `ids` list means
    /// "everything": the id set is discovered with `list_networks` first.
    /// All rows written by one call share a single `refreshed_at` watermark.
    /// Returns the number of snapshots persisted.
    pub async fn refresh_networks(
        &self,
        host_id: Uuid,
        ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let refreshed_at = Utc::now();
        let ids = if ids.is_empty() {
            let listed: NetworkListReply = self
                .client
                .invoke_on_host(host_id, actions::LIST_NETWORKS, json!({}), cancel)
                .await?;
            listed.networks.into_iter().map(|n| n.id).collect()
        } else {
            ids.to_vec()
        };

        let mut persisted = 0;
        for batch in chunk(&ids, self.config.batch_size) {
            if batch.is_empty() {
                continue;
            }
            let reply: NetworkInspectReply = self
                .client
                .invoke_on_host(
                    host_id,
                    actions::INSPECT_NETWORKS,
                    json!({ "ids": batch }),
                    cancel,
                )
                .await?;
            for item in &reply.errors {
                warn!(%host_id, network_id = %item.id, "network inspect failed: {}", item.error);
            }
            for network in reply.networks {
                let record = NetworkTopologyRecord {
                    host_id,
                    network_id: network.id.clone(),
                    snapshot: serde_json::to_value(&network)?,
                    refreshed_at,
                };
                self.store.upsert_network_topology(&record).await?;
                persisted += 1;
            }
        }
        debug!(%host_id, persisted, "network topology refreshed");
        Ok(persisted)
    }

    /// Volume counterpart of [`refresh_networks`](Self::refresh_networks).
    pub async fn refresh_volumes(
        &self,
        host_id: Uuid,
        names: &[String],
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let refreshed_at = Utc::now();
        let names = if names.is_empty() {
            let listed: VolumeListReply = self
                .client
                .invoke_on_host(host_id, actions::LIST_VOLUMES, json!({}), cancel)
                .await?;
            listed.volumes.into_iter().map(|v| v.name).collect()
        } else {
            names.to_vec()
        };

        let mut persisted = 0;
        for batch in chunk(&names, self.config.batch_size) {
            if batch.is_empty() {
                continue;
            }
            let reply: VolumeInspectReply = self
                .client
                .invoke_on_host(
                    host_id,
                    actions::INSPECT_VOLUMES,
                    json!({ "ids": batch }),
                    cancel,
                )
                .await?;
            for item in &reply.errors {
                warn!(%host_id, volume = %item.id, "volume inspect failed: {}", item.error);
            }
            for volume in reply.volumes {
                let record = VolumeTopologyRecord {
                    host_id,
                    volume_name: volume.name.clone(),
                    snapshot: serde_json::to_value(&volume)?,
                    refreshed_at,
                };
                self.store.upsert_volume_topology(&record).await?;
                persisted += 1;
            }
        }
        debug!(%host_id, persisted, "volume topology refreshed");
        Ok(persisted)
    }

    /// Refresh both resource types. Either failing is logged and swallowed
    /// so one resource type never blocks the other.
    pub async fn refresh_host_topology(&self, host_id: Uuid, cancel: &CancellationToken) {
        if let Err(err) = self.refresh_networks(host_id, &[], cancel).await {
            warn!(%host_id, "network refresh failed: {err}");
        }
        if let Err(err) = self.refresh_volumes(host_id, &[], cancel).await {
            warn!(%host_id, "volume refresh failed: {err}");
        }
    }

    /// One refresh pass over every currently connected host, sequentially
    /// to cap agent load. Reused by the background loop and the manual
    /// refresh endpoint.
    pub async fn refresh_all(&self, cancel: &CancellationToken) {
        for host_id in self.client.hub().connected_host_ids() {
            if cancel.is_cancelled() {
                return;
            }
            self.refresh_host_topology(host_id, cancel).await;
        }
    }

    /// Launch the background ticker. Cancellation stops the loop cleanly.
    pub fn start_background_refresh(
        self: Arc<Self>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let manager = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.config.refresh_interval());
            info!(
                interval_secs = manager.config.refresh_interval_secs,
                "topology refresh loop started"
            );
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("topology refresh loop stopped");
                        return;
                    }
                    _ = ticker.tick() => manager.refresh_all(&cancel).await,
                }
            }
        })
    }

    /// Stored network snapshots for a host keyed by network id.
    pub async fn get_network_topology(
        &self,
        host_id: Uuid,
    ) -> Result<HashMap<String, NetworkTopologyRecord>> {
        Ok(self
            .store
            .network_topology(host_id)
            .await?
            .into_iter()
            .map(|r| (r.network_id.clone(), r))
            .collect())
    }

    /// Stored volume snapshots for a host keyed by volume name.
    pub async fn get_volume_topology(
        &self,
        host_id: Uuid,
    ) -> Result<HashMap<String, VolumeTopologyRecord>> {
        Ok(self
            .store
            .volume_topology(host_id)
            .await?
            .into_iter()
            .map(|r| (r.volume_name.clone(), r))
            .collect())
    }

    /// A snapshot is stale when it was never refreshed or its watermark is
    /// older than the configured threshold.
    pub fn is_stale(&self, refreshed_at: Option<DateTime<Utc>>) -> bool {
        match refreshed_at {
            None => true,
            Some(at) => {
                let age = Utc::now().signed_duration_since(at);
                age.to_std()
                    .map(|age| age > self.config.stale_after())
                    .unwrap_or(false)
            }
        }
    }

    /// Drop all topology rows for a decommissioned host.
    pub async fn purge_host(&self, host_id: Uuid) -> Result<u64> {
        let removed = self.store.purge_host_topology(host_id).await?;
        info!(%host_id, removed, "purged host topology");
        Ok(removed)
    }
}
