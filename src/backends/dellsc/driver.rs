//! Storage Center volume driver

use super::api::{ScApi, BACKEND};
use super::client::{HttpClient, RestTransport};
use super::models::ScVolume;
use super::ScConfig;
use crate::domain::{
    ConnectionInfo, Connector, SnapshotRef, VolumeDriver, VolumeProvisioner, VolumeRef,
    VolumeUpdate,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// [`VolumeDriver`] for one Dell Storage Center
pub struct StorageCenterDriver {
    api: ScApi,
}

impl StorageCenterDriver {
    pub fn new(transport: Arc<dyn RestTransport>, config: ScConfig) -> Self {
        Self {
            api: ScApi::new(transport, config),
        }
    }

    /// Log in to the Data Collector and build the driver
    pub async fn connect(config: ScConfig) -> Result<Self> {
        config.validate()?;
        let client = HttpClient::new(config.http_client_config())?;
        client.login().await?;
        Ok(Self::new(Arc::new(client), config))
    }

    pub fn api(&self) -> &ScApi {
        &self.api
    }

    async fn require_volume(&self, volume: &VolumeRef) -> Result<ScVolume> {
        self.api
            .find_volume(&volume.name, volume.provider_id.as_deref())
            .await?
            .ok_or_else(|| Error::not_found("volume", volume.name.clone()))
    }

    /// Start every configured replication of a new volume. On failure the
    /// volume is deleted again.
    async fn setup_replications(&self, volume: &VolumeRef, created: &ScVolume) -> Result<()> {
        if !volume.replicated {
            return Ok(());
        }
        for target in &self.api.config.replication_targets {
            let result = self
                .api
                .create_replication(
                    created,
                    target.ssn,
                    &target.qos_node,
                    target.replication_type,
                    target.auto_failover,
                    target.replicate_active,
                )
                .await;
            if let Err(e) = result {
                error!("Replication of {} to {} failed: {}", volume.name, target.ssn, e);
                if let Err(cleanup) = self
                    .api
                    .delete_volume(&volume.name, Some(&created.instance_id))
                    .await
                {
                    error!("Unable to delete {} after failed replication: {}", volume.name, cleanup);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Grow `created` to the requested size, then replicate it
    async fn finish_new_volume(&self, volume: &VolumeRef, created: ScVolume) -> Result<VolumeUpdate> {
        let created = match created.size_gb() {
            Some(size) if size < volume.size_gb => {
                match self.api.expand_volume(&created, volume.size_gb).await {
                    Ok(expanded) => expanded,
                    Err(e) => {
                        if let Err(cleanup) = self
                            .api
                            .delete_volume(&volume.name, Some(&created.instance_id))
                            .await
                        {
                            error!("Unable to delete {}: {}", volume.name, cleanup);
                        }
                        return Err(e);
                    }
                }
            }
            _ => created,
        };
        self.setup_replications(volume, &created).await?;
        Ok(VolumeUpdate::provider(&volume.name, created.instance_id))
    }

    /// Break replication of every volume in `volumes` towards `secondary`
    /// (the first configured target when `None`) and address all further
    /// calls to that array.
    #[instrument(skip(self, volumes))]
    pub async fn failover_host(
        &self,
        volumes: &[VolumeRef],
        secondary: Option<u64>,
    ) -> Result<(u64, Vec<VolumeUpdate>)> {
        let targets = &self.api.config.replication_targets;
        let dest_ssn = match secondary {
            Some(ssn) if targets.iter().any(|t| t.ssn == ssn) => ssn,
            Some(ssn) => {
                return Err(Error::Configuration(format!(
                    "{} is not a replication target",
                    ssn
                )))
            }
            None => targets
                .first()
                .map(|t| t.ssn)
                .ok_or_else(|| Error::Configuration("No replication targets configured".into()))?,
        };
        if self.api.is_failed_over() {
            return Err(Error::backend(BACKEND, "Already failed over"));
        }

        let mut updates = Vec::with_capacity(volumes.len());
        for volume in volumes {
            if !volume.replicated {
                updates.push(VolumeUpdate::failed(&volume.name, "volume is not replicated"));
                continue;
            }
            match self
                .api
                .break_replication(&volume.name, volume.provider_id.as_deref(), dest_ssn)
                .await
            {
                Ok(Some(destination)) => {
                    updates.push(VolumeUpdate::provider(&volume.name, destination.instance_id))
                }
                Ok(None) => {
                    warn!("No replication destination for {}", volume.name);
                    updates.push(VolumeUpdate::failed(&volume.name, "replication failover failed"));
                }
                Err(e) => {
                    error!("Failover of {} failed: {}", volume.name, e);
                    updates.push(VolumeUpdate::failed(&volume.name, e.to_string()));
                }
            }
        }

        self.api.failover(dest_ssn);
        info!("Failed over {} volumes to {}", volumes.len(), dest_ssn);
        Ok((dest_ssn, updates))
    }
}

#[async_trait]
impl VolumeDriver for StorageCenterDriver {
    fn backend_name(&self) -> &str {
        BACKEND
    }

    #[instrument(skip(self, connector), fields(host = %connector.host))]
    async fn initialize_connection(
        &self,
        volume: &VolumeRef,
        connector: &Connector,
    ) -> Result<ConnectionInfo> {
        let sc_volume = self.require_volume(volume).await?;
        let server = match self.api.find_server(&connector.initiators).await? {
            Some(server) => server,
            None => {
                debug!("No server owns the initiators of {}", connector.host);
                self.api
                    .create_server(&connector.host, &connector.initiators, connector.protocol)
                    .await?
            }
        };
        let profile = self.api.map_volume(&sc_volume, &server).await?;
        Ok(ConnectionInfo {
            protocol: connector.protocol,
            volume_name: volume.name.clone(),
            lun: profile.lun_used.first().copied(),
            access_path: sc_volume.device_id.unwrap_or(profile.instance_id),
        })
    }

    #[instrument(skip(self, connector))]
    async fn terminate_connection(
        &self,
        volume: &VolumeRef,
        connector: Option<&Connector>,
    ) -> Result<()> {
        let Some(sc_volume) = self
            .api
            .find_volume(&volume.name, volume.provider_id.as_deref())
            .await?
        else {
            warn!("Volume {} not found, nothing to unmap", volume.name);
            return Ok(());
        };

        let unmapped = match connector {
            None => self.api.unmap_all(&sc_volume).await?,
            Some(connector) => match self.api.find_server(&connector.initiators).await? {
                Some(server) => self.api.unmap_volume(&sc_volume, &server).await?,
                None => {
                    warn!("No server found for {}", connector.host);
                    true
                }
            },
        };
        if !unmapped {
            return Err(Error::backend(
                BACKEND,
                format!("Terminate connection failed for {}", volume.name),
            ));
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        match self.api.find_sc(self.api.ssn()).await {
            Ok(_) => Ok(true),
            Err(Error::ResourceNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl VolumeProvisioner for StorageCenterDriver {
    #[instrument(skip(self))]
    async fn create_volume(&self, volume: &VolumeRef) -> Result<VolumeUpdate> {
        let created = self.api.create_volume(&volume.name, volume.size_gb).await?;
        self.setup_replications(volume, &created).await?;
        Ok(VolumeUpdate::provider(&volume.name, created.instance_id))
    }

    #[instrument(skip(self))]
    async fn delete_volume(&self, volume: &VolumeRef) -> Result<()> {
        if volume.replicated {
            if let Some(sc_volume) = self
                .api
                .find_volume(&volume.name, volume.provider_id.as_deref())
                .await?
            {
                for target in &self.api.config.replication_targets {
                    if !self.api.delete_replication(&sc_volume, target.ssn, true).await? {
                        warn!("Unable to delete replication of {} to {}", volume.name, target.ssn);
                    }
                }
            }
        }
        if !self
            .api
            .delete_volume(&volume.name, volume.provider_id.as_deref())
            .await?
        {
            return Err(Error::backend(BACKEND, format!("Volume {} is busy", volume.name)));
        }
        Ok(())
    }

    #[instrument(skip(self, snapshot), fields(snapshot = %snapshot.id))]
    async fn create_snapshot(&self, snapshot: &SnapshotRef) -> Result<()> {
        let sc_volume = self.require_volume(&snapshot.volume).await?;
        self.api
            .create_replay(&sc_volume, &snapshot.id, 0)
            .await?
            .ok_or_else(|| {
                Error::backend(BACKEND, format!("Failed to create snapshot {}", snapshot.id))
            })?;
        Ok(())
    }

    #[instrument(skip(self, snapshot), fields(snapshot = %snapshot.id))]
    async fn delete_snapshot(&self, snapshot: &SnapshotRef) -> Result<()> {
        let Some(sc_volume) = self
            .api
            .find_volume(&snapshot.volume.name, snapshot.volume.provider_id.as_deref())
            .await?
        else {
            warn!("Volume {} not found, snapshot {} is gone", snapshot.volume.name, snapshot.id);
            return Ok(());
        };
        if !self.api.delete_replay(&sc_volume, &snapshot.id).await? {
            return Err(Error::backend(
                BACKEND,
                format!("Failed to delete snapshot {}", snapshot.id),
            ));
        }
        Ok(())
    }

    #[instrument(skip(self, snapshot), fields(snapshot = %snapshot.id))]
    async fn create_volume_from_snapshot(
        &self,
        volume: &VolumeRef,
        snapshot: &SnapshotRef,
    ) -> Result<VolumeUpdate> {
        let source = self.require_volume(&snapshot.volume).await?;
        let replay = self
            .api
            .find_replay(&source, &snapshot.id)
            .await?
            .ok_or_else(|| Error::not_found("replay", snapshot.id.clone()))?;
        let created = self.api.create_view_volume(&volume.name, &replay).await?;
        self.finish_new_volume(volume, created).await
    }

    #[instrument(skip(self, source), fields(source = %source.name))]
    async fn create_cloned_volume(
        &self,
        volume: &VolumeRef,
        source: &VolumeRef,
    ) -> Result<VolumeUpdate> {
        let sc_source = self.require_volume(source).await?;
        let created = self.api.create_cloned_volume(&volume.name, &sc_source).await?;
        self.finish_new_volume(volume, created).await
    }
}
