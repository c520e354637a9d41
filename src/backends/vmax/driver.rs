//! VMAX volume driver

use super::masking::{MaskedVolume, MaskingEngine, MaskingRequest, TeardownRequest};
use super::policy::choose_port_group;
use super::smis::{Device, SmisConnectionRef};
use super::utils::{SmisUtils, BACKEND};
use super::VmaxConfig;
use crate::domain::{ConnectionInfo, Connector, VolumeDriver, VolumeRef};
use crate::error::{Error, Result};
use crate::locks::LockRegistry;
use async_trait::async_trait;
use tracing::{debug, instrument, warn};

/// [`VolumeDriver`] for one VMAX array
pub struct VmaxDriver {
    engine: MaskingEngine,
    config: VmaxConfig,
}

impl VmaxDriver {
    pub fn new(conn: SmisConnectionRef, config: VmaxConfig) -> Self {
        let utils = SmisUtils::new(conn, config.job_poll);
        Self {
            engine: MaskingEngine::new(utils, LockRegistry::new()),
            config,
        }
    }

    pub fn engine(&self) -> &MaskingEngine {
        &self.engine
    }

    /// The provider id of a VMAX volume is its device id
    async fn find_device(&self, volume: &VolumeRef) -> Result<Option<Device>> {
        let device_id = volume.provider_id.as_deref().unwrap_or(&volume.name);
        self.engine
            .utils()
            .conn()
            .find_device(&self.config.system, device_id)
            .await
    }

    async fn require_device(&self, volume: &VolumeRef) -> Result<Device> {
        self.find_device(volume)
            .await?
            .ok_or_else(|| Error::not_found("volume", volume.name.clone()))
    }

    fn masking_request(&self, volume: &VolumeRef, device: Device, connector: &Connector) -> Result<MaskingRequest> {
        let port_group = choose_port_group(&self.config.port_groups, &connector.host)
            .ok_or_else(|| Error::Configuration("vmax: no port groups configured".into()))?;
        Ok(MaskingRequest {
            system: self.config.system.clone(),
            volume_name: volume.name.clone(),
            device,
            names: self
                .config
                .policy
                .names(&connector.host, connector.protocol, port_group),
            policy: self.config.policy.clone(),
            protocol: connector.protocol,
            initiators: connector.initiators.clone(),
            live_migration: false,
        })
    }

    /// Current mapping of the volume through the view named in `req`
    async fn existing_mapping(&self, req: &MaskingRequest) -> Result<Option<MaskedVolume>> {
        let utils = self.engine.utils();
        for (group, view) in utils.masked_storage_groups(&req.device).await? {
            if view.name != req.names.masking_view {
                continue;
            }
            if let Some(lun) = utils.conn().host_lun(&req.device, &view).await? {
                return Ok(Some(MaskedVolume {
                    view,
                    storage_group: group.name,
                    lun,
                }));
            }
        }
        Ok(None)
    }

    /// Mask `volume` to the host of `connector`. A live-migrating volume is
    /// not taken out of, or returned to, its default storage group.
    #[instrument(skip(self, connector), fields(host = %connector.host))]
    pub async fn attach(
        &self,
        volume: &VolumeRef,
        connector: &Connector,
        live_migration: bool,
    ) -> Result<ConnectionInfo> {
        let device = self.require_device(volume).await?;
        let mut req = self.masking_request(volume, device, connector)?;
        req.live_migration = live_migration;

        let masked = match self.existing_mapping(&req).await? {
            Some(masked) => {
                debug!("Volume {} already masked through {}", volume.name, masked.view.name);
                masked
            }
            None => self.engine.setup_masking_view(&req).await?,
        };
        Ok(ConnectionInfo {
            protocol: connector.protocol,
            volume_name: volume.name.clone(),
            lun: Some(masked.lun),
            access_path: masked.view.name,
        })
    }
}

#[async_trait]
impl VolumeDriver for VmaxDriver {
    fn backend_name(&self) -> &str {
        BACKEND
    }

    async fn initialize_connection(
        &self,
        volume: &VolumeRef,
        connector: &Connector,
    ) -> Result<ConnectionInfo> {
        self.attach(volume, connector, false).await
    }

    #[instrument(skip(self, connector))]
    async fn terminate_connection(
        &self,
        volume: &VolumeRef,
        connector: Option<&Connector>,
    ) -> Result<()> {
        let Some(device) = self.find_device(volume).await? else {
            warn!("Volume {} not found, nothing to unmask", volume.name);
            return Ok(());
        };
        let masking_view = connector.map(|c| {
            self.config
                .policy
                .names(&c.host, c.protocol, "")
                .masking_view
        });
        let req = TeardownRequest {
            system: self.config.system.clone(),
            volume_name: volume.name.clone(),
            device,
            policy: self.config.policy.clone(),
            masking_view,
        };
        self.engine.remove_and_reset(&req).await
    }

    async fn health_check(&self) -> Result<bool> {
        self.engine
            .utils()
            .conn()
            .controller_config_service(&self.config.system)
            .await?;
        Ok(true)
    }
}
