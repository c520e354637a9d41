//! Masking view setup, rollback and teardown
//!
//! A volume managed by a FAST policy or SLO lives in exactly one of its
//! default storage group or a masking-view storage group. Attach moves it
//! from the first to the second, detach moves it back, and any failure in
//! between puts it back where it started before the error is returned.

use super::policy::{MaskingNames, ProvisioningPolicy};
use super::smis::{
    CimRef, Device, GroupKind, MaskingGroup, MaskingView, ViewGroups,
};
use super::state::{MaskingLifecycle, MaskingState};
use super::utils::{SmisUtils, BACKEND};
use crate::domain::Protocol;
use crate::error::{Error, Result};
use crate::locks::LockRegistry;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Everything needed to mask one volume to one host
#[derive(Debug, Clone)]
pub struct MaskingRequest {
    pub system: String,
    pub volume_name: String,
    pub device: Device,
    pub names: MaskingNames,
    pub policy: ProvisioningPolicy,
    pub protocol: Protocol,
    pub initiators: Vec<String>,
    /// The volume is already outside its default group
    pub live_migration: bool,
}

/// A volume visible to a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskedVolume {
    pub view: MaskingView,
    pub storage_group: String,
    pub lun: u32,
}

/// Detach of one volume
#[derive(Debug, Clone)]
pub struct TeardownRequest {
    pub system: String,
    pub volume_name: String,
    pub device: Device,
    pub policy: ProvisioningPolicy,
    /// Only tear down this view; every view of the volume when `None`
    pub masking_view: Option<String>,
}

/// Drives the masking lifecycle against the array
pub struct MaskingEngine {
    utils: SmisUtils,
    locks: Arc<LockRegistry>,
}

impl MaskingEngine {
    pub fn new(utils: SmisUtils, locks: Arc<LockRegistry>) -> Self {
        Self { utils, locks }
    }

    pub fn utils(&self) -> &SmisUtils {
        &self.utils
    }

    // =========================================================================
    // Setup
    // =========================================================================

    /// Mask `req.device` to the host named in `req.names`.
    ///
    /// Errors before the volume leaves its default group need no rollback.
    /// Errors after it are rolled back; if the rollback itself fails the
    /// result is [`Error::RollbackFailed`] carrying both reasons.
    #[instrument(skip(self, req), fields(volume = %req.volume_name, view = %req.names.masking_view))]
    pub async fn setup_masking_view(&self, req: &MaskingRequest) -> Result<MaskedVolume> {
        let _guard = self.locks.lock(&req.names.masking_view).await;
        let mut life = MaskingLifecycle::new(&req.volume_name, MaskingState::Unmasked);
        let ccs = self.utils.conn.controller_config_service(&req.system).await?;

        let leaves_default = !req.live_migration && req.policy.default_group_name().is_some();
        if leaves_default {
            life.advance(MaskingState::PendingRemoval)?;
            if let Err(e) = self.leave_default_group(&ccs, req).await {
                life.advance(MaskingState::Unmasked)?;
                error!("Volume {} could not leave its default group: {}", req.volume_name, e);
                return Err(e);
            }
        }
        life.advance(MaskingState::PendingMaskingSetup)?;

        match self.build_masking_view(&ccs, req).await {
            Ok(masked) => {
                life.advance(MaskingState::Masked {
                    view: masked.view.name.clone(),
                })?;
                info!(
                    "Volume {} masked through {} at LUN {}",
                    req.volume_name, masked.view.name, masked.lun
                );
                Ok(masked)
            }
            Err(original) => {
                error!(
                    "Masking view {} setup failed for {}: {}",
                    req.names.masking_view, req.volume_name, original
                );
                if let Err(rollback) = self.rollback(&ccs, req).await {
                    error!(
                        "Rollback of volume {} failed: {}; it must be returned to its default group manually",
                        req.volume_name, rollback
                    );
                    return Err(Error::RollbackFailed {
                        volume: req.volume_name.clone(),
                        original: original.to_string(),
                        reason: rollback.to_string(),
                    });
                }
                life.advance(MaskingState::Unmasked)?;
                Err(Error::MaskingFailed {
                    volume: req.volume_name.clone(),
                    masking_view: req.names.masking_view.clone(),
                    reason: original.to_string(),
                })
            }
        }
    }

    async fn leave_default_group(&self, ccs: &CimRef, req: &MaskingRequest) -> Result<()> {
        let group = self
            .utils
            .get_and_verify_default_storage_group(&req.system, &req.device, &req.policy)
            .await?;
        self.utils.remove_device(ccs, &group, &req.device).await
    }

    async fn build_masking_view(&self, ccs: &CimRef, req: &MaskingRequest) -> Result<MaskedVolume> {
        let conn = &self.utils.conn;
        let view = match conn.find_masking_view(&req.system, &req.names.masking_view).await? {
            Some(view) => {
                debug!("Reusing masking view {}", view.name);
                let groups = conn.masking_view_groups(&view).await?;
                self.verify_view_initiators(&groups.initiator, req).await?;
                if !self.utils.is_member(&groups.storage, &req.device).await? {
                    self.utils
                        .add_device_verified(ccs, &groups.storage, &req.device)
                        .await?;
                }
                view
            }
            None => {
                let storage = self.get_or_create_storage_group(ccs, req).await?;
                let port = conn
                    .find_group(&req.system, &req.names.port_group, GroupKind::Port)
                    .await?
                    .ok_or_else(|| Error::not_found("port group", req.names.port_group.clone()))?;
                let initiator = self.get_or_create_initiator_group(ccs, req).await?;

                self.utils.add_device_verified(ccs, &storage, &req.device).await?;
                let groups = ViewGroups {
                    storage,
                    initiator,
                    port,
                };
                self.create_masking_view(ccs, req, &groups).await?
            }
        };

        let storage_group = conn.masking_view_groups(&view).await?.storage.name;
        let lun = conn
            .host_lun(&req.device, &view)
            .await?
            .ok_or_else(|| {
                Error::backend(
                    BACKEND,
                    format!("No LUN for volume {} in {}", req.volume_name, view.name),
                )
            })?;
        Ok(MaskedVolume {
            view,
            storage_group,
            lun,
        })
    }

    async fn get_or_create_storage_group(&self, ccs: &CimRef, req: &MaskingRequest) -> Result<MaskingGroup> {
        let name = &req.names.storage_group;
        if let Some(group) = self.utils.find_storage_group(&req.system, name).await? {
            return Ok(group);
        }
        let service_level = req.policy.service_level();
        let result = self
            .utils
            .conn
            .create_storage_group(ccs, name, service_level.as_ref())
            .await?;
        self.utils
            .check_invoke(&format!("creating storage group {}", name), result)
            .await?;
        let group = self
            .utils
            .find_storage_group(&req.system, name)
            .await?
            .ok_or_else(|| Error::backend(BACKEND, format!("Storage group {} not found after create", name)))?;
        info!("Created storage group {}", name);

        if let Some(fast_policy) = req.policy.fast_policy() {
            self.utils
                .associate_with_tier_policy(&req.system, &group, fast_policy)
                .await?;
        }
        Ok(group)
    }

    async fn get_or_create_initiator_group(&self, ccs: &CimRef, req: &MaskingRequest) -> Result<MaskingGroup> {
        let conn = &self.utils.conn;
        if let Some(group) = conn.find_initiator_group_for(&req.system, &req.initiators).await? {
            debug!("Initiators already grouped in {}", group.name);
            return Ok(group);
        }

        let mut hardware_ids = conn.find_hardware_ids(&req.system, &req.initiators).await?;
        let missing: Vec<&String> = req
            .initiators
            .iter()
            .filter(|i| !hardware_ids.iter().any(|h| &h.storage_id == *i))
            .collect();
        for initiator in missing {
            let result = conn
                .create_hardware_id(&req.system, initiator, req.protocol)
                .await?;
            self.utils
                .check_invoke(&format!("creating hardware id {}", initiator), result)
                .await?;
        }
        if hardware_ids.len() < req.initiators.len() {
            hardware_ids = conn.find_hardware_ids(&req.system, &req.initiators).await?;
        }
        if hardware_ids.is_empty() {
            return Err(Error::not_found("hardware id", req.initiators.join(",")));
        }

        let name = &req.names.initiator_group;
        let paths: Vec<CimRef> = hardware_ids.into_iter().map(|h| h.path).collect();
        let result = conn.create_initiator_group(ccs, name, &paths).await?;
        self.utils
            .check_invoke(&format!("creating initiator group {}", name), result)
            .await?;
        let group = conn
            .find_group(&req.system, name, GroupKind::Initiator)
            .await?
            .ok_or_else(|| Error::backend(BACKEND, format!("Initiator group {} not found after create", name)))?;
        info!("Created initiator group {}", name);
        Ok(group)
    }

    async fn verify_view_initiators(&self, group: &MaskingGroup, req: &MaskingRequest) -> Result<()> {
        let grouped = self.utils.conn.group_initiators(group).await?;
        if req.initiators.iter().any(|i| grouped.contains(i)) {
            return Ok(());
        }
        Err(Error::backend(
            BACKEND,
            format!(
                "Initiator group {} of view {} does not hold any initiator of the host",
                group.name, req.names.masking_view
            ),
        ))
    }

    async fn create_masking_view(
        &self,
        ccs: &CimRef,
        req: &MaskingRequest,
        groups: &ViewGroups,
    ) -> Result<MaskingView> {
        let name = &req.names.masking_view;
        let conn = &self.utils.conn;
        let result = conn.create_masking_view(ccs, name, groups).await?;
        self.utils
            .check_invoke(&format!("creating masking view {}", name), result)
            .await?;
        let view = conn
            .find_masking_view(&req.system, name)
            .await?
            .ok_or_else(|| Error::backend(BACKEND, format!("Masking view {} not found after create", name)))?;
        info!("Created masking view {}", name);
        Ok(view)
    }

    /// Take the volume out of any masking group it reached and return it to
    /// its default group
    async fn rollback(&self, ccs: &CimRef, req: &MaskingRequest) -> Result<()> {
        let conn = &self.utils.conn;
        if let Some(group) = self
            .utils
            .find_storage_group(&req.system, &req.names.storage_group)
            .await?
        {
            if self.utils.is_member(&group, &req.device).await? {
                self.utils.remove_device(ccs, &group, &req.device).await?;
            }
        }
        if let Some(view) = conn.find_masking_view(&req.system, &req.names.masking_view).await? {
            let groups = conn.masking_view_groups(&view).await?;
            if groups.storage.name != req.names.storage_group
                && self.utils.is_member(&groups.storage, &req.device).await?
            {
                self.utils.remove_device(ccs, &groups.storage, &req.device).await?;
            }
        }
        if req.live_migration {
            return Ok(());
        }
        self.utils
            .return_to_default_storage_group(ccs, &req.system, &req.device, &req.policy)
            .await?;
        warn!("Volume {} returned to its default storage group", req.volume_name);
        Ok(())
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Unmask the volume and return it to its default group. The last volume
    /// out of a view takes the view with it; its emptied storage group is
    /// deleted once the volume is back in its default group.
    ///
    /// A failure that leaves the volume in no storage group is followed by a
    /// return to the default group. If that fails too the result is
    /// [`Error::RollbackFailed`].
    #[instrument(skip(self, req), fields(volume = %req.volume_name))]
    pub async fn remove_and_reset(&self, req: &TeardownRequest) -> Result<()> {
        let ccs = self.utils.conn.controller_config_service(&req.system).await?;
        let masked = self.utils.masked_storage_groups(&req.device).await?;
        let targets: Vec<(MaskingGroup, MaskingView)> = masked
            .into_iter()
            .filter(|(_, view)| req.masking_view.as_ref().map_or(true, |name| &view.name == name))
            .collect();
        if targets.is_empty() {
            warn!("Volume {} is not in any masking view", req.volume_name);
        }

        for (group, view) in targets {
            let mut life = MaskingLifecycle::new(
                &req.volume_name,
                MaskingState::Masked {
                    view: view.name.clone(),
                },
            );
            life.advance(MaskingState::PendingTeardown {
                view: view.name.clone(),
            })?;
            let _guard = self.locks.lock(&view.name).await;
            let emptied = match self.remove_from_view(&ccs, req, &group, &view).await {
                Ok(emptied) => emptied,
                Err(original) => {
                    return Err(self.restore_default_membership(&ccs, req, original).await)
                }
            };
            if let Err(reason) = self
                .utils
                .return_to_default_storage_group(&ccs, &req.system, &req.device, &req.policy)
                .await
            {
                error!(
                    "Volume {} left {} but could not rejoin its default group: {}",
                    req.volume_name, view.name, reason
                );
                return Err(Error::RollbackFailed {
                    volume: req.volume_name.clone(),
                    original: format!("removed from masking view {}", view.name),
                    reason: reason.to_string(),
                });
            }
            if let Some(emptied) = emptied {
                if let Err(e) = self.utils.delete_group(&ccs, &emptied).await {
                    warn!("Unable to delete empty storage group {}: {}", emptied.name, e);
                }
            }
            life.advance(MaskingState::Unmasked)?;
        }

        // A volume found outside every group is put back too.
        self.utils
            .return_to_default_storage_group(&ccs, &req.system, &req.device, &req.policy)
            .await
    }

    /// Returns the storage group the volume emptied, if it was the last one.
    async fn remove_from_view(
        &self,
        ccs: &CimRef,
        req: &TeardownRequest,
        group: &MaskingGroup,
        view: &MaskingView,
    ) -> Result<Option<MaskingGroup>> {
        let members = self.utils.conn.group_members(group).await?;
        if !members.contains(&req.device.path) {
            debug!("Volume {} already left {}", req.volume_name, group.name);
            return Ok(None);
        }
        if members.len() > 1 {
            self.utils.remove_device(ccs, group, &req.device).await?;
            return Ok(None);
        }

        info!(
            "Volume {} is the last in {}; deleting masking view {}",
            req.volume_name, group.name, view.name
        );
        let groups = self.utils.conn.masking_view_groups(view).await?;
        self.utils.delete_masking_view(ccs, view).await?;
        self.delete_unused_initiator_group(ccs, &groups.initiator).await;
        if let Some(fast_policy) = req.policy.fast_policy() {
            self.utils
                .disassociate_from_tier_policy(&req.system, group, fast_policy)
                .await?;
        }
        self.utils.remove_device(ccs, group, &req.device).await?;
        Ok(Some(group.clone()))
    }

    /// After a failed teardown step: a volume still held by some storage
    /// group is left there, one held by none goes back to its default group.
    async fn restore_default_membership(
        &self,
        ccs: &CimRef,
        req: &TeardownRequest,
        original: Error,
    ) -> Error {
        match self.utils.conn.storage_groups_of_device(&req.device).await {
            Ok(groups) if !groups.is_empty() => {
                warn!(
                    "Teardown of volume {} failed; it is still in {}",
                    req.volume_name,
                    groups.iter().map(|g| g.name.as_str()).collect::<Vec<_>>().join(", ")
                );
                return original;
            }
            Ok(_) => {}
            Err(e) => warn!("Unable to list storage groups of volume {}: {}", req.volume_name, e),
        }
        match self
            .utils
            .return_to_default_storage_group(ccs, &req.system, &req.device, &req.policy)
            .await
        {
            Ok(()) => {
                warn!("Volume {} returned to its default storage group", req.volume_name);
                original
            }
            Err(reason) => {
                error!(
                    "Volume {} is in no storage group after {}; return it to its default group manually",
                    req.volume_name, original
                );
                Error::RollbackFailed {
                    volume: req.volume_name.clone(),
                    original: original.to_string(),
                    reason: reason.to_string(),
                }
            }
        }
    }

    async fn delete_unused_initiator_group(&self, ccs: &CimRef, group: &MaskingGroup) {
        match self.utils.conn.views_of_group(group).await {
            Ok(views) if views.is_empty() => {
                if let Err(e) = self.utils.delete_group(ccs, group).await {
                    warn!("Unable to delete initiator group {}: {}", group.name, e);
                }
            }
            Ok(views) => warn!(
                "Initiator group {} is still used by {} masking views",
                group.name,
                views.len()
            ),
            Err(e) => warn!("Unable to check initiator group {}: {}", group.name, e),
        }
    }
}
