//! Replication sessions between Storage Centers

use super::api::{ScApi, BACKEND};
use super::models::{
    CreateQosNodePayload, CreateReplicationPayload, DeleteReplicationPayload,
    DestinationVolumeAttributes, ModifyReplicationPayload, PayloadFilter, QosNode,
    ReplicateToCommonPayload, ReplicationType, ScReplication, ScVolume,
};
use crate::error::{Error, Result};
use tracing::{debug, error, info, instrument, warn};

const SYNC_MODE_HIGH_AVAILABILITY: &str = "HighAvailability";
const SYNC_MODE_HIGH_CONSISTENCY: &str = "HighConsistency";

impl ScApi {
    // =========================================================================
    // QoS Nodes
    // =========================================================================

    /// QoS node `name` on array `ssn`, created if missing
    pub async fn find_qos(&self, name: &str, ssn: u64) -> Result<Option<QosNode>> {
        let resp = self
            .client
            .get(&format!("StorageCenter/StorageCenter/{}/ReplicationQosNodeList", ssn))
            .await?;
        if resp.is_success() {
            let nodes: Vec<QosNode> = resp.list()?;
            if let Some(node) = nodes.into_iter().find(|n| n.name == name) {
                return Ok(Some(node));
            }
        } else {
            error!("Unable to list QoS nodes on {}: HTTP {}", ssn, resp.status);
            return Ok(None);
        }

        let body = CreateQosNodePayload {
            name: name.to_string(),
            link_speed: "1 Gbps".to_string(),
            bandwidth_limited: false,
            storage_center: ssn,
        };
        let resp = self
            .client
            .post("StorageCenter/ScReplicationQosNode", Self::payload(&body)?, true)
            .await?;
        if !resp.is_success() {
            error!("Unable to create QoS node {} on {}", name, ssn);
            return Ok(None);
        }
        info!("Created QoS node {} on {}", name, ssn);
        resp.first()
    }

    // =========================================================================
    // Replications
    // =========================================================================

    /// Replication of `volume` to array `dest_ssn`
    pub async fn get_replication(&self, volume: &ScVolume, dest_ssn: u64) -> Result<Option<ScReplication>> {
        let resp = self
            .client
            .get(&format!("StorageCenter/ScVolume/{}/ReplicationSourceList", volume.instance_id))
            .await?;
        if !resp.is_success() {
            debug!("Replication list of {} returned {}", volume.name, resp.status);
            return Ok(None);
        }
        let replications: Vec<ScReplication> = resp.list()?;
        Ok(replications
            .into_iter()
            .find(|r| r.destination_sc_serial_number == dest_ssn))
    }

    /// Replicate `volume` to `dest_ssn`; the destination volume is created
    /// by the array.
    #[instrument(skip(self, volume), fields(volume = %volume.name))]
    pub async fn create_replication(
        &self,
        volume: &ScVolume,
        dest_ssn: u64,
        qos_name: &str,
        replication_type: ReplicationType,
        auto_failover: bool,
        replicate_active: bool,
    ) -> Result<ScReplication> {
        self.find_sc(dest_ssn).await?;

        let qos = self
            .find_qos(qos_name, volume.sc_serial_number)
            .await?
            .ok_or_else(|| Error::not_found("QosNode", format!("{} on {}", qos_name, volume.sc_serial_number)))?;
        if self.find_qos(qos_name, dest_ssn).await?.is_none() {
            return Err(Error::not_found("QosNode", format!("{} on {}", qos_name, dest_ssn)));
        }

        let sync = replication_type == ReplicationType::Synchronous;
        let sync_mode = sync.then(|| {
            if auto_failover {
                SYNC_MODE_HIGH_AVAILABILITY.to_string()
            } else {
                SYNC_MODE_HIGH_CONSISTENCY.to_string()
            }
        });
        let body = CreateReplicationPayload {
            destination_storage_center: dest_ssn,
            qos_node: qos.instance_id,
            source_volume: volume.instance_id.clone(),
            storage_center: volume.sc_serial_number,
            replicate_active_replay: replicate_active || sync,
            replication_type,
            sync_mode,
            destination_volume: None,
            destination_volume_attributes: Some(DestinationVolumeAttributes {
                create_source_volume_folder_path: true,
                notes: self.notes(),
                name: Self::repl_name(&volume.name),
            }),
        };
        let resp = self
            .client
            .post("StorageCenter/ScReplication", Self::payload(&body)?, true)
            .await?;
        let replication: Option<ScReplication> = if resp.is_success() { resp.first()? } else { None };
        match replication {
            Some(replication) => {
                info!("Replicating {} to {}", volume.name, dest_ssn);
                Ok(replication)
            }
            None => Err(Error::backend(
                BACKEND,
                format!("Unable to replicate {} to {}", volume.name, dest_ssn),
            )),
        }
    }

    /// Remove the replication of `volume` to `dest_ssn`
    pub async fn delete_replication(
        &self,
        volume: &ScVolume,
        dest_ssn: u64,
        delete_destination: bool,
    ) -> Result<bool> {
        let Some(replication) = self.get_replication(volume, dest_ssn).await? else {
            warn!("No replication of {} to {}", volume.name, dest_ssn);
            return Ok(false);
        };
        let body = DeleteReplicationPayload {
            delete_destination_volume: delete_destination,
            recycle_destination_volume: delete_destination,
            delete_restore_point: true,
        };
        let resp = self
            .client
            .delete(
                &format!("StorageCenter/ScReplication/{}", replication.instance_id),
                Some(Self::payload(&body)?),
                true,
            )
            .await?;
        if !resp.is_success() {
            error!("Unable to delete replication of {} to {}", volume.name, dest_ssn);
            return Ok(false);
        }
        Ok(true)
    }

    /// Replicate `primary` into the existing volume `destination`
    pub async fn start_replication(
        &self,
        primary: &ScVolume,
        destination: &ScVolume,
        replication_type: ReplicationType,
        qos_name: &str,
        replicate_active: bool,
    ) -> Result<Option<ScReplication>> {
        let Some(qos) = self.find_qos(qos_name, primary.sc_serial_number).await? else {
            warn!("No QoS node {} on {}", qos_name, primary.sc_serial_number);
            return Ok(None);
        };
        let body = CreateReplicationPayload {
            destination_storage_center: destination.sc_serial_number,
            qos_node: qos.instance_id,
            source_volume: primary.instance_id.clone(),
            storage_center: primary.sc_serial_number,
            replicate_active_replay: replicate_active,
            replication_type,
            sync_mode: None,
            destination_volume: Some(destination.instance_id.clone()),
            destination_volume_attributes: None,
        };
        let resp = self
            .client
            .post("StorageCenter/ScReplication", Self::payload(&body)?, true)
            .await?;
        if !resp.is_success() {
            error!(
                "Unable to replicate {} into {}: HTTP {}",
                primary.name, destination.name, resp.status
            );
            return Ok(None);
        }
        resp.first()
    }

    /// Reverse the replication between `src` and `dest` and swap their
    /// names so the service keeps finding its volume under `name`.
    ///
    /// Nothing is reversed unless the current session was deleted. A rename
    /// failure is reported as `false` with the reversed session left in place.
    #[instrument(skip(self, src, dest))]
    pub async fn flip_replication(
        &self,
        src: &ScVolume,
        dest: &ScVolume,
        name: &str,
        replication_type: ReplicationType,
        qos_name: &str,
        replicate_active: bool,
    ) -> Result<bool> {
        if !self.delete_replication(src, dest.sc_serial_number, false).await? {
            warn!("flip_replication: unable to remove replication of {} to {}", src.name, dest.name);
            return Ok(false);
        }
        let started = self
            .start_replication(dest, src, replication_type, qos_name, replicate_active)
            .await?;
        if started.is_some() {
            if self.rename_volume(src, &Self::repl_name(name)).await?
                && self.rename_volume(dest, name).await?
            {
                info!("Replication of {} now runs from {}", name, dest.sc_serial_number);
                return Ok(true);
            }
        }
        warn!("flip_replication: unable to replicate {} to {}", dest.name, src.name);
        Ok(false)
    }

    /// Replicate `src` into `target`, which already receives a replication
    /// from a common source.
    pub async fn replicate_to_common(
        &self,
        src: &ScVolume,
        target: &ScVolume,
        qos_name: &str,
    ) -> Result<Option<ScReplication>> {
        let Some(qos) = self.find_qos(qos_name, src.sc_serial_number).await? else {
            warn!("No QoS node {} on {}", qos_name, src.sc_serial_number);
            return Ok(None);
        };
        let body = ReplicateToCommonPayload {
            qos_node: qos.instance_id,
            common_destination_volume: target.instance_id.clone(),
        };
        let resp = self
            .client
            .post(
                &format!("StorageCenter/ScVolume/{}/ReplicateToCommon", src.instance_id),
                Self::payload(&body)?,
                true,
            )
            .await?;
        if !resp.is_success() {
            error!("ReplicateToCommon of {} into {} failed", src.name, target.name);
            return Ok(None);
        }
        resp.first()
    }

    /// Set active-replay replication on every replication of `volume`
    pub async fn update_replicate_active_replay(&self, volume: &ScVolume, active: bool) -> Result<bool> {
        let resp = self
            .client
            .get(&format!("StorageCenter/ScVolume/{}/ReplicationSourceList", volume.instance_id))
            .await?;
        if !resp.is_success() {
            return Ok(true);
        }
        let replications: Vec<ScReplication> = resp.list()?;
        for replication in replications
            .iter()
            .filter(|r| r.replicate_active_replay != active)
        {
            let body = ModifyReplicationPayload {
                replicate_active_replay: active,
            };
            let resp = self
                .client
                .put(
                    &format!("StorageCenter/ScReplication/{}", replication.instance_id),
                    Self::payload(&body)?,
                    true,
                )
                .await?;
            if !resp.is_success() {
                error!("Unable to update replication {}", replication.instance_id);
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Destination volume of the replication of volume `name` on `dest_ssn`
    pub async fn find_repl_volume(
        &self,
        name: &str,
        dest_ssn: u64,
        instance_id: Option<&str>,
    ) -> Result<Option<ScVolume>> {
        let mut filter = PayloadFilter::new().append("scSerialNumber", dest_ssn);
        filter = match instance_id {
            Some(id) => filter.append("instanceId", id),
            None => filter.append("Name", name),
        };
        filter = filter.append("ReplicationDestination", true);
        let mut volumes = self.get_volume_list(filter).await?;
        if volumes.len() == 1 {
            return Ok(volumes.pop());
        }
        debug!("Found {} replication destinations for {}", volumes.len(), name);
        Ok(None)
    }

    /// Take the destination of the replication of `name` out of the session
    /// so the destination array can serve it. The source is unmapped on a
    /// best-effort basis.
    #[instrument(skip(self))]
    pub async fn break_replication(
        &self,
        name: &str,
        provider_id: Option<&str>,
        dest_ssn: u64,
    ) -> Result<Option<ScVolume>> {
        let source = self.find_volume(name, provider_id).await?;
        let mut dest_id = None;
        if let Some(source) = &source {
            if let Some(replication) = self.get_replication(source, dest_ssn).await? {
                dest_id = Some(replication.destination_volume.instance_id);
            }
        }

        let destination = self
            .find_repl_volume(&Self::repl_name(name), dest_ssn, dest_id.as_deref())
            .await?;
        if let Some(destination) = &destination {
            if self.remove_mappings(destination).await? {
                if let Some(source) = &source {
                    if let Err(e) = self.remove_mappings(source).await {
                        debug!("Unable to unmap source {}: {}", source.name, e);
                    }
                }
            }
        }
        Ok(destination)
    }
}
