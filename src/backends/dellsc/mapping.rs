//! Servers and volume mappings

use super::api::{ScApi, BACKEND};
use super::models::{
    AddHbaPayload, CreateServerPayload, MapAdvanced, MapToServerPayload, MappingProfile,
    PayloadFilter, ScServer, ScServerHba, ScVolume,
};
use crate::domain::Protocol;
use crate::error::{Error, Result};
use serde_json::json;
use tracing::{debug, error, info, warn};

impl ScApi {
    // =========================================================================
    // Servers
    // =========================================================================

    pub async fn get_server(&self, instance_id: &str) -> Result<Option<ScServer>> {
        let resp = self
            .client
            .get(&format!("StorageCenter/ScServer/{}", instance_id))
            .await?;
        if !resp.is_success() {
            debug!("Server {} lookup returned {}", instance_id, resp.status);
            return Ok(None);
        }
        resp.first()
    }

    async fn find_server_hba(&self, initiator: &str) -> Result<Option<ScServerHba>> {
        let filter = PayloadFilter::new()
            .append("scSerialNumber", self.ssn())
            .append("instanceName", initiator);
        let resp = self
            .client
            .post("StorageCenter/ScServerHba/GetList", Self::payload(&filter)?, false)
            .await?;
        if !resp.is_success() {
            return Ok(None);
        }
        resp.first()
    }

    /// Server owning any of `initiators`
    pub async fn find_server(&self, initiators: &[String]) -> Result<Option<ScServer>> {
        for initiator in initiators {
            if let Some(hba) = self.find_server_hba(initiator).await? {
                if let Some(server) = self.get_server(&hba.server.instance_id).await? {
                    debug!("Initiator {} belongs to server {}", initiator, server.name);
                    return Ok(Some(server));
                }
            }
        }
        Ok(None)
    }

    async fn add_hba(&self, server: &ScServer, initiator: &str, protocol: Protocol) -> Result<bool> {
        let port_type = match protocol {
            Protocol::FibreChannel => "FibreChannel",
            Protocol::Iscsi => "Iscsi",
        };
        let body = AddHbaPayload {
            hba_port_type: port_type.to_string(),
            wwn_or_iscsi_name: initiator.to_string(),
            allow_manual: true,
        };
        let resp = self
            .client
            .post(
                &format!("StorageCenter/ScPhysicalServer/{}/AddHba", server.instance_id),
                Self::payload(&body)?,
                true,
            )
            .await?;
        if !resp.is_success() {
            error!("AddHba error {} to {}: HTTP {}", initiator, server.name, resp.status);
            return Ok(false);
        }
        Ok(true)
    }

    async fn delete_server(&self, server: &ScServer) -> Result<()> {
        let resp = self
            .client
            .delete(&format!("StorageCenter/ScServer/{}", server.instance_id), None, true)
            .await?;
        if !resp.is_success() {
            warn!("Unable to delete server {}", server.name);
        }
        Ok(())
    }

    /// Create a server and register its initiators. A server whose HBAs
    /// cannot all be added is deleted again.
    pub async fn create_server(
        &self,
        host: &str,
        initiators: &[String],
        protocol: Protocol,
    ) -> Result<ScServer> {
        let folder = self.find_server_folder(true).await?;
        let body = CreateServerPayload {
            name: host.to_string(),
            notes: self.notes(),
            storage_center: self.ssn(),
            operating_system: self.config.server_os.clone(),
            server_folder: folder.map(|f| f.instance_id),
        };
        let resp = self
            .client
            .post("StorageCenter/ScPhysicalServer", Self::payload(&body)?, true)
            .await?;
        let server: Option<ScServer> = if resp.is_success() { resp.first()? } else { None };
        let Some(server) = server else {
            error!("ScPhysicalServer create error {}: HTTP {}", host, resp.status);
            return Err(Error::backend(BACKEND, format!("Unable to create server {}", host)));
        };

        for initiator in initiators {
            if !self.add_hba(&server, initiator, protocol).await? {
                self.delete_server(&server).await?;
                return Err(Error::backend(
                    BACKEND,
                    format!("Unable to add initiator {} to server {}", initiator, host),
                ));
            }
        }
        info!("Created server {} with {} initiators", host, initiators.len());
        Ok(server)
    }

    pub async fn list_servers(&self, ssn: u64) -> Result<Vec<ScServer>> {
        let filter = PayloadFilter::new().append("scSerialNumber", ssn);
        let resp = self
            .client
            .post("StorageCenter/ScServer/GetList", Self::payload(&filter)?, false)
            .await?;
        if !resp.is_success() {
            return Ok(Vec::new());
        }
        resp.list()
    }

    // =========================================================================
    // Mappings
    // =========================================================================

    pub async fn find_mapping_profiles(&self, volume: &ScVolume) -> Result<Vec<MappingProfile>> {
        let resp = self
            .client
            .get(&format!("StorageCenter/ScVolume/{}/MappingProfileList", volume.instance_id))
            .await?;
        if !resp.is_success() {
            return Err(Error::UnexpectedStatus {
                backend: BACKEND.to_string(),
                method: "GET".to_string(),
                url: format!("StorageCenter/ScVolume/{}/MappingProfileList", volume.instance_id),
                status: resp.status,
            });
        }
        resp.list()
    }

    /// Map `volume` to `server`; an existing mapping is returned unchanged
    pub async fn map_volume(&self, volume: &ScVolume, server: &ScServer) -> Result<MappingProfile> {
        let profiles = self.find_mapping_profiles(volume).await?;
        if let Some(existing) = profiles
            .into_iter()
            .find(|p| p.server.instance_id == server.instance_id)
        {
            info!("Volume {} already mapped to {}", volume.name, server.name);
            return Ok(existing);
        }

        let body = MapToServerPayload {
            server: server.instance_id.clone(),
            advanced: MapAdvanced {
                map_to_down_server_hbas: true,
            },
        };
        let resp = self
            .client
            .post(
                &format!("StorageCenter/ScVolume/{}/MapToServer", volume.instance_id),
                Self::payload(&body)?,
                true,
            )
            .await?;
        let profile: Option<MappingProfile> = if resp.is_success() { resp.first()? } else { None };
        match profile {
            Some(profile) => {
                info!("Mapped volume {} to server {}", volume.name, server.name);
                Ok(profile)
            }
            None => {
                error!("Unable to map volume {} to {}: HTTP {}", volume.name, server.name, resp.status);
                Err(Error::backend(
                    BACKEND,
                    format!("Unable to map volume {} to {}", volume.name, server.name),
                ))
            }
        }
    }

    async fn delete_mapping_profile(&self, profile: &MappingProfile) -> Result<bool> {
        let resp = self
            .client
            .delete(&format!("StorageCenter/ScMappingProfile/{}", profile.instance_id), None, true)
            .await?;
        Ok(resp.is_success())
    }

    /// Remove the mappings of `volume` to `server`
    pub async fn unmap_volume(&self, volume: &ScVolume, server: &ScServer) -> Result<bool> {
        let profiles = self.find_mapping_profiles(volume).await?;
        for profile in profiles
            .iter()
            .filter(|p| p.server.instance_id == server.instance_id)
        {
            if !self.delete_mapping_profile(profile).await? {
                error!("Unable to unmap volume {} from {}", volume.name, server.name);
                return Ok(false);
            }
            info!("Unmapped volume {} from {}", volume.name, server.name);
        }
        Ok(true)
    }

    /// Remove every host mapping of `volume`. Mappings to remote Storage
    /// Centers carry replication and are left alone.
    pub async fn unmap_all(&self, volume: &ScVolume) -> Result<bool> {
        let profiles = self.find_mapping_profiles(volume).await?;
        for profile in &profiles {
            let server = self.get_server(&profile.server.instance_id).await?;
            let Some(server) = server.filter(|s| !s.is_remote_storage_center()) else {
                debug!("Skipping mapping profile {}", profile.instance_id);
                continue;
            };
            if !self.delete_mapping_profile(profile).await? {
                error!("Unable to unmap volume {} from {}", volume.name, server.name);
                return Ok(false);
            }
            info!("Unmapped volume {} from {}", volume.name, server.name);
        }
        Ok(true)
    }

    /// Unmap `volume` from everything, replication included
    pub async fn remove_mappings(&self, volume: &ScVolume) -> Result<bool> {
        let resp = self
            .client
            .post(
                &format!("StorageCenter/ScVolume/{}/Unmap", volume.instance_id),
                json!({}),
                true,
            )
            .await?;
        if !resp.is_success() {
            error!("Unable to remove mappings of volume {}", volume.name);
            return Ok(false);
        }
        Ok(true)
    }

    /// Give an empty volume storage by mapping it to any live server once.
    /// Replays of a volume that was never written fail otherwise.
    pub(super) async fn init_volume(&self, volume: &ScVolume) -> Result<()> {
        let servers = self.list_servers(volume.sc_serial_number).await?;
        for server in servers
            .iter()
            .filter(|s| !s.is_down() && !s.is_remote_storage_center())
        {
            if self.map_volume(volume, server).await.is_err() {
                continue;
            }
            let refreshed = self.get_volume(&volume.instance_id).await?;
            self.unmap_volume(volume, server).await?;
            if refreshed.map_or(false, |v| v.active) {
                debug!("Volume {} initialised through {}", volume.name, server.name);
                return Ok(());
            }
            debug!("Failed to activate volume {} via server {}", volume.name, server.name);
        }
        warn!(
            "Volume {} initialisation failure; snapshot and clone may fail on an inactive volume",
            volume.name
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::client::RestResponse;
    use super::super::fake::{self, FakeTransport};
    use super::super::ScConfig;
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    const PROFILES: &str = "StorageCenter/ScVolume/64702.5/MappingProfileList";
    const MAP: &str = "StorageCenter/ScVolume/64702.5/MapToServer";

    fn setup() -> (Arc<FakeTransport>, ScApi, ScVolume, ScServer) {
        let t = FakeTransport::new();
        let api = ScApi::new(t.clone(), ScConfig::default());
        let volume: ScVolume = serde_json::from_value(fake::volume("64702.5", "vol-a")).unwrap();
        let server: ScServer =
            serde_json::from_value(fake::server("64702.20", "host-a", "Physical")).unwrap();
        (t, api, volume, server)
    }

    #[tokio::test]
    async fn test_map_volume_is_idempotent() {
        let (t, api, volume, server) = setup();
        t.on(
            "GET",
            PROFILES,
            RestResponse::ok(json!([fake::mapping("64702.99", "64702.20", "64702.5", 3)])),
        );

        let profile = api.map_volume(&volume, &server).await.unwrap();
        assert_eq!(profile.instance_id, "64702.99");
        assert_eq!(t.count("POST", MAP), 0);
    }

    #[tokio::test]
    async fn test_map_volume_posts_when_unmapped() {
        let (t, api, volume, server) = setup();
        t.on("GET", PROFILES, RestResponse::ok(json!([])))
            .on(
                "POST",
                MAP,
                RestResponse::ok(fake::mapping("64702.100", "64702.20", "64702.5", 1)),
            );

        let profile = api.map_volume(&volume, &server).await.unwrap();
        assert_eq!(profile.lun_used, vec![1]);
        let body = t.last_payload("POST", MAP).unwrap();
        assert_eq!(body["server"], "64702.20");
        assert_eq!(body["Advanced"]["MapToDownServerHbas"], true);
        assert!(t.calls().iter().any(|c| c.url == MAP && c.is_async));
    }

    #[tokio::test]
    async fn test_map_volume_failure() {
        let (t, api, volume, server) = setup();
        t.on("GET", PROFILES, RestResponse::ok(json!([])))
            .on("POST", MAP, RestResponse::new(400, json!("nope")));
        assert_matches!(
            api.map_volume(&volume, &server).await,
            Err(Error::BackendApi { .. })
        );
    }

    #[tokio::test]
    async fn test_unmap_all_skips_remote_storage_centers() {
        let (t, api, volume, _) = setup();
        t.on(
            "GET",
            PROFILES,
            RestResponse::ok(json!([
                fake::mapping("64702.1", "64702.20", "64702.5", 1),
                fake::mapping("64702.2", "64702.21", "64702.5", 2)
            ])),
        )
        .on(
            "GET",
            "StorageCenter/ScServer/64702.20",
            RestResponse::ok(fake::server("64702.20", "host-a", "Physical")),
        )
        .on(
            "GET",
            "StorageCenter/ScServer/64702.21",
            RestResponse::ok(fake::server("64702.21", "remote", "RemoteStorageCenter")),
        )
        .on("DELETE", "StorageCenter/ScMappingProfile/64702.1", RestResponse::ok(json!(true)));

        assert!(api.unmap_all(&volume).await.unwrap());
        assert_eq!(t.count("DELETE", "StorageCenter/ScMappingProfile/64702.1"), 1);
        assert_eq!(t.count("DELETE", "StorageCenter/ScMappingProfile/64702.2"), 0);
    }

    #[tokio::test]
    async fn test_unmap_all_reports_single_failure() {
        let (t, api, volume, _) = setup();
        t.on(
            "GET",
            PROFILES,
            RestResponse::ok(json!([
                fake::mapping("64702.1", "64702.20", "64702.5", 1),
                fake::mapping("64702.2", "64702.20", "64702.5", 2)
            ])),
        )
        .on(
            "GET",
            "StorageCenter/ScServer/64702.20",
            RestResponse::ok(fake::server("64702.20", "host-a", "Physical")),
        )
        .on(
            "DELETE",
            "StorageCenter/ScMappingProfile/64702.1",
            RestResponse::new(500, json!("failed")),
        );

        assert!(!api.unmap_all(&volume).await.unwrap());
        assert_eq!(t.count("DELETE", "StorageCenter/ScMappingProfile/64702.2"), 0);
    }

    #[tokio::test]
    async fn test_create_server_deletes_server_when_hba_fails() {
        let (t, api, _, _) = setup();
        t.on("POST", "StorageCenter/ScServerFolder/GetList", RestResponse::ok(json!([{
            "instanceId": "64702.3", "name": "openstack"
        }])))
        .on(
            "POST",
            "StorageCenter/ScPhysicalServer",
            RestResponse::ok(fake::server("64702.30", "host-b", "Physical")),
        )
        .on(
            "POST",
            "StorageCenter/ScPhysicalServer/64702.30/AddHba",
            RestResponse::ok(json!(true)),
        )
        .on(
            "POST",
            "StorageCenter/ScPhysicalServer/64702.30/AddHba",
            RestResponse::new(400, json!("bad wwn")),
        )
        .on("DELETE", "StorageCenter/ScServer/64702.30", RestResponse::ok(json!(true)));

        let initiators = vec!["21000024ff30441c".to_string(), "21000024ff30441d".to_string()];
        let result = api
            .create_server("host-b", &initiators, Protocol::FibreChannel)
            .await;

        assert_matches!(result, Err(Error::BackendApi { .. }));
        assert_eq!(t.count("DELETE", "StorageCenter/ScServer/64702.30"), 1);
        let body = t
            .last_payload("POST", "StorageCenter/ScPhysicalServer")
            .unwrap();
        assert_eq!(body["ServerFolder"], "64702.3");
    }

    #[tokio::test]
    async fn test_find_server_by_any_initiator() {
        let (t, api, _, _) = setup();
        t.on("POST", "StorageCenter/ScServerHba/GetList", RestResponse::ok(json!([])))
            .on(
                "POST",
                "StorageCenter/ScServerHba/GetList",
                RestResponse::ok(json!([{
                    "instanceId": "64702.40",
                    "instanceName": "iqn.b",
                    "server": {"instanceId": "64702.20"}
                }])),
            )
            .on(
                "GET",
                "StorageCenter/ScServer/64702.20",
                RestResponse::ok(fake::server("64702.20", "host-a", "Physical")),
            );

        let server = api
            .find_server(&["iqn.a".to_string(), "iqn.b".to_string()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(server.name, "host-a");
    }
}
