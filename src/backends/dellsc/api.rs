//! Storage Center API
//!
//! `ScApi` wraps the REST transport with the object-level operations the
//! driver composes: folders, volumes, servers, mappings, replays, copies and
//! replications. This file holds the session state, folder and volume
//! handling; the rest live in sibling modules as further `impl ScApi` blocks.

use super::client::RestTransport;
use super::models::{
    CreateFolderPayload, CreateVolumePayload, ExpandVolumePayload, ModifyVolumePayload,
    PayloadFilter, ScFolder, ScStorageCenter, ScVolume,
};
use super::ScConfig;
use crate::domain::ProviderId;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub(super) const BACKEND: &str = "dellsc";

const VOLUME_FOLDER_URL: &str = "StorageCenter/ScVolumeFolder";
const SERVER_FOLDER_URL: &str = "StorageCenter/ScServerFolder";

/// Which array calls are addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScSession {
    /// Array new objects are created on
    pub ssn: u64,
    /// Array from configuration
    pub primary_ssn: u64,
    pub failed_over: bool,
}

/// Object-level Storage Center operations
pub struct ScApi {
    pub(super) client: Arc<dyn RestTransport>,
    pub(super) config: ScConfig,
    session: RwLock<ScSession>,
}

impl ScApi {
    pub fn new(client: Arc<dyn RestTransport>, config: ScConfig) -> Self {
        let session = ScSession {
            ssn: config.ssn,
            primary_ssn: config.ssn,
            failed_over: false,
        };
        Self {
            client,
            config,
            session: RwLock::new(session),
        }
    }

    pub fn session(&self) -> ScSession {
        *self.session.read()
    }

    pub fn ssn(&self) -> u64 {
        self.session.read().ssn
    }

    pub fn is_failed_over(&self) -> bool {
        self.session.read().failed_over
    }

    /// Address all further calls to `ssn`
    pub fn failover(&self, ssn: u64) {
        let mut session = self.session.write();
        session.ssn = ssn;
        session.failed_over = ssn != session.primary_ssn;
        info!(
            "Storage Center session now targets {} (failed over: {})",
            ssn, session.failed_over
        );
    }

    pub(super) fn notes(&self) -> String {
        self.config.notes.clone()
    }

    /// Name of the replication destination of volume `name`
    pub fn repl_name(name: &str) -> String {
        format!("Cinder repl of {}", name)
    }

    /// Provider ids are only trusted when they belong to the active array
    pub(super) fn use_provider_id(&self, provider_id: Option<&str>) -> bool {
        let Some(raw) = provider_id else {
            return false;
        };
        match raw.parse::<ProviderId>() {
            Ok(id) if id.is_on(self.ssn()) => true,
            Ok(_) => {
                debug!("Provider id {} is not on array {}", raw, self.ssn());
                false
            }
            Err(e) => {
                warn!("Ignoring provider id: {}", e);
                false
            }
        }
    }

    pub(super) fn payload<T: Serialize>(body: &T) -> Result<Value> {
        Ok(serde_json::to_value(body)?)
    }

    // =========================================================================
    // Storage Center
    // =========================================================================

    /// Instance id of the Storage Center with serial `ssn`
    pub async fn find_sc(&self, ssn: u64) -> Result<String> {
        let resp = self.client.get("StorageCenter/StorageCenter").await?;
        if resp.is_success() {
            let scs: Vec<ScStorageCenter> = resp.list()?;
            if let Some(sc) = scs.into_iter().find(|sc| sc.sc_serial_number == ssn) {
                return Ok(sc.instance_id);
            }
        }
        error!("Failed to find Storage Center {}", ssn);
        Err(Error::not_found("StorageCenter", ssn.to_string()))
    }

    // =========================================================================
    // Folders
    // =========================================================================

    async fn find_folder(&self, url: &str, path: &str, ssn: u64) -> Result<Option<ScFolder>> {
        let (parent, name) = match path.rsplit_once('/') {
            Some((parent, name)) => (format!("{}/", parent), name),
            None => (String::new(), path),
        };
        let mut filter = PayloadFilter::new()
            .append("scSerialNumber", ssn)
            .append("Name", name);
        if !parent.is_empty() {
            filter = filter.append("folderPath", parent.as_str());
        }

        let resp = self
            .client
            .post(&format!("{}/GetList", url), Self::payload(&filter)?, false)
            .await?;
        if !resp.is_success() {
            debug!("Folder search {} returned {}", path, resp.status);
            return Ok(None);
        }
        let folders: Vec<ScFolder> = resp.list()?;
        Ok(folders
            .into_iter()
            .find(|f| f.folder_path.as_deref().unwrap_or("") == parent))
    }

    async fn create_folder(
        &self,
        url: &str,
        parent: Option<&ScFolder>,
        name: &str,
        ssn: u64,
    ) -> Result<Option<ScFolder>> {
        let body = CreateFolderPayload {
            name: name.to_string(),
            notes: self.notes(),
            storage_center: ssn,
            parent: parent.map(|p| p.instance_id.clone()),
        };
        let resp = self.client.post(url, Self::payload(&body)?, false).await?;
        if !resp.is_success() {
            error!("Unable to create folder {}: HTTP {}", name, resp.status);
            return Ok(None);
        }
        resp.first()
    }

    /// Find or create every segment of `path`, parent first
    pub async fn create_folder_path(&self, url: &str, path: &str, ssn: u64) -> Result<Option<ScFolder>> {
        let mut parent: Option<ScFolder> = None;
        let mut prefix = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let full = format!("{}{}", prefix, segment);
            let folder = match self.find_folder(url, &full, ssn).await? {
                Some(found) => Some(found),
                None => self.create_folder(url, parent.as_ref(), segment, ssn).await?,
            };
            match folder {
                Some(folder) => parent = Some(folder),
                None => {
                    warn!("Unable to create folder path {}", path);
                    return Ok(None);
                }
            }
            prefix = format!("{}/", full);
        }
        Ok(parent)
    }

    async fn find_or_create_folder(
        &self,
        url: &str,
        path: &str,
        create: bool,
    ) -> Result<Option<ScFolder>> {
        let ssn = self.ssn();
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(None);
        }
        match self.find_folder(url, trimmed, ssn).await? {
            Some(folder) => Ok(Some(folder)),
            None if create => self.create_folder_path(url, trimmed, ssn).await,
            None => Ok(None),
        }
    }

    pub(super) async fn find_volume_folder(&self, create: bool) -> Result<Option<ScFolder>> {
        self.find_or_create_folder(VOLUME_FOLDER_URL, &self.config.volume_folder, create)
            .await
    }

    pub(super) async fn find_server_folder(&self, create: bool) -> Result<Option<ScFolder>> {
        self.find_or_create_folder(SERVER_FOLDER_URL, &self.config.server_folder, create)
            .await
    }

    // =========================================================================
    // Volumes
    // =========================================================================

    /// Create a volume of `size_gb` in the volume folder
    pub async fn create_volume(&self, name: &str, size_gb: u64) -> Result<ScVolume> {
        let folder = self.find_volume_folder(true).await?;
        if folder.is_none() {
            warn!("Unable to create folder path {}", self.config.volume_folder);
        }
        let body = CreateVolumePayload {
            name: name.to_string(),
            notes: self.notes(),
            size: format!("{} GB", size_gb),
            storage_center: self.ssn(),
            volume_folder: folder.map(|f| f.instance_id),
        };
        let resp = self
            .client
            .post("StorageCenter/ScVolume", Self::payload(&body)?, true)
            .await?;
        if !resp.is_success() {
            error!("ScVolume create error {}: HTTP {}", name, resp.status);
            return Err(Error::backend(BACKEND, format!("Unable to create volume {}", name)));
        }
        let volume: ScVolume = resp
            .first()?
            .ok_or_else(|| Error::backend(BACKEND, format!("Unable to create volume {}", name)))?;
        info!("Created volume {}: {}", volume.instance_id, name);
        Ok(volume)
    }

    pub async fn get_volume(&self, instance_id: &str) -> Result<Option<ScVolume>> {
        let resp = self
            .client
            .get(&format!("StorageCenter/ScVolume/{}", instance_id))
            .await?;
        if !resp.is_success() {
            debug!("Volume {} lookup returned {}", instance_id, resp.status);
            return Ok(None);
        }
        resp.first()
    }

    pub(super) async fn get_volume_list(&self, filter: PayloadFilter) -> Result<Vec<ScVolume>> {
        let resp = self
            .client
            .post("StorageCenter/ScVolume/GetList", Self::payload(&filter)?, false)
            .await?;
        if !resp.is_success() {
            debug!("Volume search returned {}", resp.status);
            return Ok(Vec::new());
        }
        resp.list()
    }

    async fn search_for_volume(&self, name: &str) -> Result<Option<ScVolume>> {
        let filter = PayloadFilter::new()
            .append("scSerialNumber", self.ssn())
            .append("Name", name);
        let mut volumes = self.get_volume_list(filter).await?;
        match volumes.len() {
            0 => Ok(None),
            1 => Ok(volumes.pop()),
            n => Err(Error::backend(
                BACKEND,
                format!("Found {} volumes named {}", n, name),
            )),
        }
    }

    /// Find a volume by provider id, then by name. Once failed over the
    /// replication destination name is tried last.
    pub async fn find_volume(&self, name: &str, provider_id: Option<&str>) -> Result<Option<ScVolume>> {
        debug!("find_volume: name {} provider_id {:?}", name, provider_id);
        let mut volume = None;
        if let (true, Some(id)) = (self.use_provider_id(provider_id), provider_id) {
            volume = self.get_volume(id).await?;
        }
        if volume.is_none() {
            volume = self.search_for_volume(name).await?;
        }
        if volume.is_none() && self.is_failed_over() {
            volume = self.search_for_volume(&Self::repl_name(name)).await?;
        }
        Ok(volume)
    }

    /// Delete a volume; a volume that cannot be found counts as deleted
    pub async fn delete_volume(&self, name: &str, provider_id: Option<&str>) -> Result<bool> {
        let Some(volume) = self.find_volume(name, provider_id).await? else {
            warn!("delete_volume: unable to find volume {}", name);
            return Ok(true);
        };
        let resp = self
            .client
            .delete(&format!("StorageCenter/ScVolume/{}", volume.instance_id), None, true)
            .await?;
        if !resp.is_success() {
            return Err(Error::backend(
                BACKEND,
                format!("Error deleting volume {}: {}", self.ssn(), name),
            ));
        }
        info!("Deleted volume {}", name);
        Ok(resp.body.as_bool().unwrap_or(true))
    }

    pub async fn rename_volume(&self, volume: &ScVolume, name: &str) -> Result<bool> {
        let body = ModifyVolumePayload {
            name: Some(name.to_string()),
            size: None,
        };
        let resp = self
            .client
            .put(
                &format!("StorageCenter/ScVolume/{}", volume.instance_id),
                Self::payload(&body)?,
                true,
            )
            .await?;
        if !resp.is_success() {
            error!("Error renaming volume {} to {}", volume.name, name);
            return Ok(false);
        }
        Ok(true)
    }

    pub async fn expand_volume(&self, volume: &ScVolume, size_gb: u64) -> Result<ScVolume> {
        let body = ExpandVolumePayload {
            new_size: format!("{} GB", size_gb),
        };
        let resp = self
            .client
            .post(
                &format!("StorageCenter/ScVolume/{}/ExpandToSize", volume.instance_id),
                Self::payload(&body)?,
                true,
            )
            .await?;
        if !resp.is_success() {
            return Err(Error::backend(
                BACKEND,
                format!("Error expanding volume {}", volume.name),
            ));
        }
        let expanded = resp.first()?.unwrap_or_else(|| volume.clone());
        info!("Volume {} expanded to {} GB", volume.name, size_gb);
        Ok(expanded)
    }
}
