//! Dell Storage Center REST payloads
//!
//! Response objects carry only the fields the adapter reads. Request payloads
//! are typed per call and serialized at the transport boundary.

use serde::{Deserialize, Serialize};

// =============================================================================
// Responses
// =============================================================================

/// Reference to another SC object embedded in a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScObjectRef {
    pub instance_id: String,
    #[serde(default)]
    pub instance_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScStorageCenter {
    pub instance_id: String,
    pub sc_serial_number: u64,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScFolder {
    pub instance_id: String,
    pub name: String,
    #[serde(default)]
    pub folder_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScVolume {
    pub instance_id: String,
    pub name: String,
    pub sc_serial_number: u64,
    #[serde(default)]
    pub active: bool,
    /// e.g. `"1.073741824E9 Bytes"`
    #[serde(default)]
    pub configured_size: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub replication_source: bool,
    #[serde(default)]
    pub replication_destination: bool,
}

impl ScVolume {
    /// Configured size rounded up to whole GB
    pub fn size_gb(&self) -> Option<u64> {
        let raw = self.configured_size.as_deref()?;
        let bytes: f64 = raw.split_whitespace().next()?.parse().ok()?;
        Some((bytes / (1024.0 * 1024.0 * 1024.0)).ceil() as u64)
    }
}

/// Server types the adapter distinguishes
pub const SERVER_TYPE_REMOTE_SC: &str = "RemoteStorageCenter";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScServer {
    pub instance_id: String,
    pub name: String,
    #[serde(default, rename = "type")]
    pub server_type: Option<String>,
    /// "Up", "Down", "Partial"
    #[serde(default)]
    pub status: Option<String>,
}

impl ScServer {
    /// Replication plumbing rather than a host
    pub fn is_remote_storage_center(&self) -> bool {
        self.server_type.as_deref() == Some(SERVER_TYPE_REMOTE_SC)
    }

    pub fn is_down(&self) -> bool {
        self.status
            .as_deref()
            .map_or(true, |s| s.eq_ignore_ascii_case("down"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScServerHba {
    pub instance_id: String,
    pub instance_name: String,
    pub server: ScObjectRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingProfile {
    pub instance_id: String,
    pub server: ScObjectRef,
    pub volume: ScObjectRef,
    #[serde(default)]
    pub lun_used: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScReplay {
    pub instance_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub marked_for_expiration: bool,
}

/// Copy-mirror-migrate job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScCopyMirrorMigrate {
    pub instance_id: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QosNode {
    pub instance_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScReplication {
    pub instance_id: String,
    pub source_volume: ScObjectRef,
    pub destination_volume: ScObjectRef,
    pub destination_sc_serial_number: u64,
    #[serde(default)]
    pub replicate_active_replay: bool,
    #[serde(default, rename = "type")]
    pub replication_type: Option<ReplicationType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplicationType {
    Asynchronous,
    Synchronous,
}

impl Default for ReplicationType {
    fn default() -> Self {
        ReplicationType::Asynchronous
    }
}

/// Body of a `202 Accepted` async call and of a still-running task poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncTask {
    #[serde(default)]
    pub object_type: Option<String>,
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub return_value: Option<String>,
    #[serde(default)]
    pub method_name: Option<String>,
    #[serde(default)]
    pub object_type_name: Option<String>,
}

pub const ASYNC_TASK_OBJECT_TYPE: &str = "AsyncTask";

// =============================================================================
// Requests
// =============================================================================

/// Filtered `GetList` body
#[derive(Debug, Clone, Serialize)]
pub struct PayloadFilter {
    filter: FilterGroup,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct FilterGroup {
    filter_type: &'static str,
    filters: Vec<FilterTerm>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct FilterTerm {
    attribute_name: String,
    attribute_value: serde_json::Value,
    filter_type: &'static str,
}

impl PayloadFilter {
    pub fn new() -> Self {
        Self {
            filter: FilterGroup {
                filter_type: "AND",
                filters: Vec::new(),
            },
        }
    }

    pub fn append(mut self, name: &str, value: impl Into<serde_json::Value>) -> Self {
        self.filter.filters.push(FilterTerm {
            attribute_name: name.to_string(),
            attribute_value: value.into(),
            filter_type: "Equals",
        });
        self
    }
}

impl Default for PayloadFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateFolderPayload {
    pub name: String,
    pub notes: String,
    pub storage_center: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateVolumePayload {
    pub name: String,
    pub notes: String,
    pub size: String,
    pub storage_center: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_folder: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModifyVolumePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExpandVolumePayload {
    pub new_size: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateServerPayload {
    pub name: String,
    pub notes: String,
    pub storage_center: u64,
    pub operating_system: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_folder: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AddHbaPayload {
    pub hba_port_type: String,
    pub wwn_or_iscsi_name: String,
    pub allow_manual: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MapToServerPayload {
    pub server: String,
    #[serde(rename = "Advanced")]
    pub advanced: MapAdvanced,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MapAdvanced {
    pub map_to_down_server_hbas: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReplayPayload {
    pub description: String,
    /// Minutes; zero never expires
    pub expire_time: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateViewPayload {
    pub name: String,
    pub notes: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_folder: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CmmCopyPayload {
    pub copy_replays: bool,
    pub destination_volume: String,
    pub source_volume: String,
    pub storage_center: u64,
    pub priority: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateQosNodePayload {
    pub name: String,
    pub link_speed: String,
    pub bandwidth_limited: bool,
    pub storage_center: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DestinationVolumeAttributes {
    pub create_source_volume_folder_path: bool,
    pub notes: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateReplicationPayload {
    pub destination_storage_center: u64,
    pub qos_node: String,
    pub source_volume: String,
    pub storage_center: u64,
    pub replicate_active_replay: bool,
    #[serde(rename = "Type")]
    pub replication_type: ReplicationType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_volume: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_volume_attributes: Option<DestinationVolumeAttributes>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteReplicationPayload {
    pub delete_destination_volume: bool,
    pub recycle_destination_volume: bool,
    pub delete_restore_point: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModifyReplicationPayload {
    pub replicate_active_replay: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReplicateToCommonPayload {
    pub qos_node: String,
    pub common_destination_volume: String,
}
