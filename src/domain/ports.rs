//! Domain Ports - Vendor-neutral driver contract
//!
//! The block-storage service talks to every array through these traits.
//! Adapters implement them on top of their vendor transport.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Service-side Types
// =============================================================================

/// Storage protocol used to attach a volume to a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    FibreChannel,
    Iscsi,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::FibreChannel => write!(f, "FC"),
            Protocol::Iscsi => write!(f, "I"),
        }
    }
}

/// The service's reference to a volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRef {
    /// Service-side volume id; also the array-side volume name
    pub name: String,
    /// Array composite id (`<serial>.<index>`) once the volume exists
    pub provider_id: Option<String>,
    /// Size in GB
    pub size_gb: u64,
    /// Whether the volume type asks for replication
    #[serde(default)]
    pub replicated: bool,
}

impl VolumeRef {
    pub fn new(name: impl Into<String>, size_gb: u64) -> Self {
        Self {
            name: name.into(),
            provider_id: None,
            size_gb,
            replicated: false,
        }
    }

    pub fn with_provider_id(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }
}

/// The service's reference to a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRef {
    /// Snapshot id, used as the replay description on the array
    pub id: String,
    pub volume: VolumeRef,
}

/// Host attach information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connector {
    pub host: String,
    pub protocol: Protocol,
    /// WWPNs or IQNs
    pub initiators: Vec<String>,
}

/// What the host needs to find the attached volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub protocol: Protocol,
    pub volume_name: String,
    pub lun: Option<u32>,
    /// Array object that grants access (mapping profile or masking view)
    pub access_path: String,
}

/// Provider id change produced by a create or failover
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeUpdate {
    pub name: String,
    pub provider_id: Option<String>,
    /// `None` when the update succeeded
    pub error: Option<String>,
}

impl VolumeUpdate {
    pub fn provider(name: &str, provider_id: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            provider_id: Some(provider_id.into()),
            error: None,
        }
    }

    pub fn failed(name: &str, error: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            provider_id: None,
            error: Some(error.into()),
        }
    }
}

// =============================================================================
// Volume Driver Port
// =============================================================================

/// Attach/detach contract shared by every adapter
#[async_trait]
pub trait VolumeDriver: Send + Sync {
    /// Get backend name
    fn backend_name(&self) -> &str;

    /// Make a volume visible to a host
    async fn initialize_connection(
        &self,
        volume: &VolumeRef,
        connector: &Connector,
    ) -> Result<ConnectionInfo>;

    /// Remove host access; `None` means detach from every host
    async fn terminate_connection(
        &self,
        volume: &VolumeRef,
        connector: Option<&Connector>,
    ) -> Result<()>;

    /// Check the array session is usable
    async fn health_check(&self) -> Result<bool>;
}

// =============================================================================
// Volume Provisioner Port
// =============================================================================

/// Volume lifecycle contract
#[async_trait]
pub trait VolumeProvisioner: Send + Sync {
    /// Create a volume; returns its provider id
    async fn create_volume(&self, volume: &VolumeRef) -> Result<VolumeUpdate>;

    async fn delete_volume(&self, volume: &VolumeRef) -> Result<()>;

    async fn create_snapshot(&self, snapshot: &SnapshotRef) -> Result<()>;

    async fn delete_snapshot(&self, snapshot: &SnapshotRef) -> Result<()>;

    async fn create_volume_from_snapshot(
        &self,
        volume: &VolumeRef,
        snapshot: &SnapshotRef,
    ) -> Result<VolumeUpdate>;

    async fn create_cloned_volume(
        &self,
        volume: &VolumeRef,
        source: &VolumeRef,
    ) -> Result<VolumeUpdate>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type VolumeDriverRef = Arc<dyn VolumeDriver>;
pub type VolumeProvisionerRef = Arc<dyn VolumeProvisioner>;
