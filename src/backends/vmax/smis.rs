//! SMI-S collaborator port
//!
//! The WBEM wire transport is not part of this crate. Everything the masking
//! engine needs from the array goes through [`SmisConnection`], one typed
//! method per CIM query or extrinsic method.

use crate::domain::Protocol;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// `InvokeMethod` return code for "job started"
pub const JOB_STARTED: u32 = 4096;

// =============================================================================
// CIM Objects
// =============================================================================

/// CIM instance name, reduced to class and key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CimRef {
    pub class_name: String,
    pub instance_id: String,
}

impl CimRef {
    pub fn new(class_name: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            instance_id: instance_id.into(),
        }
    }
}

impl fmt::Display for CimRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class_name, self.instance_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupKind {
    Storage,
    Initiator,
    Port,
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKind::Storage => write!(f, "storage group"),
            GroupKind::Initiator => write!(f, "initiator group"),
            GroupKind::Port => write!(f, "port group"),
        }
    }
}

/// Storage, initiator or port masking group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskingGroup {
    pub path: CimRef,
    pub name: String,
    pub kind: GroupKind,
}

/// Array volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub path: CimRef,
    pub device_id: String,
    pub element_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskingView {
    pub path: CimRef,
    pub name: String,
}

/// The three groups a masking view binds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewGroups {
    pub storage: MaskingGroup,
    pub initiator: MaskingGroup,
    pub port: MaskingGroup,
}

/// Storage hardware id of one host initiator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareId {
    pub path: CimRef,
    pub storage_id: String,
}

/// FAST tier policy rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPolicyRule {
    pub path: CimRef,
    pub name: String,
}

/// SLO settings a V3 storage group is created with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLevel {
    pub srp: String,
    pub slo: Option<String>,
    pub workload: Option<String>,
}

/// Outcome of an extrinsic method call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeResult {
    pub return_code: u32,
    pub job: Option<CimRef>,
}

impl InvokeResult {
    pub fn ok() -> Self {
        Self {
            return_code: 0,
            job: None,
        }
    }

    pub fn job(job: CimRef) -> Self {
        Self {
            return_code: JOB_STARTED,
            job: Some(job),
        }
    }

    pub fn failed(return_code: u32) -> Self {
        Self {
            return_code,
            job: None,
        }
    }
}

/// `CIM_ConcreteJob` status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CimJobStatus {
    pub job_state: u16,
    pub error_code: u32,
    pub error_description: Option<String>,
}

// =============================================================================
// Connection Port
// =============================================================================

#[async_trait]
pub trait SmisConnection: Send + Sync {
    // --- services and lookups ---------------------------------------------

    async fn controller_config_service(&self, system: &str) -> Result<CimRef>;

    async fn find_device(&self, system: &str, device_id: &str) -> Result<Option<Device>>;

    async fn find_group(&self, system: &str, name: &str, kind: GroupKind) -> Result<Option<MaskingGroup>>;

    /// Initiator group holding any of `initiators`
    async fn find_initiator_group_for(
        &self,
        system: &str,
        initiators: &[String],
    ) -> Result<Option<MaskingGroup>>;

    async fn find_masking_view(&self, system: &str, name: &str) -> Result<Option<MaskingView>>;

    async fn masking_view_groups(&self, view: &MaskingView) -> Result<ViewGroups>;

    /// Masking views built on `group` (storage or initiator group)
    async fn views_of_group(&self, group: &MaskingGroup) -> Result<Vec<MaskingView>>;

    /// Storage groups `device` belongs to
    async fn storage_groups_of_device(&self, device: &Device) -> Result<Vec<MaskingGroup>>;

    /// Device paths in a storage group
    async fn group_members(&self, group: &MaskingGroup) -> Result<Vec<CimRef>>;

    /// Storage ids in an initiator group
    async fn group_initiators(&self, group: &MaskingGroup) -> Result<Vec<String>>;

    async fn find_hardware_ids(&self, system: &str, initiators: &[String]) -> Result<Vec<HardwareId>>;

    /// LUN `device` is presented at through `view`
    async fn host_lun(&self, device: &Device, view: &MaskingView) -> Result<Option<u32>>;

    async fn is_fast_enabled(&self, system: &str) -> Result<bool>;

    async fn tier_policy_rule(&self, system: &str, policy: &str) -> Result<Option<TierPolicyRule>>;

    // --- extrinsic methods ------------------------------------------------

    async fn create_storage_group(
        &self,
        ccs: &CimRef,
        name: &str,
        service_level: Option<&ServiceLevel>,
    ) -> Result<InvokeResult>;

    async fn create_initiator_group(
        &self,
        ccs: &CimRef,
        name: &str,
        hardware_ids: &[CimRef],
    ) -> Result<InvokeResult>;

    async fn delete_group(&self, ccs: &CimRef, group: &MaskingGroup) -> Result<InvokeResult>;

    async fn add_members(&self, ccs: &CimRef, group: &MaskingGroup, members: &[CimRef]) -> Result<InvokeResult>;

    async fn remove_members(
        &self,
        ccs: &CimRef,
        group: &MaskingGroup,
        members: &[CimRef],
    ) -> Result<InvokeResult>;

    async fn create_masking_view(
        &self,
        ccs: &CimRef,
        name: &str,
        groups: &ViewGroups,
    ) -> Result<InvokeResult>;

    async fn delete_masking_view(&self, ccs: &CimRef, view: &MaskingView) -> Result<InvokeResult>;

    async fn create_hardware_id(
        &self,
        system: &str,
        initiator: &str,
        protocol: Protocol,
    ) -> Result<InvokeResult>;

    async fn add_group_to_tier_policy(
        &self,
        rule: &TierPolicyRule,
        group: &MaskingGroup,
    ) -> Result<InvokeResult>;

    async fn remove_group_from_tier_policy(
        &self,
        rule: &TierPolicyRule,
        group: &MaskingGroup,
    ) -> Result<InvokeResult>;

    async fn job_status(&self, job: &CimRef) -> Result<CimJobStatus>;
}

pub type SmisConnectionRef = std::sync::Arc<dyn SmisConnection>;
