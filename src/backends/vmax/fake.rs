//! In-memory SMI-S array for tests

use super::smis::*;
use crate::domain::Protocol;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

pub const SYSTEM: &str = "SYMMETRIX+000195900551";

/// Failures the fake can be told to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreateStorageGroup,
    /// Port group lookups find nothing
    MissingPortGroup,
    CreateInitiatorGroup,
    /// Adds to a non-default storage group fail
    AddToMaskingGroup,
    /// Adds to a non-default storage group report success but change nothing
    AddNotApplied,
    CreateMaskingView,
    NoLun,
    /// Adds to a default storage group fail
    ReturnToDefault,
    /// Removals from a non-default storage group fail
    RemoveFromMaskingGroup,
    DeleteStorageGroup,
}

#[derive(Debug, Default)]
struct Group {
    kind: Option<GroupKind>,
    members: Vec<CimRef>,
    initiators: Vec<String>,
}

#[derive(Debug)]
struct View {
    storage: String,
    initiator: String,
    port: String,
    luns: BTreeMap<String, u32>,
}

#[derive(Debug)]
struct Job {
    statuses: VecDeque<CimJobStatus>,
    polls: usize,
}

#[derive(Debug, Default)]
struct Inner {
    devices: BTreeMap<String, Device>,
    groups: BTreeMap<String, Group>,
    default_groups: HashSet<String>,
    views: BTreeMap<String, View>,
    hardware_ids: BTreeMap<String, HardwareId>,
    policies: HashMap<String, String>,
    tier_policies: HashSet<String>,
    fast_enabled: bool,
    fails: HashSet<FailPoint>,
    async_jobs: bool,
    jobs: HashMap<String, Job>,
    job_seq: u64,
    next_lun: u32,
    mutations: usize,
}

impl Inner {
    fn fails(&self, point: FailPoint) -> bool {
        self.fails.contains(&point)
    }

    fn new_job(&mut self, statuses: Vec<CimJobStatus>) -> CimRef {
        self.job_seq += 1;
        let id = format!("job-{}", self.job_seq);
        self.jobs.insert(
            id.clone(),
            Job {
                statuses: statuses.into(),
                polls: 0,
            },
        );
        CimRef::new("SE_ConcreteJob", id)
    }

    /// Success, as an immediate return or a job depending on the mode
    fn done(&mut self) -> InvokeResult {
        self.mutations += 1;
        if !self.async_jobs {
            return InvokeResult::ok();
        }
        let job = self.new_job(vec![status(4, 0), status(7, 0)]);
        InvokeResult::job(job)
    }

    fn refused(&mut self) -> InvokeResult {
        self.mutations += 1;
        InvokeResult::failed(1)
    }

    fn group_ref(name: &str, kind: GroupKind) -> MaskingGroup {
        let class = match kind {
            GroupKind::Storage => "SE_DeviceMaskingGroup",
            GroupKind::Initiator => "SE_InitiatorMaskingGroup",
            GroupKind::Port => "SE_TargetMaskingGroup",
        };
        MaskingGroup {
            path: CimRef::new(class, name),
            name: name.to_string(),
            kind,
        }
    }

    fn insert_group(&mut self, name: &str, kind: GroupKind) -> &mut Group {
        let group = self.groups.entry(name.to_string()).or_default();
        group.kind = Some(kind);
        group
    }
}

fn status(job_state: u16, error_code: u32) -> CimJobStatus {
    CimJobStatus {
        job_state,
        error_code,
        error_description: None,
    }
}

fn view_ref(name: &str) -> MaskingView {
    MaskingView {
        path: CimRef::new("Symm_LunMaskingView", name),
        name: name.to_string(),
    }
}

pub struct FakeArray {
    inner: Mutex<Inner>,
}

impl FakeArray {
    pub fn new() -> Arc<Self> {
        let inner = Inner {
            fast_enabled: true,
            tier_policies: HashSet::from(["GOLD1".to_string()]),
            next_lun: 1,
            ..Default::default()
        };
        Arc::new(Self {
            inner: Mutex::new(inner),
        })
    }

    pub fn ccs(&self) -> CimRef {
        CimRef::new("Symm_ControllerConfigurationService", SYSTEM)
    }

    pub fn add_device(&self, device_id: &str) -> Device {
        let device = Device {
            path: CimRef::new("Symm_StorageVolume", device_id),
            device_id: device_id.to_string(),
            element_name: format!("volume-{}", device_id),
        };
        self.inner
            .lock()
            .devices
            .insert(device_id.to_string(), device.clone());
        device
    }

    /// Seed a default storage group holding exactly `device_ids`
    pub fn add_storage_group(&self, name: &str, device_ids: &[&str]) {
        let mut inner = self.inner.lock();
        inner.default_groups.insert(name.to_string());
        let group = inner.insert_group(name, GroupKind::Storage);
        group.members = device_ids
            .iter()
            .map(|id| CimRef::new("Symm_StorageVolume", *id))
            .collect();
    }

    pub fn add_port_group(&self, name: &str) {
        self.inner.lock().insert_group(name, GroupKind::Port);
    }

    pub fn set_policy(&self, group: &str, policy: &str) {
        self.inner
            .lock()
            .policies
            .insert(group.to_string(), policy.to_string());
    }

    pub fn set_fast_enabled(&self, enabled: bool) {
        self.inner.lock().fast_enabled = enabled;
    }

    /// Answer successful extrinsic calls with a job instead of rc 0
    pub fn set_async_jobs(&self, enabled: bool) {
        self.inner.lock().async_jobs = enabled;
    }

    pub fn fail(&self, point: FailPoint) {
        self.inner.lock().fails.insert(point);
    }

    /// A job reporting `statuses` in order; the last one repeats
    pub fn script_job(&self, statuses: Vec<CimJobStatus>) -> CimRef {
        self.inner.lock().new_job(statuses)
    }

    pub fn job_polls(&self, job: &CimRef) -> usize {
        self.inner
            .lock()
            .jobs
            .get(&job.instance_id)
            .map_or(0, |j| j.polls)
    }

    pub fn job_count(&self) -> usize {
        self.inner.lock().jobs.len()
    }

    pub fn mutation_count(&self) -> usize {
        self.inner.lock().mutations
    }

    pub fn members(&self, group: &str) -> Vec<String> {
        self.inner
            .lock()
            .groups
            .get(group)
            .map(|g| g.members.iter().map(|m| m.instance_id.clone()).collect())
            .unwrap_or_default()
    }

    /// Storage groups holding `device_id`
    pub fn groups_holding(&self, device_id: &str) -> Vec<String> {
        self.inner
            .lock()
            .groups
            .iter()
            .filter(|(_, g)| g.members.iter().any(|m| m.instance_id == device_id))
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn group_exists(&self, name: &str) -> bool {
        self.inner.lock().groups.contains_key(name)
    }

    pub fn view_count(&self) -> usize {
        self.inner.lock().views.len()
    }

    pub fn policy_of(&self, group: &str) -> Option<String> {
        self.inner.lock().policies.get(group).cloned()
    }
}

#[async_trait]
impl SmisConnection for FakeArray {
    async fn controller_config_service(&self, _system: &str) -> Result<CimRef> {
        Ok(self.ccs())
    }

    async fn find_device(&self, _system: &str, device_id: &str) -> Result<Option<Device>> {
        Ok(self.inner.lock().devices.get(device_id).cloned())
    }

    async fn find_group(&self, _system: &str, name: &str, kind: GroupKind) -> Result<Option<MaskingGroup>> {
        let inner = self.inner.lock();
        if kind == GroupKind::Port && inner.fails(FailPoint::MissingPortGroup) {
            return Ok(None);
        }
        Ok(inner
            .groups
            .get(name)
            .filter(|g| g.kind == Some(kind))
            .map(|_| Inner::group_ref(name, kind)))
    }

    async fn find_initiator_group_for(
        &self,
        _system: &str,
        initiators: &[String],
    ) -> Result<Option<MaskingGroup>> {
        let inner = self.inner.lock();
        Ok(inner
            .groups
            .iter()
            .find(|(_, g)| {
                g.kind == Some(GroupKind::Initiator)
                    && g.initiators.iter().any(|i| initiators.contains(i))
            })
            .map(|(name, _)| Inner::group_ref(name, GroupKind::Initiator)))
    }

    async fn find_masking_view(&self, _system: &str, name: &str) -> Result<Option<MaskingView>> {
        Ok(self.inner.lock().views.get(name).map(|_| view_ref(name)))
    }

    async fn masking_view_groups(&self, view: &MaskingView) -> Result<ViewGroups> {
        let inner = self.inner.lock();
        let v = inner
            .views
            .get(&view.name)
            .ok_or_else(|| Error::backend("fake", format!("no view {}", view.name)))?;
        Ok(ViewGroups {
            storage: Inner::group_ref(&v.storage, GroupKind::Storage),
            initiator: Inner::group_ref(&v.initiator, GroupKind::Initiator),
            port: Inner::group_ref(&v.port, GroupKind::Port),
        })
    }

    async fn views_of_group(&self, group: &MaskingGroup) -> Result<Vec<MaskingView>> {
        let inner = self.inner.lock();
        Ok(inner
            .views
            .iter()
            .filter(|(_, v)| match group.kind {
                GroupKind::Storage => v.storage == group.name,
                GroupKind::Initiator => v.initiator == group.name,
                GroupKind::Port => v.port == group.name,
            })
            .map(|(name, _)| view_ref(name))
            .collect())
    }

    async fn storage_groups_of_device(&self, device: &Device) -> Result<Vec<MaskingGroup>> {
        let inner = self.inner.lock();
        Ok(inner
            .groups
            .iter()
            .filter(|(_, g)| g.kind == Some(GroupKind::Storage) && g.members.contains(&device.path))
            .map(|(name, _)| Inner::group_ref(name, GroupKind::Storage))
            .collect())
    }

    async fn group_members(&self, group: &MaskingGroup) -> Result<Vec<CimRef>> {
        tokio::task::yield_now().await;
        let inner = self.inner.lock();
        Ok(inner
            .groups
            .get(&group.name)
            .map(|g| g.members.clone())
            .unwrap_or_default())
    }

    async fn group_initiators(&self, group: &MaskingGroup) -> Result<Vec<String>> {
        let inner = self.inner.lock();
        Ok(inner
            .groups
            .get(&group.name)
            .map(|g| g.initiators.clone())
            .unwrap_or_default())
    }

    async fn find_hardware_ids(&self, _system: &str, initiators: &[String]) -> Result<Vec<HardwareId>> {
        let inner = self.inner.lock();
        Ok(initiators
            .iter()
            .filter_map(|i| inner.hardware_ids.get(i).cloned())
            .collect())
    }

    async fn host_lun(&self, device: &Device, view: &MaskingView) -> Result<Option<u32>> {
        let mut inner = self.inner.lock();
        if inner.fails(FailPoint::NoLun) {
            return Ok(None);
        }
        let Some(storage) = inner.views.get(&view.name).map(|v| v.storage.clone()) else {
            return Ok(None);
        };
        let masked = inner
            .groups
            .get(&storage)
            .map_or(false, |g| g.members.contains(&device.path));
        if !masked {
            return Ok(None);
        }
        let next = inner.next_lun;
        let Some(v) = inner.views.get_mut(&view.name) else {
            return Ok(None);
        };
        let lun = *v.luns.entry(device.device_id.clone()).or_insert(next);
        if lun == next {
            inner.next_lun += 1;
        }
        Ok(Some(lun))
    }

    async fn is_fast_enabled(&self, _system: &str) -> Result<bool> {
        Ok(self.inner.lock().fast_enabled)
    }

    async fn tier_policy_rule(&self, _system: &str, policy: &str) -> Result<Option<TierPolicyRule>> {
        Ok(self
            .inner
            .lock()
            .tier_policies
            .contains(policy)
            .then(|| TierPolicyRule {
                path: CimRef::new("Symm_TierPolicyRule", policy),
                name: policy.to_string(),
            }))
    }

    async fn create_storage_group(
        &self,
        _ccs: &CimRef,
        name: &str,
        _service_level: Option<&ServiceLevel>,
    ) -> Result<InvokeResult> {
        let mut inner = self.inner.lock();
        if inner.fails(FailPoint::CreateStorageGroup) {
            return Ok(inner.refused());
        }
        if name.starts_with("OS_default_") {
            inner.default_groups.insert(name.to_string());
        }
        inner.insert_group(name, GroupKind::Storage);
        Ok(inner.done())
    }

    async fn create_initiator_group(
        &self,
        _ccs: &CimRef,
        name: &str,
        hardware_ids: &[CimRef],
    ) -> Result<InvokeResult> {
        let mut inner = self.inner.lock();
        if inner.fails(FailPoint::CreateInitiatorGroup) {
            return Ok(inner.refused());
        }
        let group = inner.insert_group(name, GroupKind::Initiator);
        group.initiators = hardware_ids.iter().map(|h| h.instance_id.clone()).collect();
        Ok(inner.done())
    }

    async fn delete_group(&self, _ccs: &CimRef, group: &MaskingGroup) -> Result<InvokeResult> {
        let mut inner = self.inner.lock();
        let in_use = inner
            .views
            .values()
            .any(|v| v.storage == group.name || v.initiator == group.name || v.port == group.name);
        let refused = group.kind == GroupKind::Storage && inner.fails(FailPoint::DeleteStorageGroup);
        if in_use || refused || inner.groups.remove(&group.name).is_none() {
            return Ok(inner.refused());
        }
        inner.policies.remove(&group.name);
        Ok(inner.done())
    }

    async fn add_members(&self, _ccs: &CimRef, group: &MaskingGroup, members: &[CimRef]) -> Result<InvokeResult> {
        let mut inner = self.inner.lock();
        let is_default = inner.default_groups.contains(&group.name);
        if (is_default && inner.fails(FailPoint::ReturnToDefault))
            || (!is_default && inner.fails(FailPoint::AddToMaskingGroup))
        {
            return Ok(inner.refused());
        }
        if !is_default && inner.fails(FailPoint::AddNotApplied) {
            return Ok(inner.done());
        }
        let Some(g) = inner.groups.get_mut(&group.name) else {
            return Ok(inner.refused());
        };
        for member in members {
            if !g.members.contains(member) {
                g.members.push(member.clone());
            }
        }
        Ok(inner.done())
    }

    async fn remove_members(
        &self,
        _ccs: &CimRef,
        group: &MaskingGroup,
        members: &[CimRef],
    ) -> Result<InvokeResult> {
        tokio::task::yield_now().await;
        let mut inner = self.inner.lock();
        if !inner.default_groups.contains(&group.name) && inner.fails(FailPoint::RemoveFromMaskingGroup) {
            return Ok(inner.refused());
        }
        let Some(g) = inner.groups.get_mut(&group.name) else {
            return Ok(inner.refused());
        };
        g.members.retain(|m| !members.contains(m));
        for view in inner.views.values_mut().filter(|v| v.storage == group.name) {
            for member in members {
                view.luns.remove(&member.instance_id);
            }
        }
        Ok(inner.done())
    }

    async fn create_masking_view(
        &self,
        _ccs: &CimRef,
        name: &str,
        groups: &ViewGroups,
    ) -> Result<InvokeResult> {
        let mut inner = self.inner.lock();
        if inner.fails(FailPoint::CreateMaskingView) || inner.views.contains_key(name) {
            return Ok(inner.refused());
        }
        inner.views.insert(
            name.to_string(),
            View {
                storage: groups.storage.name.clone(),
                initiator: groups.initiator.name.clone(),
                port: groups.port.name.clone(),
                luns: BTreeMap::new(),
            },
        );
        Ok(inner.done())
    }

    async fn delete_masking_view(&self, _ccs: &CimRef, view: &MaskingView) -> Result<InvokeResult> {
        let mut inner = self.inner.lock();
        if inner.views.remove(&view.name).is_none() {
            return Ok(inner.refused());
        }
        Ok(inner.done())
    }

    async fn create_hardware_id(
        &self,
        _system: &str,
        initiator: &str,
        _protocol: Protocol,
    ) -> Result<InvokeResult> {
        let mut inner = self.inner.lock();
        inner.hardware_ids.insert(
            initiator.to_string(),
            HardwareId {
                path: CimRef::new("SE_StorageHardwareID", initiator),
                storage_id: initiator.to_string(),
            },
        );
        Ok(inner.done())
    }

    async fn add_group_to_tier_policy(
        &self,
        rule: &TierPolicyRule,
        group: &MaskingGroup,
    ) -> Result<InvokeResult> {
        let mut inner = self.inner.lock();
        inner.policies.insert(group.name.clone(), rule.name.clone());
        Ok(inner.done())
    }

    async fn remove_group_from_tier_policy(
        &self,
        _rule: &TierPolicyRule,
        group: &MaskingGroup,
    ) -> Result<InvokeResult> {
        let mut inner = self.inner.lock();
        inner.policies.remove(&group.name);
        Ok(inner.done())
    }

    async fn job_status(&self, job: &CimRef) -> Result<CimJobStatus> {
        let mut inner = self.inner.lock();
        let j = inner
            .jobs
            .get_mut(&job.instance_id)
            .ok_or_else(|| Error::backend("fake", format!("no job {}", job)))?;
        j.polls += 1;
        let status = if j.statuses.len() > 1 {
            j.statuses.pop_front()
        } else {
            j.statuses.front().cloned()
        };
        status.ok_or_else(|| Error::backend("fake", format!("job {} has no status", job)))
    }
}
