//! Invoke handling and group membership helpers

use super::smis::{
    CimRef, Device, GroupKind, InvokeResult, MaskingGroup, MaskingView, SmisConnectionRef,
    JOB_STARTED,
};
use crate::error::{Error, Result};
use crate::jobs::{poll_job, AsyncJob, JobState, PollConfig, PollStatus};
use tracing::{debug, error, info};

pub(super) const BACKEND: &str = "vmax";

/// SMI-S calls with return-code and job handling
#[derive(Clone)]
pub struct SmisUtils {
    pub(super) conn: SmisConnectionRef,
    poll: PollConfig,
}

impl SmisUtils {
    pub fn new(conn: SmisConnectionRef, poll: PollConfig) -> Self {
        Self { conn, poll }
    }

    pub fn conn(&self) -> &SmisConnectionRef {
        &self.conn
    }

    /// Turn an extrinsic method result into success or an error, waiting
    /// for the job when one was started.
    pub async fn check_invoke(&self, operation: &str, result: InvokeResult) -> Result<()> {
        match result.return_code {
            0 => Ok(()),
            JOB_STARTED => {
                let job = result.job.ok_or_else(|| {
                    Error::backend(BACKEND, format!("{}: job started without a job handle", operation))
                })?;
                self.wait_for_job(operation, &job).await
            }
            rc => {
                error!("{} failed with return code {}", operation, rc);
                Err(Error::backend(
                    BACKEND,
                    format!("Error {}. Return code: {}", operation, rc),
                ))
            }
        }
    }

    /// Poll a CIM job until it leaves the running states
    pub async fn wait_for_job(&self, operation: &str, job_ref: &CimRef) -> Result<()> {
        let mut job = AsyncJob::new(job_ref.instance_id.clone(), job_ref.to_string());
        let conn = &self.conn;

        let status = poll_job(&self.poll, &job.id, move || async move {
            let status = conn.job_status(job_ref).await?;
            let state = JobState::from_cim(status.job_state, status.error_code);
            if state.is_terminal() {
                Ok(PollStatus::Ready((state, status.error_description)))
            } else {
                Ok(PollStatus::Pending)
            }
        })
        .await?
        .into_result(&job.id)?;

        job.observe(status.0, status.1);
        debug!(
            "{}: job {} {} after {}s",
            operation,
            job.id,
            job.state,
            job.elapsed().num_seconds()
        );
        if !job.state.is_success() {
            return Err(Error::JobFailed {
                job: format!("{} ({})", job.id, operation),
                reason: job
                    .error
                    .unwrap_or_else(|| format!("job {}", job.state)),
            });
        }
        Ok(())
    }

    // =========================================================================
    // Membership
    // =========================================================================

    pub async fn is_member(&self, group: &MaskingGroup, device: &Device) -> Result<bool> {
        Ok(self.conn.group_members(group).await?.contains(&device.path))
    }

    pub async fn find_storage_group(&self, system: &str, name: &str) -> Result<Option<MaskingGroup>> {
        self.conn.find_group(system, name, GroupKind::Storage).await
    }

    /// Add `device` to `group` and confirm by re-reading the group
    pub async fn add_device_verified(
        &self,
        ccs: &CimRef,
        group: &MaskingGroup,
        device: &Device,
    ) -> Result<()> {
        let result = self
            .conn
            .add_members(ccs, group, std::slice::from_ref(&device.path))
            .await?;
        self.check_invoke(&format!("adding {} to {}", device.device_id, group.name), result)
            .await?;
        if !self.is_member(group, device).await? {
            return Err(Error::backend(
                BACKEND,
                format!("Volume {} is not in {} after add", device.device_id, group.name),
            ));
        }
        info!("Added volume {} to {}", device.device_id, group.name);
        Ok(())
    }

    pub async fn remove_device(&self, ccs: &CimRef, group: &MaskingGroup, device: &Device) -> Result<()> {
        let result = self
            .conn
            .remove_members(ccs, group, std::slice::from_ref(&device.path))
            .await?;
        self.check_invoke(
            &format!("removing {} from {}", device.device_id, group.name),
            result,
        )
        .await?;
        info!("Removed volume {} from {}", device.device_id, group.name);
        Ok(())
    }

    pub async fn delete_group(&self, ccs: &CimRef, group: &MaskingGroup) -> Result<()> {
        let result = self.conn.delete_group(ccs, group).await?;
        self.check_invoke(&format!("deleting {} {}", group.kind, group.name), result)
            .await?;
        info!("Deleted {} {}", group.kind, group.name);
        Ok(())
    }

    pub async fn delete_masking_view(&self, ccs: &CimRef, view: &MaskingView) -> Result<()> {
        let result = self.conn.delete_masking_view(ccs, view).await?;
        self.check_invoke(&format!("deleting masking view {}", view.name), result)
            .await?;
        info!("Deleted masking view {}", view.name);
        Ok(())
    }

    /// Storage groups of `device` that back a masking view
    pub async fn masked_storage_groups(&self, device: &Device) -> Result<Vec<(MaskingGroup, MaskingView)>> {
        let mut masked = Vec::new();
        for group in self.conn.storage_groups_of_device(device).await? {
            if let Some(view) = self.conn.views_of_group(&group).await?.into_iter().next() {
                masked.push((group, view));
            }
        }
        Ok(masked)
    }
}
