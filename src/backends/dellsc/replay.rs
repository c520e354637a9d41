//! Replays (snapshots), view volumes and volume copies

use super::api::{ScApi, BACKEND};
use super::models::{
    CmmCopyPayload, CreateReplayPayload, CreateViewPayload, ScCopyMirrorMigrate, ScReplay, ScVolume,
};
use crate::error::{Error, Result};
use crate::jobs::{poll_job, AsyncJob, JobOutcome, JobState, PollStatus};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Marker replays on a clone source expire on their own after an hour
const CLONE_REPLAY_EXPIRE_MINUTES: u32 = 60;

impl ScApi {
    // =========================================================================
    // Replays
    // =========================================================================

    /// Take a replay of `volume` described by `replay_id`. `expire_minutes`
    /// of zero keeps it forever.
    pub async fn create_replay(
        &self,
        volume: &ScVolume,
        replay_id: &str,
        expire_minutes: u32,
    ) -> Result<Option<ScReplay>> {
        if !volume.active {
            self.init_volume(volume).await?;
        }
        let body = CreateReplayPayload {
            description: replay_id.to_string(),
            expire_time: expire_minutes,
        };
        let resp = self
            .client
            .post(
                &format!("StorageCenter/ScVolume/{}/CreateReplay", volume.instance_id),
                Self::payload(&body)?,
                true,
            )
            .await?;
        let replay: Option<ScReplay> = if resp.is_success() { resp.first()? } else { None };
        if replay.is_none() {
            warn!("Unable to create snapshot {}", replay_id);
        }
        Ok(replay)
    }

    async fn list_replays(&self, volume: &ScVolume) -> Result<Vec<ScReplay>> {
        let resp = self
            .client
            .get(&format!("StorageCenter/ScVolume/{}/ReplayList", volume.instance_id))
            .await?;
        if !resp.is_success() {
            debug!("Replay list of {} returned {}", volume.name, resp.status);
            return Ok(Vec::new());
        }
        resp.list()
    }

    /// Live replay of `volume` matching `replay_id` by description or id
    pub async fn find_replay(&self, volume: &ScVolume, replay_id: &str) -> Result<Option<ScReplay>> {
        Ok(self
            .list_replays(volume)
            .await?
            .into_iter()
            .filter(|r| !r.marked_for_expiration)
            .find(|r| r.description == replay_id || r.instance_id == replay_id))
    }

    async fn expire_replay(&self, replay: &ScReplay) -> Result<bool> {
        let resp = self
            .client
            .post(
                &format!("StorageCenter/ScReplay/{}/Expire", replay.instance_id),
                json!({}),
                true,
            )
            .await?;
        Ok(resp.is_success())
    }

    /// Expire a replay; one that no longer exists counts as deleted
    pub async fn delete_replay(&self, volume: &ScVolume, replay_id: &str) -> Result<bool> {
        let Some(replay) = self.find_replay(volume, replay_id).await? else {
            debug!("Replay {} of {} not found", replay_id, volume.name);
            return Ok(true);
        };
        if !self.expire_replay(&replay).await? {
            error!("Unable to expire replay {} of {}", replay_id, volume.name);
            return Ok(false);
        }
        Ok(true)
    }

    /// Expire every inactive replay of `volume`; anything that fails is left
    /// behind.
    pub async fn expire_all_replays(&self, volume: &ScVolume) -> Result<()> {
        for replay in self.list_replays(volume).await? {
            if replay.active {
                continue;
            }
            if let Err(e) = self.expire_replay(&replay).await {
                debug!("Expire of replay {} failed: {}", replay.instance_id, e);
            }
        }
        Ok(())
    }

    /// New volume `name` presenting the content of `replay`
    pub async fn create_view_volume(&self, name: &str, replay: &ScReplay) -> Result<ScVolume> {
        let folder = self.find_volume_folder(true).await?;
        let body = CreateViewPayload {
            name: name.to_string(),
            notes: self.notes(),
            volume_folder: folder.map(|f| f.instance_id),
        };
        let resp = self
            .client
            .post(
                &format!("StorageCenter/ScReplay/{}/CreateView", replay.instance_id),
                Self::payload(&body)?,
                true,
            )
            .await?;
        let volume: Option<ScVolume> = if resp.is_success() { resp.first()? } else { None };
        volume.ok_or_else(|| {
            Error::backend(BACKEND, format!("Unable to create view volume {}", name))
        })
    }

    // =========================================================================
    // Copy-Mirror-Migrate
    // =========================================================================

    /// Wait for a copy into `dest` to finish.
    ///
    /// A CMM reported as running is polled indefinitely. Once the CMM object
    /// can no longer be read, the copy has finished exactly when the marker
    /// replay shows up on `dest`; only those misses count against the budget.
    pub async fn wait_for_cmm(
        &self,
        cmm: &ScCopyMirrorMigrate,
        dest: &ScVolume,
        replay_id: &str,
    ) -> Result<bool> {
        let mut job = AsyncJob::new(
            cmm.instance_id.clone(),
            format!("StorageCenter/ScCopyMirrorMigrate/{}", cmm.instance_id),
        );
        let url = job.handle.as_str();
        let this = self;

        let outcome = poll_job(&self.config.cmm_poll, &cmm.instance_id, move || async move {
            let resp = this.client.get(url).await?;
            if resp.is_success() {
                if let Some(current) = resp.first::<ScCopyMirrorMigrate>()? {
                    let state = JobState::from_cmm(&current.state);
                    return Ok(match state {
                        JobState::Running => PollStatus::Progressing,
                        terminal => PollStatus::Ready(terminal),
                    });
                }
            }
            match this.find_replay(dest, replay_id).await? {
                Some(_) => Ok(PollStatus::Ready(JobState::Finished)),
                None => Ok(PollStatus::Pending),
            }
        })
        .await?;

        let state = match outcome {
            JobOutcome::Completed(state) => state,
            JobOutcome::TimedOut { attempts } => {
                warn!(
                    "Copy {} into {} not confirmed after {} checks",
                    cmm.instance_id, dest.name, attempts
                );
                JobState::Unknown
            }
        };
        job.observe(state, None);
        debug!(
            "Copy {} ended {} after {}s",
            job.id,
            job.state,
            job.elapsed().num_seconds()
        );
        Ok(job.state.is_success())
    }

    /// Replay `src`, start a copy of it into `dest` and wait for the copy
    async fn copy_volume(&self, src: &ScVolume, dest: &ScVolume) -> Result<bool> {
        let replay_id = Uuid::new_v4().to_string();
        if self
            .create_replay(src, &replay_id, CLONE_REPLAY_EXPIRE_MINUTES)
            .await?
            .is_none()
        {
            return Ok(false);
        }

        let body = CmmCopyPayload {
            copy_replays: true,
            destination_volume: dest.instance_id.clone(),
            source_volume: src.instance_id.clone(),
            storage_center: src.sc_serial_number,
            priority: "High".to_string(),
        };
        let resp = self
            .client
            .post("StorageCenter/ScCopyMirrorMigrate/Copy", Self::payload(&body)?, true)
            .await?;
        let cmm: Option<ScCopyMirrorMigrate> = if resp.is_success() { resp.first()? } else { None };
        let Some(cmm) = cmm else {
            error!("Unable to start copy of {} into {}", src.name, dest.name);
            return Ok(false);
        };

        let state = JobState::from_cmm(&cmm.state);
        if state.is_terminal() && !state.is_success() {
            warn!("Copy {} reported {} at start", cmm.instance_id, state);
            return Ok(false);
        }
        self.wait_for_cmm(&cmm, dest, &replay_id).await
    }

    /// Clone `src` into a new volume `name`.
    ///
    /// Once the new volume exists, any later failure deletes it exactly once
    /// before the error is returned.
    #[instrument(skip(self, src), fields(src = %src.name))]
    pub async fn create_cloned_volume(&self, name: &str, src: &ScVolume) -> Result<ScVolume> {
        let size_gb = src.size_gb().ok_or_else(|| {
            Error::backend(BACKEND, format!("Volume {} has no configured size", src.name))
        })?;
        let dest = self.create_volume(name, size_gb).await?;

        let failure = match self.copy_volume(src, &dest).await {
            Ok(true) => {
                if let Err(e) = self.expire_all_replays(&dest).await {
                    warn!("Unable to expire replays of clone {}: {}", name, e);
                }
                info!("Cloned {} into {}", src.name, name);
                return Ok(dest);
            }
            Ok(false) => format!("Copy of {} into {} failed", src.name, name),
            Err(e) => format!("Copy of {} into {} failed: {}", src.name, name, e),
        };

        error!("{}; deleting {}", failure, name);
        if let Err(e) = self.delete_volume(name, Some(&dest.instance_id)).await {
            error!("Unable to delete partial clone {}: {}", name, e);
        }
        Err(Error::backend(BACKEND, failure))
    }
}
