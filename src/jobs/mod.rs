//! Async Job Poller
//!
//! Turns a just-submitted vendor job into a definite outcome. The poll loop is
//! generic; each adapter supplies a probe that fetches the vendor status and
//! maps it onto [`JobState`].

pub mod poller;

pub use poller::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// =============================================================================
// Poll Configuration
// =============================================================================

/// Interval and retry budget for one kind of job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Sleep between polls, in milliseconds
    pub interval_ms: u64,
    /// Polls tolerated after the first one before giving up
    pub max_retries: u32,
}

impl PollConfig {
    pub const fn new(interval: Duration, max_retries: u32) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            max_retries,
        }
    }

    /// VMAX CIM jobs: 60 retries, 10 seconds apart
    pub const fn cim_default() -> Self {
        Self::new(Duration::from_secs(10), 60)
    }

    /// Dell SC copy-mirror-migrate wait: 21 checks, 3 seconds apart
    pub const fn cmm_default() -> Self {
        Self::new(Duration::from_secs(3), 20)
    }

    /// Dell SC REST async tasks: polled every second
    pub const fn async_task_default() -> Self {
        Self::new(Duration::from_secs(1), 300)
    }

    /// No sleeping between polls
    pub const fn immediate(max_retries: u32) -> Self {
        Self::new(Duration::ZERO, max_retries)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::cim_default()
    }
}

// =============================================================================
// Job State
// =============================================================================

/// Uniform job state across vendors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Running,
    Finished,
    Erred,
    Paused,
    Killed,
    Unknown,
}

/// CIM_ConcreteJob.JobState values that are still in flight:
/// New, Starting, Running and Queue Pending.
pub const CIM_NON_TERMINAL_STATES: [u16; 4] = [2, 3, 4, 32767];

const CIM_SUSPENDED: u16 = 5;
const CIM_COMPLETED: u16 = 7;
const CIM_TERMINATED: u16 = 8;
const CIM_KILLED: u16 = 9;
const CIM_EXCEPTION: u16 = 10;

impl JobState {
    /// Map a CIM job state; a completed job only counts as finished when its
    /// error code is zero.
    pub fn from_cim(state: u16, error_code: u32) -> Self {
        if CIM_NON_TERMINAL_STATES.contains(&state) {
            return JobState::Running;
        }
        match state {
            CIM_COMPLETED if error_code == 0 => JobState::Finished,
            CIM_COMPLETED | CIM_EXCEPTION => JobState::Erred,
            CIM_SUSPENDED => JobState::Paused,
            CIM_TERMINATED | CIM_KILLED => JobState::Killed,
            _ => JobState::Unknown,
        }
    }

    /// Map a Dell SC copy-mirror-migrate state. Anything that is not one of
    /// the three terminal names is still in flight.
    pub fn from_cmm(state: &str) -> Self {
        match state {
            "Finished" => JobState::Finished,
            "Erred" => JobState::Erred,
            "Paused" => JobState::Paused,
            _ => JobState::Running,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Running)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobState::Finished)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Running => write!(f, "running"),
            JobState::Finished => write!(f, "finished"),
            JobState::Erred => write!(f, "erred"),
            JobState::Paused => write!(f, "paused"),
            JobState::Killed => write!(f, "killed"),
            JobState::Unknown => write!(f, "unknown"),
        }
    }
}

// =============================================================================
// Async Job
// =============================================================================

/// Handle for an operation the array runs asynchronously
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncJob {
    /// Vendor job id
    pub id: String,
    /// What to poll (URL or CIM object path)
    pub handle: String,
    pub state: JobState,
    /// Last error reported by the array
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl AsyncJob {
    pub fn new(id: impl Into<String>, handle: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            handle: handle.into(),
            state: JobState::Running,
            error: None,
            submitted_at: Utc::now(),
        }
    }

    /// Record a polled state
    pub fn observe(&mut self, state: JobState, error: Option<String>) {
        self.state = state;
        if error.is_some() {
            self.error = error;
        }
    }

    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now() - self.submitted_at
    }
}
