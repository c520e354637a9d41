//! Fixed-interval poll loop with a retry budget

use super::PollConfig;
use crate::error::{Error, Result};
use std::future::Future;
use tokio::time::sleep;
use tracing::{debug, warn};

/// What one probe of a job observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus<T> {
    /// Not done and no evidence of progress; consumes one retry
    Pending,
    /// The array reports the job as running; does not consume a retry
    Progressing,
    /// Terminal
    Ready(T),
}

/// Result of a poll loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome<T> {
    Completed(T),
    TimedOut { attempts: u32 },
}

impl<T> JobOutcome<T> {
    /// Convert a timeout into [`Error::JobTimeout`]
    pub fn into_result(self, job: &str) -> Result<T> {
        match self {
            JobOutcome::Completed(v) => Ok(v),
            JobOutcome::TimedOut { attempts } => Err(Error::JobTimeout {
                job: job.to_string(),
                attempts,
            }),
        }
    }
}

/// Poll `probe` until it reports a terminal value or the budget runs out.
///
/// Probe errors abort the loop and are returned unchanged. Exhausting the
/// budget is not an error here; the caller decides how to report it.
pub async fn poll_job<T, F, Fut>(config: &PollConfig, job: &str, mut probe: F) -> Result<JobOutcome<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollStatus<T>>>,
{
    let mut attempts: u32 = 0;
    loop {
        match probe().await? {
            PollStatus::Ready(value) => {
                debug!("Job {} reached a terminal state after {} retries", job, attempts);
                return Ok(JobOutcome::Completed(value));
            }
            PollStatus::Pending => {
                attempts += 1;
                if attempts > config.max_retries {
                    warn!("Job {} still pending after {} polls, giving up", job, attempts);
                    return Ok(JobOutcome::TimedOut { attempts });
                }
            }
            PollStatus::Progressing => {}
        }
        sleep(config.interval()).await;
    }
}
