//! Waiting on provider jobs.
//!
//! A job moves `Submitted -> Polling -> Succeeded | Failed | TimedOut`.
//! Status is queried at a fixed interval until a terminal state is seen or
//! the deadline passes. The loop only awaits, so it never holds up other
//! requests, and dropping the future (client went away) stops it.

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::PollPolicy;
use crate::error::ProviderError;
use crate::ocr::JobProvider;
use crate::schema::{JobHandle, JobStatus};

/// Reason recorded when a provider fails a job without saying why.
const UNKNOWN_FAILURE: &str = "unknown error";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    Submitted,
    Polling { attempts: u32 },
    Succeeded,
    Failed { message: String },
    TimedOut { attempts: u32 },
}

impl PollState {
    /// Fold one status observation into the state.
    pub fn observe(self, status: &JobStatus) -> PollState {
        if self.is_terminal() {
            return self;
        }
        let attempts = self.attempts() + 1;
        match status {
            JobStatus::Pending => PollState::Polling { attempts },
            JobStatus::Succeeded => PollState::Succeeded,
            JobStatus::Failed { message } => PollState::Failed {
                message: message.clone().unwrap_or_else(|| UNKNOWN_FAILURE.to_string()),
            },
        }
    }

    /// Give up waiting. Only meaningful while still polling.
    pub fn expire(self) -> PollState {
        match self {
            PollState::Submitted => PollState::TimedOut { attempts: 0 },
            PollState::Polling { attempts } => PollState::TimedOut { attempts },
            terminal => terminal,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PollState::Succeeded | PollState::Failed { .. } | PollState::TimedOut { .. }
        )
    }

    fn attempts(&self) -> u32 {
        match self {
            PollState::Polling { attempts } | PollState::TimedOut { attempts } => *attempts,
            _ => 0,
        }
    }
}

/// How a job finished from the provider's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed { message: String },
}

/// Poll `handle` until the provider reports a terminal state.
///
/// Errors from the status call abort immediately; there is no retry.
pub async fn poll_until_terminal(
    provider: &dyn JobProvider,
    handle: &JobHandle,
    policy: PollPolicy,
) -> Result<JobOutcome, ProviderError> {
    let started = Instant::now();
    // Unrepresentable deadlines mean "wait forever".
    let deadline = started.checked_add(policy.timeout);
    let mut state = PollState::Submitted;

    loop {
        let status = provider.status(handle).await?;
        state = state.observe(&status);

        match &state {
            PollState::Succeeded => {
                info!(
                    "Job {} succeeded after {:?} on {}",
                    handle.job_id,
                    started.elapsed(),
                    provider.name()
                );
                return Ok(JobOutcome::Succeeded);
            }
            PollState::Failed { message } => {
                warn!("Job {} failed on {}: {}", handle.job_id, provider.name(), message);
                return Ok(JobOutcome::Failed {
                    message: message.clone(),
                });
            }
            PollState::Polling { attempts } => {
                debug!("Job {} still pending (attempt {})", handle.job_id, attempts);
            }
            PollState::Submitted | PollState::TimedOut { .. } => {}
        }

        let next_poll = Instant::now().checked_add(policy.interval);
        let past_deadline = match (deadline, next_poll) {
            (Some(deadline), Some(next_poll)) => next_poll > deadline,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if past_deadline {
            state = state.expire();
            warn!("Job {} gave up waiting: {:?}", handle.job_id, state);
            return Err(ProviderError::TimedOut {
                job_id: handle.job_id.clone(),
                waited: started.elapsed(),
            });
        }

        sleep(policy.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::JobRequest;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    /// Replays a scripted sequence of statuses; the last one repeats.
    struct Scripted {
        statuses: Mutex<VecDeque<JobStatus>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(statuses: Vec<JobStatus>) -> Self {
            Self {
                statuses: Mutex::new(statuses.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait::async_trait]
    impl JobProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn submit(&self, _job: &JobRequest<'_>) -> Result<JobHandle, ProviderError> {
            unreachable!("the poller never submits")
        }

        async fn status(&self, _handle: &JobHandle) -> Result<JobStatus, ProviderError> {
            *self.calls.lock().unwrap() += 1;
            let mut statuses = self.statuses.lock().unwrap();
            if statuses.len() > 1 {
                Ok(statuses.pop_front().unwrap())
            } else {
                Ok(statuses.front().cloned().unwrap())
            }
        }

        async fn fetch(&self, _handle: &JobHandle) -> Result<serde_json::Value, ProviderError> {
            unreachable!("the poller never fetches")
        }
    }

    fn handle() -> JobHandle {
        JobHandle {
            job_id: "job-1".to_string(),
            extraction_id: Uuid::new_v4(),
        }
    }

    fn fast() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_state_transitions() {
        let state = PollState::Submitted.observe(&JobStatus::Pending);
        assert_eq!(state, PollState::Polling { attempts: 1 });
        let state = state.observe(&JobStatus::Pending);
        assert_eq!(state, PollState::Polling { attempts: 2 });
        assert_eq!(state.clone().expire(), PollState::TimedOut { attempts: 2 });
        assert_eq!(state.observe(&JobStatus::Succeeded), PollState::Succeeded);

        let failed = PollState::Submitted.observe(&JobStatus::Failed { message: None });
        assert_eq!(
            failed,
            PollState::Failed {
                message: "unknown error".to_string()
            }
        );
        // Terminal states stay put.
        assert_eq!(failed.clone().observe(&JobStatus::Succeeded), failed);
        assert_eq!(failed.clone().expire(), failed);
    }

    #[tokio::test]
    async fn test_polls_until_success() {
        let provider = Scripted::new(vec![
            JobStatus::Pending,
            JobStatus::Pending,
            JobStatus::Succeeded,
        ]);
        let outcome = poll_until_terminal(&provider, &handle(), fast()).await.unwrap();
        assert_eq!(outcome, JobOutcome::Succeeded);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_reports_failure_message() {
        let provider = Scripted::new(vec![
            JobStatus::Pending,
            JobStatus::Failed {
                message: Some("unsupported format".to_string()),
            },
        ]);
        let outcome = poll_until_terminal(&provider, &handle(), fast()).await.unwrap();
        assert_eq!(
            outcome,
            JobOutcome::Failed {
                message: "unsupported format".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_huge_timeout_does_not_overflow() {
        let provider = Scripted::new(vec![JobStatus::Pending, JobStatus::Succeeded]);
        let policy = PollPolicy {
            interval: Duration::from_millis(1),
            timeout: Duration::from_secs(u64::MAX),
        };
        let outcome = poll_until_terminal(&provider, &handle(), policy).await.unwrap();
        assert_eq!(outcome, JobOutcome::Succeeded);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_times_out() {
        let provider = Scripted::new(vec![JobStatus::Pending]);
        let policy = PollPolicy {
            interval: Duration::from_millis(5),
            timeout: Duration::from_millis(30),
        };
        let err = poll_until_terminal(&provider, &handle(), policy)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::TimedOut { .. }));
        assert!(provider.calls() >= 1);
    }
}
