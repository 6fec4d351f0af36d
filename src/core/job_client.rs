//! Remote job client: one submission, then fixed-interval polling.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use super::progress::CancelFlag;
use crate::adapters::{JobBackend, JobRequest, PollPolicy, PollStatus, StatusHandle, Submission};
use crate::domain::{TaskError, TaskKind};

/// Result of driving one job to a terminal state
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    /// Output references, or why the job failed
    pub result: Result<Vec<String>, TaskError>,

    /// Polls issued (0 for immediate results)
    pub polls: u32,

    pub duration: Duration,
}

/// Drives submit/poll against a `JobBackend`
#[derive(Clone)]
pub struct JobClient {
    backend: Arc<dyn JobBackend>,
    image_policy: PollPolicy,
    video_policy: PollPolicy,
}

impl JobClient {
    /// Create a client with default poll policies
    pub fn new(backend: Arc<dyn JobBackend>) -> Self {
        Self {
            backend,
            image_policy: PollPolicy::image(),
            video_policy: PollPolicy::video(),
        }
    }

    pub fn with_policies(mut self, image: PollPolicy, video: PollPolicy) -> Self {
        self.image_policy = image;
        self.video_policy = video;
        self
    }

    /// Poll policy for a task kind
    pub fn policy_for(&self, kind: TaskKind) -> PollPolicy {
        match kind {
            TaskKind::Video => self.video_policy,
            _ => self.image_policy,
        }
    }

    /// Endpoint a task kind is submitted to
    pub fn endpoint(&self, kind: TaskKind) -> String {
        self.backend.endpoint(kind)
    }

    /// Submit a job and wait for its outputs.
    ///
    /// Cancellation is only checked before submission. A submitted job is
    /// polled until it completes, fails or runs out of attempts.
    pub async fn run(&self, request: &JobRequest, cancel: &CancelFlag) -> JobOutcome {
        let started = Instant::now();

        if cancel.is_cancelled() {
            return JobOutcome {
                result: Err(TaskError::Cancelled),
                polls: 0,
                duration: started.elapsed(),
            };
        }

        let (result, polls) = match self.backend.submit(request).await {
            Ok(Submission::Completed(outputs)) => (require_outputs(outputs), 0),
            Ok(Submission::Deferred(handle)) => self.poll_until_done(request, &handle).await,
            Err(e) => (Err(e), 0),
        };

        JobOutcome {
            result,
            polls,
            duration: started.elapsed(),
        }
    }

    async fn poll_until_done(
        &self,
        request: &JobRequest,
        handle: &StatusHandle,
    ) -> (Result<Vec<String>, TaskError>, u32) {
        let policy = self.policy_for(request.kind);

        for attempt in 1..=policy.max_attempts {
            sleep(policy.interval()).await;

            match self.backend.poll(request.kind, handle).await {
                Ok(PollStatus::Processing) => {
                    debug!(task = %request.task_id, attempt, "Job still processing");
                }
                Ok(PollStatus::Completed(outputs)) => return (require_outputs(outputs), attempt),
                Ok(PollStatus::Failed(reason)) => {
                    return (Err(TaskError::RemoteFailure(reason)), attempt)
                }
                Err(e) => {
                    warn!(task = %request.task_id, attempt, error = %e, "Poll failed");
                }
            }
        }

        (
            Err(TaskError::Timeout {
                attempts: policy.max_attempts,
            }),
            policy.max_attempts,
        )
    }
}

fn require_outputs(outputs: Vec<String>) -> Result<Vec<String>, TaskError> {
    if outputs.is_empty() {
        Err(TaskError::RemoteFailure("completed without output".to_string()))
    } else {
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Backend answering polls from a script; the last entry repeats
    struct ScriptedPolls {
        submission: Result<Submission, TaskError>,
        polls: Mutex<Vec<anyhow::Result<PollStatus>>>,
        poll_count: AtomicU32,
        submit_count: AtomicU32,
    }

    impl ScriptedPolls {
        fn deferred(polls: Vec<anyhow::Result<PollStatus>>) -> Self {
            Self {
                submission: Ok(Submission::Deferred(StatusHandle::Id("r1".to_string()))),
                polls: Mutex::new(polls),
                poll_count: AtomicU32::new(0),
                submit_count: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl JobBackend for ScriptedPolls {
        fn name(&self) -> &str {
            "scripted"
        }

        fn endpoint(&self, _kind: TaskKind) -> String {
            "scripted://".to_string()
        }

        async fn submit(&self, _request: &JobRequest) -> Result<Submission, TaskError> {
            self.submit_count.fetch_add(1, Ordering::SeqCst);
            self.submission.clone()
        }

        async fn poll(&self, _kind: TaskKind, _handle: &StatusHandle) -> anyhow::Result<PollStatus> {
            self.poll_count.fetch_add(1, Ordering::SeqCst);
            let mut polls = self.polls.lock().unwrap();
            if polls.len() > 1 {
                polls.remove(0)
            } else {
                match &polls[0] {
                    Ok(status) => Ok(status.clone()),
                    Err(e) => Err(anyhow::anyhow!("{}", e)),
                }
            }
        }
    }

    fn request(kind: TaskKind) -> JobRequest {
        JobRequest::prompt("t", kind, "prompt")
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_after_exactly_max_attempts() {
        let backend = Arc::new(ScriptedPolls::deferred(vec![Ok(PollStatus::Processing)]));
        let client = JobClient::new(backend.clone()).with_policies(
            PollPolicy {
                interval_ms: 2000,
                max_attempts: 3,
            },
            PollPolicy::video(),
        );

        let outcome = client.run(&request(TaskKind::PrimaryImage), &CancelFlag::new()).await;

        assert_eq!(outcome.result, Err(TaskError::Timeout { attempts: 3 }));
        assert_eq!(outcome.polls, 3);
        assert_eq!(backend.poll_count.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.duration, Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_completed() {
        let backend = Arc::new(ScriptedPolls::deferred(vec![
            Ok(PollStatus::Processing),
            Err(anyhow::anyhow!("connection reset")),
            Ok(PollStatus::Completed(vec!["https://cdn/v.mp4".to_string()])),
        ]));
        let client = JobClient::new(backend.clone());

        let outcome = client.run(&request(TaskKind::Video), &CancelFlag::new()).await;

        assert_eq!(outcome.result, Ok(vec!["https://cdn/v.mp4".to_string()]));
        assert_eq!(outcome.polls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_failure() {
        let backend = Arc::new(ScriptedPolls::deferred(vec![Ok(PollStatus::Failed(
            "content policy".to_string(),
        ))]));
        let outcome = JobClient::new(backend)
            .run(&request(TaskKind::PrimaryImage), &CancelFlag::new())
            .await;

        assert_eq!(
            outcome.result,
            Err(TaskError::RemoteFailure("content policy".to_string()))
        );
        assert_eq!(outcome.polls, 1);
    }

    #[tokio::test]
    async fn test_submission_error_skips_polling() {
        let mut backend = ScriptedPolls::deferred(vec![Ok(PollStatus::Processing)]);
        backend.submission = Err(TaskError::Submission {
            status: Some(500),
            message: "boom".to_string(),
        });
        let backend = Arc::new(backend);

        let outcome = JobClient::new(backend.clone())
            .run(&request(TaskKind::PrimaryImage), &CancelFlag::new())
            .await;

        assert!(matches!(outcome.result, Err(TaskError::Submission { .. })));
        assert_eq!(backend.poll_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_submission() {
        let backend = Arc::new(ScriptedPolls::deferred(vec![Ok(PollStatus::Processing)]));
        let cancel = CancelFlag::new();
        cancel.cancel();

        let outcome = JobClient::new(backend.clone())
            .run(&request(TaskKind::PrimaryImage), &cancel)
            .await;

        assert_eq!(outcome.result, Err(TaskError::Cancelled));
        assert_eq!(backend.submit_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_immediate_output_is_failure() {
        let mut backend = ScriptedPolls::deferred(vec![Ok(PollStatus::Processing)]);
        backend.submission = Ok(Submission::Completed(Vec::new()));

        let outcome = JobClient::new(Arc::new(backend))
            .run(&request(TaskKind::PrimaryImage), &CancelFlag::new())
            .await;

        assert_eq!(
            outcome.result,
            Err(TaskError::RemoteFailure("completed without output".to_string()))
        );
    }
}
