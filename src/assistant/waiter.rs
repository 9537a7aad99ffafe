use log::{ debug, info, warn };
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{ sleep, Instant };
use tokio_util::sync::CancellationToken;

use super::{ AssistantClient, AssistantError, WaitAbort };
use crate::models::chat::{ Run, RunStatus };

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Polls a run at a fixed interval until it completes, fails, runs past the
/// deadline, or the caller cancels.
#[derive(Clone)]
pub struct RunWaiter {
    client: Arc<dyn AssistantClient>,
    poll_interval: Duration,
    max_wait: Option<Duration>,
}

impl RunWaiter {
    pub fn new(client: Arc<dyn AssistantClient>) -> Self {
        Self {
            client,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: None,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// `None` polls until a terminal status or cancellation.
    pub fn with_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub async fn await_completion(
        &self,
        thread_id: &str,
        run_id: &str,
        cancel: &CancellationToken
    ) -> Result<Run, AssistantError> {
        let deadline = self.max_wait.map(|limit| (Instant::now() + limit, limit));
        let abort = |reason: WaitAbort| AssistantError::RunTimeout {
            run_id: run_id.to_string(),
            reason,
        };
        let mut last_status = None;

        loop {
            let run = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(abort(WaitAbort::Cancelled)),
                run = self.client.get_run(thread_id, run_id) => run?,
            };

            if last_status != Some(run.status) {
                debug!("Run {} on thread {} is {}", run_id, thread_id, run.status);
                last_status = Some(run.status);
            }

            if run.status == RunStatus::Completed {
                info!("Run {} completed", run_id);
                return Ok(run);
            }
            if run.status.is_failure() {
                let detail = run.last_error
                    .as_ref()
                    .and_then(|e| e.message.clone().or_else(|| e.code.clone()))
                    .unwrap_or_else(|| "no detail from service".to_string());
                warn!("Run {} ended with status {}: {}", run_id, run.status, detail);
                return Err(AssistantError::RunFailed {
                    run_id: run_id.to_string(),
                    status: run.status,
                    detail,
                });
            }

            if let Some((at, limit)) = deadline {
                if Instant::now() >= at {
                    warn!("Run {} still {} after {:?}, giving up", run_id, run.status, limit);
                    return Err(abort(WaitAbort::Deadline(limit)));
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(abort(WaitAbort::Cancelled)),
                _ = sleep(self.poll_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::testing::ScriptedClient;
    use RunStatus::*;

    async fn started(statuses: &[RunStatus]) -> (Arc<dyn AssistantClient>, Run) {
        let scripted = Arc::new(ScriptedClient::new().script("asst", statuses, Some("done")));
        let thread = scripted.create_thread().await.unwrap();
        let run = scripted.start_run(&thread.id, "asst").await.unwrap();
        (scripted as Arc<dyn AssistantClient>, run)
    }

    #[tokio::test(start_paused = true)]
    async fn returns_once_completed() {
        let (client, run) = started(&[Queued, InProgress, InProgress, Completed]).await;
        let waiter = RunWaiter::new(client);
        let done = waiter
            .await_completion(&run.thread_id, &run.id, &CancellationToken::new()).await
            .unwrap();
        assert_eq!(done.status, Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn fails_on_first_failed_status() {
        let scripted = Arc::new(ScriptedClient::new().script("asst", &[InProgress, Failed, Completed], None));
        let thread = scripted.create_thread().await.unwrap();
        let run = scripted.start_run(&thread.id, "asst").await.unwrap();
        let waiter = RunWaiter::new(scripted.clone());

        let err = waiter
            .await_completion(&thread.id, &run.id, &CancellationToken::new()).await
            .unwrap_err();
        assert!(matches!(err, AssistantError::RunFailed { status: Failed, .. }));
        assert_eq!(scripted.status_reads(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_runs_are_terminal() {
        let (client, run) = started(&[Queued, Expired]).await;
        let err = RunWaiter::new(client)
            .await_completion(&run.thread_id, &run.id, &CancellationToken::new()).await
            .unwrap_err();
        assert!(matches!(err, AssistantError::RunFailed { status: Expired, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_status_is_bounded_by_deadline() {
        let (client, run) = started(&[Unknown]).await;
        let waiter = RunWaiter::new(client)
            .with_poll_interval(Duration::from_millis(500))
            .with_max_wait(Some(Duration::from_secs(3)));

        let started_at = Instant::now();
        let err = waiter
            .await_completion(&run.thread_id, &run.id, &CancellationToken::new()).await
            .unwrap_err();
        assert!(
            matches!(err, AssistantError::RunTimeout { reason: WaitAbort::Deadline(d), .. } if d == Duration::from_secs(3))
        );
        assert!(started_at.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_polling() {
        let scripted = Arc::new(ScriptedClient::new().script("asst", &[InProgress], None));
        let thread = scripted.create_thread().await.unwrap();
        let run = scripted.start_run(&thread.id, "asst").await.unwrap();
        let waiter = RunWaiter::new(scripted.clone());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(3500)).await;
            trigger.cancel();
        });

        let err = waiter.await_completion(&thread.id, &run.id, &cancel).await.unwrap_err();
        assert!(matches!(err, AssistantError::RunTimeout { reason: WaitAbort::Cancelled, .. }));
        let reads = scripted.status_reads();
        assert!((3..=5).contains(&reads), "unexpected number of polls: {}", reads);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_error_propagates() {
        let client: Arc<dyn AssistantClient> = Arc::new(ScriptedClient::new());
        let err = RunWaiter::new(client)
            .await_completion("thread_x", "run_missing", &CancellationToken::new()).await
            .unwrap_err();
        assert!(err.is_remote());
    }
}
