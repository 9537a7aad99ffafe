use log::{ info, warn };
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::assistant::{ latest_assistant_text, AssistantClient, AssistantError, RunWaiter, WaitAbort };
use crate::models::chat::{ Message, Role, RunStatus };
use crate::models::recommendation::{
    AssistantRole,
    CourseRecommendation,
    RecommendationOutcome,
    SourceFailure,
    StudentProfile,
};
use crate::parser::ParserKind;
use crate::store::{ ThreadEntry, ThreadStore };

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub primary_assistant_id: Option<String>,
    pub course_list_assistant_id: Option<String>,
    pub poll_interval: Duration,
    pub max_wait: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub reply: String,
    pub thread_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRun {
    pub thread_id: String,
    pub run_id: String,
}

#[derive(Debug, Clone)]
pub struct RunSnapshot {
    pub status: RunStatus,
    /// Present only once the run has completed.
    pub messages: Option<Vec<Message>>,
}

/// Drives conversations against the remote assistant service.
#[derive(Clone)]
pub struct ConversationSession {
    client: Arc<dyn AssistantClient>,
    waiter: RunWaiter,
    store: Arc<dyn ThreadStore>,
    primary_assistant_id: Option<String>,
    course_list_assistant_id: Option<String>,
}

impl ConversationSession {
    pub fn new(
        client: Arc<dyn AssistantClient>,
        store: Arc<dyn ThreadStore>,
        config: SessionConfig
    ) -> Result<Self, AssistantError> {
        let primary_assistant_id = config.primary_assistant_id.filter(|id| !id.trim().is_empty());
        let course_list_assistant_id = config.course_list_assistant_id.filter(
            |id| !id.trim().is_empty()
        );
        if primary_assistant_id.is_none() && course_list_assistant_id.is_none() {
            return Err(AssistantError::NotConfigured("primary or course-list"));
        }

        let waiter = RunWaiter::new(Arc::clone(&client))
            .with_poll_interval(config.poll_interval)
            .with_max_wait(config.max_wait);

        Ok(Self {
            client,
            waiter,
            store,
            primary_assistant_id,
            course_list_assistant_id,
        })
    }

    fn chat_assistant(&self) -> Result<&str, AssistantError> {
        self.primary_assistant_id
            .as_deref()
            .or(self.course_list_assistant_id.as_deref())
            .ok_or(AssistantError::NotConfigured("chat"))
    }

    /// Configured assistants in the order they are consulted for recommendations.
    fn recommenders(&self) -> Vec<(AssistantRole, &str)> {
        let mut out = Vec::new();
        if let Some(id) = self.primary_assistant_id.as_deref() {
            out.push((AssistantRole::Primary, id));
        }
        if let Some(id) = self.course_list_assistant_id.as_deref() {
            out.push((AssistantRole::CourseList, id));
        }
        out
    }

    /// Reuses a thread this process issued, or opens a new one.
    async fn open_thread(&self, existing: Option<&str>) -> Result<ThreadEntry, AssistantError> {
        if let Some(thread_id) = existing.filter(|id| !id.trim().is_empty()) {
            if let Some(entry) = self.store.get(thread_id).await {
                return Ok(entry);
            }
            warn!("Thread {} is not known here, starting a new conversation", thread_id);
        }
        let thread = self.client.create_thread().await?;
        info!("Opened conversation thread {}", thread.id);
        let entry = ThreadEntry::new(thread.id);
        self.store.put(entry.clone()).await;
        Ok(entry)
    }

    /// Fails with `ThreadBusy` if the last run started on the thread is still going.
    async fn ensure_idle(&self, entry: &mut ThreadEntry) -> Result<(), AssistantError> {
        let Some(run_id) = entry.active_run_id.clone() else {
            return Ok(());
        };
        let run = self.client.get_run(&entry.thread_id, &run_id).await?;
        if !run.status.is_terminal() {
            return Err(AssistantError::ThreadBusy {
                thread_id: entry.thread_id.clone(),
                run_id,
            });
        }
        entry.active_run_id = None;
        Ok(())
    }

    async fn save(&self, entry: &mut ThreadEntry) {
        entry.touch();
        self.store.put(entry.clone()).await;
    }

    /// Marks `run_id` as finished if it is still the thread's active run.
    async fn settle(&self, thread_id: &str, run_id: &str) {
        let Some(entry) = self.store.get(thread_id).await else {
            return;
        };
        let turn_lock = Arc::clone(&entry.turn_lock);
        let _turn = turn_lock.lock().await;
        if let Some(mut entry) = self.store.get(thread_id).await {
            if entry.active_run_id.as_deref() == Some(run_id) {
                entry.active_run_id = None;
                self.save(&mut entry).await;
            }
        }
    }

    /// Posts the user text and starts a run, holding the thread's turn lock.
    async fn begin_turn(
        &self,
        text: &str,
        existing: Option<&str>,
        assistant_id: &str
    ) -> Result<(ThreadEntry, String), AssistantError> {
        let entry = self.open_thread(existing).await?;
        let turn_lock = Arc::clone(&entry.turn_lock);
        let _turn = turn_lock.lock().await;

        let mut entry = self.store.get(&entry.thread_id).await.unwrap_or(entry);
        self.ensure_idle(&mut entry).await?;
        self.client.post_message(&entry.thread_id, Role::User, text).await?;
        let run = self.client.start_run(&entry.thread_id, assistant_id).await?;
        entry.active_run_id = Some(run.id.clone());
        self.save(&mut entry).await;
        Ok((entry, run.id))
    }

    pub async fn send_message(
        &self,
        text: &str,
        existing_thread_id: Option<&str>,
        cancel: &CancellationToken
    ) -> Result<ChatReply, AssistantError> {
        let assistant_id = self.chat_assistant()?;
        let (entry, run_id) = self.begin_turn(text, existing_thread_id, assistant_id).await?;
        match self.waiter.await_completion(&entry.thread_id, &run_id, cancel).await {
            Ok(_) => self.settle(&entry.thread_id, &run_id).await,
            Err(e) => {
                // a timed-out run may still be going, so only a failed one is settled
                if matches!(e, AssistantError::RunFailed { .. }) {
                    self.settle(&entry.thread_id, &run_id).await;
                }
                return Err(e);
            }
        }

        let messages = self.client.list_messages(&entry.thread_id).await?;
        Ok(ChatReply {
            reply: latest_assistant_text(&messages),
            thread_id: entry.thread_id,
        })
    }

    /// Opens a thread up front and returns its id, for callers that keep one
    /// conversation for their whole lifetime.
    pub async fn open_conversation(&self) -> Result<String, AssistantError> {
        Ok(self.open_thread(None).await?.thread_id)
    }

    /// Starts a chat turn without waiting for it; poll with [`Self::run_status`].
    pub async fn start_message(
        &self,
        text: &str,
        existing_thread_id: Option<&str>
    ) -> Result<PendingRun, AssistantError> {
        let assistant_id = self.chat_assistant()?;
        let (entry, run_id) = self.begin_turn(text, existing_thread_id, assistant_id).await?;
        Ok(PendingRun {
            thread_id: entry.thread_id,
            run_id,
        })
    }

    pub async fn run_status(&self, thread_id: &str, run_id: &str) -> Result<RunSnapshot, AssistantError> {
        let run = self.client.get_run(thread_id, run_id).await?;
        if run.status.is_terminal() {
            self.settle(thread_id, run_id).await;
        }
        let messages = if run.status == RunStatus::Completed {
            Some(self.client.list_messages(thread_id).await?)
        } else {
            None
        };
        Ok(RunSnapshot { status: run.status, messages })
    }

    /// Forgets a thread so the caller's next turn starts a fresh conversation.
    pub async fn end_conversation(&self, thread_id: &str) -> bool {
        self.store.delete(thread_id).await
    }

    /// Asks every configured assistant for courses on one fresh thread.
    /// Assistants run one after another; a failing assistant is recorded in
    /// the outcome and does not stop the others.
    pub async fn request_recommendations(
        &self,
        profile: &StudentProfile,
        cancel: &CancellationToken
    ) -> Result<RecommendationOutcome, AssistantError> {
        let thread = self.client.create_thread().await?;
        info!("Requesting recommendations for student {} on thread {}", profile.student_id, thread.id);
        self.client.post_message(&thread.id, Role::User, &profile.to_prompt()).await?;

        let mut outcome = RecommendationOutcome::default();
        for (role, assistant_id) in self.recommenders() {
            let result = if cancel.is_cancelled() {
                Err(AssistantError::RunTimeout {
                    run_id: String::new(),
                    reason: WaitAbort::Cancelled,
                })
            } else {
                self.recommend_from(&thread.id, role, assistant_id, cancel).await
            };
            match result {
                Ok(recs) => {
                    info!("{} assistant suggested {} course(s)", role, recs.len());
                    outcome.recommendations.extend(recs);
                }
                Err(e) => {
                    warn!("{} assistant failed: {}", role, e);
                    outcome.failures.push(SourceFailure {
                        source: role,
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(outcome)
    }

    async fn recommend_from(
        &self,
        thread_id: &str,
        role: AssistantRole,
        assistant_id: &str,
        cancel: &CancellationToken
    ) -> Result<Vec<CourseRecommendation>, AssistantError> {
        let run = self.client.start_run(thread_id, assistant_id).await?;
        self.waiter.await_completion(thread_id, &run.id, cancel).await?;
        let messages: Vec<Message> = self.client
            .list_messages(thread_id).await?
            .into_iter()
            .filter(|m| m.run_id.as_deref().map_or(true, |id| id == run.id))
            .collect();
        let text = latest_assistant_text(&messages);
        Ok(ParserKind::from(role).parse(&text))
    }
}
