pub mod extract;
pub mod openai;
pub mod waiter;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::models::chat::{ Message, Role, Run, RunStatus, Thread };
use self::openai::OpenAIAssistantClient;

pub use self::extract::{ latest_assistant_text, NO_RESPONSE };
pub use self::waiter::RunWaiter;

/// Why a wait on a run was abandoned before it reached a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitAbort {
    Deadline(Duration),
    Cancelled,
}

impl fmt::Display for WaitAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitAbort::Deadline(limit) => write!(f, "no terminal status within {:?}", limit),
            WaitAbort::Cancelled => write!(f, "wait cancelled by caller"),
        }
    }
}

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("{operation} failed (status {status:?}): {message}")] Remote {
        operation: &'static str,
        status: Option<u16>,
        message: String,
    },

    #[error("transport error: {0}")] Transport(#[from] reqwest::Error),

    #[error("run {run_id} ended with status {status}: {detail}")] RunFailed {
        run_id: String,
        status: RunStatus,
        detail: String,
    },

    #[error("run {run_id} timed out: {reason}")] RunTimeout {
        run_id: String,
        reason: WaitAbort,
    },

    #[error("thread {thread_id} still has run {run_id} in progress")] ThreadBusy {
        thread_id: String,
        run_id: String,
    },

    #[error("no {0} assistant configured")] NotConfigured(&'static str),
}

impl AssistantError {
    pub fn remote(operation: &'static str, message: impl Into<String>) -> Self {
        AssistantError::Remote { operation, status: None, message: message.into() }
    }

    /// True for failures of the remote calls themselves, as opposed to run outcomes.
    pub fn is_remote(&self) -> bool {
        matches!(self, AssistantError::Remote { .. } | AssistantError::Transport(_))
    }
}

/// Single-attempt access to the remote assistant service. Implementations
/// never retry and never cache.
#[async_trait]
pub trait AssistantClient: Send + Sync {
    async fn create_thread(&self) -> Result<Thread, AssistantError>;

    /// Appends a message and returns its id.
    async fn post_message(
        &self,
        thread_id: &str,
        role: Role,
        text: &str
    ) -> Result<String, AssistantError>;

    async fn start_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run, AssistantError>;

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError>;

    /// Messages of the thread, newest first.
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<Message>, AssistantError>;
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: None,
            request_timeout: Duration::from_secs(60),
        }
    }
}

pub fn new_client(
    config: &ClientConfig
) -> Result<Arc<dyn AssistantClient>, Box<dyn StdError + Send + Sync>> {
    let client = OpenAIAssistantClient::from_config(config)?;
    Ok(Arc::new(client))
}
