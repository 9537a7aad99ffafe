use async_trait::async_trait;
use std::collections::{ HashMap, VecDeque };
use std::sync::Mutex;
use std::sync::atomic::{ AtomicUsize, Ordering };

use super::{ AssistantClient, AssistantError };
use crate::models::chat::{ ContentBlock, Message, Role, Run, RunStatus, TextBody, Thread };

/// In-process stand-in for the remote service. Each assistant id gets a
/// scripted status sequence and a reply; the last scripted status repeats.
#[derive(Default)]
pub struct ScriptedClient {
    threads_created: AtomicUsize,
    runs_started: AtomicUsize,
    status_reads: AtomicUsize,
    scripts: Mutex<HashMap<String, AssistantScript>>,
    runs: Mutex<HashMap<String, RunState>>,
    messages: Mutex<HashMap<String, Vec<Message>>>,
    fail_create_thread: Mutex<bool>,
}

#[derive(Clone)]
struct AssistantScript {
    statuses: Vec<RunStatus>,
    reply: Option<String>,
}

struct RunState {
    thread_id: String,
    assistant_id: String,
    pending: VecDeque<RunStatus>,
    last: RunStatus,
    replied: bool,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, assistant_id: &str, statuses: &[RunStatus], reply: Option<&str>) -> Self {
        self.scripts.lock().unwrap().insert(assistant_id.to_string(), AssistantScript {
            statuses: statuses.to_vec(),
            reply: reply.map(str::to_string),
        });
        self
    }

    pub fn failing_thread_creation(self) -> Self {
        *self.fail_create_thread.lock().unwrap() = true;
        self
    }

    pub fn threads_created(&self) -> usize {
        self.threads_created.load(Ordering::SeqCst)
    }

    pub fn runs_started(&self) -> usize {
        self.runs_started.load(Ordering::SeqCst)
    }

    pub fn status_reads(&self) -> usize {
        self.status_reads.load(Ordering::SeqCst)
    }

    pub fn user_messages(&self, thread_id: &str) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .get(thread_id)
            .map(|msgs| {
                msgs.iter()
                    .rev()
                    .filter(|m| m.role == Role::User)
                    .filter_map(|m| m.first_text().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn push_message(&self, thread_id: &str, role: Role, text: &str, run_id: Option<&str>) -> String {
        let mut all = self.messages.lock().unwrap();
        let list = all.entry(thread_id.to_string()).or_default();
        let id = format!("msg_{}", list.len() + 1);
        let mut message = text_message(&id, role, text);
        message.run_id = run_id.map(str::to_string);
        list.insert(0, message);
        id
    }
}

pub fn text_message(id: &str, role: Role, text: &str) -> Message {
    Message {
        id: id.to_string(),
        role,
        content: vec![ContentBlock::Text {
            text: TextBody { value: text.to_string() },
        }],
        run_id: None,
        created_at: None,
    }
}

#[async_trait]
impl AssistantClient for ScriptedClient {
    async fn create_thread(&self) -> Result<Thread, AssistantError> {
        if *self.fail_create_thread.lock().unwrap() {
            return Err(AssistantError::remote("create thread", "service unavailable"));
        }
        let n = self.threads_created.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("thread_{}", n);
        self.messages.lock().unwrap().insert(id.clone(), Vec::new());
        Ok(Thread { id, created_at: None })
    }

    async fn post_message(
        &self,
        thread_id: &str,
        role: Role,
        text: &str
    ) -> Result<String, AssistantError> {
        if !self.messages.lock().unwrap().contains_key(thread_id) {
            return Err(AssistantError::remote("post message", format!("no thread {}", thread_id)));
        }
        Ok(self.push_message(thread_id, role, text, None))
    }

    async fn start_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run, AssistantError> {
        let script = self.scripts
            .lock()
            .unwrap()
            .get(assistant_id)
            .cloned()
            .ok_or_else(|| AssistantError::remote("start run", format!("no assistant {}", assistant_id)))?;
        let n = self.runs_started.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("run_{}", n);
        self.runs.lock().unwrap().insert(id.clone(), RunState {
            thread_id: thread_id.to_string(),
            assistant_id: assistant_id.to_string(),
            pending: script.statuses.into_iter().collect(),
            last: RunStatus::Queued,
            replied: false,
        });
        Ok(Run {
            id,
            thread_id: thread_id.to_string(),
            status: RunStatus::Queued,
            last_error: None,
            created_at: None,
        })
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError> {
        self.status_reads.fetch_add(1, Ordering::SeqCst);
        let (status, reply) = {
            let mut runs = self.runs.lock().unwrap();
            let state = runs
                .get_mut(run_id)
                .ok_or_else(|| AssistantError::remote("get run", format!("no run {}", run_id)))?;
            if let Some(next) = state.pending.pop_front() {
                state.last = next;
            }
            let mut reply = None;
            if state.last == RunStatus::Completed && !state.replied {
                state.replied = true;
                reply = self.scripts
                    .lock()
                    .unwrap()
                    .get(&state.assistant_id)
                    .and_then(|s| s.reply.clone())
                    .map(|text| (state.thread_id.clone(), text));
            }
            (state.last, reply)
        };
        if let Some((thread, text)) = reply {
            self.push_message(&thread, Role::Assistant, &text, Some(run_id));
        }
        Ok(Run {
            id: run_id.to_string(),
            thread_id: thread_id.to_string(),
            status,
            last_error: None,
            created_at: None,
        })
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<Message>, AssistantError> {
        Ok(self.messages.lock().unwrap().get(thread_id).cloned().unwrap_or_default())
    }
}
