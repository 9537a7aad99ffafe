mod memory;

use async_trait::async_trait;
use log::info;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub use self::memory::MemoryThreadStore;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// What this process knows about a remote thread it issued.
#[derive(Clone, Debug)]
pub struct ThreadEntry {
    pub thread_id: String,
    pub created_at: Instant,
    pub last_used: Instant,
    /// Run started here that has not yet been seen to finish.
    pub active_run_id: Option<String>,
    /// Held while a turn is in flight so runs on one thread never overlap.
    pub turn_lock: Arc<Mutex<()>>,
}

impl ThreadEntry {
    pub fn new(thread_id: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            thread_id: thread_id.into(),
            created_at: now,
            last_used: now,
            active_run_id: None,
            turn_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }
}

#[async_trait]
pub trait ThreadStore: Send + Sync {
    async fn get(&self, thread_id: &str) -> Option<ThreadEntry>;

    async fn put(&self, entry: ThreadEntry);

    /// Returns whether an entry was removed.
    async fn delete(&self, thread_id: &str) -> bool;

    /// Drops idle entries and returns how many were removed.
    async fn evict_expired(&self) -> usize;
}

/// Periodically evicts idle threads until `shutdown` fires.
pub fn spawn_sweeper(store: Arc<dyn ThreadStore>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = store.evict_expired().await;
                    if evicted > 0 {
                        info!("Evicted {} idle conversation thread(s)", evicted);
                    }
                }
            }
        }
    });
}
