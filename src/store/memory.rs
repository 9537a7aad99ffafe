use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::{ ThreadEntry, ThreadStore };

pub struct MemoryThreadStore {
    entries: RwLock<HashMap<String, ThreadEntry>>,
    ttl: Option<Duration>,
}

impl MemoryThreadStore {
    /// `ttl` of `None` keeps threads for the life of the process.
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn is_expired(&self, entry: &ThreadEntry, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.duration_since(entry.last_used) >= ttl,
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl ThreadStore for MemoryThreadStore {
    async fn get(&self, thread_id: &str) -> Option<ThreadEntry> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(thread_id) {
                Some(entry) if !self.is_expired(entry, now) => {
                    return Some(entry.clone());
                }
                Some(_) => {}
                None => {
                    return None;
                }
            }
        }
        let mut entries = self.entries.write().await;
        if entries.get(thread_id).is_some_and(|e| self.is_expired(e, now)) {
            entries.remove(thread_id);
        }
        None
    }

    async fn put(&self, entry: ThreadEntry) {
        self.entries.write().await.insert(entry.thread_id.clone(), entry);
    }

    async fn delete(&self, thread_id: &str) -> bool {
        self.entries.write().await.remove(thread_id).is_some()
    }

    async fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !self.is_expired(entry, now));
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn put_get_delete() {
        let store = MemoryThreadStore::new(None);
        store.put(ThreadEntry::new("thread_1")).await;
        assert_eq!(store.get("thread_1").await.unwrap().thread_id, "thread_1");
        assert!(store.get("thread_2").await.is_none());
        assert!(store.delete("thread_1").await);
        assert!(!store.delete("thread_1").await);
        assert!(store.get("thread_1").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_entries_expire() {
        let store = MemoryThreadStore::new(Some(Duration::from_secs(60)));
        store.put(ThreadEntry::new("old")).await;
        tokio::time::advance(Duration::from_secs(45)).await;
        store.put(ThreadEntry::new("fresh")).await;

        let mut old = store.get("old").await.unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(store.get("old").await.is_none());
        assert_eq!(store.len().await, 1);

        old.touch();
        store.put(old).await;
        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(store.evict_expired().await, 1);
        assert!(store.get("old").await.is_some());
        assert!(store.get("fresh").await.is_none());
    }

    #[tokio::test]
    async fn concurrent_inserts_are_all_kept() {
        let store = Arc::new(MemoryThreadStore::new(None));
        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            handles.push(
                tokio::spawn(async move {
                    store.put(ThreadEntry::new(format!("thread_{}", i))).await;
                })
            );
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.len().await, 32);
    }
}
