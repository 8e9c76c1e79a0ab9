use std::{
    collections::HashMap,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use tokio::time::Instant;

use super::{CacheStore, StoreError, StoreFuture};

struct Entry {
    value: Bytes,
    /// `None` when the TTL runs past what the clock can represent.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process store for local runs and tests.
///
/// Expired entries are dropped lazily, on the next read of the same key.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unexpired entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of `set` calls served.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// Time left before `key` expires. [`Duration::MAX`] for entries that
    /// never do.
    pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.expires_at.map_or(Duration::MAX, |at| at - now))
    }

    fn read(&self, key: &str) -> Option<Bytes> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some(entry) if entry.is_live(Instant::now()) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn write(&self, key: &str, value: Bytes, ttl: Duration) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let entry = Entry {
            value,
            expires_at: Instant::now().checked_add(ttl),
        };
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned(), entry);
    }
}

impl CacheStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Result<Option<Bytes>, StoreError>> {
        Box::pin(async move { Ok(self.read(key)) })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: Bytes,
        ttl: Duration,
    ) -> StoreFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.write(key, value, ttl);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let store = MemoryStore::new();
        store
            .set("k", Bytes::from_static(b"v"), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(store.remaining_ttl("k"), Some(Duration::from_secs(10)));
        assert_eq!(store.len(), 1);

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some(&b"v"[..]));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn unrepresentable_ttl_never_expires() {
        let store = MemoryStore::new();
        store
            .set("k", Bytes::from_static(b"v"), Duration::MAX)
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some(&b"v"[..]));
        assert_eq!(store.remaining_ttl("k"), Some(Duration::MAX));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn last_writer_wins() {
        let store = MemoryStore::new();
        store
            .set("k", Bytes::from_static(b"first"), Duration::from_secs(60))
            .await
            .unwrap();
        store
            .set("k", Bytes::from_static(b"second"), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some(&b"second"[..]));
        assert_eq!(store.write_count(), 2);
    }
}
