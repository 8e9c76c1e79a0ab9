//! Cache store adapter.
//!
//! [`StoreAdapter`] is the only way the policy engine talks to storage. It
//! bounds every call with the configured timeout, turns transport failures
//! into a tagged [`Lookup`] instead of an error to inspect, and absorbs the
//! "store turned off" mode so callers never branch on it.

mod memory;
mod redis;

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use bytes::Bytes;
use thiserror::Error;
use tracing::warn;

use crate::config::CacheConfig;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Longest lifetime any entry is written with. Longer TTLs are cut down to
/// this before they reach a backend.
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Boxed future returned by [`CacheStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("cache store did not answer within {0:?}")]
    Timeout(Duration),

    #[error("cache store error: {0}")]
    Backend(String),
}

/// A key/value store with per-entry expiry.
///
/// Implementations must be safe to call from many requests at once; each
/// call is independent.
pub trait CacheStore: Send + Sync {
    /// `Ok(None)` when the key is absent. Only infrastructure failures are errors.
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Result<Option<Bytes>, StoreError>>;

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: Bytes,
        ttl: Duration,
    ) -> StoreFuture<'a, Result<(), StoreError>>;
}

/// Result of a cache read.
#[derive(Debug)]
pub enum Lookup {
    Hit(Bytes),
    Miss,
    /// The store could not be reached or did not answer in time.
    TransportError(StoreError),
}

/// Timeout-bounded handle to the configured store, cheap to clone.
#[derive(Clone)]
pub struct StoreAdapter {
    backend: Option<Arc<dyn CacheStore>>,
    timeout: Duration,
}

impl StoreAdapter {
    pub fn new(store: Arc<dyn CacheStore>, timeout: Duration) -> Self {
        Self {
            backend: Some(store),
            timeout,
        }
    }

    /// Every lookup misses and every write succeeds without doing anything.
    /// [`CachePolicy`](crate::cache::CachePolicy) checks
    /// [`is_disabled`](Self::is_disabled) and skips the write altogether.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            timeout: Duration::ZERO,
        }
    }

    /// Picks the disabled mode or a Redis store according to `config`.
    ///
    /// Only the URL is checked here; the connection is made on first use.
    pub fn from_config(config: &CacheConfig) -> Result<Self, StoreError> {
        if config.turn_off_redis {
            return Ok(Self::disabled());
        }
        let store = RedisStore::open(&config.redis_url)?;
        Ok(Self::new(Arc::new(store), config.store_timeout()))
    }

    pub fn is_disabled(&self) -> bool {
        self.backend.is_none()
    }

    pub async fn get(&self, key: &str) -> Lookup {
        let Some(backend) = &self.backend else {
            return Lookup::Miss;
        };

        let result = match tokio::time::timeout(self.timeout, backend.get(key)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        };

        match result {
            Ok(Some(value)) => Lookup::Hit(value),
            Ok(None) => Lookup::Miss,
            Err(error) => {
                warn!(%key, %error, "cache lookup failed, treating as miss");
                Lookup::TransportError(error)
            }
        }
    }

    pub async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StoreError> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };

        let ttl = ttl.min(MAX_TTL);
        match tokio::time::timeout(self.timeout, backend.set(key, value, ttl)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }
}

impl std::fmt::Debug for StoreAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreAdapter")
            .field("disabled", &self.is_disabled())
            .field("timeout", &self.timeout)
            .finish()
    }
}
