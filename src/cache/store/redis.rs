use std::time::Duration;

use bytes::Bytes;
use redis::{Client, aio::ConnectionManager};
use tokio::sync::OnceCell;

use super::{CacheStore, StoreError, StoreFuture};

/// Redis-backed store.
///
/// Entries are written with `SET key value PX <ttl-ms>`, so expiry is left
/// to Redis. The connection is opened on first use and shared afterwards;
/// the connection manager reconnects on its own after failures.
pub struct RedisStore {
    client: Client,
    connection: OnceCell<ConnectionManager>,
}

impl RedisStore {
    /// Validates `url` without connecting.
    pub fn open(url: &str) -> Result<Self, StoreError> {
        Ok(Self {
            client: Client::open(url)?,
            connection: OnceCell::new(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let connection = self
            .connection
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await
            .inspect_err(|e| tracing::error!("error connecting to Redis: {e}"))?;

        Ok(connection.clone())
    }
}

impl CacheStore for RedisStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Result<Option<Bytes>, StoreError>> {
        Box::pin(async move {
            let mut conn = self.connection().await?;
            let value = redis::cmd("GET")
                .arg(key)
                .query_async::<_, Option<Vec<u8>>>(&mut conn)
                .await?;

            Ok(value.map(Bytes::from))
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: Bytes,
        ttl: Duration,
    ) -> StoreFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut conn = self.connection().await?;
            // PX 0 is rejected by Redis.
            let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

            redis::cmd("SET")
                .arg(key)
                .arg(value.as_ref())
                .arg("PX")
                .arg(ttl_ms)
                .query_async::<_, ()>(&mut conn)
                .await?;

            Ok(())
        })
    }
}
