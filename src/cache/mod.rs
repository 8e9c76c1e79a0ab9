//! Response caching for GraphQL requests.
//!
//! - [`key`] turns a request into a [`CacheKey`] and a cacheability verdict
//! - [`store`] wraps the backing key/value store behind a timeout
//! - [`policy`] decides what to look up and what to keep
//!
//! ## Example
//!
//! ```
//! use graphql_proxy_cache::cache::{CachePolicy, MemoryStore, StoreAdapter};
//! use graphql_proxy_cache::config::CacheConfig;
//! use std::{sync::Arc, time::Duration};
//!
//! let store = StoreAdapter::new(Arc::new(MemoryStore::new()), Duration::from_millis(250));
//! let policy = CachePolicy::new(Arc::new(CacheConfig::default()), store);
//! assert_eq!(policy.config().ttl_seconds, 300);
//! ```

pub mod key;
pub mod policy;
pub mod store;

pub use key::{CacheKey, DerivedKey, ExtractionError, KeyDeriver, RequestSource};
pub use policy::{
    CachePolicy, CacheStatus, LookupOutcome, RequestState, SkipReason, StoreOutcome, TtlDecision,
};
pub use store::{CacheStore, Lookup, MAX_TTL, MemoryStore, RedisStore, StoreAdapter, StoreError};
