//! Caching policy engine.
//!
//! Per request the engine runs two phases:
//!
//! 1. [`CachePolicy::lookup`] derives a key and either bypasses the cache,
//!    answers from it, or records a miss.
//! 2. [`CachePolicy::store`] runs once the origin has answered and decides,
//!    from the status code and the client's TTL header, whether and for how
//!    long to keep the response.
//!
//! The phases share a [`RequestState`]. Nothing that goes wrong in either
//! phase is returned to the caller as an error: the worst outcome of any
//! failure is that a response is not cached.

use std::{fmt, sync::Arc, time::Duration};

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::{
    config::CacheConfig,
    http::StatusCode,
    graphql::Normalization,
};

use super::{
    key::{CacheKey, KeyDeriver, RequestSource},
    store::{Lookup, MAX_TTL, StoreAdapter, StoreError},
};

/// Value of the cache status response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Bypass,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State carried from the lookup phase to the store phase of one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestState {
    key: Option<CacheKey>,
    served_from_cache: bool,
}

impl RequestState {
    /// The key a response may be stored under, if one was established.
    pub fn key(&self) -> Option<&CacheKey> {
        self.key.as_ref()
    }

    pub fn served_from_cache(&self) -> bool {
        self.served_from_cache
    }
}

/// What the lookup phase decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    /// The request could not be read; it goes to the origin untouched.
    Skipped,
    /// Not cacheable; forward and mark the response as bypassed.
    Bypassed,
    /// Answer from the cache, do not contact the origin.
    Hit { key: CacheKey, body: Bytes },
    /// Forward to the origin. `echo_key` is false when the store lookup
    /// itself failed, in which case the key is not advertised.
    Miss { key: CacheKey, echo_key: bool },
}

impl LookupOutcome {
    /// Status to advertise on the response, if any.
    pub fn status(&self) -> Option<CacheStatus> {
        match self {
            LookupOutcome::Skipped => None,
            LookupOutcome::Bypassed => Some(CacheStatus::Bypass),
            LookupOutcome::Hit { .. } => Some(CacheStatus::Hit),
            LookupOutcome::Miss { .. } => Some(CacheStatus::Miss),
        }
    }
}

/// Why a response was not written to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The response came out of the cache in the first place.
    ServedFromCache,
    /// No key was established for the request.
    NoKey,
    ServerError,
    /// A `4xx` with error caching turned off.
    ClientError,
    /// The client sent a negative TTL.
    ClientOptOut,
    ZeroTtl,
    /// The store is turned off, so there is nowhere to write to.
    StoreDisabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlDecision {
    Store(Duration),
    Skip(SkipReason),
}

#[derive(Debug)]
pub enum StoreOutcome {
    Stored { ttl: Duration },
    NotStored(SkipReason),
    /// The write was attempted and failed; logged, never surfaced.
    Failed(StoreError),
}

/// Decides what to look up and what to keep. Shared by all requests.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    config: Arc<CacheConfig>,
    keys: KeyDeriver,
    store: StoreAdapter,
}

impl CachePolicy {
    pub fn new(config: Arc<CacheConfig>, store: StoreAdapter) -> Self {
        Self {
            keys: KeyDeriver::new(Arc::clone(&config)),
            config,
            store,
        }
    }

    /// Builds the policy with the store selected by `config`.
    pub fn from_config(config: CacheConfig) -> Result<Self, StoreError> {
        let store = StoreAdapter::from_config(&config)?;
        Ok(Self::new(Arc::new(config), store))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn keys(&self) -> &KeyDeriver {
        &self.keys
    }

    /// Runs the lookup phase for one request.
    pub async fn lookup<R>(&self, request: &R) -> (RequestState, LookupOutcome)
    where
        R: RequestSource + ?Sized,
    {
        let derived = match self.keys.derive_from(request) {
            Ok(derived) => derived,
            Err(e) => {
                error!(error = %e, "failed to derive cache key, forwarding uncached");
                return (RequestState::default(), LookupOutcome::Skipped);
            }
        };

        if derived.normalization == Normalization::Failed {
            debug!(key = %derived.key, "cache key formed from raw request body");
        }

        if !derived.cacheable {
            debug!(operation = ?derived.operation, "request is not cacheable");
            return (RequestState::default(), LookupOutcome::Bypassed);
        }

        let key = derived.key;
        let mut state = RequestState {
            key: Some(key.clone()),
            served_from_cache: false,
        };

        let outcome = match self.store.get(key.as_str()).await {
            Lookup::Hit(body) => {
                debug!(%key, bytes = body.len(), "cache hit");
                state.served_from_cache = true;
                LookupOutcome::Hit { key, body }
            }
            Lookup::Miss => {
                debug!(%key, "cache miss");
                LookupOutcome::Miss {
                    key,
                    echo_key: true,
                }
            }
            Lookup::TransportError(e) => {
                debug!(%key, error = %e, "forwarding without advertising the cache key");
                LookupOutcome::Miss {
                    key,
                    echo_key: false,
                }
            }
        };

        (state, outcome)
    }

    /// Chooses the lifetime of a response, or why it must not be kept.
    ///
    /// Server errors are never kept. Client errors are kept for the error
    /// TTL when one is configured, regardless of the TTL header. Otherwise a
    /// non-negative integer TTL header wins, a negative one opts out, and
    /// anything else falls back to the default TTL. The result never exceeds
    /// [`MAX_TTL`].
    pub fn select_ttl(&self, status: StatusCode, ttl_header: Option<&str>) -> TtlDecision {
        if status.is_server_error() {
            return TtlDecision::Skip(SkipReason::ServerError);
        }

        if status.is_client_error() {
            return match self.config.error_ttl() {
                Some(ttl) => TtlDecision::Store(ttl.min(MAX_TTL)),
                None => TtlDecision::Skip(SkipReason::ClientError),
            };
        }

        let ttl = match ttl_header.map(|value| value.trim().parse::<i64>()) {
            Some(Ok(seconds)) if seconds < 0 => return TtlDecision::Skip(SkipReason::ClientOptOut),
            Some(Ok(seconds)) => Duration::from_secs(seconds.unsigned_abs()),
            Some(Err(_)) => {
                debug!(header = ?ttl_header, "ignoring malformed TTL header");
                self.config.default_ttl()
            }
            None => self.config.default_ttl(),
        };

        if ttl.is_zero() {
            TtlDecision::Skip(SkipReason::ZeroTtl)
        } else {
            TtlDecision::Store(ttl.min(MAX_TTL))
        }
    }

    /// Runs the store phase once the origin response is known.
    pub async fn store(
        &self,
        state: &RequestState,
        status: StatusCode,
        ttl_header: Option<&str>,
        body: Bytes,
    ) -> StoreOutcome {
        if state.served_from_cache {
            return StoreOutcome::NotStored(SkipReason::ServedFromCache);
        }

        let Some(key) = &state.key else {
            return StoreOutcome::NotStored(SkipReason::NoKey);
        };

        let ttl = match self.select_ttl(status, ttl_header) {
            TtlDecision::Store(ttl) => ttl,
            TtlDecision::Skip(reason) => {
                debug!(%key, status = status.as_u16(), ?reason, "response not cached");
                return StoreOutcome::NotStored(reason);
            }
        };

        if self.store.is_disabled() {
            debug!(%key, "store is turned off, response not cached");
            return StoreOutcome::NotStored(SkipReason::StoreDisabled);
        }

        match self.store.set(key.as_str(), body, ttl).await {
            Ok(()) => {
                info!(%key, ttl_secs = ttl.as_secs(), "cached response");
                StoreOutcome::Stored { ttl }
            }
            Err(e) => {
                warn!(%key, error = %e, "failed to cache response");
                StoreOutcome::Failed(e)
            }
        }
    }
}
