//! Cache configuration.
//!
//! A [`CacheConfig`] is loaded once at startup, validated, and then shared
//! read-only (behind an `Arc`) by every request the gateway handles.
//!
//! ```
//! use graphql_proxy_cache::config::CacheConfig;
//!
//! let config = CacheConfig::from_json_str(
//!     r#"{ "ttl_seconds": 60, "err_ttl_seconds": 5, "headers": ["X-Tenant"] }"#,
//! )
//! .unwrap();
//! assert_eq!(config.ttl_seconds, 60);
//! assert!(!config.turn_off_redis);
//! ```

use std::{path::Path, time::Duration};

use serde::Deserialize;
use thiserror::Error;

use crate::graphql::OperationKind;

/// Errors raised while loading a [`CacheConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed cache config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid cache config: {0}")]
    Invalid(String),
}

/// Options recognized by the caching layer.
///
/// Field names are the snake_case keys of the JSON document. Every field
/// has a default, so `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Lifetime of successful (non-error) responses.
    pub ttl_seconds: u64,
    /// Lifetime of `4xx` responses. `0` disables caching of client errors.
    pub err_ttl_seconds: u64,
    /// Request headers folded into the cache key, in this order.
    pub headers: Vec<String>,
    /// Hash the raw body instead of the normalized GraphQL document.
    pub disable_normalize: bool,
    /// Route every store call to a no-op adapter.
    pub turn_off_redis: bool,
    pub redis_url: String,
    /// Upper bound on any single store round trip.
    pub store_timeout_ms: u64,
    /// Write origin responses to the store from a spawned task, so the
    /// client does not wait on the store. When off, the write finishes
    /// before the response is returned.
    pub store_in_background: bool,
    /// Request header carrying a client TTL override, in seconds.
    pub ttl_header: String,
    pub key_prefix: String,
    /// Operation kinds eligible for caching.
    pub cacheable_operations: Vec<OperationKind>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 300,
            err_ttl_seconds: 0,
            headers: Vec::new(),
            disable_normalize: false,
            turn_off_redis: false,
            redis_url: "redis://127.0.0.1:6379".to_owned(),
            store_timeout_ms: 250,
            store_in_background: true,
            ttl_header: "TTL".to_owned(),
            key_prefix: "graphql-proxy-cache".to_owned(),
            cacheable_operations: vec![OperationKind::Query],
        }
    }
}

impl CacheConfig {
    /// Parses and validates a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: CacheConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "store_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.ttl_header.trim().is_empty() {
            return Err(ConfigError::Invalid("ttl_header must not be empty".into()));
        }
        if let Some(header) = self.headers.iter().find(|h| h.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "headers contains an empty name: {header:?}"
            )));
        }
        if !self.turn_off_redis && self.redis_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "redis_url is required unless turn_off_redis is set".into(),
            ));
        }
        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    /// `None` when error caching is disabled.
    pub fn error_ttl(&self) -> Option<Duration> {
        (self.err_ttl_seconds > 0).then(|| Duration::from_secs(self.err_ttl_seconds))
    }

    pub fn is_cacheable(&self, kind: OperationKind) -> bool {
        self.cacheable_operations.contains(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = CacheConfig::from_json_str("{}").unwrap();
        assert_eq!(config, CacheConfig::default());
        assert_eq!(config.error_ttl(), None);
        assert!(config.is_cacheable(OperationKind::Query));
        assert!(!config.is_cacheable(OperationKind::Mutation));
    }

    #[test]
    fn full_document() {
        let config = CacheConfig::from_json_str(
            r#"{
                "ttl_seconds": 120,
                "err_ttl_seconds": 30,
                "headers": ["Authorization", "X-Tenant"],
                "disable_normalize": true,
                "turn_off_redis": true,
                "store_timeout_ms": 50,
                "store_in_background": false,
                "ttl_header": "X-Cache-TTL",
                "cacheable_operations": ["query", "subscription"]
            }"#,
        )
        .unwrap();
        assert_eq!(config.default_ttl(), Duration::from_secs(120));
        assert_eq!(config.error_ttl(), Some(Duration::from_secs(30)));
        assert_eq!(config.headers, vec!["Authorization", "X-Tenant"]);
        assert!(config.disable_normalize);
        assert!(config.turn_off_redis);
        assert_eq!(config.store_timeout(), Duration::from_millis(50));
        assert!(!config.store_in_background);
        assert!(config.is_cacheable(OperationKind::Subscription));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = CacheConfig::from_json_str(r#"{ "ttl": 5 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let err = CacheConfig::from_json_str(r#"{ "store_timeout_ms": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn redis_url_not_needed_when_store_is_off() {
        assert!(CacheConfig::from_json_str(r#"{ "redis_url": "", "turn_off_redis": true }"#).is_ok());
        assert!(CacheConfig::from_json_str(r#"{ "redis_url": "" }"#).is_err());
    }

    #[test]
    fn missing_file() {
        let err = CacheConfig::from_json_file("/nonexistent/cache.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
