//! Cache key derivation.
//!
//! A key is `<prefix>:<sha256 hex>` over the canonical body, each configured
//! header value and the request path. Every one of these is length-prefixed
//! before hashing, so no choice of header or body content can make two
//! different requests collide by shifting bytes between parts.

use std::{fmt, sync::Arc};

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::{
    config::CacheConfig,
    graphql::{self, Normalization, OperationKind},
};

/// The request could not be read well enough to form a key.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("failed to read request body: {0}")]
    Body(String),

    #[error("request body is not valid UTF-8: {0}")]
    BodyNotUtf8(#[from] std::str::Utf8Error),

    #[error("failed to read request path: {0}")]
    Path(String),
}

/// Read access to the host gateway's request, as needed for key derivation.
pub trait RequestSource {
    fn read_body(&self) -> Result<&[u8], ExtractionError>;

    /// First value of the named header, `None` when absent.
    fn read_header(&self, name: &str) -> Option<&str>;

    fn read_path(&self) -> Result<&str, ExtractionError>;
}

/// A derived cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(pub(crate) String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The per-request inputs a key is computed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintInput<'a> {
    pub body: &'a str,
    /// One value per configured header, in configuration order.
    pub header_values: Vec<&'a str>,
    pub path: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKey {
    pub key: CacheKey,
    pub cacheable: bool,
    pub operation: Option<OperationKind>,
    pub normalization: Normalization,
}

/// Computes cache keys and cacheability verdicts.
#[derive(Debug, Clone)]
pub struct KeyDeriver {
    config: Arc<CacheConfig>,
}

impl KeyDeriver {
    pub fn new(config: Arc<CacheConfig>) -> Self {
        Self { config }
    }

    /// Reads the fingerprint inputs from a host request.
    ///
    /// Missing headers contribute an empty string.
    pub fn fingerprint<'r, R>(&self, request: &'r R) -> Result<FingerprintInput<'r>, ExtractionError>
    where
        R: RequestSource + ?Sized,
    {
        let body = std::str::from_utf8(request.read_body()?)?;

        let header_values = self
            .config
            .headers
            .iter()
            .map(|name| request.read_header(name).unwrap_or_default())
            .collect();

        let path = request.read_path()?;
        if path.is_empty() {
            return Err(ExtractionError::Path("empty path".into()));
        }

        Ok(FingerprintInput {
            body,
            header_values,
            path,
        })
    }

    pub fn derive_from<R>(&self, request: &R) -> Result<DerivedKey, ExtractionError>
    where
        R: RequestSource + ?Sized,
    {
        let input = self.fingerprint(request)?;
        Ok(self.derive(&input))
    }

    /// Deterministic in `input` and the configuration.
    pub fn derive(&self, input: &FingerprintInput<'_>) -> DerivedKey {
        let canonical = graphql::canonicalize(input.body, !self.config.disable_normalize);

        let mut hasher = Sha256::new();
        let mut update = |part: &[u8]| {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part);
        };
        update(canonical.text.as_bytes());
        for value in &input.header_values {
            update(value.as_bytes());
        }
        update(input.path.as_bytes());
        let digest = hex::encode(hasher.finalize());

        let key = if self.config.key_prefix.is_empty() {
            CacheKey(digest)
        } else {
            CacheKey(format!("{}:{digest}", self.config.key_prefix))
        };

        let cacheable = canonical
            .operation
            .is_some_and(|kind| self.config.is_cacheable(kind));

        DerivedKey {
            key,
            cacheable,
            operation: canonical.operation,
            normalization: canonical.normalization,
        }
    }
}
