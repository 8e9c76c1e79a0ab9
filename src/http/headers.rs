//! Header map with case-insensitive name lookup.

use std::fmt;

/// A case-insensitive, order-preserving header map.
///
/// Multiple entries per name are allowed; [`get`](Headers::get) returns the
/// first one, which is what the cache key deriver folds into a key.
///
/// # Examples
///
/// ```
/// use graphql_proxy_cache::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("X-Tenant", "acme");
/// headers.set("x-tenant", "globex");
///
/// assert_eq!(headers.get("X-TENANT"), Some("globex"));
/// assert_eq!(headers.len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Headers {
    inner: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
        }
    }

    /// Appends an entry, keeping any existing values for the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.push((name.into(), value.into()));
    }

    /// Replaces every entry for `name` with a single value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.inner.push((name, value.into()));
    }

    /// Returns the first value for the given header name (case-insensitive), or `None`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Removes all entries with the given name. Returns `true` if any were removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.inner.len();
        self.inner.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.inner.len() < before
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Number of entries (not unique names).
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterates over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.inner {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case() {
        let mut h = Headers::new();
        h.insert("Authorization", "Bearer abc");
        assert_eq!(h.get("authorization"), Some("Bearer abc"));
        assert_eq!(h.get("AUTHORIZATION"), Some("Bearer abc"));
        assert!(h.contains("Authorization"));
        assert!(!h.contains("x-missing"));
    }

    #[test]
    fn first_value_wins() {
        let mut h = Headers::new();
        h.insert("X-Tenant", "a");
        h.insert("x-tenant", "b");
        assert_eq!(h.get("x-tenant"), Some("a"));
    }

    #[test]
    fn set_replaces_all_values() {
        let mut h = Headers::new();
        h.insert("X-Cache-Status", "MISS");
        h.insert("x-cache-status", "MISS");
        h.set("X-Cache-Status", "HIT");
        assert_eq!(h.len(), 1);
        assert_eq!(h.get("x-cache-status"), Some("HIT"));
    }

    #[test]
    fn remove() {
        let mut h = Headers::new();
        h.insert("Accept-Encoding", "gzip");
        assert!(h.remove("accept-encoding"));
        assert!(h.is_empty());
        assert!(!h.remove("accept-encoding"));
    }
}
