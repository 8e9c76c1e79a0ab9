//! HTTP/1.1 request parsing using the [`httparse`] crate.

use bytes::Bytes;
use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
}

/// A parsed HTTP/1.1 request as it reaches the gateway.
///
/// Built either by [`Request::parse`] from wire bytes or by [`Request::new`]
/// and the builder methods when a host gateway already holds the pieces.
///
/// # Examples
///
/// ```
/// use graphql_proxy_cache::http::Request;
///
/// let raw = b"POST /graphql?x=1 HTTP/1.1\r\nHost: localhost\r\nContent-Length: 10\r\n\r\n{ viewer }";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "POST");
/// assert_eq!(request.path(), "/graphql");
/// assert_eq!(request.query_string(), Some("x=1"));
/// assert_eq!(request.headers().get("host"), Some("localhost"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    query: Option<String>,
    body: Bytes,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Creates an HTTP/1.1 request with no headers and an empty body.
    ///
    /// `target` may carry a query string, which is split off like the wire parser does.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = split_target(target);
        Self {
            method,
            path,
            version: 1,
            headers: Headers::new(),
            query,
            body: Bytes::new(),
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Parse a raw HTTP/1.1 request from a byte slice.
    ///
    /// Returns the parsed `Request` and the byte offset at which the body begins
    /// in `buf`. The body holds at most `Content-Length` bytes of what is buffered,
    /// and is empty when the header is absent, so a pipelined request that
    /// follows is never swallowed.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: more data is needed to complete the request headers.
    /// - [`RequestError::Parse`]: the data is malformed and cannot be parsed.
    /// - [`RequestError::MissingField`]: a required field (method, path, version) is absent.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method: Method = match raw_req.method {
            Some(method) => match method.parse() {
                Ok(method) => method,
                Err(never) => match never {},
            },
            None => return Err(RequestError::MissingField { field: "method" }),
        };

        let raw_path = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;
        let (path, query) = split_target(raw_path);

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        let available = &buf[body_offset..];
        let body_len = header_map
            .get("content-length")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .map_or(0, |len| len.min(available.len()));
        let body = Bytes::copy_from_slice(&available[..body_len]);

        Ok((
            Self {
                method,
                path,
                version,
                headers: header_map,
                query,
                body,
            },
            body_offset,
        ))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Mutable access for layers that rewrite the request before it is forwarded.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns the raw request body.
    pub fn raw_body(&self) -> &Bytes {
        &self.body
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.trim().parse().ok()
    }
}

fn split_target(target: &str) -> (String, Option<String>) {
    match target.split_once('?') {
        Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
        None => (target.to_owned(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_graphql_post() {
        let raw = b"POST /graphql HTTP/1.1\r\nHost: localhost\r\nContent-Length: 10\r\n\r\n{ viewer }";
        let (req, offset) = Request::parse(raw).unwrap();
        assert_eq!(req.method(), &Method::Post);
        assert_eq!(req.path(), "/graphql");
        assert_eq!(req.version(), 1);
        assert_eq!(req.content_length(), Some(10));
        assert_eq!(&raw[offset..], b"{ viewer }");
        assert_eq!(req.raw_body().as_ref(), b"{ viewer }");
    }

    #[test]
    fn body_stops_at_content_length() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 2\r\n\r\nokGET / HTTP/1.1\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.raw_body().as_ref(), b"ok");
    }

    #[test]
    fn no_content_length_means_no_body() {
        let first = b"GET /a HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let mut raw = first.to_vec();
        raw.extend_from_slice(b"GET /b HTTP/1.1\r\n\r\n");

        let (req, offset) = Request::parse(&raw).unwrap();
        assert_eq!(req.path(), "/a");
        assert_eq!(offset, first.len());
        assert!(req.raw_body().is_empty());
        assert_eq!(req.content_length(), None);

        let (next, _) = Request::parse(&raw[offset..]).unwrap();
        assert_eq!(next.path(), "/b");
    }

    #[test]
    fn query_string_is_split_off() {
        let (req, _) = Request::parse(b"GET /graphql?query=x HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.path(), "/graphql");
        assert_eq!(req.query_string(), Some("query=x"));
    }

    #[test]
    fn incomplete_request() {
        let raw = b"POST / HTTP/1.1\r\nHost:";
        assert!(matches!(Request::parse(raw), Err(RequestError::Incomplete)));
    }

    #[test]
    fn keep_alive_defaults() {
        let (req, _) = Request::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert!(req.is_keep_alive());
        let (req, _) = Request::parse(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert!(!req.is_keep_alive());
        let (req, _) = Request::parse(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
        assert!(!req.is_keep_alive());
    }

    #[test]
    fn builder() {
        let req = Request::new(Method::Post, "/graphql?debug")
            .header("X-Tenant", "acme")
            .body("{ a }");
        assert_eq!(req.path(), "/graphql");
        assert_eq!(req.query_string(), Some("debug"));
        assert_eq!(req.headers().get("x-tenant"), Some("acme"));
        assert_eq!(req.raw_body().as_ref(), b"{ a }");
    }
}
