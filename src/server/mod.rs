//! Async TCP front end using Tokio.
//!
//! Accepts TCP connections and feeds HTTP/1.1 requests through a handler,
//! usually a [`Pipeline`] with the cache layer in front of the origin
//! endpoint. Persistent connections (keep-alive) are supported.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::{
    http::{
        StatusCode, header,
        request::{Request, RequestError},
        response::Response,
    },
    middleware::Pipeline,
};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// HTTP/1.1 listener that hands each request to a handler.
///
/// # Examples
///
/// ```rust,no_run
/// use graphql_proxy_cache::{
///     config::CacheConfig,
///     http::{Response, StatusCode},
///     middleware::{GraphqlCacheMiddleware, LoggerMiddleware, Pipeline},
///     server::Server,
/// };
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let cache = GraphqlCacheMiddleware::from_config(CacheConfig::default())?;
///     let pipeline = Pipeline::new()
///         .layer(LoggerMiddleware)
///         .layer(cache)
///         .endpoint(|_ctx| async { Response::new(StatusCode::OK).body(r#"{"data":{}}"#) });
///
///     Server::bind("127.0.0.1:8080").await?.serve(pipeline).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts accepting connections and dispatching requests to `handler`.
    ///
    /// The handler receives a [`Request`] and must return a [`Future`] that
    /// resolves to a [`Response`]. The handler is wrapped in an [`Arc`] and
    /// shared across all spawned Tokio tasks, so it must be `Send + Sync + 'static`.
    ///
    /// This method runs until the process is terminated or an unrecoverable
    /// listener error occurs.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run<H, F>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        let handler = Arc::new(handler);
        info!(address = %self.local_addr, "graphql-proxy-cache listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let handler = Arc::clone(&handler);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, handler).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }

    /// Serves every request through `pipeline`.
    pub async fn serve(self, pipeline: Pipeline) -> Result<(), ServerError> {
        self.run(move |request| pipeline.handle(request)).await
    }
}

/// What the bytes buffered so far on a connection amount to.
#[derive(Debug)]
enum Frame {
    /// A complete request occupying the first `len` bytes of the buffer.
    Ready { request: Request, len: usize },
    NeedMore,
    /// The connection is answered with this response and closed.
    Reject(Response),
}

/// Inspects the buffer without consuming it.
///
/// Oversized requests are rejected as soon as their declared length is
/// known, before the body is read. Bodies are framed by `Content-Length`
/// only; chunked uploads get a 501.
fn next_frame(buf: &[u8]) -> Frame {
    let (request, body_offset) = match Request::parse(buf) {
        Ok(parsed) => parsed,
        Err(RequestError::Incomplete) if buf.len() > MAX_REQUEST_SIZE => {
            return Frame::Reject(too_large());
        }
        Err(RequestError::Incomplete) => return Frame::NeedMore,
        Err(e) => {
            return Frame::Reject(
                Response::new(StatusCode::BAD_REQUEST)
                    .body(format!("Bad Request: {e}"))
                    .keep_alive(false),
            );
        }
    };

    if request.headers().contains(header::TRANSFER_ENCODING) {
        return Frame::Reject(
            Response::new(StatusCode::NOT_IMPLEMENTED)
                .body("Transfer-Encoding is not supported")
                .keep_alive(false),
        );
    }

    let content_length = match request.headers().get(header::CONTENT_LENGTH) {
        None => 0,
        Some(_) => match request.content_length() {
            Some(declared) => declared,
            None => {
                return Frame::Reject(
                    Response::new(StatusCode::BAD_REQUEST)
                        .body("Bad Request: invalid Content-Length")
                        .keep_alive(false),
                );
            }
        },
    };

    let Some(len) = body_offset.checked_add(content_length) else {
        return Frame::Reject(too_large());
    };
    if len > MAX_REQUEST_SIZE {
        Frame::Reject(too_large())
    } else if buf.len() < len {
        Frame::NeedMore
    } else {
        Frame::Ready { request, len }
    }
}

fn too_large() -> Response {
    Response::new(StatusCode::PAYLOAD_TOO_LARGE)
        .body("Request entity too large")
        .keep_alive(false)
}

/// Serves requests on one connection until the peer closes it or a request
/// asks for `Connection: close`.
async fn handle_connection<H, F>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<H>,
) -> Result<(), std::io::Error>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let (request, len) = match next_frame(&buf) {
            Frame::Ready { request, len } => (request, len),
            Frame::NeedMore => {
                if stream.read_buf(&mut buf).await? == 0 {
                    debug!(peer = %peer_addr, "connection closed by peer");
                    return Ok(());
                }
                continue;
            }
            Frame::Reject(response) => {
                warn!(peer = %peer_addr, status = response.status().as_u16(), "rejecting request");
                stream.write_all(&response.into_bytes()).await?;
                return Ok(());
            }
        };

        let keep_alive = request.is_keep_alive();
        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let response = handler(request).await.keep_alive(keep_alive);
        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;

        let _ = buf.split_to(len);

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close, shutting down");
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_headers_need_more() {
        assert!(matches!(next_frame(b"POST /graphql HTTP/1.1\r\nHost"), Frame::NeedMore));
        assert!(matches!(next_frame(b""), Frame::NeedMore));
    }

    #[test]
    fn waits_for_the_whole_body() {
        let head = b"POST /graphql HTTP/1.1\r\nContent-Length: 9\r\n\r\n";
        let mut raw = head.to_vec();
        raw.extend_from_slice(b"{ a");
        assert!(matches!(next_frame(&raw), Frame::NeedMore));

        raw.extend_from_slice(b" b c }GET");
        match next_frame(&raw) {
            Frame::Ready { request, len } => {
                assert_eq!(len, head.len() + 9);
                assert_eq!(request.raw_body().as_ref(), b"{ a b c }");
            }
            other => panic!("expected a request, got {other:?}"),
        }
    }

    #[test]
    fn declared_oversize_is_rejected_early() {
        let raw = format!(
            "POST /graphql HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
            MAX_REQUEST_SIZE + 1
        );
        match next_frame(raw.as_bytes()) {
            Frame::Reject(response) => assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE),
            other => panic!("expected a rejection, got {other:?}"),
        }
    }

    #[test]
    fn overflowing_content_length_is_rejected() {
        let raw = format!(
            "POST /graphql HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
            usize::MAX
        );
        match next_frame(raw.as_bytes()) {
            Frame::Reject(response) => assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE),
            other => panic!("expected a rejection, got {other:?}"),
        }
    }

    #[test]
    fn unparseable_content_length_is_a_bad_request() {
        match next_frame(b"POST /graphql HTTP/1.1\r\nContent-Length: lots\r\n\r\n{ a }") {
            Frame::Reject(response) => assert_eq!(response.status(), StatusCode::BAD_REQUEST),
            other => panic!("expected a rejection, got {other:?}"),
        }
    }

    #[test]
    fn chunked_bodies_are_not_implemented() {
        let raw = b"POST /graphql HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\n{ a }\r\n0\r\n\r\n";
        match next_frame(raw) {
            Frame::Reject(response) => {
                assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
            }
            other => panic!("expected a rejection, got {other:?}"),
        }
    }

    #[test]
    fn requests_without_length_end_at_the_headers() {
        let first = b"GET /a HTTP/1.1\r\n\r\n";
        let mut raw = first.to_vec();
        raw.extend_from_slice(b"GET /b HTTP/1.1\r\n\r\n");
        match next_frame(&raw) {
            Frame::Ready { request, len } => {
                assert_eq!(len, first.len());
                assert!(request.raw_body().is_empty());
            }
            other => panic!("expected a request, got {other:?}"),
        }
    }

    #[test]
    fn garbage_is_a_bad_request() {
        match next_frame(b"\x00\x01 nonsense\r\n\r\n") {
            Frame::Reject(response) => assert_eq!(response.status(), StatusCode::BAD_REQUEST),
            other => panic!("expected a rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn keep_alive_connection_serves_several_requests() {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        tokio::spawn(server.run(|request: Request| async move {
            Response::new(StatusCode::OK).body(request.path().to_owned())
        }));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"POST /a HTTP/1.1\r\nContent-Length: 0\r\n\r\nPOST /b HTTP/1.1\r\nConnection: close\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();

        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        assert_eq!(out.matches("HTTP/1.1 200 OK").count(), 2);
        assert!(out.contains("keep-alive\r\nContent-Length: 2\r\n\r\n/a"));
        assert!(out.ends_with("close\r\nContent-Length: 2\r\n\r\n/b"));
    }

    #[tokio::test]
    async fn pipelined_requests_without_length_are_framed_separately() {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        tokio::spawn(server.run(|request: Request| async move {
            let body = format!("{} {}", request.path(), request.raw_body().len());
            Response::new(StatusCode::OK).body(body)
        }));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();

        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        assert_eq!(out.matches("HTTP/1.1 200 OK").count(), 2);
        assert!(out.contains("\r\n\r\n/a 0"));
        assert!(out.ends_with("\r\n\r\n/b 0"));
    }
}
