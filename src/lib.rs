//! # graphql-proxy-cache
//!
//! Response caching for GraphQL traffic passing through an API gateway.
//!
//! Requests are normalized so formatting differences do not fragment the
//! cache, keyed by a digest of the canonical body, selected headers and the
//! path, and looked up in an external store (Redis) before the origin is
//! contacted. Origin responses are stored with a TTL chosen from the status
//! code, the configuration and an optional client TTL header.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use graphql_proxy_cache::{
//!     CacheConfig, GraphqlCacheMiddleware, Pipeline, Response, Server, StatusCode,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CacheConfig::from_json_str(r#"{ "ttl_seconds": 60, "headers": ["X-Tenant"] }"#)?;
//!     let pipeline = Pipeline::new()
//!         .layer(GraphqlCacheMiddleware::from_config(config)?)
//!         .endpoint(|_ctx| async { Response::new(StatusCode::OK).body(r#"{"data":{}}"#) });
//!
//!     Server::bind("127.0.0.1:8080").await?.serve(pipeline).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod graphql;
pub mod http;
pub mod middleware;
pub mod server;

pub use cache::{CacheKey, CachePolicy, CacheStatus, StoreAdapter};
pub use config::{CacheConfig, ConfigError};
pub use context::Context;
pub use graphql::normalize;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use middleware::{GraphqlCacheMiddleware, LoggerMiddleware, Pipeline};
pub use server::{Server, ServerError};
