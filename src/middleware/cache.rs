use std::sync::Arc;

use tracing::debug;

use crate::{
    cache::{
        CacheKey, CachePolicy, CacheStatus, ExtractionError, LookupOutcome, RequestSource,
        StoreError,
    },
    config::CacheConfig,
    context::Context,
    http::{Request, Response, StatusCode, header},
};

use super::{Middleware, Next, ResponseFuture};

impl RequestSource for Request {
    fn read_body(&self) -> Result<&[u8], ExtractionError> {
        Ok(self.raw_body())
    }

    fn read_header(&self, name: &str) -> Option<&str> {
        self.headers().get(name)
    }

    fn read_path(&self) -> Result<&str, ExtractionError> {
        Ok(self.path())
    }
}

/// Serves cacheable GraphQL requests from the cache and stores origin
/// responses for later ones.
///
/// On a hit the request never reaches the layers below. On a miss the
/// request is forwarded without `Accept-Encoding`, so the stored body is
/// plain, and the response is written to the cache from a spawned task, or
/// before it is returned when `store_in_background` is off. Requests that
/// are not cacheable are forwarded and marked `BYPASS`.
///
/// On a miss the [`CacheKey`] is put into the [`Context`] extensions for the
/// layers below.
#[derive(Debug, Clone)]
pub struct GraphqlCacheMiddleware {
    policy: Arc<CachePolicy>,
}

impl GraphqlCacheMiddleware {
    pub fn new(policy: Arc<CachePolicy>) -> Self {
        Self { policy }
    }

    pub fn from_config(config: CacheConfig) -> Result<Self, StoreError> {
        Ok(Self::new(Arc::new(CachePolicy::from_config(config)?)))
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }
}

impl Middleware for GraphqlCacheMiddleware {
    fn handle(&self, mut ctx: Context, next: Next) -> ResponseFuture {
        let policy = Arc::clone(&self.policy);
        let in_background = policy.config().store_in_background;

        Box::pin(async move {
            let (state, outcome) = policy.lookup(ctx.request()).await;

            match outcome {
                LookupOutcome::Skipped => next.run(ctx).await,

                LookupOutcome::Bypassed => {
                    let mut response = next.run(ctx).await;
                    response.set_header(header::X_CACHE_STATUS, CacheStatus::Bypass.as_str());
                    response
                }

                LookupOutcome::Hit { key, body } => Response::new(StatusCode::OK)
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(header::X_CACHE_KEY, key.as_str())
                    .header(header::X_CACHE_STATUS, CacheStatus::Hit.as_str())
                    .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
                    .body_bytes(body),

                LookupOutcome::Miss { key, echo_key } => {
                    let ttl_header = ctx
                        .request()
                        .headers()
                        .get(&policy.config().ttl_header)
                        .map(str::to_owned);

                    ctx.request_mut().headers_mut().remove(header::ACCEPT_ENCODING);
                    ctx.extensions_mut().insert::<CacheKey>(key.clone());

                    let mut response = next.run(ctx).await;
                    response.set_header(header::X_CACHE_STATUS, CacheStatus::Miss.as_str());
                    if echo_key {
                        response.set_header(header::X_CACHE_KEY, key.as_str());
                    }

                    let status = response.status();
                    let body = response.payload().clone();
                    let write = async move {
                        let outcome = policy.store(&state, status, ttl_header.as_deref(), body).await;
                        debug!(%key, ?outcome, "store phase finished");
                    };
                    if in_background {
                        tokio::spawn(write);
                    } else {
                        write.await;
                    }

                    response
                }
            }
        })
    }
}
