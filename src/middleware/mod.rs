//! Middleware pipeline: composable before/after request handling.
//!
//! Each middleware wraps the next layer, so it can inspect the request,
//! answer without calling further layers, or decorate the response on its way
//! back. The GraphQL cache is one such layer, sitting in front of whatever
//! endpoint forwards requests to the origin.
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Next`]: cursor into the remaining chain; call [`Next::run`] to advance.
//! - [`MiddlewareHandler`]: type-erased, cheaply-cloneable middleware function.
//! - [`Pipeline`]: an ordered stack of layers ending in an endpoint.
//! - [`LoggerMiddleware`]: request/response logger.
//! - [`GraphqlCacheMiddleware`]: the response cache.

mod cache;

use std::{future::Future, pin::Pin, sync::Arc};

use tokio::time::Instant;

use crate::{
    context::Context,
    http::{Request, Response, StatusCode, header},
};

pub use cache::GraphqlCacheMiddleware;

/// Future returned by every layer of the pipeline.
pub type ResponseFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// A type-erased, reference-counted middleware function.
///
/// Every entry in a [`Pipeline`] is stored as a `MiddlewareHandler`. The
/// [`Arc`] wrapper makes handlers cheap to clone so that [`Next`] can advance
/// through the chain without copying closures.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use graphql_proxy_cache::{context::Context, middleware::{MiddlewareHandler, Next}};
///
/// let handler: MiddlewareHandler = Arc::new(|ctx: Context, next: Next| {
///     Box::pin(async move { next.run(ctx).await })
/// });
/// ```
pub type MiddlewareHandler = Arc<dyn Fn(Context, Next) -> ResponseFuture + Send + Sync + 'static>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed by [`run`](Self::run), so a layer can forward a request
/// at most once.
pub struct Next {
    middlewares: Vec<MiddlewareHandler>,
    index: usize,
}

impl Next {
    pub fn new(middlewares: Vec<MiddlewareHandler>) -> Self {
        Self {
            middlewares,
            index: 0,
        }
    }

    /// Invokes the next layer and returns its response.
    ///
    /// A chain that runs out of layers without producing a response answers
    /// `500 Internal Server Error`.
    pub async fn run(mut self, ctx: Context) -> Response {
        if self.index < self.middlewares.len() {
            let handler = Arc::clone(&self.middlewares[self.index]);
            self.index += 1;
            handler(ctx, self).await
        } else {
            Response::new(StatusCode::INTERNAL_SERVER_ERROR)
                .body("No response generated by middleware pipeline")
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors receive a [`Context`] and a [`Next`] cursor. They may:
///
/// - **Pass through**: call `next.run(ctx).await` without modification.
/// - **Short-circuit**: return a [`Response`] directly without calling `next`.
/// - **Decorate**: call `next.run(ctx).await`, then adjust the response.
///
/// Middleware is shared across Tokio tasks, hence `Send + Sync`, and the
/// returned future must be `Send` for the multi-threaded runtime.
///
/// ```rust,no_run
/// use graphql_proxy_cache::{
///     context::Context,
///     middleware::{Middleware, Next, ResponseFuture},
/// };
///
/// struct PassThrough;
///
/// impl Middleware for PassThrough {
///     fn handle(&self, ctx: Context, next: Next) -> ResponseFuture {
///         Box::pin(async move { next.run(ctx).await })
///     }
/// }
/// ```
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> ResponseFuture;
}

/// An ordered stack of middleware ending in an endpoint.
///
/// Layers run in the order they were added. The endpoint is the innermost
/// layer; in a gateway it is the call to the origin service.
///
/// ```rust,no_run
/// use graphql_proxy_cache::{
///     http::{Method, Request, Response, StatusCode},
///     middleware::{LoggerMiddleware, Pipeline},
/// };
///
/// # async fn demo() {
/// let pipeline = Pipeline::new()
///     .layer(LoggerMiddleware)
///     .endpoint(|_ctx| async { Response::new(StatusCode::OK).body("{}") });
///
/// let response = pipeline.handle(Request::new(Method::Post, "/graphql")).await;
/// assert_eq!(response.status(), StatusCode::OK);
/// # }
/// ```
#[derive(Clone, Default)]
pub struct Pipeline {
    middlewares: Vec<MiddlewareHandler>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn layer<M>(self, middleware: M) -> Self
    where
        M: Middleware + 'static,
    {
        self.handler(from_middleware(Arc::new(middleware)))
    }

    #[must_use]
    pub fn handler(mut self, handler: MiddlewareHandler) -> Self {
        self.middlewares.push(handler);
        self
    }

    /// Appends the innermost layer, which never calls further layers.
    #[must_use]
    pub fn endpoint<H, F>(self, endpoint: H) -> Self
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        self.handler(Arc::new(move |ctx: Context, _next: Next| {
            Box::pin(endpoint(ctx)) as ResponseFuture
        }))
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Runs one request through every layer.
    pub fn handle(&self, request: Request) -> ResponseFuture {
        let next = Next::new(self.middlewares.clone());
        Box::pin(next.run(Context::new(request)))
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("layers", &self.middlewares.len())
            .finish()
    }
}

/// Logs method, path, status, cache status and duration of each request.
///
/// Emits one `tracing::info!` record after the downstream layers complete:
///
/// ```text
/// POST /graphql - 200 HIT (1.2ms)
/// ```
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> ResponseFuture {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().to_string();
            let path = ctx.request().path().to_owned();

            let response = next.run(ctx).await;

            let duration = start.elapsed();
            let status = response.status().as_u16();
            let cache = response.headers().get(header::X_CACHE_STATUS).unwrap_or("-");

            tracing::info!("{} {} - {} {} ({:?})", method, path, status, cache, duration);

            response
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::http::Method;

    /// Records its name on the way in and on the way out.
    struct Trace {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Middleware for Trace {
        fn handle(&self, ctx: Context, next: Next) -> ResponseFuture {
            let name = self.name;
            let log = Arc::clone(&self.log);
            Box::pin(async move {
                log.lock().unwrap().push(format!("{name} in"));
                let response = next.run(ctx).await;
                log.lock().unwrap().push(format!("{name} out"));
                response
            })
        }
    }

    struct Deny;

    impl Middleware for Deny {
        fn handle(&self, _ctx: Context, _next: Next) -> ResponseFuture {
            Box::pin(async { Response::new(StatusCode::FORBIDDEN) })
        }
    }

    fn request() -> Request {
        Request::new(Method::Post, "/graphql")
    }

    #[tokio::test]
    async fn layers_run_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .layer(Trace { name: "outer", log: Arc::clone(&log) })
            .layer(Trace { name: "inner", log: Arc::clone(&log) })
            .endpoint({
                let log = Arc::clone(&log);
                move |_ctx| {
                    log.lock().unwrap().push("endpoint".to_owned());
                    async { Response::new(StatusCode::OK) }
                }
            });
        assert_eq!(pipeline.len(), 3);

        let response = pipeline.handle(request()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            *log.lock().unwrap(),
            ["outer in", "inner in", "endpoint", "inner out", "outer out"]
        );
    }

    #[tokio::test]
    async fn layers_can_short_circuit() {
        let calls = Arc::new(Mutex::new(0));
        let pipeline = Pipeline::new().layer(Deny).endpoint({
            let calls = Arc::clone(&calls);
            move |_ctx| {
                *calls.lock().unwrap() += 1;
                async { Response::new(StatusCode::OK) }
            }
        });
        assert_eq!(pipeline.handle(request()).await.status(), StatusCode::FORBIDDEN);
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn exhausted_chain_is_a_server_error() {
        let pipeline = Pipeline::new().layer(LoggerMiddleware);
        let response = pipeline.handle(request()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn logger_passes_responses_through() {
        let pipeline = Pipeline::new()
            .layer(LoggerMiddleware)
            .endpoint(|_ctx| async { Response::new(StatusCode::NOT_FOUND).body("nope") });
        let response = pipeline.handle(request()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.payload().as_ref(), b"nope");
    }
}
