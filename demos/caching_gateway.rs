//! A caching GraphQL gateway in front of a canned origin.
//!
//! ```text
//! cargo run --example caching_gateway -- [config.json]
//! curl -si localhost:8080/graphql -d '{"query":"{ viewer { id } }"}'
//! ```
//!
//! Without a config file the cache runs with the store turned off, so every
//! request is a `MISS`. Point `redis_url` at a Redis instance to see hits.

use graphql_proxy_cache::{
    CacheConfig, Context, GraphqlCacheMiddleware, LoggerMiddleware, Pipeline, Response, Server,
    StatusCode, http::header,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => CacheConfig::from_json_file(path)?,
        None => CacheConfig {
            turn_off_redis: true,
            ..CacheConfig::default()
        },
    };

    let pipeline = Pipeline::new()
        .layer(LoggerMiddleware)
        .layer(GraphqlCacheMiddleware::from_config(config)?)
        .endpoint(|ctx: Context| {
            let bytes = ctx.request().raw_body().len();
            async move {
                Response::new(StatusCode::OK)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(format!(r#"{{"data":{{"receivedBytes":{bytes}}}}}"#))
            }
        });

    let server = Server::bind("127.0.0.1:8080").await?;
    println!("Listening on http://{}", server.local_addr());
    server.serve(pipeline).await?;
    Ok(())
}
