use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use variant_annotator::{handlers, AnnotationClient, AnnotatorConfig};
use warp::Filter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AnnotatorConfig::from_env().context("invalid configuration")?;
    let addr: SocketAddr = config
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind_addr))?;

    info!(
        "Annotating against {} at {} requests/second, cache capacity {}",
        config.base_url, config.rate_limit, config.cache_capacity
    );

    let client = Arc::new(AnnotationClient::new(config).context("failed to build HTTP client")?);
    let routes = handlers::routes(client).with(warp::trace::request());

    info!("Variant annotator running on http://{}", addr);
    warp::serve(routes).run(addr).await;
    Ok(())
}
