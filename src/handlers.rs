use hyper::StatusCode;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::warn;
use warp::{Filter, Rejection, Reply};

use crate::context::CallContext;
use crate::errors::AnnotationError;
use crate::models::AnnotationOptions;
use crate::services::{AnnotationClient, AnnotationTransport};


#[derive(Debug, Deserialize)]
pub struct AnnotateQuery {
    pub variant: String,
    #[serde(default = "default_include_annotations")]
    pub include_annotations: bool,
}

fn default_include_annotations() -> bool {
    true
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// `GET /health` and `GET /annotate?variant=..&include_annotations=..`.
pub fn routes<T>(
    client: Arc<AnnotationClient<T>>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone
where
    T: AnnotationTransport + 'static,
{
    let client_filter = warp::any().map(move || client.clone());

    let health_check = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| "OK");

    let annotate = warp::path("annotate")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<AnnotateQuery>())
        .and(client_filter)
        .and_then(annotate_variant::<T>);

    health_check.or(annotate).recover(handle_rejection)
}

pub async fn annotate_variant<T: AnnotationTransport>(
    query: AnnotateQuery,
    client: Arc<AnnotationClient<T>>,
) -> Result<impl Reply, Rejection> {
    let ctx = CallContext::with_timeout(client.config().request_timeout);
    let options = AnnotationOptions {
        include_annotations: query.include_annotations,
        ..AnnotationOptions::default()
    };

    match client.annotate(&ctx, &query.variant, &options).await {
        Ok(summary) => Ok(warp::reply::json(&summary)),
        Err(e) => {
            warn!("Annotation of {:?} failed: {}", query.variant, e);
            Err(warp::reject::custom(e))
        }
    }
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (code, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not Found".to_string())
    } else if let Some(e) = err.find::<AnnotationError>() {
        (e.status_code(), e.to_string())
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&ErrorBody { error: message }),
        code,
    ))
}
