use std::sync::Arc;

use axum::{
    Router,
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Path, State, rejection::PathRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tracing::info;

use crate::transport::{
    HttpResponse, IngestionRuntime, MAX_HTTP_BODY_BYTES, SharedRuntime, health_response,
    location_ads_response, metrics_response, upload_response,
};

pub fn serve_http_with_axum(
    ingestion_runtime: IngestionRuntime,
    bind_addr: &str,
    worker_threads: usize,
) -> Result<(), String> {
    let worker_threads = worker_threads.max(1);
    let tokio_runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()
        .map_err(|e| format!("failed to build tokio runtime: {e}"))?;

    let bind_addr = bind_addr.to_string();
    tokio_runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| format!("failed to bind {bind_addr}: {e}"))?;
        info!(%bind_addr, worker_threads, "ads axum transport bound");

        axum::serve(listener, ads_router(Arc::new(ingestion_runtime)))
            .await
            .map_err(|e| format!("axum server failed: {e}"))
    })
}

/// Routes of the ads service. Wrong methods on a known path answer 405 and
/// unknown paths 404, with the same JSON error bodies as the std transport.
pub fn ads_router(runtime: SharedRuntime) -> Router {
    Router::new()
        .route("/health", get(health).fallback(only_get))
        .route("/metrics", get(metrics).fallback(only_get))
        .route("/upload", post(upload).fallback(only_post))
        .route("/upload/", post(upload).fallback(only_post))
        .route("/ads/:location", get(location_ads).fallback(only_get))
        .route("/ads/:location/", get(location_ads).fallback(only_get))
        .fallback(unknown_path)
        .layer(DefaultBodyLimit::max(MAX_HTTP_BODY_BYTES))
        .with_state(runtime)
}

async fn health() -> HttpResponse {
    health_response()
}

async fn metrics(State(runtime): State<SharedRuntime>) -> HttpResponse {
    metrics_response(&runtime)
}

async fn upload(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    body: Bytes,
) -> HttpResponse {
    let content_type = headers
        .get(CONTENT_TYPE)
        .map(|value| value.to_str().unwrap_or_default());
    upload_response(&runtime, content_type, &body)
}

async fn location_ads(
    State(runtime): State<SharedRuntime>,
    location: Result<Path<String>, PathRejection>,
) -> HttpResponse {
    match location {
        Ok(Path(location)) => location_ads_response(&runtime, &location),
        Err(rejection) => HttpResponse::bad_request(&format!("invalid location: {rejection}")),
    }
}

async fn only_get() -> HttpResponse {
    HttpResponse::method_not_allowed("only GET is supported")
}

async fn only_post() -> HttpResponse {
    HttpResponse::method_not_allowed("only POST is supported")
}

async fn unknown_path() -> HttpResponse {
    HttpResponse::not_found("unknown path")
}

impl IntoResponse for HttpResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(self.content_type));
        response
    }
}
