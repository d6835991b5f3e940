//! HTTP surface of the service
//!
//! `GET /api/screenshot` runs validate, authorize, cache lookup and render in
//! that order. The remaining routes are the form page, cache revalidation,
//! health and the optional Prometheus scrape endpoint.

use crate::metrics::RequestOutcome;
use crate::{
    format_bytes, format_duration, sanitize_filename, validate, AccessGuard, ApiError, CacheKey,
    CachedImage, Config, FieldIssue, HealthReport, IssueCode, RawParams, Renderer,
    ScreenshotCache, ScreenshotRequest, ValidationError,
};
use axum::body::Body;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Shared state handed to every handler
pub struct AppState {
    pub config: Arc<Config>,
    pub guard: AccessGuard,
    pub cache: Arc<ScreenshotCache>,
    pub renderer: Arc<dyn Renderer>,
    pub prometheus: Option<PrometheusHandle>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: Config,
        renderer: Arc<dyn Renderer>,
        prometheus: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            guard: AccessGuard::new(&config.auth),
            cache: Arc::new(ScreenshotCache::new(&config.cache)),
            config: Arc::new(config),
            renderer,
            prometheus,
            started_at: Instant::now(),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/screenshot", get(screenshot))
        .route("/api/revalidate", post(revalidate))
        .route("/healthz", get(health))
        .route("/metrics", get(prometheus_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until `shutdown` resolves
pub async fn serve<F>(state: Arc<AppState>, addr: SocketAddr, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn index() -> Html<&'static str> {
    Html(crate::form::INDEX_HTML)
}

async fn screenshot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    query: Result<Query<RawParams>, QueryRejection>,
) -> Response {
    let request_id = Uuid::new_v4();
    let start = Instant::now();

    let result = handle_screenshot(&state, &headers, query).await;

    let outcome = match &result {
        Ok(_) => RequestOutcome::Served,
        Err(ApiError::Validation(_)) => RequestOutcome::Invalid,
        Err(ApiError::Unauthorized) => RequestOutcome::Unauthorized,
        Err(ApiError::Render(_)) => RequestOutcome::Failed,
    };
    crate::metrics::record_request(outcome);

    match result {
        Ok((request, image)) => {
            info!(
                "[{}] {} {} ({}, {}, {})",
                request_id,
                image.status.as_str(),
                request.url,
                request.format,
                format_bytes(image.data.len()),
                format_duration(start.elapsed())
            );
            image_response(&request, &image, state.cache.ttl().as_secs())
        }
        Err(err) => {
            match &err {
                ApiError::Render(cause) => {
                    error!("[{}] Screenshot failed: {}", request_id, cause)
                }
                ApiError::Validation(issues) => debug!("[{}] {}", request_id, issues),
                ApiError::Unauthorized => warn!("[{}] Unauthorized screenshot request", request_id),
            }
            err.into_response()
        }
    }
}

async fn handle_screenshot(
    state: &AppState,
    headers: &HeaderMap,
    query: Result<Query<RawParams>, QueryRejection>,
) -> Result<(ScreenshotRequest, CachedImage), ApiError> {
    let Query(raw) = query.map_err(|rejection| {
        ValidationError::single(FieldIssue::new(
            IssueCode::InvalidType,
            "query",
            rejection.body_text(),
        ))
    })?;

    let params = validate(&raw)?;

    let referer = headers
        .get(header::REFERER)
        .and_then(|value| value.to_str().ok());
    if !state.guard.is_authorized(referer, params.key.as_deref()) {
        return Err(ApiError::Unauthorized);
    }

    let request = params.with_defaults(&state.config.defaults);
    let key = CacheKey::from_request(&request);
    let renderer = state.renderer.clone();
    let job = request.clone();

    let image = state
        .cache
        .get_or_render(key, move || async move { renderer.render(&job).await })
        .await?;

    Ok((request, image))
}

fn image_response(request: &ScreenshotRequest, image: &CachedImage, max_age: u64) -> Response {
    let filename = format!(
        "{}.{}",
        sanitize_filename(request.url.as_str()),
        request.format.as_str()
    );
    let length = image.data.len();

    let mut response = Response::new(Body::from(image.data.clone()));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(request.format.mime_type()),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(header::CACHE_CONTROL, cache_control(max_age));
    headers.insert("x-cache", HeaderValue::from_static(image.status.as_str()));
    // The sanitised name is plain ASCII, so this only fails on a bug
    if let Ok(disposition) = HeaderValue::from_str(&format!("inline; filename=\"{filename}\"")) {
        headers.insert(header::CONTENT_DISPOSITION, disposition);
    }

    response
}

fn cache_control(max_age: u64) -> HeaderValue {
    HeaderValue::from_str(&format!("public, max-age={max_age}"))
        .unwrap_or_else(|_| HeaderValue::from_static("public"))
}

#[derive(Debug, Deserialize)]
struct RevalidateParams {
    url: Option<String>,
    key: Option<String>,
}

async fn revalidate(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RevalidateParams>,
) -> Response {
    if !state.guard.is_key_authorized(params.key.as_deref()) {
        return ApiError::Unauthorized.into_response();
    }

    let Some(url) = params.url.as_deref().and_then(crate::validate_url) else {
        return ApiError::Validation(ValidationError::single(FieldIssue::new(
            IssueCode::InvalidString,
            "url",
            "Invalid url",
        )))
        .into_response();
    };

    let removed = state.cache.invalidate_tag(url.as_str());
    info!("Revalidated {} ({} cached images removed)", url, removed);

    Json(json!({ "revalidated": true, "removed": removed })).into_response()
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    let browser = state.renderer.status().await;
    Json(HealthReport::new(
        browser,
        state.cache.len(),
        state.started_at.elapsed(),
    ))
}

async fn prometheus_metrics(State(state): State<Arc<AppState>>) -> Response {
    match &state.prometheus {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
