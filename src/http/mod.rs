// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP surface
//!
//! The API router serves the read endpoints and the webhook; the
//! metrics router exposes the Prometheus text endpoint on its own bind
//! address. Every API request passes through a panic recovery boundary,
//! request metrics/logging, and a CORS header layer.

use crate::config::Config;
use crate::github::UpstreamClient;
use crate::jobs::JobRunner;
use crate::metrics::Metrics;
use crate::store::CatalogStore;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, options, post};
use axum::{Json, Router};
use futures::FutureExt;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

pub mod handlers;
pub mod webhook;

/// Shared collaborators handed to every request handler
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub cfg: Arc<Config>,

    /// Catalog store backing the read endpoints
    pub catalog: Arc<dyn CatalogStore>,

    /// Internal metrics recorders
    pub metrics: Arc<Metrics>,

    /// Job runner the webhook dispatcher enqueues into
    pub runner: JobRunner,

    /// Upstream client, used by the check_suite fallback lookup
    pub upstream: Arc<dyn UpstreamClient>,
}

/// Error type for fallible handlers: logs the cause and serves an
/// opaque 500, keeping internals out of responses
pub struct ApiError(anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("request handler failed: {:#}", self.0);

        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "internal server error"})),
        )
            .into_response()
    }
}

/// Build the API router with all middleware layers applied
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/apps", get(handlers::search_apps))
        .route("/apps/tags", get(handlers::app_tags))
        .route("/apps/categories", get(handlers::app_categories))
        .route("/apps/webhook", post(webhook::handle))
        .route("/apps/id/:id", get(handlers::app_by_id))
        .route("/apps/id/:id/deploy.sh", get(handlers::deploy_script))
        .route(
            "/apps/id/:id/deployment.json",
            get(handlers::deployment_resources),
        )
        .route(
            "/apps/id/:id/deployment-instructions",
            get(handlers::deployment_instructions),
        )
        .route("/nsearch", get(handlers::natural_search))
        .route("/", options(handlers::preflight))
        .layer(middleware::from_fn(cors))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            record_metrics,
        ))
        .layer(middleware::from_fn_with_state(state.clone(), recover))
        .with_state(state)
}

/// Build the metrics router
pub fn metrics_router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_endpoint))
        .with_state(metrics)
}

async fn metrics_endpoint(State(metrics): State<Arc<Metrics>>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.render(),
    )
        .into_response()
}

/// Recovery boundary: catches handler panics, logs them, counts them,
/// and serves an opaque 500 so one bad request cannot kill the server
async fn recover(State(state): State<AppState>, request: Request, next: Next) -> Response {
    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            state.metrics.record_handler_panic();
            error!("panicked while handling request: {}", panic_message(&panic));

            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal server error"})),
            )
                .into_response()
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Log every request and record count, duration and error responses
async fn record_metrics(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let method = request.method().to_string();
    let started = Instant::now();

    debug!("{method} {path}");

    let response = next.run(request).await;

    state.metrics.record_api_request(
        &path,
        &method,
        response.status().as_u16(),
        started.elapsed(),
    );

    response
}

/// Enable cross origin resource sharing on every response
async fn cors(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;

    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );

    response
}
