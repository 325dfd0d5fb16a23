// SPDX-License-Identifier: AGPL-3.0-or-later

//! Read API endpoints
//!
//! Thin handlers over the catalog store. They bypass the job runner
//! entirely and read concurrently with the worker; the store provides
//! single-document atomicity.

use crate::http::{ApiError, AppState};
use crate::models::App;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;

/// Query parameters of the search endpoints
#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub categories: Option<String>,
}

/// Query parameter of the tag and category endpoints
#[derive(Debug, Default, Deserialize)]
pub struct ValuesParams {
    #[serde(default)]
    pub query: Option<String>,
}

fn split_csv(value: Option<&str>) -> Vec<String> {
    match value {
        Some(value) if !value.is_empty() => {
            value.split(',').map(|part| part.to_string()).collect()
        }
        _ => Vec::new(),
    }
}

/// `GET /health`
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({"ok": true}))
}

/// `OPTIONS /` generic CORS preflight
pub async fn preflight() -> StatusCode {
    StatusCode::OK
}

/// `GET /apps` - search apps, returning the matches as a sequence
pub async fn search_apps(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<App>>, ApiError> {
    let tags = split_csv(params.tags.as_deref());
    let categories = split_csv(params.categories.as_deref());

    let apps = state
        .catalog
        .search(params.query.as_deref(), &tags, &categories)
        .await?;

    Ok(Json(apps))
}

/// `GET /apps/id/{id}` - look up a single app
pub async fn app_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match state.catalog.find_by_id(&id).await? {
        Some(app) => Ok(Json(json!({"app": app})).into_response()),
        None => Ok(app_not_found()),
    }
}

/// `GET /apps/tags`
pub async fn app_tags(
    State(state): State<AppState>,
    Query(params): Query<ValuesParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tags = state.catalog.distinct_tags(params.query.as_deref()).await?;

    Ok(Json(json!({"tags": tags})))
}

/// `GET /apps/categories`
pub async fn app_categories(
    State(state): State<AppState>,
    Query(params): Query<ValuesParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let categories = state
        .catalog
        .distinct_categories(params.query.as_deref())
        .await?;

    Ok(Json(json!({"categories": categories})))
}

/// `GET /nsearch` - search apps plus the distinct tags and categories
/// across the result set
pub async fn natural_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tags = split_csv(params.tags.as_deref());
    let categories = split_csv(params.categories.as_deref());

    let apps = state
        .catalog
        .search(params.query.as_deref(), &tags, &categories)
        .await?;

    let result_tags = distinct_in_order(apps.iter().flat_map(|app| app.tags.iter()));
    let result_categories = distinct_in_order(apps.iter().flat_map(|app| app.categories.iter()));

    Ok(Json(json!({
        "apps": apps,
        "tags": result_tags,
        "categories": result_categories,
    })))
}

/// `GET /apps/id/{id}/deploy.sh` - the app's deploy script as plain
/// text, curl-pipeable
pub async fn deploy_script(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match state.catalog.find_by_id(&id).await? {
        Some(app) => Ok(plain_text(app.deployment.deploy_script)),
        None => Ok(app_not_found()),
    }
}

/// `GET /apps/id/{id}/deployment.json` - the app's raw resources,
/// newline separated
pub async fn deployment_resources(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match state.catalog.find_by_id(&id).await? {
        Some(app) => Ok(plain_text(app.deployment.resources.join("\n"))),
        None => Ok(app_not_found()),
    }
}

/// `GET /apps/id/{id}/deployment-instructions` - markdown instructions
/// referencing the deploy script by absolute URL
pub async fn deployment_instructions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let Some(app) = state.catalog.find_by_id(&id).await? else {
        return Ok(app_not_found());
    };

    let external_url = state.cfg.external_url.as_str().trim_end_matches('/');
    let instructions = format!(
        "To deploy {} run the following command:  \n```\n. <(curl -L {}/apps/id/{}/deploy.sh)\n```",
        app.name, external_url, app.app_id
    );

    Ok(Json(json!({"instructions": instructions})).into_response())
}

fn app_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "app not found"})),
    )
        .into_response()
}

fn plain_text(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

/// Deduplicate values preserving first-occurrence order
fn distinct_in_order<'a>(values: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for value in values {
        if seen.insert(value.as_str()) {
            out.push(value.clone());
        }
    }

    out
}
