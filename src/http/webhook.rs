// SPDX-License-Identifier: AGPL-3.0-or-later

//! Webhook dispatcher
//!
//! Verifies the upstream's HMAC-SHA1 signature over the raw request
//! body, classifies the event, and enqueues the matching jobs. Parse
//! failures inside handled events are server faults and surface through
//! the panic recovery boundary.

use crate::github::PullRequest;
use crate::http::AppState;
use crate::jobs::JobType;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha1::Sha1;
use tracing::info;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature";
pub const EVENT_HEADER: &str = "X-Github-Event";

type HmacSha1 = Hmac<Sha1>;

/// Compute the upstream's signature for a request body:
/// `sha1=<lowercase hex HMAC-SHA1>`
pub fn compute_signature(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha1::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(body);

    format!("sha1={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify a request signature in constant time
pub fn verify_signature(secret: &[u8], body: &[u8], signature: &str) -> bool {
    let expected = compute_signature(secret, body);

    signature.len() == expected.len()
        && signature
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    name: String,
    owner: OwnerPayload,
}

#[derive(Debug, Deserialize)]
struct OwnerPayload {
    login: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestEvent {
    action: String,
    pull_request: PullRequest,
    repository: RepositoryPayload,
}

#[derive(Debug, Deserialize)]
struct CheckSuiteEvent {
    check_suite: CheckSuitePayload,
    repository: RepositoryPayload,
}

#[derive(Debug, Deserialize)]
struct CheckSuitePayload {
    head_sha: String,
    #[serde(default)]
    pull_requests: Vec<PullRequest>,
}

/// `POST /apps/webhook`
pub async fn handle(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let signature = match single_header(&headers, SIGNATURE_HEADER) {
        Ok(value) => value,
        Err(response) => return response,
    };

    // The signature covers the raw body bytes, never a re-serialization.
    if !verify_signature(state.cfg.gh_webhook_secret.as_bytes(), &body, &signature) {
        return json_response(
            StatusCode::UNAUTHORIZED,
            json!({"error": "could not verify request"}),
        );
    }

    let event = match single_header(&headers, EVENT_HEADER) {
        Ok(value) => value,
        Err(response) => return response,
    };

    match event.as_str() {
        "ping" => json_response(StatusCode::OK, json!({"pong": true})),
        "pull_request" => handle_pull_request(&state, &body).await,
        "check_suite" => handle_check_suite(&state, &body).await,
        _ => json_response(
            StatusCode::NOT_ACCEPTABLE,
            json!({"error": format!("cannot handle \"{event}\" events")}),
        ),
    }
}

async fn handle_pull_request(state: &AppState, body: &[u8]) -> Response {
    let event: PullRequestEvent = serde_json::from_slice(body)
        .unwrap_or_else(|err| panic!("failed to parse pull request event: {err}"));

    if let Some(response) = reject_foreign_repository(state, &event.repository) {
        return response;
    }

    if event.action == "closed" && event.pull_request.merged {
        info!(
            "PR #{} merged, submitting update apps job",
            event.pull_request.number
        );

        state.runner.submit(JobType::UpdateApps, Vec::new()).await;
    } else if event.action == "opened" {
        info!(
            "PR #{} opened, submitting validate job",
            event.pull_request.number
        );

        let data = serde_json::to_vec(&event.pull_request)
            .unwrap_or_else(|err| panic!("failed to serialize pull request: {err}"));
        state.runner.submit(JobType::Validate, data).await;
    }

    json_response(StatusCode::OK, json!({"ok": true}))
}

async fn handle_check_suite(state: &AppState, body: &[u8]) -> Response {
    let event: CheckSuiteEvent = serde_json::from_slice(body)
        .unwrap_or_else(|err| panic!("failed to parse check suite event: {err}"));

    if let Some(response) = reject_foreign_repository(state, &event.repository) {
        return response;
    }

    // The payload usually references the suite's pull requests; when it
    // doesn't, fall back to asking the upstream which open PRs contain
    // the head commit.
    let prs: Vec<PullRequest> = if event.check_suite.pull_requests.is_empty() {
        state
            .upstream
            .list_prs_for_commit(
                &state.cfg.gh_registry_repo_owner,
                &state.cfg.gh_registry_repo_name,
                &event.check_suite.head_sha,
                "open",
            )
            .await
            .unwrap_or_else(|err| panic!("failed to list PRs for commit: {err:#}"))
    } else {
        event.check_suite.pull_requests
    };

    for pr in prs {
        info!("check suite for PR #{}, submitting validate job", pr.number);

        let data = serde_json::to_vec(&pr)
            .unwrap_or_else(|err| panic!("failed to serialize pull request: {err}"));
        state.runner.submit(JobType::Validate, data).await;
    }

    json_response(StatusCode::OK, json!({"ok": true}))
}

/// Reject events whose base repository is not the configured registry
/// repository
fn reject_foreign_repository(state: &AppState, repository: &RepositoryPayload) -> Option<Response> {
    if repository.owner.login == state.cfg.gh_registry_repo_owner
        && repository.name == state.cfg.gh_registry_repo_name
    {
        return None;
    }

    Some(json_response(
        StatusCode::NOT_ACCEPTABLE,
        json!({"error": "event repository is not the registry repository"}),
    ))
}

/// Extract a header that must be present with exactly one value
fn single_header(headers: &HeaderMap, name: &str) -> Result<String, Response> {
    let values: Vec<_> = headers.get_all(name).iter().collect();

    match values.as_slice() {
        [] => Err(json_response(
            StatusCode::BAD_REQUEST,
            json!({"error": format!("{name} header not present")}),
        )),
        [value] => value.to_str().map(str::to_string).map_err(|_| {
            json_response(
                StatusCode::BAD_REQUEST,
                json!({"error": format!("{name} header is not valid")}),
            )
        }),
        _ => Err(json_response(
            StatusCode::BAD_REQUEST,
            json!({"error": format!("{name} header must have exactly one value")}),
        )),
    }
}

fn json_response(status: StatusCode, value: serde_json::Value) -> Response {
    (status, Json(value)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trips() {
        let secret = b"test-secret";
        let body = b"test payload";

        let signature = compute_signature(secret, body);
        assert!(signature.starts_with("sha1="));
        assert_eq!(signature.len(), "sha1=".len() + 40);
        assert!(verify_signature(secret, body, &signature));
    }

    #[test]
    fn flipped_byte_fails_verification() {
        let secret = b"test-secret";
        let body = b"test payload";
        let signature = compute_signature(secret, body);

        let mut flipped = body.to_vec();
        flipped[0] ^= 0x01;
        assert!(!verify_signature(secret, &flipped, &signature));

        assert!(!verify_signature(secret, body, "sha1=0000000000000000000000000000000000000000"));
        assert!(!verify_signature(b"wrong-secret", body, &signature));
    }

    #[test]
    fn signatures_are_deterministic() {
        let secret = b"s";
        let body = b"b";
        assert_eq!(compute_signature(secret, body), compute_signature(secret, body));
    }

    #[test]
    fn pull_request_event_parses() {
        let payload = r#"{
            "action": "closed",
            "pull_request": {
                "number": 7,
                "merged": true,
                "head": {"ref": "add-app", "sha": "abc123"}
            },
            "repository": {
                "name": "serverless-apps",
                "owner": {"login": "serverless-registry"}
            }
        }"#;

        let event: PullRequestEvent = serde_json::from_str(payload).unwrap();
        assert_eq!(event.action, "closed");
        assert!(event.pull_request.merged);
        assert_eq!(event.repository.owner.login, "serverless-registry");
    }

    #[test]
    fn check_suite_event_parses_without_pull_requests() {
        let payload = r#"{
            "check_suite": {"head_sha": "abc123"},
            "repository": {
                "name": "serverless-apps",
                "owner": {"login": "serverless-registry"}
            }
        }"#;

        let event: CheckSuiteEvent = serde_json::from_str(payload).unwrap();
        assert!(event.check_suite.pull_requests.is_empty());
        assert_eq!(event.check_suite.head_sha, "abc123");
    }
}
