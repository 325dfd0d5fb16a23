// SPDX-License-Identifier: AGPL-3.0-or-later

//! Update job scenarios: full reconciliation, pruning, idempotence and
//! the all-or-nothing abort.

mod common;

use common::{test_config, MemoryCatalog, MockUpstream};
use registry_api::jobs::{Job, UpdateAppsJob, UpdateAppsJobDefinition};
use registry_api::models::{App, AppDeployment};
use std::sync::Arc;

fn update_job(upstream: Arc<MockUpstream>, catalog: Arc<MemoryCatalog>) -> UpdateAppsJob {
    UpdateAppsJob {
        cfg: test_config(),
        upstream,
        catalog,
        http: reqwest::Client::new(),
    }
}

fn no_notify_payload() -> Vec<u8> {
    serde_json::to_vec(&UpdateAppsJobDefinition {
        no_bot_api_notify: true,
    })
    .unwrap()
}

fn stale_app(app_id: &str) -> App {
    App {
        app_id: app_id.to_string(),
        name: "Stale".to_string(),
        tagline: "old".to_string(),
        description: "old".to_string(),
        screenshot_urls: Vec::new(),
        logo_url: "https://example.com/logo.png".to_string(),
        tags: vec!["old".to_string()],
        categories: vec!["other".to_string()],
        verification_status: "pending".to_string(),
        github_url: "https://github.com/o/r/tree/master/stale".to_string(),
        homepage_url: None,
        version: "old".to_string(),
        author: "A <a@x>".to_string(),
        maintainer: "B <b@x>".to_string(),
        deployment: AppDeployment::default(),
    }
}

#[tokio::test]
async fn reconciles_and_prunes() {
    let upstream = MockUpstream::new();
    upstream.add_valid_app("master", "hello");
    upstream.add_valid_app("master", "world");

    let catalog = MemoryCatalog::new();
    catalog
        .apps
        .lock()
        .unwrap()
        .insert("stale".to_string(), stale_app("stale"));

    let job = update_job(Arc::clone(&upstream), Arc::clone(&catalog));
    job.run(&no_notify_payload()).await.unwrap();

    let apps = catalog.snapshot();
    assert_eq!(
        apps.keys().cloned().collect::<Vec<_>>(),
        vec!["hello", "world"]
    );
    assert!(apps.get("stale").is_none());
    assert_eq!(apps["hello"].name, "Hello");
}

#[tokio::test]
async fn applying_twice_is_idempotent() {
    let upstream = MockUpstream::new();
    upstream.add_valid_app("master", "hello");

    let catalog = MemoryCatalog::new();
    let job = update_job(Arc::clone(&upstream), Arc::clone(&catalog));

    job.run(&no_notify_payload()).await.unwrap();
    let first = catalog.snapshot();

    job.run(&no_notify_payload()).await.unwrap();
    let second = catalog.snapshot();

    // Identical upstream state yields an identical catalog: same IDs,
    // same documents, same versions.
    assert_eq!(first, second);
}

#[tokio::test]
async fn one_bad_app_aborts_the_whole_update() {
    let upstream = MockUpstream::new();
    upstream.add_valid_app("master", "hello");
    // A second app whose manifest is broken YAML.
    upstream.add_valid_app("master", "broken");
    upstream.add_file("master", "broken/manifest.yaml", b"name: [unclosed");

    let catalog = MemoryCatalog::new();
    catalog
        .apps
        .lock()
        .unwrap()
        .insert("stale".to_string(), stale_app("stale"));

    let job = update_job(Arc::clone(&upstream), Arc::clone(&catalog));
    let err = job.run(&no_notify_payload()).await.unwrap_err();

    assert!(err.to_string().contains("broken"));

    // Partial state is not committed: the catalog still only holds the
    // pre-existing app.
    let apps = catalog.snapshot();
    assert_eq!(apps.keys().cloned().collect::<Vec<_>>(), vec!["stale"]);
}
