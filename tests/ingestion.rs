// SPDX-License-Identifier: AGPL-3.0-or-later

//! End to end ingestion scenarios driven through the repo and PR
//! parsers against an in-memory upstream.

mod common;

use common::{MockUpstream, REPO_NAME, REPO_OWNER};
use registry_api::parsing::{PrParser, RepoParser};
use std::sync::Arc;

fn repo_parser(upstream: Arc<MockUpstream>, git_ref: &str) -> RepoParser {
    RepoParser {
        upstream,
        repo_owner: REPO_OWNER.to_string(),
        repo_name: REPO_NAME.to_string(),
        repo_ref: git_ref.to_string(),
    }
}

#[tokio::test]
async fn valid_app_is_fully_ingested() {
    let upstream = MockUpstream::new();
    upstream.add_valid_app("master", "hello");

    let parser = repo_parser(Arc::clone(&upstream), "master");

    let ids = parser.get_app_ids().await.unwrap();
    assert_eq!(ids, vec!["hello"]);

    let app = parser.get_app("hello").await.expect("app should parse");

    assert_eq!(app.app_id, "hello");
    assert_eq!(app.name, "Hello");
    assert_eq!(app.tagline, "hi");
    assert_eq!(app.description, "text");
    assert_eq!(app.tags, vec!["hw"]);
    assert_eq!(app.categories, vec!["hello world"]);
    assert_eq!(app.verification_status, "pending");
    assert_eq!(
        app.github_url,
        format!("https://github.com/{REPO_OWNER}/{REPO_NAME}/tree/master/hello")
    );
    assert!(app.logo_url.starts_with("https://raw.example.com/"));

    // One ConfigMap key yields exactly one deploy parameter.
    let deployment = &app.deployment;
    assert_eq!(deployment.parameters.len(), 1);
    let param = &deployment.parameters[0];
    assert_eq!(param.display_name, "\"k\" key in \"cfg\" ConfigMap");
    assert_eq!(param.default_value, "v");
    assert!(!param.requires_base64);

    assert_eq!(deployment.resources.len(), 1);
    assert_eq!(
        deployment.resources.len(),
        deployment.parameterized_resources.len()
    );
    assert!(deployment.resources[0].contains("\"v\""));
    assert!(!deployment.parameterized_resources[0].contains("\"v\""));

    // The substitution token appears exactly once in exactly one
    // parameterized resource, and once more in the deploy script.
    let occurrences: usize = deployment
        .parameterized_resources
        .iter()
        .map(|resource| resource.matches(&param.substitution).count())
        .sum();
    assert_eq!(occurrences, 1);
    assert!(deployment.deploy_script.contains(&param.substitution));
}

#[tokio::test]
async fn version_is_reproducible_across_parses() {
    let upstream = MockUpstream::new();
    upstream.add_valid_app("master", "hello");

    let parser = repo_parser(Arc::clone(&upstream), "master");

    let first = parser.get_app("hello").await.unwrap();
    let second = parser.get_app("hello").await.unwrap();

    assert_eq!(first.version, second.version);
    assert_eq!(first.version, first.compute_version().unwrap());
}

#[tokio::test]
async fn empty_app_directory_is_a_single_user_error() {
    let upstream = MockUpstream::new();

    let parser = repo_parser(Arc::clone(&upstream), "master");
    let errs = parser.get_app("ghost").await.unwrap_err();

    assert_eq!(errs.len(), 1);
    assert_eq!(errs[0].what, "all files in the app directory");
    assert_eq!(errs[0].why, "no files were found");
    assert_eq!(errs[0].fix_instructions, "add required files");
    assert!(!errs[0].is_internal());
}

#[tokio::test]
async fn disallowed_file_is_reported_but_parsing_continues() {
    let upstream = MockUpstream::new();
    upstream.add_valid_app("master", "hello");
    upstream.add_file("master", "hello/extra.txt", b"should not be here");

    let parser = repo_parser(Arc::clone(&upstream), "master");
    let errs = parser.get_app("hello").await.unwrap_err();

    // Exactly one error for the extra file; the rest of the app parsed.
    assert_eq!(errs.len(), 1);
    assert_eq!(errs[0].what, "`extra.txt` file");
    assert_eq!(errs[0].why, "not allowed in an app directory");
    assert_eq!(errs[0].fix_instructions, "delete this file");
}

#[tokio::test]
async fn namespace_resource_fails_the_app() {
    let upstream = MockUpstream::new();
    upstream.add_valid_app("master", "hello");
    upstream.add_file(
        "master",
        "hello/deployment/ns.yaml",
        b"apiVersion: v1\nkind: Namespace\nmetadata:\n  name: ns\n",
    );

    let parser = repo_parser(Arc::clone(&upstream), "master");
    let errs = parser.get_app("hello").await.unwrap_err();

    assert_eq!(errs.len(), 1);
    assert_eq!(errs[0].what, "`deployment` directory");
    assert_eq!(errs[0].why, "resources of type Namespace are not allowed");
}

#[tokio::test]
async fn missing_readme_maps_to_user_error() {
    let upstream = MockUpstream::new();
    upstream.add_valid_app("master", "hello");
    upstream
        .files
        .lock()
        .unwrap()
        .remove(&("master".to_string(), "hello/README.md".to_string()));

    let parser = repo_parser(Arc::clone(&upstream), "master");
    let errs = parser.get_app("hello").await.unwrap_err();

    assert_eq!(errs.len(), 1);
    assert_eq!(errs[0].what, "`README.md` file");
    assert_eq!(errs[0].why, "a value must be provided");
    assert_eq!(errs[0].fix_instructions, "set a value");
}

#[tokio::test]
async fn screenshots_directory_is_allowed_and_collected() {
    let upstream = MockUpstream::new();
    upstream.add_valid_app("master", "hello");
    upstream.add_file("master", "hello/screenshots/one.png", b"\x89PNG");
    upstream.add_file("master", "hello/screenshots/two.png", b"\x89PNG");

    let parser = repo_parser(Arc::clone(&upstream), "master");
    let app = parser.get_app("hello").await.expect("app should parse");

    assert_eq!(app.screenshot_urls.len(), 2);
    assert!(app.screenshot_urls[0].starts_with("https://raw.example.com/"));
}

#[tokio::test]
async fn homepage_url_is_propagated() {
    let upstream = MockUpstream::new();
    upstream.add_valid_app("master", "hello");
    upstream.add_file(
        "master",
        "hello/manifest.yaml",
        concat!(
            "name: Hello\n",
            "tagline: hi\n",
            "tags: [hw]\n",
            "categories: [hello world]\n",
            "author: A Person <a@example.com>\n",
            "maintainer: B Person <b@example.com>\n",
            "homepage_url: https://hello.example.com\n",
        )
        .as_bytes(),
    );

    let parser = repo_parser(Arc::clone(&upstream), "master");
    let app = parser.get_app("hello").await.expect("app should parse");

    assert_eq!(
        app.homepage_url.as_deref(),
        Some("https://hello.example.com")
    );
}

#[tokio::test]
async fn pr_parser_drops_deleted_apps() {
    let upstream = MockUpstream::new();
    // Only "hello" exists at the PR head; "goodbye" was deleted.
    upstream.add_valid_app("pr-head", "hello");
    upstream.add_pr_files(
        9,
        vec![registry_api::github::PrFile {
            filename: "goodbye/manifest.yaml".to_string(),
            previous_filename: None,
        }],
    );

    let parser = PrParser {
        upstream: Arc::clone(&upstream) as Arc<dyn registry_api::github::UpstreamClient>,
        repo_owner: REPO_OWNER.to_string(),
        repo_name: REPO_NAME.to_string(),
        repo_ref: "pr-head".to_string(),
        pr_number: 9,
    };

    let ids = parser.modified_app_ids().await.unwrap();
    assert!(ids.is_empty());
}

#[tokio::test]
async fn pr_parser_tracks_moves_via_previous_filename() {
    let upstream = MockUpstream::new();
    upstream.add_valid_app("pr-head", "hello");
    upstream.add_valid_app("pr-head", "renamed");
    upstream.add_pr_files(
        11,
        vec![registry_api::github::PrFile {
            filename: "renamed/manifest.yaml".to_string(),
            previous_filename: Some("hello/manifest.yaml".to_string()),
        }],
    );

    let parser = PrParser {
        upstream: Arc::clone(&upstream) as Arc<dyn registry_api::github::UpstreamClient>,
        repo_owner: REPO_OWNER.to_string(),
        repo_name: REPO_NAME.to_string(),
        repo_ref: "pr-head".to_string(),
        pr_number: 11,
    };

    let ids = parser.modified_app_ids().await.unwrap();
    assert_eq!(ids, vec!["hello", "renamed"]);
}

#[tokio::test]
async fn root_level_files_are_ignored() {
    let upstream = MockUpstream::new();
    upstream.add_valid_app("pr-head", "hello");
    upstream.add_pr_files(
        12,
        vec![registry_api::github::PrFile {
            filename: "README.md".to_string(),
            previous_filename: None,
        }],
    );

    let parser = PrParser {
        upstream: Arc::clone(&upstream) as Arc<dyn registry_api::github::UpstreamClient>,
        repo_owner: REPO_OWNER.to_string(),
        repo_name: REPO_NAME.to_string(),
        repo_ref: "pr-head".to_string(),
        pr_number: 12,
    };

    let ids = parser.modified_app_ids().await.unwrap();
    assert!(ids.is_empty());
}
