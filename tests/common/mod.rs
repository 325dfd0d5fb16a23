// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared test doubles: an in-memory upstream and catalog store.
//!
//! Together they let the parsing pipeline and jobs run end to end
//! without network access or a database.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use registry_api::config::Config;
use registry_api::github::{
    CreateCheckRun, DirEntry, EntryType, PrFile, PullRequest, UpdateCheckRun, UpstreamClient,
};
use registry_api::models::{App, Submission};
use registry_api::store::CatalogStore;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub const REPO_OWNER: &str = "serverless-registry";
pub const REPO_NAME: &str = "serverless-apps";

/// Configuration pointing at the mock collaborators
pub fn test_config() -> Arc<Config> {
    Arc::new(Config {
        external_url: "http://localhost:5000".parse().unwrap(),
        site_url: "http://localhost:3000".parse().unwrap(),
        bot_api_url: "http://localhost:8000".parse().unwrap(),
        bot_api_secret: "bot-secret".to_string(),
        api_addr: ":5000".to_string(),
        metrics_addr: ":9090".to_string(),
        db_host: "localhost".to_string(),
        db_port: 27017,
        db_user: "registry-dev".to_string(),
        db_password: "secretpassword".to_string(),
        db_name: "registry-test".to_string(),
        gh_private_key_path: PathBuf::from("gh.private-key.pem"),
        gh_integration_id: 1,
        gh_installation_id: 2,
        gh_registry_repo_owner: REPO_OWNER.to_string(),
        gh_registry_repo_name: REPO_NAME.to_string(),
        gh_webhook_secret: "hook-secret".to_string(),
        gh_dev_team_name: "@serverless-registry/developers".to_string(),
    })
}

/// In-memory upstream: a file tree keyed by Git reference plus
/// recorders for every write operation
#[derive(Default)]
pub struct MockUpstream {
    /// (ref, path) -> file contents
    pub files: Mutex<BTreeMap<(String, String), Vec<u8>>>,

    /// PR number -> changed files
    pub pr_files: Mutex<HashMap<u64, Vec<PrFile>>>,

    /// Comments posted, as (PR number, body)
    pub comments: Mutex<Vec<(u64, String)>>,

    /// Check runs created
    pub check_runs: Mutex<Vec<CreateCheckRun>>,

    /// Check run updates, as (check run ID, update)
    pub check_run_updates: Mutex<Vec<(u64, UpdateCheckRun)>>,

    /// Commit SHA -> pull requests containing it
    pub prs_for_commit: Mutex<HashMap<String, Vec<PullRequest>>>,

    next_check_run_id: AtomicU64,
}

impl MockUpstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_file(&self, git_ref: &str, path: &str, contents: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert((git_ref.to_string(), path.to_string()), contents.to_vec());
    }

    pub fn add_pr_files(&self, number: u64, files: Vec<PrFile>) {
        self.pr_files.lock().unwrap().insert(number, files);
    }

    /// Seed a complete, valid app directory at a reference: manifest,
    /// README, logo and one ConfigMap deployment resource.
    pub fn add_valid_app(&self, git_ref: &str, id: &str) {
        let manifest = concat!(
            "name: Hello\n",
            "tagline: hi\n",
            "tags:\n",
            "  - HW\n",
            "categories:\n",
            "  - Hello World\n",
            "author: A Person <a@example.com>\n",
            "maintainer: B Person <b@example.com>\n",
        );

        let deployment = concat!(
            "apiVersion: v1\n",
            "kind: ConfigMap\n",
            "metadata:\n",
            "  name: cfg\n",
            "data:\n",
            "  k: v\n",
        );

        self.add_file(git_ref, &format!("{id}/manifest.yaml"), manifest.as_bytes());
        self.add_file(git_ref, &format!("{id}/README.md"), b"text");
        self.add_file(git_ref, &format!("{id}/logo.png"), b"\x89PNG");
        self.add_file(
            git_ref,
            &format!("{id}/deployment/a.yaml"),
            deployment.as_bytes(),
        );
    }
}

#[async_trait]
impl UpstreamClient for MockUpstream {
    async fn list_dir(
        &self,
        _owner: &str,
        _repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Vec<DirEntry>> {
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };

        // name -> is directory
        let mut children: BTreeMap<String, bool> = BTreeMap::new();

        for (file_ref, file_path) in self.files.lock().unwrap().keys() {
            if file_ref != git_ref || !file_path.starts_with(&prefix) {
                continue;
            }

            let remainder = &file_path[prefix.len()..];
            let name = remainder.split('/').next().unwrap_or_default();
            if name.is_empty() {
                continue;
            }

            let is_dir = remainder.contains('/');
            *children.entry(name.to_string()).or_insert(is_dir) |= is_dir;
        }

        Ok(children
            .into_iter()
            .map(|(name, is_dir)| DirEntry {
                download_url: (!is_dir)
                    .then(|| format!("https://raw.example.com/{git_ref}/{prefix}{name}")),
                html_url: Some(format!(
                    "https://github.example.com/{git_ref}/{prefix}{name}"
                )),
                entry_type: if is_dir { EntryType::Dir } else { EntryType::File },
                name,
            })
            .collect())
    }

    async fn get_file(
        &self,
        _owner: &str,
        _repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(&(git_ref.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| anyhow!("file {path:?} not found at {git_ref:?}"))
    }

    async fn list_pr_files(
        &self,
        _owner: &str,
        _repo: &str,
        pr_number: u64,
        page: u32,
        _per_page: u32,
    ) -> Result<Vec<PrFile>> {
        if page > 1 {
            return Ok(Vec::new());
        }

        Ok(self
            .pr_files
            .lock()
            .unwrap()
            .get(&pr_number)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_comment(
        &self,
        _owner: &str,
        _repo: &str,
        pr_number: u64,
        body: &str,
    ) -> Result<()> {
        self.comments
            .lock()
            .unwrap()
            .push((pr_number, body.to_string()));

        Ok(())
    }

    async fn create_check_run(
        &self,
        _owner: &str,
        _repo: &str,
        check: CreateCheckRun,
    ) -> Result<u64> {
        self.check_runs.lock().unwrap().push(check);

        Ok(self.next_check_run_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    async fn update_check_run(
        &self,
        _owner: &str,
        _repo: &str,
        check_run_id: u64,
        update: UpdateCheckRun,
    ) -> Result<()> {
        self.check_run_updates
            .lock()
            .unwrap()
            .push((check_run_id, update));

        Ok(())
    }

    async fn list_prs_for_commit(
        &self,
        _owner: &str,
        _repo: &str,
        sha: &str,
        _state: &str,
    ) -> Result<Vec<PullRequest>> {
        Ok(self
            .prs_for_commit
            .lock()
            .unwrap()
            .get(sha)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_repo(&self, _owner: &str, _repo: &str) -> Result<()> {
        Ok(())
    }

    async fn get_pr(&self, _owner: &str, _repo: &str, number: u64) -> Result<PullRequest> {
        Err(anyhow!("mock upstream has no PR #{number}"))
    }
}

/// In-memory catalog store with naive search semantics
#[derive(Default)]
pub struct MemoryCatalog {
    pub apps: Mutex<BTreeMap<String, App>>,
    pub submissions: Mutex<HashMap<u64, Submission>>,
}

impl MemoryCatalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> BTreeMap<String, App> {
        self.apps.lock().unwrap().clone()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn ensure_indexes(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, app_id: &str, app: &App) -> Result<()> {
        self.apps
            .lock()
            .unwrap()
            .insert(app_id.to_string(), app.clone());

        Ok(())
    }

    async fn delete_where_id_not_in(&self, ids: &[String]) -> Result<u64> {
        let mut apps = self.apps.lock().unwrap();
        let before = apps.len();
        apps.retain(|app_id, _| ids.contains(app_id));

        Ok((before - apps.len()) as u64)
    }

    async fn find_by_id(&self, app_id: &str) -> Result<Option<App>> {
        Ok(self.apps.lock().unwrap().get(app_id).cloned())
    }

    async fn search(
        &self,
        query: Option<&str>,
        tags: &[String],
        categories: &[String],
    ) -> Result<Vec<App>> {
        let query = query.unwrap_or_default().to_lowercase();

        Ok(self
            .apps
            .lock()
            .unwrap()
            .values()
            .filter(|app| {
                let matches_query = query.is_empty()
                    || app.name.to_lowercase().contains(&query)
                    || app.description.to_lowercase().contains(&query);
                let matches_tags =
                    tags.is_empty() || app.tags.iter().any(|tag| tags.contains(tag));
                let matches_categories = categories.is_empty()
                    || app
                        .categories
                        .iter()
                        .any(|category| categories.contains(category));

                matches_query && matches_tags && matches_categories
            })
            .cloned()
            .collect())
    }

    async fn distinct_tags(&self, query: Option<&str>) -> Result<Vec<String>> {
        let terms: Vec<String> = query
            .unwrap_or_default()
            .split(',')
            .filter(|term| !term.is_empty())
            .map(|term| term.to_string())
            .collect();

        let values: BTreeSet<String> = self
            .apps
            .lock()
            .unwrap()
            .values()
            .filter(|app| terms.is_empty() || app.tags.iter().any(|tag| terms.contains(tag)))
            .flat_map(|app| app.tags.iter().cloned())
            .collect();

        Ok(values.into_iter().collect())
    }

    async fn distinct_categories(&self, query: Option<&str>) -> Result<Vec<String>> {
        let terms: Vec<String> = query
            .unwrap_or_default()
            .split(',')
            .filter(|term| !term.is_empty())
            .map(|term| term.to_string())
            .collect();

        let values: BTreeSet<String> = self
            .apps
            .lock()
            .unwrap()
            .values()
            .filter(|app| {
                terms.is_empty()
                    || app
                        .categories
                        .iter()
                        .any(|category| terms.contains(category))
            })
            .flat_map(|app| app.categories.iter().cloned())
            .collect();

        Ok(values.into_iter().collect())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.apps.lock().unwrap().len() as u64)
    }

    async fn upsert_submission(&self, submission: &Submission) -> Result<()> {
        self.submissions
            .lock()
            .unwrap()
            .insert(submission.pr_number, submission.clone());

        Ok(())
    }
}
