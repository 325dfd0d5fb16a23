// SPDX-License-Identifier: AGPL-3.0-or-later

//! Upstream hosting provider client
//!
//! Defines the [`UpstreamClient`] capability trait the parsing pipeline
//! and jobs are written against, plus the GitHub App implementation:
//! RS256 App JWT authentication exchanged for a short-lived installation
//! access token which is cached and refreshed before expiry.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Type of a repository directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    File,
    Dir,
    #[serde(other)]
    Other,
}

/// One entry of a repository directory listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

/// One file changed by a pull request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrFile {
    pub filename: String,
    #[serde(default)]
    pub previous_filename: Option<String>,
}

/// Pull request payload, reduced to the fields the pipeline uses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub head: PullRequestHead,
    #[serde(default)]
    pub merged: bool,
}

/// Head reference of a pull request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestHead {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub sha: String,
}

/// Request to create a check run in the `in_progress` state
#[derive(Debug, Clone, Serialize)]
pub struct CreateCheckRun {
    pub name: String,
    pub head_branch: String,
    pub head_sha: String,
    pub status: String,
    pub started_at: String,
}

/// Request to complete a check run
#[derive(Debug, Clone, Serialize)]
pub struct UpdateCheckRun {
    pub status: String,
    pub conclusion: String,
    pub completed_at: String,
    pub output: CheckRunOutput,
}

/// Check run output block
#[derive(Debug, Clone, Serialize)]
pub struct CheckRunOutput {
    pub title: String,
    pub summary: String,
    pub text: String,
}

/// Capability interface over the upstream hosting provider
///
/// Everything the ingestion and submission-validation pipelines need
/// from the provider goes through this trait, so tests can substitute
/// an in-memory implementation.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// List the entries of a directory at a Git reference. An empty
    /// path lists the repository root.
    async fn list_dir(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Vec<DirEntry>>;

    /// Fetch the raw bytes of a file at a Git reference
    async fn get_file(&self, owner: &str, repo: &str, path: &str, git_ref: &str)
        -> Result<Vec<u8>>;

    /// List the files changed by a pull request, one page at a time
    async fn list_pr_files(
        &self,
        owner: &str,
        repo: &str,
        pr_number: u64,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<PrFile>>;

    /// Post a comment on a pull request
    async fn create_comment(
        &self,
        owner: &str,
        repo: &str,
        pr_number: u64,
        body: &str,
    ) -> Result<()>;

    /// Create a check run, returning its ID
    async fn create_check_run(&self, owner: &str, repo: &str, check: CreateCheckRun)
        -> Result<u64>;

    /// Complete a previously created check run
    async fn update_check_run(
        &self,
        owner: &str,
        repo: &str,
        check_run_id: u64,
        update: UpdateCheckRun,
    ) -> Result<()>;

    /// List pull requests associated with a commit
    async fn list_prs_for_commit(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
        state: &str,
    ) -> Result<Vec<PullRequest>>;

    /// Verify the repository exists and is reachable with the current
    /// credentials
    async fn get_repo(&self, owner: &str, repo: &str) -> Result<()>;

    /// Fetch a pull request by number
    async fn get_pr(&self, owner: &str, repo: &str, number: u64) -> Result<PullRequest>;
}

/// GitHub App configuration
#[derive(Debug, Clone)]
pub struct GitHubAppConfig {
    /// GitHub App ID
    pub app_id: u64,
    /// Path to the private key PEM file
    pub private_key_path: PathBuf,
    /// Installation ID for the registry repository
    pub installation_id: u64,
    /// GitHub API base URL
    pub api_base_url: String,
}

impl GitHubAppConfig {
    pub fn new(app_id: u64, private_key_path: PathBuf, installation_id: u64) -> Self {
        Self {
            app_id,
            private_key_path,
            installation_id,
            api_base_url: "https://api.github.com".to_string(),
        }
    }
}

/// JWT claims for GitHub App authentication
#[derive(Debug, Serialize)]
struct GitHubAppClaims {
    /// Issued at time
    iat: i64,
    /// Expiration time (max 10 minutes)
    exp: i64,
    /// Issuer (GitHub App ID)
    iss: String,
}

/// Installation access token response
#[derive(Debug, Deserialize)]
struct InstallationToken {
    token: String,
    expires_at: String,
}

#[derive(Debug)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// GitHub App client
pub struct GitHubClient {
    config: GitHubAppConfig,
    http: Client,
    token: Mutex<Option<CachedToken>>,
}

impl GitHubClient {
    /// Create a new GitHub App client
    pub fn new(config: GitHubAppConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("registry-api/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self {
            config,
            http,
            token: Mutex::new(None),
        })
    }

    /// Generate a JWT for GitHub App authentication
    fn generate_jwt(&self) -> Result<String> {
        let private_key = std::fs::read_to_string(&self.config.private_key_path)
            .context("failed to read private key file")?;

        let now = Utc::now();
        let claims = GitHubAppClaims {
            iat: (now - Duration::seconds(60)).timestamp(),
            exp: (now + Duration::minutes(9)).timestamp(),
            iss: self.config.app_id.to_string(),
        };

        let header = Header::new(Algorithm::RS256);
        let key = EncodingKey::from_rsa_pem(private_key.as_bytes())
            .context("failed to parse private key")?;

        encode(&header, &claims, &key).context("failed to encode JWT")
    }

    /// Get or refresh the installation access token
    async fn installation_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;

        if let Some(token) = cached.as_ref() {
            if Utc::now() < token.expires_at - Duration::minutes(5) {
                return Ok(token.token.clone());
            }
        }

        let jwt = self.generate_jwt()?;

        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.config.api_base_url, self.config.installation_id
        );

        debug!("requesting installation token from {}", url);

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", jwt))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .send()
            .await
            .context("failed to request installation token")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("failed to get installation token: {} - {}", status, body);
        }

        let token_response: InstallationToken = response
            .json()
            .await
            .context("failed to parse installation token response")?;

        let expires_at = DateTime::parse_from_rfc3339(&token_response.expires_at)
            .context("failed to parse token expiration")?
            .with_timezone(&Utc);

        info!("obtained installation token (expires at {})", expires_at);

        *cached = Some(CachedToken {
            token: token_response.token.clone(),
            expires_at,
        });

        Ok(token_response.token)
    }

    async fn authed(&self, builder: RequestBuilder) -> Result<RequestBuilder> {
        let token = self.installation_token().await?;

        Ok(builder
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28"))
    }

    /// Send a request and deserialize the JSON response, reporting the
    /// status and body on failure
    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        what: &str,
    ) -> Result<T> {
        let response = builder
            .send()
            .await
            .with_context(|| format!("failed to {what}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("failed to {what}: {status} - {body}");
        }

        response
            .json()
            .await
            .with_context(|| format!("failed to parse response while trying to {what}"))
    }

    /// Send a request and discard the response body, reporting the
    /// status and body on failure
    async fn send_ok(&self, builder: RequestBuilder, what: &str) -> Result<()> {
        let response = builder
            .send()
            .await
            .with_context(|| format!("failed to {what}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("failed to {what}: {status} - {body}");
        }

        Ok(())
    }

    fn contents_url(&self, owner: &str, repo: &str, path: &str, git_ref: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}?ref={}",
            self.config.api_base_url, owner, repo, path, git_ref
        )
    }
}

#[async_trait]
impl UpstreamClient for GitHubClient {
    async fn list_dir(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Vec<DirEntry>> {
        let url = self.contents_url(owner, repo, path, git_ref);
        let builder = self.authed(self.http.get(&url)).await?;

        self.send_json(builder, &format!("list directory {path:?} at {git_ref:?}"))
            .await
    }

    async fn get_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Vec<u8>> {
        let url = self.contents_url(owner, repo, path, git_ref);
        let builder = self
            .authed(self.http.get(&url))
            .await?
            // Raw media type returns the file bytes directly instead of
            // a JSON envelope with base64 content.
            .header("Accept", "application/vnd.github.raw");

        let response = builder
            .send()
            .await
            .with_context(|| format!("failed to get file {path:?} at {git_ref:?}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("failed to get file {path:?} at {git_ref:?}: {status} - {body}");
        }

        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("failed to read file {path:?} at {git_ref:?}"))?;

        Ok(bytes.to_vec())
    }

    async fn list_pr_files(
        &self,
        owner: &str,
        repo: &str,
        pr_number: u64,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<PrFile>> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}/files?page={}&per_page={}",
            self.config.api_base_url, owner, repo, pr_number, page, per_page
        );
        let builder = self.authed(self.http.get(&url)).await?;

        self.send_json(builder, &format!("list files of PR #{pr_number}"))
            .await
    }

    async fn create_comment(
        &self,
        owner: &str,
        repo: &str,
        pr_number: u64,
        body: &str,
    ) -> Result<()> {
        #[derive(Serialize)]
        struct CreateComment<'a> {
            body: &'a str,
        }

        let url = format!(
            "{}/repos/{}/{}/issues/{}/comments",
            self.config.api_base_url, owner, repo, pr_number
        );

        debug!("posting comment to PR #{}", pr_number);

        let builder = self
            .authed(self.http.post(&url))
            .await?
            .json(&CreateComment { body });

        self.send_ok(builder, &format!("comment on PR #{pr_number}"))
            .await
    }

    async fn create_check_run(
        &self,
        owner: &str,
        repo: &str,
        check: CreateCheckRun,
    ) -> Result<u64> {
        #[derive(Deserialize)]
        struct CheckRunResponse {
            id: u64,
        }

        let url = format!(
            "{}/repos/{}/{}/check-runs",
            self.config.api_base_url, owner, repo
        );

        debug!("creating check run {} for {}", check.name, check.head_sha);

        let builder = self.authed(self.http.post(&url)).await?.json(&check);
        let response: CheckRunResponse = self.send_json(builder, "create check run").await?;

        Ok(response.id)
    }

    async fn update_check_run(
        &self,
        owner: &str,
        repo: &str,
        check_run_id: u64,
        update: UpdateCheckRun,
    ) -> Result<()> {
        let url = format!(
            "{}/repos/{}/{}/check-runs/{}",
            self.config.api_base_url, owner, repo, check_run_id
        );

        debug!("updating check run {}", check_run_id);

        let builder = self.authed(self.http.patch(&url)).await?.json(&update);

        self.send_ok(builder, &format!("update check run {check_run_id}"))
            .await
    }

    async fn list_prs_for_commit(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
        state: &str,
    ) -> Result<Vec<PullRequest>> {
        let url = format!(
            "{}/repos/{}/{}/commits/{}/pulls?state={}",
            self.config.api_base_url, owner, repo, sha, state
        );
        let builder = self.authed(self.http.get(&url)).await?;

        self.send_json(builder, &format!("list PRs for commit {sha}"))
            .await
    }

    async fn get_repo(&self, owner: &str, repo: &str) -> Result<()> {
        let url = format!("{}/repos/{}/{}", self.config.api_base_url, owner, repo);
        let builder = self.authed(self.http.get(&url)).await?;

        self.send_ok(builder, &format!("get repository {owner}/{repo}"))
            .await
    }

    async fn get_pr(&self, owner: &str, repo: &str, number: u64) -> Result<PullRequest> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}",
            self.config.api_base_url, owner, repo, number
        );
        let builder = self.authed(self.http.get(&url)).await?;

        self.send_json(builder, &format!("get PR #{number}")).await
    }
}
