// SPDX-License-Identifier: AGPL-3.0-or-later

//! Server configuration loaded from environment variables
//!
//! Every variable is prefixed with `APP_`. Values without a default are
//! required; loading fails with a descriptive error when one is missing
//! or malformed.

use anyhow::{Context, Result};
use serde::Serialize;
use std::env;
use std::path::PathBuf;
use url::Url;

/// Application configuration
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// URL at which external users can reach the HTTP API, scheme
    /// included
    pub external_url: Url,

    /// URL at which the registry website can be accessed
    pub site_url: Url,

    /// URL of the downstream bot API
    pub bot_api_url: Url,

    /// Shared secret used to authenticate with the bot API
    pub bot_api_secret: String,

    /// API server bind address
    pub api_addr: String,

    /// Metrics server bind address
    pub metrics_addr: String,

    /// Document store host
    pub db_host: String,

    /// Document store port
    pub db_port: u16,

    /// Document store user
    pub db_user: String,

    /// Document store password
    pub db_password: String,

    /// Database name inside the document store
    pub db_name: String,

    /// Path to the GitHub App private key PEM file
    pub gh_private_key_path: PathBuf,

    /// GitHub App ID
    pub gh_integration_id: u64,

    /// GitHub App installation ID for the registry repository
    pub gh_installation_id: u64,

    /// Owner of the registry repository
    pub gh_registry_repo_owner: String,

    /// Name of the registry repository
    pub gh_registry_repo_name: String,

    /// Secret used to verify webhook requests came from GitHub
    pub gh_webhook_secret: String,

    /// GitHub team handle pinged when an internal error occurs
    pub gh_dev_team_name: String,
}

fn var(name: &str) -> Result<String> {
    env::var(name).with_context(|| format!("{name} environment variable must be set"))
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn url_var(name: &str, default: &str) -> Result<Url> {
    let raw = var_or(name, default);
    let parsed: Url = raw
        .parse()
        .with_context(|| format!("{name} must be a valid absolute URL, got {raw:?}"))?;

    if parsed.scheme().is_empty() {
        anyhow::bail!("{name} must include a URL scheme");
    }

    Ok(parsed)
}

impl Config {
    /// Load configuration values from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            external_url: url_var("APP_EXTERNAL_URL", "http://localhost:5000")?,
            site_url: url_var("APP_SITE_URL", "http://localhost:3000")?,
            bot_api_url: url_var("APP_BOT_API_URL", "http://localhost:8000")?,
            bot_api_secret: var("APP_BOT_API_SECRET")?,
            api_addr: var_or("APP_API_ADDR", ":5000"),
            metrics_addr: var_or("APP_METRICS_ADDR", ":9090"),
            db_host: var_or("APP_DB_HOST", "localhost"),
            db_port: var_or("APP_DB_PORT", "27017")
                .parse()
                .context("APP_DB_PORT must be a port number")?,
            db_user: var_or("APP_DB_USER", "registry-dev"),
            db_password: var_or("APP_DB_PASSWORD", "secretpassword"),
            db_name: var_or("APP_DB_NAME", "serverless-registry-api-dev"),
            gh_private_key_path: PathBuf::from(var_or(
                "APP_GH_PRIVATE_KEY_PATH",
                "gh.private-key.pem",
            )),
            gh_integration_id: var("APP_GH_INTEGRATION_ID")?
                .parse()
                .context("APP_GH_INTEGRATION_ID must be an integer")?,
            gh_installation_id: var("APP_GH_INSTALLATION_ID")?
                .parse()
                .context("APP_GH_INSTALLATION_ID must be an integer")?,
            gh_registry_repo_owner: var_or("APP_GH_REGISTRY_REPO_OWNER", "serverless-registry"),
            gh_registry_repo_name: var_or("APP_GH_REGISTRY_REPO_NAME", "serverless-apps"),
            gh_webhook_secret: var("APP_GH_WEBHOOK_SECRET")?,
            gh_dev_team_name: var_or("APP_GH_DEV_TEAM_NAME", "@serverless-registry/developers"),
        })
    }

    /// Log safe form of the configuration with secrets redacted
    pub fn log_safe(&self) -> Result<String> {
        let mut redacted = self.clone();

        for secret in [
            &mut redacted.bot_api_secret,
            &mut redacted.db_password,
            &mut redacted.gh_webhook_secret,
        ] {
            if !secret.is_empty() {
                *secret = "REDACTED_NOT_EMPTY".to_string();
            }
        }

        serde_json::to_string(&redacted).context("failed to serialize configuration for logging")
    }
}

/// Normalize a bind address of the `:PORT` form into one a socket can
/// bind, leaving full `HOST:PORT` addresses untouched.
pub fn bind_addr(addr: &str) -> String {
    if let Some(port) = addr.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        addr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_applies_defaults_and_redacts() {
        env::set_var("APP_BOT_API_SECRET", "bot-secret");
        env::set_var("APP_GH_INTEGRATION_ID", "12345");
        env::set_var("APP_GH_INSTALLATION_ID", "67890");
        env::set_var("APP_GH_WEBHOOK_SECRET", "hook-secret");

        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.external_url.as_str(), "http://localhost:5000/");
        assert_eq!(cfg.api_addr, ":5000");
        assert_eq!(cfg.db_port, 27017);
        assert_eq!(cfg.gh_integration_id, 12345);

        let log_form = cfg.log_safe().unwrap();
        assert!(!log_form.contains("bot-secret"));
        assert!(!log_form.contains("hook-secret"));
        assert!(log_form.contains("REDACTED_NOT_EMPTY"));
    }

    #[test]
    fn bind_addr_expands_bare_port() {
        assert_eq!(bind_addr(":5000"), "0.0.0.0:5000");
        assert_eq!(bind_addr("127.0.0.1:9090"), "127.0.0.1:9090");
    }
}
