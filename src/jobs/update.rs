// SPDX-License-Identifier: AGPL-3.0-or-later

//! Update apps job
//!
//! Idempotent full reconciliation of the catalog against the registry
//! repository's master branch.

use crate::config::Config;
use crate::github::UpstreamClient;
use crate::jobs::Job;
use crate::models::App;
use crate::parsing::RepoParser;
use crate::store::CatalogStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Payload of an update apps job
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateAppsJobDefinition {
    /// When set the downstream bot API is not notified of the new
    /// catalog state
    #[serde(default)]
    pub no_bot_api_notify: bool,
}

/// Updates the apps collection based on the current master branch state
pub struct UpdateAppsJob {
    /// Server configuration
    pub cfg: Arc<Config>,

    /// Upstream hosting provider client
    pub upstream: Arc<dyn UpstreamClient>,

    /// Catalog store
    pub catalog: Arc<dyn CatalogStore>,

    /// Client used to notify the bot API
    pub http: reqwest::Client,
}

#[async_trait]
impl Job for UpdateAppsJob {
    async fn run(&self, data: &[u8]) -> Result<()> {
        let definition: UpdateAppsJobDefinition = if data.is_empty() {
            UpdateAppsJobDefinition::default()
        } else {
            serde_json::from_slice(data)
                .context("failed to parse data as an update apps job definition")?
        };

        let repo_parser = RepoParser {
            upstream: Arc::clone(&self.upstream),
            repo_owner: self.cfg.gh_registry_repo_owner.clone(),
            repo_name: self.cfg.gh_registry_repo_name.clone(),
            repo_ref: "master".to_string(),
        };

        let app_ids = repo_parser
            .get_app_ids()
            .await
            .context("failed to get IDs of applications in repository")?;

        // The full update is all or nothing: one unparsable app aborts
        // the run before anything is committed.
        let mut apps = Vec::with_capacity(app_ids.len());
        for app_id in &app_ids {
            match repo_parser.get_app(app_id).await {
                Ok(app) => apps.push(app),
                Err(errs) => {
                    let details: Vec<String> = errs.iter().map(|err| err.to_string()).collect();
                    anyhow::bail!(
                        "failed to get application with ID {}: {}",
                        app_id,
                        details.join(", ")
                    );
                }
            }
        }

        for app in &apps {
            self.catalog
                .upsert(&app.app_id, app)
                .await
                .with_context(|| format!("failed to update app with ID {} in db", app.app_id))?;
        }

        let pruned = self
            .catalog
            .delete_where_id_not_in(&app_ids)
            .await
            .context("failed to prune old apps from db")?;

        info!(
            "updated {} app(s), pruned {} app(s)",
            apps.len(),
            pruned
        );

        if !definition.no_bot_api_notify {
            self.notify_bot_api(&apps).await?;
        }

        Ok(())
    }
}

impl UpdateAppsJob {
    /// Tell the downstream bot API about the new catalog state
    async fn notify_bot_api(&self, apps: &[App]) -> Result<()> {
        #[derive(Serialize)]
        struct NewApps<'a> {
            apps: &'a [App],
        }

        let url = self
            .cfg
            .bot_api_url
            .join("apps")
            .context("failed to build bot API URL")?;

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.cfg.bot_api_secret)
            .json(&NewApps { apps })
            .send()
            .await
            .context("failed to make new apps request to the bot API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("bot API new apps request failed: {status} - {body}");
        }

        info!("notified bot API of {} app(s)", apps.len());

        Ok(())
    }
}
