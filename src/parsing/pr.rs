// SPDX-License-Identifier: AGPL-3.0-or-later

//! Pull request parser
//!
//! Resolves the files changed by a pull request into the set of
//! affected, still-present app IDs.

use crate::github::UpstreamClient;
use crate::parsing::RepoParser;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Maximum number of files the upstream ever returns per page for the
/// PR files endpoint
const PR_FILES_PER_PAGE: u32 = 300;

/// Parses a pull request into the app IDs it modifies
pub struct PrParser {
    /// Upstream hosting provider client
    pub upstream: Arc<dyn UpstreamClient>,

    /// Owner of the registry repository
    pub repo_owner: String,

    /// Name of the registry repository
    pub repo_name: String,

    /// The pull request's head reference
    pub repo_ref: String,

    /// The pull request's user facing number
    pub pr_number: u64,
}

/// Directory part of a path, without the trailing separator. Empty for
/// paths with no directory component.
fn dir_part(path: &str) -> &str {
    match path.rfind('/') {
        Some(index) => &path[..index],
        None => "",
    }
}

impl PrParser {
    /// Returns the IDs of the serverless applications modified in the
    /// pull request.
    ///
    /// A file's previous path is considered too, covering moves from
    /// one app directory to another. IDs whose directory no longer
    /// exists at the PR head were deletions and are dropped from the
    /// result.
    pub async fn modified_app_ids(&self) -> Result<Vec<String>> {
        let pr_files = self
            .upstream
            .list_pr_files(
                &self.repo_owner,
                &self.repo_name,
                self.pr_number,
                1,
                PR_FILES_PER_PAGE,
            )
            .await
            .context("error listing PR files")?;

        let mut modified: BTreeSet<String> = BTreeSet::new();

        for pr_file in &pr_files {
            let mut dirs = vec![dir_part(&pr_file.filename)];
            if let Some(previous) = &pr_file.previous_filename {
                dirs.push(dir_part(previous));
            }

            for dir in dirs {
                // Files in the repository root belong to no app.
                if dir.is_empty() {
                    continue;
                }

                let first_segment = dir.split('/').next().unwrap_or_default();
                modified.insert(first_segment.to_string());
            }
        }

        // An app deleted by the PR still shows up in the diff; its
        // directory is gone from the PR head though, so intersect with
        // the directories that actually exist there.
        let repo_parser = RepoParser {
            upstream: Arc::clone(&self.upstream),
            repo_owner: self.repo_owner.clone(),
            repo_name: self.repo_name.clone(),
            repo_ref: self.repo_ref.clone(),
        };

        let present: BTreeSet<String> = repo_parser
            .get_app_ids()
            .await
            .context("error getting IDs of apps in PR head")?
            .into_iter()
            .collect();

        Ok(modified.intersection(&present).cloned().collect())
    }
}
