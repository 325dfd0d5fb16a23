// SPDX-License-Identifier: AGPL-3.0-or-later

//! Validate job
//!
//! Validates the applications modified by a pull request and reports
//! the result back upstream as a PR comment and a check run.

use crate::config::Config;
use crate::github::{CheckRunOutput, CreateCheckRun, PullRequest, UpdateCheckRun, UpstreamClient};
use crate::jobs::Job;
use crate::models::{App, Submission, SubmissionApp};
use crate::parsing::{ParseError, PrParser, RepoParser};
use crate::store::CatalogStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

/// Name under which check runs appear on pull requests
const CHECK_RUN_NAME: &str = "Registry Validation";

/// Per-app parse outcome collected by the job
type AppResult = (String, Result<App, Vec<ParseError>>);

/// Validates a pull request against the registry layout.
///
/// Expects its data to be a serialized pull request object carrying at
/// least the PR number and head reference.
pub struct ValidateJob {
    /// Server configuration
    pub cfg: Arc<Config>,

    /// Upstream hosting provider client
    pub upstream: Arc<dyn UpstreamClient>,

    /// Catalog store, used to persist the submission record
    pub catalog: Arc<dyn CatalogStore>,
}

#[async_trait]
impl Job for ValidateJob {
    async fn run(&self, data: &[u8]) -> Result<()> {
        let pr: PullRequest =
            serde_json::from_slice(data).context("failed to parse data as a pull request")?;

        let owner = &self.cfg.gh_registry_repo_owner;
        let repo = &self.cfg.gh_registry_repo_name;

        let check_run_id = self
            .upstream
            .create_check_run(
                owner,
                repo,
                CreateCheckRun {
                    name: CHECK_RUN_NAME.to_string(),
                    head_branch: pr.head.ref_name.clone(),
                    head_sha: pr.head.sha.clone(),
                    status: "in_progress".to_string(),
                    started_at: Utc::now().to_rfc3339(),
                },
            )
            .await
            .context("failed to create initial check run")?;

        let pr_parser = PrParser {
            upstream: Arc::clone(&self.upstream),
            repo_owner: owner.clone(),
            repo_name: repo.clone(),
            repo_ref: pr.head.ref_name.clone(),
            pr_number: pr.number,
        };

        let app_ids = pr_parser
            .modified_app_ids()
            .await
            .context("failed to get IDs of apps modified in PR")?;

        if app_ids.is_empty() {
            self.upstream
                .update_check_run(
                    owner,
                    repo,
                    check_run_id,
                    UpdateCheckRun {
                        status: "completed".to_string(),
                        conclusion: "success".to_string(),
                        completed_at: Utc::now().to_rfc3339(),
                        output: CheckRunOutput {
                            title: "Passed".to_string(),
                            summary: "No serverless applications were modified in this pull \
                                      request."
                                .to_string(),
                            text: String::new(),
                        },
                    },
                )
                .await
                .context("failed to complete check run")?;

            return Ok(());
        }

        let repo_parser = RepoParser {
            upstream: Arc::clone(&self.upstream),
            repo_owner: owner.clone(),
            repo_name: repo.clone(),
            repo_ref: pr.head.ref_name.clone(),
        };

        let mut results: Vec<AppResult> = Vec::with_capacity(app_ids.len());
        for app_id in &app_ids {
            let result = repo_parser.get_app(app_id).await;

            if let Err(errs) = &result {
                for err in errs.iter().filter(|err| err.is_internal()) {
                    error!(
                        "internal error occurred when parsing app with ID {app_id:?}: {err}"
                    );
                }
            }

            results.push((app_id.clone(), result));
        }

        self.catalog
            .upsert_submission(&build_submission(pr.number, &results))
            .await
            .context("failed to save submission in db")?;

        let status_table = render_status_table(&results, &self.cfg.gh_dev_team_name);
        let error_details = render_error_details(&results);

        let mut comment = String::from(
            "I've taken a look at your pull request, here is the current status of the \
             applications you modified:  \n\n  ",
        );
        comment.push_str(&status_table);

        if !error_details.is_empty() {
            comment.push_str(
                "  \n# Errors  \nI found some errors with the changes made in this pull \
                 request:  \n",
            );
            comment.push_str(&error_details);
        }

        comment.push_str("  \n---  \n*I am a bot*");

        self.upstream
            .create_comment(owner, repo, pr.number, &comment)
            .await
            .context("failed to create comment on PR")?;

        let (title, conclusion) = verdict(&results);

        self.upstream
            .update_check_run(
                owner,
                repo,
                check_run_id,
                UpdateCheckRun {
                    status: "completed".to_string(),
                    conclusion: conclusion.to_string(),
                    completed_at: Utc::now().to_rfc3339(),
                    output: CheckRunOutput {
                        title: title.to_string(),
                        summary: status_table,
                        text: error_details,
                    },
                },
            )
            .await
            .context("failed to update check run")?;

        Ok(())
    }
}

/// Overall verdict of a validation run: check run title and conclusion.
///
/// A single internal error downgrades the whole PR to `cancelled`;
/// otherwise any parse error means `failure`.
fn verdict(results: &[AppResult]) -> (&'static str, &'static str) {
    let mut any_errors = false;

    for (_, result) in results {
        if let Err(errs) = result {
            any_errors = true;

            if errs.iter().any(|err| err.is_internal()) {
                return ("Internal Error", "cancelled");
            }
        }
    }

    if any_errors {
        ("Failed", "failure")
    } else {
        ("Passed", "success")
    }
}

/// Render the app status overview table
fn render_status_table(results: &[AppResult], dev_team_name: &str) -> String {
    let mut table = String::from(
        "| App ID | Status | Comment |  \n\
         | ------ | ------ | ------- |  \n",
    );

    for (app_id, result) in results {
        let (status, comment) = match result {
            Ok(_) => ("Good".to_string(), ":+1:".to_string()),
            Err(errs) if errs.iter().any(|err| err.is_internal()) => (
                "Internal error".to_string(),
                format!("{dev_team_name} please triage"),
            ),
            Err(_) => (
                "Formatting error".to_string(),
                "See errors below".to_string(),
            ),
        };

        table.push_str(&format!("| {app_id} | {status} | {comment} |  \n"));
    }

    table
}

/// Render the per-app error details: one section per failing app with a
/// numbered list of what failed, why, and how to fix it
fn render_error_details(results: &[AppResult]) -> String {
    let mut details = String::new();

    for (app_id, result) in results {
        let Err(errs) = result else {
            continue;
        };

        details.push_str(&format!("## App ID {app_id}\n"));

        if errs.iter().any(|err| err.is_internal()) {
            details.push_str(
                "> Something went wrong on our servers when parsing this serverless \
                 application. The development team has been notified and will triage this \
                 issue as soon as they can.  \n",
            );
        }

        for (index, err) in errs.iter().enumerate() {
            details.push_str(&format!("{}. **What failed?** {}  \n", index + 1, err.what));
            details.push_str(&format!("   **Why did it fail?** {}  \n", err.why));

            let fix = if err.is_internal() {
                "the team has been notified"
            } else {
                &err.fix_instructions
            };
            details.push_str(&format!("   **How to fix it:** {fix}  \n"));
        }
    }

    details
}

/// Build the persisted submission record for a validation run
fn build_submission(pr_number: u64, results: &[AppResult]) -> Submission {
    let mut apps: HashMap<String, Option<SubmissionApp>> = HashMap::new();

    for (app_id, result) in results {
        let entry = match result {
            Ok(app) => Some(SubmissionApp {
                app: Some(app.clone()),
                format_correct: true,
            }),
            // Internal failures get a nil entry; the error itself was
            // already logged.
            Err(errs) if errs.iter().any(|err| err.is_internal()) => None,
            Err(_) => Some(SubmissionApp {
                app: None,
                format_correct: false,
            }),
        };

        apps.insert(app_id.clone(), entry);
    }

    Submission { pr_number, apps }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format_failure() -> Vec<ParseError> {
        vec![ParseError::user(
            "`manifest.yaml` file",
            "failed to parse file as YAML: found a tab character where indentation is expected",
            "fix any YAML syntax errors",
        )]
    }

    fn internal_failure() -> Vec<ParseError> {
        vec![ParseError::internal(
            "`manifest.yaml` file",
            "failed to get contents from the GitHub API",
            anyhow::anyhow!("502 bad gateway"),
        )]
    }

    #[test]
    fn verdict_prefers_internal_errors() {
        let results: Vec<AppResult> = vec![
            ("bad".to_string(), Err(format_failure())),
            ("worse".to_string(), Err(internal_failure())),
        ];

        assert_eq!(verdict(&results), ("Internal Error", "cancelled"));
    }

    #[test]
    fn verdict_maps_format_errors_to_failure() {
        let results: Vec<AppResult> = vec![("bad".to_string(), Err(format_failure()))];
        assert_eq!(verdict(&results), ("Failed", "failure"));
    }

    #[test]
    fn verdict_passes_clean_runs() {
        let results: Vec<AppResult> = Vec::new();
        assert_eq!(verdict(&results), ("Passed", "success"));
    }

    #[test]
    fn status_table_lists_each_app() {
        let results: Vec<AppResult> = vec![
            ("bad".to_string(), Err(format_failure())),
            ("worse".to_string(), Err(internal_failure())),
        ];

        let table = render_status_table(&results, "@org/devs");
        assert!(table.contains("| App ID | Status | Comment |"));
        assert!(table.contains("| bad | Formatting error | See errors below |"));
        assert!(table.contains("| worse | Internal error | @org/devs please triage |"));
    }

    #[test]
    fn error_details_name_the_artifact_and_reason() {
        let results: Vec<AppResult> = vec![("bad".to_string(), Err(format_failure()))];

        let details = render_error_details(&results);
        assert!(details.contains("## App ID bad"));
        assert!(details.contains("`manifest.yaml` file"));
        assert!(details.contains("**Why did it fail?** failed to parse file as YAML"));
        assert!(details.contains("**How to fix it:** fix any YAML syntax errors"));
    }

    #[test]
    fn internal_errors_are_phrased_as_notified() {
        let results: Vec<AppResult> = vec![("worse".to_string(), Err(internal_failure()))];

        let details = render_error_details(&results);
        assert!(details.contains("The development team has been notified"));
        assert!(details.contains("**How to fix it:** the team has been notified"));
        // The private cause never reaches the user.
        assert!(!details.contains("502 bad gateway"));
    }

    #[test]
    fn submission_classifies_outcomes() {
        let app = App {
            app_id: "good".to_string(),
            name: "Good".to_string(),
            tagline: "t".to_string(),
            description: "d".to_string(),
            screenshot_urls: Vec::new(),
            logo_url: "https://example.com/logo.png".to_string(),
            tags: Vec::new(),
            categories: Vec::new(),
            verification_status: "pending".to_string(),
            github_url: "https://github.com/o/r/tree/master/good".to_string(),
            homepage_url: None,
            version: "v".to_string(),
            author: "A <a@x>".to_string(),
            maintainer: "B <b@x>".to_string(),
            deployment: Default::default(),
        };

        let results: Vec<AppResult> = vec![
            ("good".to_string(), Ok(app)),
            ("bad".to_string(), Err(format_failure())),
            ("worse".to_string(), Err(internal_failure())),
        ];

        let submission = build_submission(7, &results);
        assert_eq!(submission.pr_number, 7);

        let good = submission.apps["good"].as_ref().unwrap();
        assert!(good.format_correct);
        assert!(good.app.is_some());

        let bad = submission.apps["bad"].as_ref().unwrap();
        assert!(!bad.format_correct);
        assert!(bad.app.is_none());

        assert!(submission.apps["worse"].is_none());
    }
}
