// SPDX-License-Identifier: AGPL-3.0-or-later

//! Registry repository parser
//!
//! Walks app directories at a Git reference and materializes them into
//! [`App`] values, mapping every failure into user presentable
//! [`ParseError`]s.

use crate::github::{EntryType, UpstreamClient};
use crate::models::{verification_status, App, AppDeployment, AppManifest};
use crate::parsing::{build_deployment, ParseError};
use crate::validation::{validate_app, RuleFailure};
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;

/// Entries allowed at the top level of an app directory
const ALLOWED_ENTRIES: [&str; 5] = [
    "manifest.yaml",
    "README.md",
    "logo.png",
    "deployment",
    "screenshots",
];

/// Reads the registry repository for serverless application information
pub struct RepoParser {
    /// Upstream hosting provider client
    pub upstream: Arc<dyn UpstreamClient>,

    /// Owner of the registry repository
    pub repo_owner: String,

    /// Name of the registry repository
    pub repo_name: String,

    /// Git reference to parse data at
    pub repo_ref: String,
}

impl RepoParser {
    /// Returns the IDs of all the serverless applications in the
    /// repository: the names of its top level directories. Top level
    /// files are ignored.
    pub async fn get_app_ids(&self) -> Result<Vec<String>> {
        let contents = self
            .upstream
            .list_dir(&self.repo_owner, &self.repo_name, "", &self.repo_ref)
            .await
            .context("error listing top level repository contents")?;

        Ok(contents
            .into_iter()
            .filter(|entry| entry.entry_type == EntryType::Dir)
            .map(|entry| entry.name)
            .collect())
    }

    /// Returns the download URLs for the files in a directory,
    /// skipping subdirectories
    async fn get_download_urls(&self, path: &str) -> Result<Vec<String>> {
        let contents = self
            .upstream
            .list_dir(&self.repo_owner, &self.repo_name, path, &self.repo_ref)
            .await
            .context("error listing directory contents")?;

        Ok(contents
            .into_iter()
            .filter(|entry| entry.entry_type != EntryType::Dir)
            .filter_map(|entry| entry.download_url)
            .collect())
    }

    /// Retrieves the contents of a file as text
    async fn get_file_text(&self, path: &str) -> Result<String> {
        let bytes = self
            .upstream
            .get_file(&self.repo_owner, &self.repo_name, path, &self.repo_ref)
            .await
            .context("failed to get file content")?;

        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Marshals an app from the repository.
    ///
    /// Parsing continues past individual failures so the user sees
    /// every problem at once; validation only runs when the parse
    /// phase produced no errors.
    pub async fn get_app(&self, id: &str) -> Result<App, Vec<ParseError>> {
        let dir_contents = match self
            .upstream
            .list_dir(&self.repo_owner, &self.repo_name, id, &self.repo_ref)
            .await
        {
            Ok(contents) => contents,
            Err(err) => {
                return Err(vec![ParseError::internal(
                    "all files in the app directory",
                    "the GitHub API returned an error response",
                    err,
                )]);
            }
        };

        if dir_contents.is_empty() {
            return Err(vec![ParseError::user(
                "all files in the app directory",
                "no files were found",
                "add required files",
            )]);
        }

        let mut errs = Vec::new();

        let git_url_ref = if self.repo_ref.is_empty() {
            "master"
        } else {
            &self.repo_ref
        };

        let mut app = App {
            app_id: id.to_string(),
            name: String::new(),
            tagline: String::new(),
            description: String::new(),
            screenshot_urls: Vec::new(),
            logo_url: String::new(),
            tags: Vec::new(),
            categories: Vec::new(),
            verification_status: verification_status::PENDING.to_string(),
            github_url: format!(
                "https://github.com/{}/{}/tree/{}/{}",
                self.repo_owner, self.repo_name, git_url_ref, id
            ),
            homepage_url: None,
            version: String::new(),
            author: String::new(),
            maintainer: String::new(),
            deployment: AppDeployment::default(),
        };

        for entry in &dir_contents {
            let what_file = format!("`{}` file", entry.name);

            if !ALLOWED_ENTRIES.contains(&entry.name.as_str()) {
                errs.push(ParseError::user(
                    what_file,
                    "not allowed in an app directory",
                    "delete this file",
                ));
                continue;
            }

            match entry.entry_type {
                EntryType::File => match entry.name.as_str() {
                    "manifest.yaml" => {
                        let text = match self.get_file_text(&format!("{id}/{}", entry.name)).await
                        {
                            Ok(text) => text,
                            Err(err) => {
                                errs.push(ParseError::internal(
                                    what_file,
                                    "failed to get contents from the GitHub API",
                                    err,
                                ));
                                continue;
                            }
                        };

                        let manifest: AppManifest = match serde_yaml::from_str(&text) {
                            Ok(manifest) => manifest,
                            Err(err) => {
                                errs.push(ParseError::user(
                                    what_file,
                                    format!("failed to parse file as YAML: {err}"),
                                    "fix any YAML syntax errors",
                                ));
                                continue;
                            }
                        };

                        // The stored form of tags and categories is
                        // lowercase; the validator still enforces this
                        // for apps that arrive by other paths.
                        app.tags = manifest.tags.iter().map(|t| t.to_lowercase()).collect();
                        app.categories = manifest
                            .categories
                            .iter()
                            .map(|c| c.to_lowercase())
                            .collect();

                        app.name = manifest.name;
                        app.tagline = manifest.tagline;
                        app.author = manifest.author;
                        app.maintainer = manifest.maintainer;
                        app.homepage_url = manifest.homepage_url;
                    }
                    "README.md" => {
                        match self.get_file_text(&format!("{id}/{}", entry.name)).await {
                            Ok(text) => app.description = text,
                            Err(err) => {
                                errs.push(ParseError::internal(
                                    what_file,
                                    "failed to get file content, the GitHub API returned an \
                                     error response",
                                    err,
                                ));
                            }
                        }
                    }
                    "logo.png" => match &entry.download_url {
                        Some(url) => app.logo_url = url.clone(),
                        None => {
                            errs.push(ParseError::internal(
                                what_file,
                                "internal server error occurred",
                                anyhow!("directory listing entry had no download URL"),
                            ));
                        }
                    },
                    _ => {}
                },
                EntryType::Dir | EntryType::Other => {
                    let what_dir = format!("`{}` directory", entry.name);

                    match entry.name.as_str() {
                        "screenshots" => {
                            match self.get_download_urls(&format!("{id}/screenshots")).await {
                                Ok(urls) => app.screenshot_urls = urls,
                                Err(err) => {
                                    errs.push(ParseError::internal(
                                        what_dir,
                                        "failed to list files in the directory using the \
                                         GitHub API, an error response was returned",
                                        err,
                                    ));
                                }
                            }
                        }
                        "deployment" => {
                            let deploy_contents = match self
                                .upstream
                                .list_dir(
                                    &self.repo_owner,
                                    &self.repo_name,
                                    &format!("{id}/deployment"),
                                    &self.repo_ref,
                                )
                                .await
                            {
                                Ok(contents) => contents,
                                Err(err) => {
                                    errs.push(ParseError::internal(
                                        what_dir,
                                        "failed to list files in the directory using the \
                                         GitHub API, an error response was returned",
                                        err,
                                    ));
                                    continue;
                                }
                            };

                            let mut file_texts = Vec::new();
                            for deploy_entry in deploy_contents {
                                if deploy_entry.entry_type == EntryType::Dir {
                                    continue;
                                }

                                let path = format!("{id}/deployment/{}", deploy_entry.name);
                                match self.get_file_text(&path).await {
                                    Ok(text) => file_texts.push(text),
                                    Err(err) => {
                                        errs.push(ParseError::internal(
                                            format!("`{path}` file"),
                                            "failed to get content of file using the GitHub \
                                             API, an error response was returned",
                                            err,
                                        ));
                                    }
                                }
                            }

                            let (deployment, deploy_errs) =
                                build_deployment(&what_dir, &file_texts);
                            app.deployment = deployment;
                            errs.extend(deploy_errs);
                        }
                        _ => {}
                    }
                }
            }
        }

        match app.compute_version() {
            Ok(version) => app.version = version,
            Err(err) => {
                errs.push(ParseError::internal(
                    "the process which computes the app's `version` field",
                    "internal server error occurred",
                    err,
                ));
                return Err(errs);
            }
        }

        // Don't validate if there were errors parsing the content;
        // validation errors would be redundant.
        if !errs.is_empty() {
            return Err(errs);
        }

        let failures = validate_app(&app);
        if !failures.is_empty() {
            return Err(map_validation_failures(&failures));
        }

        Ok(app)
    }
}

/// Describes App fields in a context the user understands. Fields not
/// in this table are computed by the parser rather than provided by the
/// user.
fn what_for_field(field: &str) -> Option<&'static str> {
    Some(match field {
        "name" => "`name` field in the `manifest.yaml` file",
        "tagline" => "`tagline` field in the `manifest.yaml` file",
        "tags" => "`tags` array in the `manifest.yaml` file",
        "categories" => "`categories` array in the `manifest.yaml` file",
        "author" => "`author` field in the `manifest.yaml` file",
        "maintainer" => "`maintainer` field in the `manifest.yaml` file",
        "homepage_url" => "`homepage_url` field in the `manifest.yaml` file",
        "description" => "`README.md` file",
        "screenshot_urls" => "`screenshots` directory",
        "logo_url" => "`logo.png` file",
        "deployment" => "`deployment` directory",
        _ => return None,
    })
}

/// User readable reasons for validation rules that fail on user input.
/// A rule not in this table should never fail on user provided data;
/// when it does the server is at fault.
fn why_for_rule(rule: &str) -> Option<(&'static str, &'static str)> {
    Some(match rule {
        "required" => ("a value must be provided", "set a value"),
        "contact_info" => (
            "must be in format: `NAME <EMAIL>`",
            "ensure value matches specified format",
        ),
        _ => return None,
    })
}

/// Translate validation rule failures into user presentable parse
/// errors via the fixed field and rule tables
fn map_validation_failures(failures: &[RuleFailure]) -> Vec<ParseError> {
    let mut errs = Vec::new();

    for failure in failures {
        match what_for_field(failure.field) {
            Some(what) => match why_for_rule(failure.rule) {
                Some((why, fix)) => errs.push(ParseError::user(what, why, fix)),
                None => errs.push(ParseError::internal(
                    what,
                    "internal server error occurred",
                    anyhow!("the \"{}\" validation tag failed", failure.rule),
                )),
            },
            None => errs.push(ParseError::internal(
                format!("the `{}` internal meta field", failure.field),
                "internal server error occurred",
                anyhow!(
                    "the \"{}\" field failed the \"{}\" validation tag",
                    failure.field,
                    failure.rule
                ),
            )),
        }
    }

    errs
}
