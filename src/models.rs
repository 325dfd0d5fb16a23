// SPDX-License-Identifier: AGPL-3.0-or-later

//! Catalog data model
//!
//! The [`App`] struct is the catalog entity persisted in the store and
//! served by the read API. Its `version` field is a pure function of the
//! app's content: the hex SHA-256 of the canonical JSON serialization of
//! the app with `version` set to the empty string.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Verification process stages an app can be in
pub mod verification_status {
    pub const PENDING: &str = "pending";
    pub const VERIFYING: &str = "verifying";
    pub const GOOD: &str = "good";
    pub const BAD: &str = "bad";

    /// All accepted verification status values
    pub const ALL: [&str; 4] = [PENDING, VERIFYING, GOOD, BAD];
}

/// A serverless application from the registry repository
///
/// Field order is significant: the canonical JSON form used for the
/// `version` hash serializes fields in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    /// Human and computer readable identifier, equal to the app's
    /// directory name in the registry repository
    pub app_id: String,

    /// Name to display to users
    pub name: String,

    /// Short description of the app
    pub tagline: String,

    /// Detailed markdown formatted information about the app
    pub description: String,

    /// Links to app screenshots
    #[serde(default)]
    pub screenshot_urls: Vec<String>,

    /// Link to the app logo
    pub logo_url: String,

    /// Lowercase tags
    #[serde(default)]
    pub tags: Vec<String>,

    /// Lowercase categories, drawn from the closed category set
    #[serde(default)]
    pub categories: Vec<String>,

    /// Stage of the verification process the app is currently in, one
    /// of the `verification_status` values
    pub verification_status: String,

    /// Link to the app's directory in the registry repository
    pub github_url: String,

    /// Optional link to the app's own website
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage_url: Option<String>,

    /// Hex SHA-256 of the canonical JSON serialization of this app with
    /// the `version` field emptied
    pub version: String,

    /// Person who created the app, in `NAME <EMAIL>` form
    pub author: String,

    /// Person who supports the app, in `NAME <EMAIL>` form
    pub maintainer: String,

    /// Deployment resources and the deploy script derived from them
    #[serde(default)]
    pub deployment: AppDeployment,
}

impl App {
    /// Compute the content version of this app.
    ///
    /// The hash covers every field except `version` itself, so any
    /// change to the app's content produces a new version while
    /// re-parsing identical content reproduces the same one.
    pub fn compute_version(&self) -> anyhow::Result<String> {
        let mut zeroed = self.clone();
        zeroed.version = String::new();

        let canonical = serde_json::to_vec(&zeroed)?;
        Ok(hex::encode(Sha256::digest(&canonical)))
    }
}

/// Deployment data for an app
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppDeployment {
    /// One JSON document per Kubernetes-style resource, in the order
    /// they appear in the app's `deployment` directory
    pub resources: Vec<String>,

    /// The same resources with user-variable Secret and ConfigMap data
    /// values replaced by substitution tokens, index aligned with
    /// `resources`
    pub parameterized_resources: Vec<String>,

    /// One parameter per substituted data key
    pub parameters: Vec<AppDeployParameter>,

    /// Self-contained shell script which prompts for each parameter and
    /// applies the parameterized resources
    pub deploy_script: String,
}

/// A single user-settable deployment value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppDeployParameter {
    /// Token shared by the deploy script and exactly one parameterized
    /// resource
    pub substitution: String,

    /// Human readable name referencing the resource kind, resource name
    /// and data key
    pub display_name: String,

    /// Original value: base64-decoded for Secrets, plaintext for
    /// ConfigMaps
    pub default_value: String,

    /// True iff the value came from a Secret and must be base64 encoded
    /// before substitution
    pub requires_base64: bool,
}

/// Format of an app's `manifest.yaml` file in the registry repository
///
/// This metadata is merged into the [`App`] model by the repo parser.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppManifest {
    /// Name to display to users
    #[serde(default)]
    pub name: String,

    /// Short description of the app
    #[serde(default)]
    pub tagline: String,

    /// List of tags, lowercased on parse
    #[serde(default)]
    pub tags: Vec<String>,

    /// List of categories, lowercased on parse
    #[serde(default)]
    pub categories: Vec<String>,

    /// Person who created the app
    #[serde(default)]
    pub author: String,

    /// Person who supports the app
    #[serde(default)]
    pub maintainer: String,

    /// Optional link to the app's own website
    #[serde(default)]
    pub homepage_url: Option<String>,
}

/// Persisted evaluation of a pull request against the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    /// User facing pull request number
    pub pr_number: u64,

    /// Applications affected by the pull request, keyed by app ID.
    /// A `None` value records that an internal error occurred while
    /// parsing the app; the error itself is only logged.
    pub apps: HashMap<String, Option<SubmissionApp>>,
}

/// One app's evaluation inside a [`Submission`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionApp {
    /// The parsed app, `None` when `format_correct` is false
    pub app: Option<App>,

    /// Whether the app's submission files were formatted correctly
    pub format_correct: bool,
}
