// SPDX-License-Identifier: AGPL-3.0-or-later

//! Declarative App field validation
//!
//! Runs a fixed rule table over an [`App`] and reports every failed
//! `(field, rule)` pair. The repo parser translates these pairs into
//! user presentable parse errors; rules it has no translation for are
//! treated as internal faults.

use crate::models::{verification_status, App};
use regex::Regex;
use std::sync::OnceLock;
use url::Url;

/// Closed set of categories an app may declare
pub const CATEGORIES: [&str; 8] = [
    "analytics",
    "automation",
    "entertainment",
    "hello world",
    "internet of things",
    "utilities",
    "virtual assistant",
    "other",
];

/// A single failed validation rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFailure {
    /// Field the rule ran against
    pub field: &'static str,

    /// Name of the rule that failed
    pub rule: &'static str,
}

/// Matches contact information in the format `NAME <EMAIL>`.
///
/// Groups: 1. NAME, 2. EMAIL (angle brackets included)
fn contact_info_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("^(.+) (<.+@.+>)$").expect("contact info regex must compile"))
}

/// `required` rule for strings: non-empty
fn required(value: &str) -> bool {
    !value.is_empty()
}

/// `url` rule: absolute URL with a scheme
fn is_url(value: &str) -> bool {
    Url::parse(value)
        .map(|url| !url.scheme().is_empty())
        .unwrap_or(false)
}

/// `email` rule: local part and domain around a single `@`
fn is_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty(),
        None => false,
    }
}

/// `contact_info` rule: `NAME <EMAIL>` with a plausible email
fn is_contact_info(value: &str) -> bool {
    let Some(captures) = contact_info_regex().captures(value) else {
        return false;
    };

    let email = captures
        .get(2)
        .map(|m| m.as_str().trim_start_matches('<').trim_end_matches('>'))
        .unwrap_or_default();

    is_email(email)
}

/// `lowercase` rule for string sequences: every element equals its
/// lowercased form
fn all_lowercase(values: &[String]) -> bool {
    values.iter().all(|value| *value == value.to_lowercase())
}

/// `categories` rule: every element is a member of the closed set
fn categories_allowed(values: &[String]) -> bool {
    values
        .iter()
        .all(|value| CATEGORIES.contains(&value.as_str()))
}

/// `verification_status_t` rule: one of the accepted status values
fn is_verification_status(value: &str) -> bool {
    verification_status::ALL.contains(&value)
}

/// Validate an app against the full rule table.
///
/// Returns every failed rule; an empty result means the app is valid.
/// Rules for a field are ordered so that an empty value only reports
/// `required` rather than every downstream rule.
pub fn validate_app(app: &App) -> Vec<RuleFailure> {
    let mut failures = Vec::new();
    let mut fail = |field: &'static str, rule: &'static str| {
        failures.push(RuleFailure { field, rule });
    };

    if !required(&app.app_id) {
        fail("app_id", "required");
    }

    if !required(&app.name) {
        fail("name", "required");
    }

    if !required(&app.tagline) {
        fail("tagline", "required");
    }

    if !required(&app.description) {
        fail("description", "required");
    }

    if app.tags.is_empty() {
        fail("tags", "required");
    } else if !all_lowercase(&app.tags) {
        fail("tags", "lowercase");
    }

    if app.categories.is_empty() {
        fail("categories", "required");
    } else if !all_lowercase(&app.categories) {
        fail("categories", "lowercase");
    } else if !categories_allowed(&app.categories) {
        fail("categories", "categories");
    }

    if !required(&app.author) {
        fail("author", "required");
    } else if !is_contact_info(&app.author) {
        fail("author", "contact_info");
    }

    if !required(&app.maintainer) {
        fail("maintainer", "required");
    } else if !is_contact_info(&app.maintainer) {
        fail("maintainer", "contact_info");
    }

    if !required(&app.logo_url) {
        fail("logo_url", "required");
    } else if !is_url(&app.logo_url) {
        fail("logo_url", "url");
    }

    if !app.screenshot_urls.iter().all(|url| is_url(url)) {
        fail("screenshot_urls", "url");
    }

    if let Some(homepage_url) = &app.homepage_url {
        if !is_url(homepage_url) {
            fail("homepage_url", "url");
        }
    }

    if !required(&app.github_url) {
        fail("github_url", "required");
    } else if !is_url(&app.github_url) {
        fail("github_url", "url");
    }

    if !is_verification_status(&app.verification_status) {
        fail("verification_status", "verification_status_t");
    }

    if !required(&app.version) {
        fail("version", "required");
    }

    if app.deployment.resources.is_empty() {
        fail("deployment", "required");
    }

    failures
}
