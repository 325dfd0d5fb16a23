// SPDX-License-Identifier: AGPL-3.0-or-later

//! Registry repository parsing
//!
//! Turns app directories in the registry repository into [`crate::models::App`]
//! values and pull requests into sets of affected app IDs. All failures
//! are reported as [`ParseError`] values meant to be shown to the user.

use std::fmt;

mod deploy;
mod pr;
mod repo;

pub use deploy::{build_deployment, split_documents};
pub use pr::PrParser;
pub use repo::RepoParser;

/// Details about a failure to parse an object. ParseErrors are meant to
/// be presented to users; all string fields are interpreted as Markdown.
#[derive(Debug)]
pub struct ParseError {
    /// The object that failed to be parsed. Does not have to provide
    /// context about what is being parsed, just which part of the
    /// parsing process failed.
    pub what: String,

    /// Why the object failed to be parsed
    pub why: String,

    /// Instructions for the user to remedy this error. Empty if there
    /// is nothing the user can do, ex. an internal server error.
    pub fix_instructions: String,

    /// Non user presentable cause, logged for debugging. Present iff
    /// the server failed in some way and the dev team must triage.
    pub internal_error: Option<anyhow::Error>,
}

impl ParseError {
    /// A user-caused formatting error with remediation instructions
    pub fn user(
        what: impl Into<String>,
        why: impl Into<String>,
        fix_instructions: impl Into<String>,
    ) -> Self {
        Self {
            what: what.into(),
            why: why.into(),
            fix_instructions: fix_instructions.into(),
            internal_error: None,
        }
    }

    /// A server-caused error the dev team must triage
    pub fn internal(
        what: impl Into<String>,
        why: impl Into<String>,
        internal_error: anyhow::Error,
    ) -> Self {
        Self {
            what: what.into(),
            why: why.into(),
            fix_instructions: String::new(),
            internal_error: Some(internal_error),
        }
    }

    /// Whether this error was caused by the server rather than the
    /// user's input
    pub fn is_internal(&self) -> bool {
        self.internal_error.is_some()
    }

    /// Error string meant to be displayed to the user
    pub fn user_error(&self) -> String {
        format!(
            "failed to parse {}: {}: {}",
            self.what, self.why, self.fix_instructions
        )
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.internal_error {
            Some(internal) => write!(f, "{} ({internal:#})", self.user_error()),
            None => write!(f, "{}", self.user_error()),
        }
    }
}

impl std::error::Error for ParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_error_omits_internal_cause() {
        let err = ParseError::internal(
            "`manifest.yaml` file",
            "internal server error occurred",
            anyhow::anyhow!("store unavailable"),
        );

        assert!(err.is_internal());
        assert!(!err.user_error().contains("store unavailable"));
        assert!(err.to_string().contains("store unavailable"));
    }

    #[test]
    fn user_error_formats_all_parts() {
        let err = ParseError::user("`logo.png` file", "a value must be provided", "set a value");

        assert_eq!(
            err.user_error(),
            "failed to parse `logo.png` file: a value must be provided: set a value"
        );
        assert!(!err.is_internal());
    }
}
