// SPDX-License-Identifier: AGPL-3.0-or-later

//! Serverless application registry API.
//!
//! Ingests deployable applications from a GitHub registry repository,
//! validates pull request submissions against the expected layout, and
//! serves the resulting catalog over a small read-only HTTP API.
//!
//! The pipeline is: webhook -> job runner -> (validate | update) job ->
//! (PR parser + repo parser) -> parameterizer -> validator -> catalog
//! store / pull request feedback.

pub mod config;
pub mod github;
pub mod http;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod parsing;
pub mod store;
pub mod validation;
