// SPDX-License-Identifier: AGPL-3.0-or-later

//! Catalog store
//!
//! Defines the [`CatalogStore`] capability trait the jobs and read
//! endpoints are written against, plus the MongoDB implementation. A
//! single wildcard text index spanning every string field backs the
//! relevance-ordered search.

use crate::config::Config;
use crate::models::{App, Submission};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Document};
use mongodb::options::{ClientOptions, Credential, FindOptions, ServerAddress, UpdateOptions};
use mongodb::{Client, Collection, IndexModel};
use tracing::debug;

/// Capability interface over the document store backing the catalog
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Create the indexes the store relies on. Must be idempotent.
    async fn ensure_indexes(&self) -> Result<()>;

    /// Insert or replace the app stored under `app_id`
    async fn upsert(&self, app_id: &str, app: &App) -> Result<()>;

    /// Delete every app whose ID is not in `ids`, returning the number
    /// of deleted documents
    async fn delete_where_id_not_in(&self, ids: &[String]) -> Result<u64>;

    /// Look up a single app by ID
    async fn find_by_id(&self, app_id: &str) -> Result<Option<App>>;

    /// Search apps. A non-empty query orders results by text index
    /// relevance; tag and category filters intersect via array
    /// membership.
    async fn search(
        &self,
        query: Option<&str>,
        tags: &[String],
        categories: &[String],
    ) -> Result<Vec<App>>;

    /// Distinct tag values, optionally restricted to apps matching the
    /// comma-separated query terms
    async fn distinct_tags(&self, query: Option<&str>) -> Result<Vec<String>>;

    /// Distinct category values, optionally restricted to apps
    /// matching the comma-separated query terms
    async fn distinct_categories(&self, query: Option<&str>) -> Result<Vec<String>>;

    /// Number of apps in the catalog
    async fn count(&self) -> Result<u64>;

    /// Insert or replace the submission stored under its PR number
    async fn upsert_submission(&self, submission: &Submission) -> Result<()>;
}

/// Build the filter document for [`CatalogStore::search`]
fn search_filter(query: Option<&str>, tags: &[String], categories: &[String]) -> Document {
    let mut filter = Document::new();

    if let Some(query) = query {
        if !query.is_empty() {
            filter.insert("$text", doc! {"$search": query});
        }
    }

    if !tags.is_empty() {
        filter.insert("tags", doc! {"$in": tags.to_vec()});
    }

    if !categories.is_empty() {
        filter.insert("categories", doc! {"$in": categories.to_vec()});
    }

    filter
}

/// Build the filter document for the distinct value lookups: the
/// comma-separated query terms select apps by membership in `field`
fn distinct_filter(field: &str, query: Option<&str>) -> Document {
    match query {
        Some(query) if !query.is_empty() => {
            let terms: Vec<String> = query.split(',').map(|term| term.to_string()).collect();
            doc! {field: {"$in": terms}}
        }
        _ => Document::new(),
    }
}

/// MongoDB backed catalog store
pub struct MongoCatalogStore {
    apps: Collection<App>,
    submissions: Collection<Submission>,
}

impl MongoCatalogStore {
    /// Connect to the document store and verify the connection with a
    /// ping
    pub async fn connect(cfg: &Config) -> Result<Self> {
        let options = ClientOptions::builder()
            .hosts(vec![ServerAddress::Tcp {
                host: cfg.db_host.clone(),
                port: Some(cfg.db_port),
            }])
            .credential(
                Credential::builder()
                    .username(cfg.db_user.clone())
                    .password(cfg.db_password.clone())
                    .build(),
            )
            .build();

        let client = Client::with_options(options).context("failed to create database client")?;
        let database = client.database(&cfg.db_name);

        database
            .run_command(doc! {"ping": 1}, None)
            .await
            .context("failed to test database connection")?;

        debug!("connected to database {}", cfg.db_name);

        Ok(Self {
            apps: database.collection("apps"),
            submissions: database.collection("submissions"),
        })
    }
}

#[async_trait]
impl CatalogStore for MongoCatalogStore {
    async fn ensure_indexes(&self) -> Result<()> {
        // Wildcard text index across every string and string-sequence
        // field; creating an existing index is a no-op.
        self.apps
            .create_index(
                IndexModel::builder().keys(doc! {"$**": "text"}).build(),
                None,
            )
            .await
            .context("failed to create text index")?;

        Ok(())
    }

    async fn upsert(&self, app_id: &str, app: &App) -> Result<()> {
        let document =
            bson::to_document(app).context("failed to serialize app for the database")?;

        self.apps
            .update_one(
                doc! {"app_id": app_id},
                doc! {"$set": document},
                UpdateOptions::builder().upsert(true).build(),
            )
            .await
            .with_context(|| format!("failed to upsert app with ID {app_id}"))?;

        Ok(())
    }

    async fn delete_where_id_not_in(&self, ids: &[String]) -> Result<u64> {
        let result = self
            .apps
            .delete_many(doc! {"app_id": {"$nin": ids.to_vec()}}, None)
            .await
            .context("failed to prune old apps")?;

        Ok(result.deleted_count)
    }

    async fn find_by_id(&self, app_id: &str) -> Result<Option<App>> {
        self.apps
            .find_one(doc! {"app_id": app_id}, None)
            .await
            .with_context(|| format!("failed to query for app with ID {app_id}"))
    }

    async fn search(
        &self,
        query: Option<&str>,
        tags: &[String],
        categories: &[String],
    ) -> Result<Vec<App>> {
        let filter = search_filter(query, tags, categories);

        let options = if filter.contains_key("$text") {
            Some(
                FindOptions::builder()
                    .sort(doc! {"score": {"$meta": "textScore"}})
                    .projection(doc! {"score": {"$meta": "textScore"}})
                    .build(),
            )
        } else {
            None
        };

        let cursor = self
            .apps
            .find(filter, options)
            .await
            .context("failed to search apps")?;

        cursor
            .try_collect()
            .await
            .context("failed to read app search results")
    }

    async fn distinct_tags(&self, query: Option<&str>) -> Result<Vec<String>> {
        let values = self
            .apps
            .distinct("tags", distinct_filter("tags", query), None)
            .await
            .context("failed to query distinct tags")?;

        let mut tags: Vec<String> = values
            .iter()
            .filter_map(|value| value.as_str().map(str::to_string))
            .collect();
        tags.sort();

        Ok(tags)
    }

    async fn distinct_categories(&self, query: Option<&str>) -> Result<Vec<String>> {
        let values = self
            .apps
            .distinct("categories", distinct_filter("categories", query), None)
            .await
            .context("failed to query distinct categories")?;

        let mut categories: Vec<String> = values
            .iter()
            .filter_map(|value| value.as_str().map(str::to_string))
            .collect();
        categories.sort();

        Ok(categories)
    }

    async fn count(&self) -> Result<u64> {
        self.apps
            .count_documents(None, None)
            .await
            .context("failed to count apps")
    }

    async fn upsert_submission(&self, submission: &Submission) -> Result<()> {
        let document = bson::to_document(submission)
            .context("failed to serialize submission for the database")?;

        self.submissions
            .update_one(
                doc! {"pr_number": submission.pr_number as i64},
                doc! {"$set": document},
                UpdateOptions::builder().upsert(true).build(),
            )
            .await
            .with_context(|| {
                format!("failed to upsert submission for PR #{}", submission.pr_number)
            })?;

        Ok(())
    }
}
