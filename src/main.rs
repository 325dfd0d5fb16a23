// SPDX-License-Identifier: AGPL-3.0-or-later

//! Serverless application registry API server
//!
//! Boots the catalog store, the GitHub App client, the job runner and
//! both HTTP servers, then runs until interrupted. A handful of
//! mutually exclusive flags turn the binary into a one-shot tool
//! instead of a server.

use anyhow::{Context, Result};
use clap::Parser;
use registry_api::config::{bind_addr, Config};
use registry_api::github::{GitHubAppConfig, GitHubClient, UpstreamClient};
use registry_api::http::{api_router, metrics_router, webhook, AppState};
use registry_api::jobs::{
    Job, JobRunner, JobType, UpdateAppsJob, UpdateAppsJobDefinition, ValidateJob,
};
use registry_api::metrics::Metrics;
use registry_api::models::App;
use registry_api::store::{CatalogStore, MongoCatalogStore};
use registry_api::validation::validate_app;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Serverless application registry API
#[derive(Parser, Debug)]
#[command(name = "registry-api")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Run one update apps job and exit
    #[arg(long)]
    update_apps: bool,

    /// Notify the bot API after the update apps job finishes. Only
    /// valid together with --update-apps.
    #[arg(long)]
    notify_bot_api: bool,

    /// Seed the database from a directory of JSON files holding one
    /// app each, then exit
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Run a validate job for the pull request with this number, then
    /// exit
    #[arg(long)]
    validate_pr: Option<u64>,

    /// Send the contents of this file to the webhook endpoint with a
    /// correct signature, then exit. Requires --mock-webhook-event.
    #[arg(long)]
    mock_webhook: Option<PathBuf>,

    /// X-Github-Event header value for the mock webhook request
    #[arg(long)]
    mock_webhook_event: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "registry_api=info".into()),
        )
        .init();

    info!("registry-api v{}", env!("CARGO_PKG_VERSION"));

    // Fatal configuration problems are the only place the process is
    // allowed to abort; everything after startup is contained.
    let cfg = Arc::new(Config::from_env().context("failed to load configuration")?);
    debug!("loaded configuration: {}", cfg.log_safe()?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received interrupt, shutting down");
                let _ = shutdown_tx.send(true);
            }
        });
    }

    let catalog: Arc<dyn CatalogStore> = Arc::new(
        MongoCatalogStore::connect(&cfg)
            .await
            .context("failed to connect to database")?,
    );
    catalog
        .ensure_indexes()
        .await
        .context("failed to create database indexes")?;
    info!("connected to database");

    let upstream: Arc<dyn UpstreamClient> = Arc::new(
        GitHubClient::new(GitHubAppConfig::new(
            cfg.gh_integration_id,
            cfg.gh_private_key_path.clone(),
            cfg.gh_installation_id,
        ))
        .context("failed to create GitHub client")?,
    );
    upstream
        .get_repo(&cfg.gh_registry_repo_owner, &cfg.gh_registry_repo_name)
        .await
        .context("failed to get information about the registry repository")?;
    info!("authenticated with GitHub API");

    let metrics = Arc::new(Metrics::new());

    let mut jobs: HashMap<JobType, Box<dyn Job>> = HashMap::new();
    jobs.insert(
        JobType::UpdateApps,
        Box::new(UpdateAppsJob {
            cfg: Arc::clone(&cfg),
            upstream: Arc::clone(&upstream),
            catalog: Arc::clone(&catalog),
            http: reqwest::Client::new(),
        }),
    );
    jobs.insert(
        JobType::Validate,
        Box::new(ValidateJob {
            cfg: Arc::clone(&cfg),
            upstream: Arc::clone(&upstream),
            catalog: Arc::clone(&catalog),
        }),
    );

    let (runner, worker) = JobRunner::start(jobs, Arc::clone(&metrics), shutdown_rx.clone());
    info!("started job runner");

    // One-shot modes complete and exit; no server starts.
    if cli.update_apps {
        info!("running update apps job and then exiting");

        let definition = UpdateAppsJobDefinition {
            no_bot_api_notify: !cli.notify_bot_api,
        };
        let data = serde_json::to_vec(&definition)
            .context("failed to serialize update apps job definition")?;

        runner.submit(JobType::UpdateApps, data).await.wait().await;
        return Ok(());
    }

    if let Some(seed_dir) = &cli.seed {
        info!("seeding database then exiting");
        seed_database(seed_dir, catalog.as_ref()).await?;
        return Ok(());
    }

    if let Some(pr_number) = cli.validate_pr {
        info!("running validate job for PR #{pr_number} then exiting");

        let pr = upstream
            .get_pr(
                &cfg.gh_registry_repo_owner,
                &cfg.gh_registry_repo_name,
                pr_number,
            )
            .await
            .with_context(|| format!("failed to get pull request #{pr_number}"))?;
        let data = serde_json::to_vec(&pr).context("failed to serialize pull request")?;

        runner.submit(JobType::Validate, data).await.wait().await;
        return Ok(());
    }

    if let Some(body_path) = &cli.mock_webhook {
        let event = cli
            .mock_webhook_event
            .as_deref()
            .context("--mock-webhook requires --mock-webhook-event")?;

        mock_webhook(&cfg, body_path, event).await?;
        return Ok(());
    }

    // Populate the catalog on first start; later starts find documents
    // and skip the work.
    {
        let catalog = Arc::clone(&catalog);
        let runner = runner.clone();
        tokio::spawn(async move {
            match catalog.count().await {
                Ok(0) => {
                    info!("no apps found, loading apps into database");
                    runner.submit(JobType::UpdateApps, Vec::new()).await;
                }
                Ok(count) => debug!("no load required, found {count} app(s) in database"),
                Err(err) => error!("failed to count apps in database: {err:#}"),
            }
        });
    }

    let state = AppState {
        cfg: Arc::clone(&cfg),
        catalog,
        metrics: Arc::clone(&metrics),
        runner,
        upstream,
    };

    let api_listener = TcpListener::bind(bind_addr(&cfg.api_addr))
        .await
        .with_context(|| format!("failed to bind API address {}", cfg.api_addr))?;
    let metrics_listener = TcpListener::bind(bind_addr(&cfg.metrics_addr))
        .await
        .with_context(|| format!("failed to bind metrics address {}", cfg.metrics_addr))?;

    info!("started API server on {}", cfg.api_addr);
    info!("started metrics server on {}", cfg.metrics_addr);

    let api_server = {
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            axum::serve(api_listener, api_router(state))
                .with_graceful_shutdown(async move {
                    let _ = shutdown.changed().await;
                })
                .await
        })
    };

    let metrics_server = {
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            axum::serve(metrics_listener, metrics_router(metrics))
                .with_graceful_shutdown(async move {
                    let _ = shutdown.changed().await;
                })
                .await
        })
    };

    // Cooperative shutdown: wait for the worker and both HTTP servers.
    let (api_result, metrics_result, worker_result) =
        tokio::join!(api_server, metrics_server, worker);

    api_result
        .context("API server task failed")?
        .context("failed to serve API")?;
    metrics_result
        .context("metrics server task failed")?
        .context("failed to serve metrics")?;
    worker_result.context("job worker task failed")?;

    info!("done");

    Ok(())
}

/// Import seed data: one JSON encoded app per file, validated before
/// being upserted
async fn seed_database(dir: &Path, catalog: &dyn CatalogStore) -> Result<()> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read seed directory {}", dir.display()))?;

    for entry in entries {
        let entry = entry.context("failed to read seed directory entry")?;
        let path = entry.path();

        if path.is_dir() {
            continue;
        }

        let contents = std::fs::read(&path)
            .with_context(|| format!("failed to open file {}", path.display()))?;
        let app: App = serde_json::from_slice(&contents)
            .with_context(|| format!("failed to decode JSON file {} into app", path.display()))?;

        let failures = validate_app(&app);
        if !failures.is_empty() {
            anyhow::bail!(
                "failed to validate file {}: {:?}",
                path.display(),
                failures
            );
        }

        debug!("seeding app {} into db", app.app_id);

        catalog
            .upsert(&app.app_id, &app)
            .await
            .with_context(|| format!("failed to upsert app with ID {} in db", app.app_id))?;
    }

    Ok(())
}

/// Replay a stored webhook body against the configured external URL
/// with a correct signature
async fn mock_webhook(cfg: &Config, body_path: &Path, event: &str) -> Result<()> {
    info!("making mock request to webhook endpoint then exiting");

    let body = std::fs::read(body_path)
        .with_context(|| format!("failed to read mock webhook body {}", body_path.display()))?;

    let signature = webhook::compute_signature(cfg.gh_webhook_secret.as_bytes(), &body);

    let url = cfg
        .external_url
        .join("apps/webhook")
        .context("failed to build webhook URL")?;

    let response = reqwest::Client::new()
        .post(url)
        .header(webhook::SIGNATURE_HEADER, signature)
        .header(webhook::EVENT_HEADER, event)
        .header("Content-Type", "application/json")
        .body(body)
        .send()
        .await
        .context("failed to make mock webhook request")?;

    let status = response.status();
    let text = response
        .text()
        .await
        .context("failed to read mock webhook response body")?;

    info!("mock response: {status}");
    info!("{text}");

    Ok(())
}
