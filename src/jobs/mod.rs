// SPDX-License-Identifier: AGPL-3.0-or-later

//! Job runner
//!
//! A typed single-worker queue. Long-running upstream work is funneled
//! through one worker task so only one parser/writer pipeline runs at a
//! time; submitters get a completion signal they may (but usually must
//! not) wait on.

use crate::metrics::Metrics;
use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error};

mod update;
mod validate;

pub use update::{UpdateAppsJob, UpdateAppsJobDefinition};
pub use validate::ValidateJob;

/// Types of jobs which can be run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobType {
    /// Full catalog reconciliation against the registry repository
    UpdateApps,
    /// Pull request validation with upstream feedback
    Validate,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::UpdateApps => "update_apps",
            JobType::Validate => "validate",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A piece of logic the runner can execute
#[async_trait]
pub trait Job: Send + Sync {
    /// Do the job's actions
    async fn run(&self, data: &[u8]) -> Result<()>;
}

/// Handle returned by [`JobRunner::submit`]
pub struct JobHandle {
    complete: oneshot::Receiver<()>,
}

impl JobHandle {
    /// Wait until the job has been completed. Completion does not
    /// guarantee the job finished successfully.
    ///
    /// HTTP handlers must not wait on this; only CLI one-shots do.
    pub async fn wait(self) {
        let _ = self.complete.await;
    }
}

struct JobStartRequest {
    job_type: JobType,
    data: Vec<u8>,
    complete_tx: oneshot::Sender<()>,
}

/// Submits jobs to the single worker task
#[derive(Clone)]
pub struct JobRunner {
    queue: mpsc::Sender<JobStartRequest>,
    metrics: Arc<Metrics>,
}

impl JobRunner {
    /// Start the worker task and return the runner plus the worker's
    /// join handle.
    ///
    /// The queue is bounded at one request, so `submit` blocks while
    /// the worker is busy and another request is already waiting; a
    /// soft backpressure signal for webhook bursts.
    pub fn start(
        jobs: HashMap<JobType, Box<dyn Job>>,
        metrics: Arc<Metrics>,
        mut shutdown: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>) {
        let (queue, mut requests) = mpsc::channel::<JobStartRequest>(1);

        let worker_metrics = Arc::clone(&metrics);
        let worker = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    request = requests.recv() => match request {
                        Some(request) => run_one(&jobs, &worker_metrics, request).await,
                        None => break,
                    },
                }
            }

            debug!("job worker stopped");
        });

        (Self { queue, metrics }, worker)
    }

    /// Submit a new job.
    ///
    /// Blocks until the worker accepts the request when the queue is
    /// full. Jobs execute in submission order.
    pub async fn submit(&self, job_type: JobType, data: Vec<u8>) -> JobHandle {
        self.metrics.record_job_submitted(job_type.as_str());

        let (complete_tx, complete) = oneshot::channel();
        self.queue
            .send(JobStartRequest {
                job_type,
                data,
                complete_tx,
            })
            .await
            .expect("job queue closed while the server is running");

        JobHandle { complete }
    }
}

async fn run_one(
    jobs: &HashMap<JobType, Box<dyn Job>>,
    metrics: &Metrics,
    request: JobStartRequest,
) {
    // A missing job type is a programming error: the instance map is
    // immutable after initialization and covers every JobType.
    let job = jobs
        .get(&request.job_type)
        .unwrap_or_else(|| panic!("cannot handle job type: {}", request.job_type));

    let started = Instant::now();

    // One bad job must not kill the queue; a panicking run is contained
    // and logged like any other failure.
    let outcome = AssertUnwindSafe(job.run(&request.data)).catch_unwind().await;

    let successful = match outcome {
        Ok(Ok(())) => {
            debug!("ran {} job", request.job_type);
            true
        }
        Ok(Err(err)) => {
            error!("failed to run {} job: {err:#}", request.job_type);
            false
        }
        Err(_) => {
            error!("{} job panicked", request.job_type);
            false
        }
    };

    // Closing the completion signal is the terminal transition, made
    // regardless of success.
    let _ = request.complete_tx.send(());

    metrics.record_job_run(request.job_type.as_str(), successful, started.elapsed());
}
