//! Job Lifecycle & Worker Loop (spec C6): polls the [`Repository`] for
//! `pending` Jobs, claims a batch atomically, and runs each claimed Job on
//! an independent task against a [`WorkflowExecutor`].

use std::sync::Arc;

use apiflow_config::EngineConfig;
use apiflow_core::{Job, JobStatus};
use apiflow_storage::Repository;
use apiflow_workflow::WorkflowExecutor;
use tokio_util::sync::CancellationToken;

/// Owns the poll loop. One [`Worker`] per process; `config` bounds both the
/// poll cadence and the batch size.
pub struct Worker {
    repo: Arc<dyn Repository>,
    config: EngineConfig,
}

impl Worker {
    #[must_use]
    pub fn new(repo: Arc<dyn Repository>, config: EngineConfig) -> Self {
        Self { repo, config }
    }

    /// Runs the poll loop until `shutdown` fires. A tick that claims zero
    /// Jobs is a no-op; a tick that claims some awaits every claimed Job's
    /// task before the next tick.
    pub async fn run(&self, shutdown: CancellationToken) {
        let executor = Arc::new(WorkflowExecutor::new(Arc::clone(&self.repo), &self.config));
        let mut interval = tokio::time::interval(self.config.worker_poll_interval());

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.poll_once(&executor).await;
                }
                () = shutdown.cancelled() => {
                    tracing::info!("worker loop shutting down gracefully");
                    return;
                }
            }
        }
    }

    /// Claims up to `worker_batch_size` pending Jobs and runs each to
    /// completion on its own task, returning once every sibling has
    /// settled.
    async fn poll_once(&self, executor: &Arc<WorkflowExecutor>) {
        let claimed = self.repo.claim_pending_jobs(self.config.worker_batch_size).await;
        if claimed.is_empty() {
            return;
        }
        tracing::debug!(count = claimed.len(), "claimed pending jobs");

        let handles: Vec<_> = claimed
            .into_iter()
            .map(|job| {
                let repo = Arc::clone(&self.repo);
                let executor = Arc::clone(executor);
                tokio::spawn(async move { run_one(&repo, &executor, job).await })
            })
            .collect();

        for handle in handles {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "job task panicked");
            }
        }
    }
}

async fn run_one(repo: &Arc<dyn Repository>, executor: &WorkflowExecutor, job: Job) {
    match repo.get_workflow(job.workflow_id).await {
        Ok(workflow) => {
            executor.run(job, &workflow).await;
        }
        Err(err) => {
            tracing::error!(job_id = %job.id, error = %err, "failed to load workflow for claimed job");
            let mut job = job;
            job.error = Some(err.to_string());
            let _ = job.transition(JobStatus::Failed);
            repo.save_job(&job).await;
        }
    }
}
