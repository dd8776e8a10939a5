//! Persistence repository (spec §6): the interface the Worker and Workflow
//! Executor use to read Connectors/Nodes/Workflows and to manage Job
//! lifecycle rows. Object-safe so any relational store can back it; this
//! crate ships only the in-memory reference implementation used by tests
//! and local/single-process runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use apiflow_core::{Connector, ConnectorId, Job, JobId, JobStatus, Node, NodeId, Workflow, WorkflowId};
use apiflow_error::EngineError;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;

/// The persistence contract consumed by the Worker loop and Workflow
/// Executor. `Node`/`Workflow` lookups surface a miss as
/// [`EngineError::NotFound`] per spec §7 — not retryable, propagated
/// immediately.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_connector(&self, id: ConnectorId) -> Result<Connector, EngineError>;
    async fn get_node(&self, id: NodeId) -> Result<Node, EngineError>;
    async fn get_workflow(&self, id: WorkflowId) -> Result<Workflow, EngineError>;
    async fn get_job(&self, id: JobId) -> Result<Job, EngineError>;

    /// Persists a new Job in `pending` status for `workflow_id`.
    async fn create_job(&self, workflow_id: WorkflowId, input: Value, name: Option<String>) -> Job;

    /// Atomically transitions up to `limit` `pending` Jobs (oldest
    /// `created_at` first) to `running` and returns the claimed rows. A Job
    /// claimed by one caller is never returned to another.
    async fn claim_pending_jobs(&self, limit: usize) -> Vec<Job>;

    /// Full upsert of a Job's mutable fields (status, output, error,
    /// retry_count, updated_at).
    async fn save_job(&self, job: &Job);
}

#[derive(Default)]
struct Tables {
    connectors: BTreeMap<ConnectorId, Connector>,
    nodes: BTreeMap<NodeId, Node>,
    workflows: BTreeMap<WorkflowId, Workflow>,
    jobs: BTreeMap<JobId, Job>,
}

/// `Mutex`-guarded in-memory [`Repository`] — single-process only, matching
/// the engine's single-process worker model (spec §5).
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_connector(&self, connector: Connector) {
        self.tables.lock().connectors.insert(connector.id, connector);
    }

    pub fn put_node(&self, node: Node) {
        self.tables.lock().nodes.insert(node.id, node);
    }

    pub fn put_workflow(&self, workflow: Workflow) {
        self.tables.lock().workflows.insert(workflow.id, workflow);
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_connector(&self, id: ConnectorId) -> Result<Connector, EngineError> {
        self.tables
            .lock()
            .connectors
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("connector {id}")))
    }

    async fn get_node(&self, id: NodeId) -> Result<Node, EngineError> {
        self.tables
            .lock()
            .nodes
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("node {id}")))
    }

    async fn get_workflow(&self, id: WorkflowId) -> Result<Workflow, EngineError> {
        self.tables
            .lock()
            .workflows
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("workflow {id}")))
    }

    async fn get_job(&self, id: JobId) -> Result<Job, EngineError> {
        self.tables
            .lock()
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("job {id}")))
    }

    async fn create_job(&self, workflow_id: WorkflowId, input: Value, name: Option<String>) -> Job {
        let now = Utc::now();
        let job = Job {
            id: JobId::v4(),
            name: name.unwrap_or_default(),
            workflow_id,
            status: JobStatus::Pending,
            retry_count: 0,
            input,
            output: Value::Null,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.tables.lock().jobs.insert(job.id, job.clone());
        job
    }

    async fn claim_pending_jobs(&self, limit: usize) -> Vec<Job> {
        let mut tables = self.tables.lock();
        let mut candidates: Vec<JobId> = tables
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Pending)
            .map(|job| job.id)
            .collect();
        candidates.sort_by_key(|id| tables.jobs[id].created_at);
        candidates.truncate(limit);

        candidates
            .into_iter()
            .filter_map(|id| {
                let job = tables.jobs.get_mut(&id)?;
                job.transition(JobStatus::Running).ok()?;
                Some(job.clone())
            })
            .collect()
    }

    async fn save_job(&self, job: &Job) {
        self.tables.lock().jobs.insert(job.id, job.clone());
    }
}
