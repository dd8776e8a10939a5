//! Workflow Executor (spec C5) and the engine's three invocation entry
//! points (spec §6).
//!
//! [`WorkflowExecutor::run`] interprets a [`Workflow`]'s module tree against
//! a Job: `script` modules invoke the Node Executor on a bounded task pool,
//! `branchone` evaluates branch conditions, `branchall` fans out
//! concurrently or sequentially. Every module, whatever its shape, writes
//! its resulting value to `context.results[module.id]` exactly once on
//! success (spec §8 testable property 7).

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use apiflow_config::EngineConfig;
use apiflow_core::{
    ConditionalBranch, FanOutBranch, Job, JobId, JobStatus, Module, ModuleValue, Node, NodeId,
    Transform, Workflow, WorkflowId,
};
use apiflow_error::EngineError;
use apiflow_http::Dispatcher;
use apiflow_storage::Repository;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Semaphore;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The mutable `{flow_input, results}` Execution Context (spec §3), shared
/// across a single module subtree via interior mutability so sibling
/// modules observe each other's writes in declaration order.
struct SharedContext {
    flow_input: Value,
    results: Mutex<BTreeMap<String, Value>>,
}

impl SharedContext {
    fn new(flow_input: Value) -> Self {
        Self { flow_input, results: Mutex::new(BTreeMap::new()) }
    }

    /// Builds a fresh context starting from a previously captured
    /// `{flow_input, results}` snapshot — used to give `branchall(parallel)`
    /// siblings a frozen view that doesn't observe each other's writes.
    fn from_snapshot(snapshot: &Value) -> Self {
        let flow_input = snapshot.get("flow_input").cloned().unwrap_or(Value::Null);
        let results = match snapshot.get("results") {
            Some(Value::Object(map)) => map.clone().into_iter().collect(),
            _ => BTreeMap::new(),
        };
        Self { flow_input, results: Mutex::new(results) }
    }

    fn insert(&self, module_id: String, value: Value) {
        self.results.lock().insert(module_id, value);
    }

    fn results_value(&self) -> Value {
        Value::Object(self.results.lock().clone().into_iter().collect())
    }

    fn snapshot(&self) -> Value {
        serde_json::json!({ "flow_input": self.flow_input, "results": self.results_value() })
    }
}

/// Applies the Input Transform rule (spec §4.5) to one `(name, Transform)`
/// pair.
fn transform_value(transform: &Transform, ctx: &Value) -> Result<Value, EngineError> {
    if let Value::Object(map) = transform {
        match map.get("type").and_then(Value::as_str) {
            Some("static") => {
                let literal = map.get("value").cloned().unwrap_or(Value::Null);
                Ok(apiflow_expression::render_deep(&literal, ctx))
            }
            Some("javascript") => {
                let expr = map.get("expr").and_then(Value::as_str).unwrap_or_default();
                apiflow_expression::evaluate(expr, ctx).map_err(|e| EngineError::Expression(e.to_string()))
            }
            _ => Ok(transform.clone()),
        }
    } else {
        Ok(apiflow_expression::render_deep(transform, ctx))
    }
}

fn transform_input(transforms: &BTreeMap<String, Transform>, ctx: &Value) -> Result<Value, EngineError> {
    let mut obj = serde_json::Map::new();
    for (key, transform) in transforms {
        obj.insert(key.clone(), transform_value(transform, ctx)?);
    }
    Ok(Value::Object(obj))
}

/// Parses a `script` module's `path` (`node/<n>_node_id`) into the integer
/// `n` it addresses in [`Workflow::node_refs`].
fn parse_node_index(path: &str) -> Result<usize, EngineError> {
    path.strip_prefix("node/")
        .and_then(|rest| rest.strip_suffix("_node_id"))
        .and_then(|digits| digits.parse::<usize>().ok())
        .ok_or_else(|| EngineError::Validation(format!("malformed script module path '{path}'")))
}

/// Walks a [`Node`] + its [`apiflow_core::Connector`] through the Node
/// Executor, bounded by a shared task-pool semaphore (spec §5: Node HTTP
/// calls never run on the orchestration thread).
async fn dispatch_node(
    repo: &Arc<dyn Repository>,
    dispatcher: &Dispatcher,
    pool: &Arc<Semaphore>,
    node_id: NodeId,
    input: Value,
) -> Result<Value, EngineError> {
    let node: Node = repo.get_node(node_id).await?;
    let connector = repo.get_connector(node.connector_id).await?;

    let permit = Arc::clone(pool).acquire_owned().await.expect("pool semaphore never closes");
    let dispatcher = dispatcher.clone();
    tokio::spawn(async move {
        let _permit = permit;
        apiflow_node::execute(&node, &connector, &input, &dispatcher).await
    })
    .await
    .expect("node executor task panicked")
}

/// One execution of a [`Workflow`]'s module tree against a single [`Job`].
pub struct WorkflowExecutor {
    repo: Arc<dyn Repository>,
    dispatcher: Dispatcher,
    pool: Arc<Semaphore>,
}

impl WorkflowExecutor {
    #[must_use]
    pub fn new(repo: Arc<dyn Repository>, config: &EngineConfig) -> Self {
        Self {
            repo,
            dispatcher: Dispatcher::with_timeout(config.node_http_timeout()),
            pool: Arc::new(Semaphore::new(config.per_workflow_pool_size)),
        }
    }

    /// Runs `workflow` against `job` to completion, mutating and persisting
    /// the Job's terminal state (spec §4.5 top-level contract, §4.6 step 5
    /// cancellation). `job` must already be `running` (claimed by the
    /// caller) when this is called.
    #[tracing::instrument(skip(self, job, workflow), fields(job_id = %job.id, workflow_id = %workflow.id))]
    pub async fn run(&self, mut job: Job, workflow: &Workflow) -> Job {
        let run = Run { repo: &self.repo, dispatcher: &self.dispatcher, pool: &self.pool, workflow };
        let ctx = SharedContext::new(job.input.clone());
        let refs: Vec<&Module> = workflow.modules().iter().collect();

        match run.exec_modules(&refs, &ctx, job.id).await {
            Ok(_) => {
                job.output = ctx.results_value();
                let _ = job.transition(JobStatus::Completed);
                self.repo.save_job(&job).await;
                job
            }
            Err(EngineError::Cancelled) => {
                tracing::info!("job cancelled mid-execution");
                self.repo.get_job(job.id).await.unwrap_or(job)
            }
            Err(err) => {
                tracing::warn!(error = %err, "workflow execution failed");
                job.error = Some(err.to_string());
                let _ = job.transition(JobStatus::Failed);
                self.repo.save_job(&job).await;
                job
            }
        }
    }
}

/// Borrowed state for one in-flight `run()` — kept separate from
/// [`WorkflowExecutor`] so the recursive module-dispatch methods can borrow
/// `workflow` for the run's duration without it living on the executor
/// itself.
struct Run<'a> {
    repo: &'a Arc<dyn Repository>,
    dispatcher: &'a Dispatcher,
    pool: &'a Arc<Semaphore>,
    workflow: &'a Workflow,
}

impl<'a> Run<'a> {
    async fn check_cancelled(&self, job_id: JobId) -> Result<(), EngineError> {
        let current = self.repo.get_job(job_id).await?;
        if current.status == JobStatus::Cancelled {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn exec_modules<'b>(
        &'b self,
        modules: &'b [&'b Module],
        ctx: &'b SharedContext,
        job_id: JobId,
    ) -> BoxFuture<'b, Result<Vec<Value>, EngineError>> {
        Box::pin(async move {
            let mut results = Vec::with_capacity(modules.len());
            for module in modules {
                self.check_cancelled(job_id).await?;
                results.push(self.exec_module(module, ctx, job_id).await?);
            }
            Ok(results)
        })
    }

    fn exec_module<'b>(
        &'b self,
        module: &'b Module,
        ctx: &'b SharedContext,
        job_id: JobId,
    ) -> BoxFuture<'b, Result<Value, EngineError>> {
        Box::pin(async move {
            let value = match &module.retry {
                Some(policy) => {
                    apiflow_resilience::retry(
                        &policy.exponential,
                        |e: &EngineError| e.is_retryable(),
                        || self.dispatch_module_value(&module.value, ctx, job_id),
                    )
                    .await?
                }
                None => self.dispatch_module_value(&module.value, ctx, job_id).await?,
            };
            ctx.insert(module.id.clone(), value.clone());
            Ok(value)
        })
    }

    fn dispatch_module_value<'b>(
        &'b self,
        value: &'b ModuleValue,
        ctx: &'b SharedContext,
        job_id: JobId,
    ) -> BoxFuture<'b, Result<Value, EngineError>> {
        Box::pin(async move {
            match value {
                ModuleValue::Script { path, input_transforms } => {
                    let n = parse_node_index(path)?;
                    let node_id = self
                        .workflow
                        .resolve_node_ref(n)
                        .ok_or_else(|| EngineError::NotFound(format!("node ref {n}")))?;
                    let input_data = transform_input(input_transforms, &ctx.snapshot())?;
                    dispatch_node(self.repo, self.dispatcher, self.pool, node_id, input_data).await
                }
                ModuleValue::Branchone { branches, default } => {
                    self.dispatch_branchone(branches, default, ctx, job_id).await
                }
                ModuleValue::Branchall { branches, parallel } => {
                    self.dispatch_branchall(branches, *parallel, ctx, job_id).await
                }
            }
        })
    }

    async fn dispatch_branchone(
        &self,
        branches: &[ConditionalBranch],
        default: &[Module],
        ctx: &SharedContext,
        job_id: JobId,
    ) -> Result<Value, EngineError> {
        let snapshot = ctx.snapshot();
        for branch in branches {
            if apiflow_expression::evaluate_bool(&branch.expr, &snapshot)
                .map_err(|e| EngineError::Expression(e.to_string()))?
            {
                let refs: Vec<&Module> = branch.modules.iter().collect();
                return self.exec_modules(&refs, ctx, job_id).await.map(Value::Array);
            }
        }
        let refs: Vec<&Module> = default.iter().collect();
        self.exec_modules(&refs, ctx, job_id).await.map(Value::Array)
    }

    async fn dispatch_branchall(
        &self,
        branches: &[FanOutBranch],
        parallel: bool,
        ctx: &SharedContext,
        job_id: JobId,
    ) -> Result<Value, EngineError> {
        let modules: Vec<&Module> = branches.iter().flat_map(|b| b.modules.iter()).collect();

        if !parallel {
            return self.exec_modules(&modules, ctx, job_id).await.map(Value::Array);
        }

        // `branchall(parallel=true)`: every sub-module sees the context as it
        // stood at this branchall's start, not each other's writes (spec §5).
        let frozen = ctx.snapshot();
        let before_keys: std::collections::BTreeSet<String> = match frozen.get("results") {
            Some(Value::Object(map)) => map.keys().cloned().collect(),
            _ => Default::default(),
        };

        let tasks = modules.iter().map(|module| {
            let module = *module;
            let local = SharedContext::from_snapshot(&frozen);
            async move {
                let outcome = self.exec_module(module, &local, job_id).await;
                (outcome, local)
            }
        });
        let outcomes = futures::future::join_all(tasks).await;

        let mut results = Vec::with_capacity(outcomes.len());
        let mut first_err = None;
        for (outcome, local) in outcomes {
            match outcome {
                Ok(value) => {
                    results.push(value);
                    if let Value::Object(local_results) = local.results_value() {
                        for (key, value) in local_results {
                            if !before_keys.contains(&key) {
                                ctx.insert(key, value);
                            }
                        }
                    }
                }
                Err(err) => {
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
        }

        if let Some(err) = first_err {
            return Err(err);
        }
        Ok(Value::Array(results))
    }
}

/// `execute_node(node_id, input) -> JSON | error` (spec §6): a synchronous
/// one-shot Node invocation with no Job involved.
pub async fn execute_node(
    repo: &Arc<dyn Repository>,
    config: &EngineConfig,
    node_id: NodeId,
    input: Value,
) -> Result<Value, EngineError> {
    let node = repo.get_node(node_id).await?;
    let connector = repo.get_connector(node.connector_id).await?;
    let dispatcher = Dispatcher::with_timeout(config.node_http_timeout());
    apiflow_node::execute(&node, &connector, &input, &dispatcher).await
}

/// `execute_workflow(workflow_id, input, name?) -> Job` (spec §6): persists
/// a `pending` Job; the worker loop executes it.
pub async fn execute_workflow(
    repo: &Arc<dyn Repository>,
    workflow_id: WorkflowId,
    input: Value,
    name: Option<String>,
) -> Job {
    repo.create_job(workflow_id, input, name).await
}

/// `cancel_job(job_id)` (spec §6): legal only from `pending`/`running`.
pub async fn cancel_job(repo: &Arc<dyn Repository>, job_id: JobId) -> Result<Job, EngineError> {
    let mut job = repo.get_job(job_id).await?;
    job.transition(JobStatus::Cancelled)
        .map_err(|e| EngineError::Validation(e.to_string()))?;
    repo.save_job(&job).await;
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use apiflow_core::{
        Connector, ConnectorId, ExponentialBackoff, HttpMethod, ModuleTree, OutputDef, RetryPolicy,
    };
    use apiflow_storage::InMemoryRepository;
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn connector(base_url: String) -> Connector {
        Connector { id: ConnectorId::v4(), base_url, method: HttpMethod::Get, header: BTreeMap::new(), body: None }
    }

    fn script_module(id: &str, n: usize) -> Module {
        Module {
            id: id.to_string(),
            value: ModuleValue::Script { path: format!("node/{n}_node_id"), input_transforms: BTreeMap::new() },
            retry: None,
        }
    }

    async fn seeded(base_url: String) -> (InMemoryRepository, NodeId) {
        let repo = InMemoryRepository::new();
        let connector = connector(base_url);
        let node = Node {
            id: NodeId::v4(),
            connector_id: connector.id,
            path: String::new(),
            input: vec![],
            output: vec![OutputDef { name: "ok".into(), mapping: None, default: None }],
            body_template: None,
        };
        repo.put_connector(connector);
        repo.put_node(node.clone());
        (repo, node.id)
    }

    #[tokio::test]
    async fn runs_a_single_script_module_to_completion() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let (repo, node_id) = seeded(server.uri()).await;
        let workflow = Workflow {
            id: WorkflowId::v4(),
            name: None,
            value: ModuleTree { modules: vec![script_module("m1", 0)] },
            node_refs: vec![node_id],
        };
        let job = repo.create_job(workflow.id, json!({}), None).await;
        let repo: Arc<dyn Repository> = Arc::new(repo);

        let executor = WorkflowExecutor::new(Arc::clone(&repo), &EngineConfig::default());
        let finished = executor.run(job, &workflow).await;

        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.output, json!({"m1": {"ok": true}}));
    }

    #[tokio::test]
    async fn not_found_node_ref_fails_the_job_immediately() {
        let repo = InMemoryRepository::new();
        let workflow = Workflow {
            id: WorkflowId::v4(),
            name: None,
            value: ModuleTree { modules: vec![script_module("m1", 0)] },
            node_refs: vec![],
        };
        let job = repo.create_job(workflow.id, json!({}), None).await;
        let repo: Arc<dyn Repository> = Arc::new(repo);

        let executor = WorkflowExecutor::new(Arc::clone(&repo), &EngineConfig::default());
        let finished = executor.run(job, &workflow).await;

        assert_eq!(finished.status, JobStatus::Failed);
        assert!(finished.error.unwrap().contains("node ref"));
    }

    #[tokio::test]
    async fn branchone_executes_first_truthy_branch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;
        let (repo, node_id) = seeded(server.uri()).await;

        let branchone = Module {
            id: "b1".into(),
            value: ModuleValue::Branchone {
                branches: vec![
                    ConditionalBranch { expr: "false".into(), modules: vec![] },
                    ConditionalBranch { expr: "true".into(), modules: vec![script_module("m1", 0)] },
                ],
                default: vec![],
            },
            retry: None,
        };
        let workflow = Workflow {
            id: WorkflowId::v4(),
            name: None,
            value: ModuleTree { modules: vec![branchone] },
            node_refs: vec![node_id],
        };
        let job = repo.create_job(workflow.id, json!({}), None).await;
        let repo: Arc<dyn Repository> = Arc::new(repo);

        let executor = WorkflowExecutor::new(Arc::clone(&repo), &EngineConfig::default());
        let finished = executor.run(job, &workflow).await;

        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.output["m1"], json!({"ok": true}));
        assert_eq!(finished.output["b1"], json!([{"ok": true}]));
    }

    #[tokio::test]
    async fn branchall_parallel_runs_every_submodule_and_merges_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;
        let (repo, node_id) = seeded(server.uri()).await;

        let branchall = Module {
            id: "fan".into(),
            value: ModuleValue::Branchall {
                branches: vec![
                    FanOutBranch { modules: vec![script_module("a", 0)] },
                    FanOutBranch { modules: vec![script_module("b", 0)] },
                ],
                parallel: true,
            },
            retry: None,
        };
        let workflow = Workflow {
            id: WorkflowId::v4(),
            name: None,
            value: ModuleTree { modules: vec![branchall] },
            node_refs: vec![node_id],
        };
        let job = repo.create_job(workflow.id, json!({}), None).await;
        let repo: Arc<dyn Repository> = Arc::new(repo);

        let executor = WorkflowExecutor::new(Arc::clone(&repo), &EngineConfig::default());
        let finished = executor.run(job, &workflow).await;

        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.output["a"], json!({"ok": true}));
        assert_eq!(finished.output["b"], json!({"ok": true}));
    }

    #[tokio::test]
    async fn retry_re_runs_the_whole_module_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;
        let (repo, node_id) = seeded(server.uri()).await;

        let mut module = script_module("m1", 0);
        module.retry = Some(RetryPolicy { exponential: ExponentialBackoff { attempts: 2, multiplier: 1.0, seconds: 0.0 } });
        let workflow = Workflow {
            id: WorkflowId::v4(),
            name: None,
            value: ModuleTree { modules: vec![module] },
            node_refs: vec![node_id],
        };
        let job = repo.create_job(workflow.id, json!({}), None).await;
        let repo: Arc<dyn Repository> = Arc::new(repo);

        let executor = WorkflowExecutor::new(Arc::clone(&repo), &EngineConfig::default());
        let finished = executor.run(job, &workflow).await;

        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.output["m1"], json!({"ok": true}));
    }

    #[tokio::test]
    async fn cancelled_job_aborts_without_mutating_status() {
        let repo = InMemoryRepository::new();
        let workflow = Workflow {
            id: WorkflowId::v4(),
            name: None,
            value: ModuleTree { modules: vec![script_module("m1", 0)] },
            node_refs: vec![],
        };
        let mut job = repo.create_job(workflow.id, json!({}), None).await;
        job.transition(JobStatus::Running).unwrap();
        job.transition(JobStatus::Cancelled).unwrap();
        repo.save_job(&job).await;
        let repo: Arc<dyn Repository> = Arc::new(repo);

        let executor = WorkflowExecutor::new(Arc::clone(&repo), &EngineConfig::default());
        let finished = executor.run(job, &workflow).await;

        assert_eq!(finished.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_job_rejects_terminal_jobs() {
        let repo = InMemoryRepository::new();
        let mut job = repo.create_job(WorkflowId::v4(), json!({}), None).await;
        job.transition(JobStatus::Running).unwrap();
        job.transition(JobStatus::Completed).unwrap();
        repo.save_job(&job).await;
        let repo: Arc<dyn Repository> = Arc::new(repo);

        let err = cancel_job(&repo, job.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
