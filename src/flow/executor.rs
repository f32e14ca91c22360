//! The executor: submission API, state transitions, the concurrency-bounded
//! dispatch loop and the per-task runner.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::core::errors::{Result, TaskFlowError};

use super::events::{PayloadAdapter, ProgressSink, TaskTransition};
use super::graph;
use super::payload::{self, ResultStore};
use super::state::RunState;
use super::task::{
    RetryPolicy, Task, TaskHandle, TaskId, TaskMeta, TaskSpec, TaskState, TaskTermination,
};

/// Configuration for executor behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Maximum number of tasks in flight at once (default: 3). A limit of 1
    /// effectively serializes execution.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    /// Chain submitted tasks into an implicit linear sequence instead of
    /// reading explicit dependencies (default: false).
    #[serde(default)]
    pub serial: bool,
}

fn default_concurrency_limit() -> usize {
    3
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            serial: false,
        }
    }
}

impl ExecutorConfig {
    /// Validates configuration values
    pub fn validate(&self) -> Result<()> {
        if self.concurrency_limit == 0 {
            return Err(TaskFlowError::configuration(
                "concurrency_limit must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Result of a bulk submission: per-task completion handles and normalized
/// task descriptors, both in submission order.
#[derive(Debug, Clone)]
pub struct Submission {
    pub handles: Vec<TaskHandle>,
    pub tasks: Vec<TaskMeta>,
}

struct Inner {
    config: ExecutorConfig,
    run_id: String,
    state: Mutex<RunState>,
    results: ResultStore,
    sink: Option<Arc<dyn ProgressSink>>,
    adapter: Option<Arc<dyn PayloadAdapter>>,
    sequence: AtomicU64,
}

/// Dependency-aware task executor.
///
/// One executor owns one run: a growing DAG of tasks, their states and
/// results. Cloning is cheap and clones share the run.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("run_id", &self.inner.run_id)
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Create an executor with the given configuration and optional
    /// progress/adapter seams.
    pub fn new(
        config: Option<ExecutorConfig>,
        sink: Option<Arc<dyn ProgressSink>>,
        adapter: Option<Arc<dyn PayloadAdapter>>,
    ) -> Result<Self> {
        let config = config.unwrap_or_default();
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                run_id: cuid2::create_id(),
                state: Mutex::new(RunState::new()),
                results: ResultStore::new(),
                sink,
                adapter,
                sequence: AtomicU64::new(0),
            }),
        })
    }

    /// Id of this executor's run, stamped on every progress transition.
    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    /// Submit a batch of tasks and start executing them.
    ///
    /// Valid once per executor, on an empty graph; grow a running graph
    /// with [`Executor::add_task`].
    pub async fn run(&self, specs: Vec<TaskSpec>) -> Result<Submission> {
        let inner = &self.inner;
        let mut st = inner.state.lock().await;
        if !st.order.is_empty() {
            return Err(TaskFlowError::validation(
                "tasks already submitted; use add_task to grow a running graph",
            ));
        }
        let ids = graph::build(&mut st, specs, inner.config.serial)?;
        info!(run_id = %inner.run_id, tasks = ids.len(), "run submitted");

        let handles: Vec<TaskHandle> = ids.iter().map(|id| st.register_handle(id)).collect();
        let tasks: Vec<TaskMeta> = ids.iter().map(|id| st.records[id].meta()).collect();
        for id in &ids {
            inner.seed(&mut st, id);
        }
        dispatch(inner, &mut st);
        Ok(Submission { handles, tasks })
    }

    /// Submit a batch and await the whole graph.
    ///
    /// Resolves to the aggregated result map over all tasks on all-success;
    /// fails with [`TaskFlowError::RunFailed`] carrying the partial
    /// aggregate when any task fails or is skipped.
    pub async fn run_and_wait(&self, specs: Vec<TaskSpec>) -> Result<Value> {
        let submission = self.run(specs).await?;
        let outcomes = join_all(submission.handles.iter().map(|handle| handle.wait())).await;
        let completed = self.results().await;
        if outcomes.iter().any(|outcome| outcome.is_err()) {
            return Err(TaskFlowError::RunFailed { completed });
        }
        Ok(completed)
    }

    /// Add a single task to the (possibly already running) graph and return
    /// its completion handle. In serial mode the new task's sole parent is
    /// the previously added task.
    pub async fn add_task(&self, spec: TaskSpec) -> Result<TaskHandle> {
        let inner = &self.inner;
        let mut st = inner.state.lock().await;
        let ids = graph::build(&mut st, vec![spec], inner.config.serial)?;
        let id = ids.into_iter().next().expect("one record per spec");
        let handle = st.register_handle(&id);
        inner.seed(&mut st, &id);
        dispatch(inner, &mut st);
        Ok(handle)
    }

    /// Current state of a task, by id.
    pub async fn task_state(&self, id: &str) -> Option<TaskState> {
        self.inner.state.lock().await.state_of(id)
    }

    /// Final error recorded for a failed task, by id.
    pub async fn task_error(&self, id: &str) -> Option<Arc<anyhow::Error>> {
        self.inner.state.lock().await.errors.get(id).cloned()
    }

    /// Aggregated result map over every submitted task.
    pub async fn results(&self) -> Value {
        let st = self.inner.state.lock().await;
        payload::aggregate(&st, &self.inner.results, None)
    }

    /// Normalized descriptors for every submitted task, in submission
    /// order.
    pub async fn tasks(&self) -> Vec<TaskMeta> {
        let st = self.inner.state.lock().await;
        st.order.iter().map(|id| st.records[id].meta()).collect()
    }

    /// Completion handles for every submitted task, in submission order.
    pub async fn handles(&self) -> Vec<TaskHandle> {
        self.inner.state.lock().await.handles.clone()
    }
}

impl Inner {
    /// Record a state transition and notify the progress sink.
    fn transition(&self, st: &mut RunState, id: &str, state: TaskState, detail: Option<Value>) {
        st.states.insert(id.to_string(), state);
        debug!(run_id = %self.run_id, task = %id, state = ?state, "state transition");
        if let Some(sink) = &self.sink {
            sink.on_transition(&TaskTransition {
                run_id: self.run_id.clone(),
                sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
                task: st.records[id].meta(),
                state,
                detail,
                timestamp: Utc::now(),
            });
        }
    }

    /// Seed a freshly built task: `Pending`, then straight to `Ready` (and
    /// the ready queue) when its parents are already satisfied. A task
    /// added below an already-failed ancestor is skipped immediately so its
    /// handle cannot dangle.
    fn seed(&self, st: &mut RunState, id: &TaskId) {
        self.transition(st, id, TaskState::Pending, None);
        let failed_parent = st.records[id].parents.iter().any(|parent| {
            matches!(
                st.state_of(parent),
                Some(TaskState::Error | TaskState::Skipped)
            )
        });
        if failed_parent {
            self.transition(st, id, TaskState::Skipped, None);
            st.resolve(id, TaskTermination::Skipped);
        } else if st.is_ready(id) {
            self.transition(st, id, TaskState::Ready, None);
            st.ready.push_back(id.clone());
        }
    }

    /// Promote every child whose dependencies just became satisfied.
    fn promote_children(&self, st: &mut RunState, id: &str) {
        let children = st.records[id].children.clone();
        for child in children {
            if st.is_ready(&child) {
                self.transition(st, &child, TaskState::Ready, None);
                st.ready.push_back(child);
            }
        }
    }

    /// Cascade `Skipped` through the unexecuted subtree below a failed
    /// task. Tasks already terminal are left untouched, which also prunes
    /// re-visits along diamond paths.
    fn skip_descendants(&self, st: &mut RunState, id: &str) {
        let children = st.records[id].children.clone();
        for child in children {
            if st.state_of(&child).is_some_and(TaskState::is_terminal) {
                continue;
            }
            self.transition(st, &child, TaskState::Skipped, None);
            st.resolve(&child, TaskTermination::Skipped);
            self.skip_descendants(st, &child);
        }
    }
}

/// Outcome reported by the runner for one dispatched task.
enum RunOutcome {
    Done(Value),
    NotRequired,
    Failed(Arc<anyhow::Error>),
}

/// Launch ready tasks while free slots remain. Fire-and-forget: each
/// launched task runs independently and reports back through [`complete`],
/// which re-invokes this dispatcher.
fn dispatch(inner: &Arc<Inner>, st: &mut RunState) {
    let mut free_slots = inner
        .config
        .concurrency_limit
        .saturating_sub(st.in_flight);
    while free_slots > 0 {
        let Some(id) = st.ready.pop_front() else {
            break;
        };
        if st.state_of(&id) != Some(TaskState::Ready) {
            continue;
        }
        free_slots -= 1;
        st.in_flight += 1;
        inner.transition(st, &id, TaskState::Processing, None);

        let record = &st.records[&id];
        let meta = record.meta();
        let task = Arc::clone(&record.task);
        let policy = task.retry_policy();
        let payload = payload::aggregate(st, &inner.results, Some(id.as_str()));
        debug!(task = %id, in_flight = st.in_flight, "dispatching task");
        tokio::spawn(run_task(Arc::clone(inner), meta, task, policy, payload));
    }
}

/// Run one dispatched task: adapt the payload, consult the requiredness
/// gate, then execute with retries, and report the outcome.
async fn run_task(
    inner: Arc<Inner>,
    meta: TaskMeta,
    task: Arc<dyn Task>,
    policy: RetryPolicy,
    payload: Value,
) {
    let payload = match &inner.adapter {
        Some(adapter) => adapter.adapt(&meta, payload),
        None => payload,
    };
    let outcome = match task.is_required(&payload).await {
        Ok(false) => {
            info!(task = %meta.id, "task not required");
            RunOutcome::NotRequired
        }
        Ok(true) => match execute_with_retry(task.as_ref(), &payload, policy).await {
            Ok(value) => RunOutcome::Done(value),
            Err(err) => RunOutcome::Failed(Arc::new(err)),
        },
        Err(err) => RunOutcome::Failed(Arc::new(err.context("requiredness check failed"))),
    };
    complete(&inner, &meta.id, outcome).await;
}

/// Attempt `execute` with up to `policy.max_retries` re-attempts, sleeping
/// `policy.delay` between them. A success after retries returns the task's
/// value unchanged, so the result shape does not depend on the attempt
/// number.
pub(crate) async fn execute_with_retry(
    task: &dyn Task,
    payload: &Value,
    policy: RetryPolicy,
) -> anyhow::Result<Value> {
    let mut retries_left = policy.max_retries;
    loop {
        let attempt = policy.max_retries - retries_left + 1;
        match task.execute(payload.clone()).await {
            Ok(value) => return Ok(value),
            Err(err) if retries_left > 0 => {
                warn!(attempt, error = %err, "task attempt failed, retrying");
                if !policy.delay.is_zero() {
                    sleep(policy.delay).await;
                }
                retries_left -= 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Record a finished task's outcome, propagate readiness or skips, and
/// reclaim the concurrency slot.
async fn complete(inner: &Arc<Inner>, id: &TaskId, outcome: RunOutcome) {
    let mut st = inner.state.lock().await;
    st.in_flight -= 1;
    match outcome {
        RunOutcome::Done(value) => {
            inner.results.insert(id, value.clone());
            inner.transition(&mut st, id, TaskState::Done, Some(value.clone()));
            st.resolve(id, TaskTermination::Done(value));
            inner.promote_children(&mut st, id);
        }
        RunOutcome::NotRequired => {
            inner.transition(&mut st, id, TaskState::NotRequired, None);
            st.resolve(id, TaskTermination::NotRequired);
            inner.promote_children(&mut st, id);
        }
        RunOutcome::Failed(err) => {
            error!(task = %id, error = %err, "task failed");
            st.errors.insert(id.clone(), Arc::clone(&err));
            inner.transition(
                &mut st,
                id,
                TaskState::Error,
                Some(Value::String(err.to_string())),
            );
            st.resolve(id, TaskTermination::Failed(err));
            inner.skip_descendants(&mut st, id);
        }
    }
    dispatch(inner, &mut st);
}
