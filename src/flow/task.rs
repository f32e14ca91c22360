//! Task trait, normalized task records and per-task completion handles.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use crate::core::errors::TaskFlowError;

/// Stable task identity within a run.
pub type TaskId = String;

/// Lifecycle of a single task within a run.
///
/// `Pending`, `Ready` and `Processing` are transient; the remaining states
/// are terminal and never left again. `Done` and `NotRequired` unblock
/// dependents, `Error` skips the whole unexecuted subtree below the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Ready,
    Processing,
    Done,
    Error,
    Skipped,
    NotRequired,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Done | TaskState::Error | TaskState::Skipped | TaskState::NotRequired
        )
    }

    /// Whether a parent in this state unblocks its dependents.
    pub fn satisfies_dependents(self) -> bool {
        matches!(self, TaskState::Done | TaskState::NotRequired)
    }
}

/// Retry behavior for a single task: a fixed number of re-attempts with a
/// fixed delay between them. The default performs no retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }
}

/// A unit of work scheduled by the executor.
///
/// Payloads are JSON values: a task receives the merged results of its
/// transitive ancestors and returns its own result, which in turn becomes
/// part of every descendant's payload.
#[async_trait]
pub trait Task: Send + Sync {
    /// Display name used as this task's key in downstream payloads.
    /// Defaults to the task's id. Names need not be unique; tasks sharing a
    /// name fan into a single list-valued payload entry.
    fn name(&self) -> Option<String> {
        None
    }

    /// Execute the unit of work.
    async fn execute(&self, payload: Value) -> anyhow::Result<Value>;

    /// Requiredness gate, consulted with the same payload `execute` would
    /// receive. Answering `false` marks the task `NotRequired` without
    /// running it. The default gate always requires the task.
    async fn is_required(&self, _payload: &Value) -> anyhow::Result<bool> {
        Ok(true)
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }
}

/// Closure signature stored by [`FnTask`].
pub type TaskFn = Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Wrapper turning a plain async closure into a [`Task`].
pub struct FnTask {
    name: Option<String>,
    retry: RetryPolicy,
    func: TaskFn,
}

impl FnTask {
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            name: None,
            retry: RetryPolicy::default(),
            func: Arc::new(move |payload| Box::pin(func(payload))),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_retries(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl Task for FnTask {
    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    async fn execute(&self, payload: Value) -> anyhow::Result<Value> {
        (self.func)(payload).await
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }
}

/// One task as handed to the executor, before normalization.
pub struct TaskSpec {
    pub(crate) task: Arc<dyn Task>,
    pub(crate) id: Option<String>,
    pub(crate) depends_on: Vec<String>,
}

impl TaskSpec {
    pub fn new(task: impl Task + 'static) -> Self {
        Self {
            task: Arc::new(task),
            id: None,
            depends_on: Vec::new(),
        }
    }

    /// Explicit stable id for this task. Without one, the id defaults to
    /// the task's position in the overall submission order.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Declare dependencies by id on tasks in the same submission (or, for
    /// incremental addition, on previously submitted tasks). Ignored in
    /// serial mode, where the chain is implicit.
    pub fn after<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(ids.into_iter().map(Into::into));
        self
    }
}

/// Normalized record for one submitted task, with graph links wired at
/// build time. Records are created once per submission and never removed
/// for the lifetime of the run.
pub struct TaskRecord {
    pub id: TaskId,
    pub name: String,
    pub index: usize,
    pub(crate) task: Arc<dyn Task>,
    pub parents: Vec<TaskId>,
    pub children: Vec<TaskId>,
}

impl TaskRecord {
    pub fn meta(&self) -> TaskMeta {
        TaskMeta {
            id: self.id.clone(),
            name: self.name.clone(),
            index: self.index,
        }
    }
}

impl fmt::Debug for TaskRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("index", &self.index)
            .field("parents", &self.parents)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

/// Cheap cloneable descriptor for a task, used in progress events and
/// handed back from submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMeta {
    pub id: TaskId,
    pub name: String,
    pub index: usize,
}

/// Terminal outcome of a task.
#[derive(Debug, Clone)]
pub enum TaskTermination {
    Done(Value),
    NotRequired,
    Skipped,
    Failed(Arc<anyhow::Error>),
}

/// Completion handle for a single task.
///
/// Handles are cheap to clone; every clone observes the same outcome.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub(crate) id: TaskId,
    pub(crate) rx: watch::Receiver<Option<TaskTermination>>,
}

impl TaskHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Terminal outcome, if the task has already reached one.
    pub fn outcome(&self) -> Option<TaskTermination> {
        self.rx.borrow().clone()
    }

    /// Await the task's terminal state.
    ///
    /// Resolves `Ok(Some(result))` for `Done` and `Ok(None)` for
    /// `NotRequired`; fails with [`TaskFlowError::Skipped`] when an
    /// upstream failure prevented the task from ever running, and with
    /// [`TaskFlowError::TaskFailed`] when the task itself ran and failed.
    pub async fn wait(&self) -> crate::core::errors::Result<Option<Value>> {
        let mut rx = self.rx.clone();
        loop {
            if let Some(termination) = rx.borrow_and_update().clone() {
                return match termination {
                    TaskTermination::Done(value) => Ok(Some(value)),
                    TaskTermination::NotRequired => Ok(None),
                    TaskTermination::Skipped => Err(TaskFlowError::Skipped {
                        task_id: self.id.clone(),
                    }),
                    TaskTermination::Failed(error) => Err(TaskFlowError::TaskFailed {
                        task_id: self.id.clone(),
                        error,
                    }),
                };
            }
            if rx.changed().await.is_err() {
                // Executor dropped before the task reached a terminal
                // state; the task can never run.
                return Err(TaskFlowError::Skipped {
                    task_id: self.id.clone(),
                });
            }
        }
    }
}
