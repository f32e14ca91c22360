//! Progress reporting and payload adaptation seams.
//!
//! Both are single-method capability interfaces injected at construction;
//! an absent sink or adapter is an explicit `None`, not a null check inside
//! the engine.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::task::{TaskMeta, TaskState};

/// One observed state transition.
#[derive(Debug, Clone, Serialize)]
pub struct TaskTransition {
    /// Id of the executor run this transition belongs to.
    pub run_id: String,
    /// Monotonically increasing per-run sequence number.
    pub sequence: u64,
    pub task: TaskMeta,
    pub state: TaskState,
    /// `Done` carries the task's result, `Error` the error message.
    pub detail: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

/// Capability interface for observing task state transitions.
pub trait ProgressSink: Send + Sync {
    fn on_transition(&self, transition: &TaskTransition);
}

/// Sink that forwards transitions to `tracing`.
pub struct LoggingSink;

impl ProgressSink for LoggingSink {
    fn on_transition(&self, transition: &TaskTransition) {
        tracing::debug!(
            task = %transition.task.id,
            state = ?transition.state,
            sequence = transition.sequence,
            "task transition"
        );
    }
}

/// Sink that buffers transitions for later inspection.
#[derive(Default)]
pub struct BufferingSink {
    transitions: Mutex<Vec<TaskTransition>>,
}

impl BufferingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transitions(&self) -> Vec<TaskTransition> {
        self.transitions.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.transitions.lock().unwrap().clear();
    }
}

impl ProgressSink for BufferingSink {
    fn on_transition(&self, transition: &TaskTransition) {
        self.transitions.lock().unwrap().push(transition.clone());
    }
}

/// Capability interface for reshaping a task's aggregated ancestor payload
/// before it reaches the task. The requiredness gate and `execute` both see
/// the adapted payload.
pub trait PayloadAdapter: Send + Sync {
    fn adapt(&self, task: &TaskMeta, aggregated: Value) -> Value;
}
