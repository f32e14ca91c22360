//! Per-run bookkeeping: task records, the state map, the FIFO ready queue
//! and the per-task completion channels.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::watch;

use super::task::{TaskHandle, TaskId, TaskRecord, TaskState, TaskTermination};

/// Mutable run state, exclusively owned by the executor and only ever
/// mutated under its single lock.
#[derive(Debug, Default)]
pub(crate) struct RunState {
    /// Normalized records by id.
    pub records: HashMap<TaskId, TaskRecord>,
    /// Ids in overall submission order.
    pub order: Vec<TaskId>,
    /// Current state per task.
    pub states: HashMap<TaskId, TaskState>,
    /// Tasks whose dependencies are all satisfied, in the order readiness
    /// was detected.
    pub ready: VecDeque<TaskId>,
    /// Number of tasks currently `Processing`.
    pub in_flight: usize,
    /// Completion channel senders, one per task.
    pub senders: HashMap<TaskId, watch::Sender<Option<TaskTermination>>>,
    /// Completion handles in submission order.
    pub handles: Vec<TaskHandle>,
    /// Final error per failed task.
    pub errors: HashMap<TaskId, Arc<anyhow::Error>>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state_of(&self, id: &str) -> Option<TaskState> {
        self.states.get(id).copied()
    }

    /// Readiness predicate: `Pending` with every parent `Done` or
    /// `NotRequired`. An empty parent set trivially satisfies this.
    pub fn is_ready(&self, id: &str) -> bool {
        if self.state_of(id) != Some(TaskState::Pending) {
            return false;
        }
        self.records[id]
            .parents
            .iter()
            .all(|parent| self.state_of(parent).is_some_and(TaskState::satisfies_dependents))
    }

    /// Register a completion channel for a freshly built task and hand back
    /// its handle.
    pub fn register_handle(&mut self, id: &TaskId) -> TaskHandle {
        let (tx, rx) = watch::channel(None);
        self.senders.insert(id.clone(), tx);
        let handle = TaskHandle {
            id: id.clone(),
            rx,
        };
        self.handles.push(handle.clone());
        handle
    }

    /// Resolve the task's completion channel. Terminal states never change,
    /// so a second resolution is a no-op.
    pub fn resolve(&self, id: &str, termination: TaskTermination) {
        if let Some(sender) = self.senders.get(id) {
            sender.send_if_modified(|slot| {
                if slot.is_none() {
                    *slot = Some(termination);
                    true
                } else {
                    false
                }
            });
        }
    }
}
