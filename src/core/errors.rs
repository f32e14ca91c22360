use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Unified error type for the taskflow library.
#[derive(Debug, Clone, Error)]
pub enum TaskFlowError {
    /// Graph construction misuse: duplicate ids, unresolved dependency
    /// references, cycles, or bulk submission onto a non-empty graph.
    #[error("invalid submission: {message}")]
    Validation { message: String },

    /// Invalid executor configuration.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A task ran and failed after exhausting its retries.
    #[error("task '{task_id}' failed: {error}")]
    TaskFailed {
        task_id: String,
        error: Arc<anyhow::Error>,
    },

    /// A task never ran because an upstream dependency failed.
    #[error("task '{task_id}' skipped: an upstream dependency failed")]
    Skipped { task_id: String },

    /// At least one task of the run failed or was skipped. Carries the
    /// aggregated results of the tasks that did complete.
    #[error("run completed with failures")]
    RunFailed { completed: Value },
}

impl TaskFlowError {
    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// Convenience result type using [`TaskFlowError`].
pub type Result<T> = std::result::Result<T, TaskFlowError>;
