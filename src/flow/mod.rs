pub mod events;
pub mod executor;
pub mod graph;
pub mod payload;
pub mod state;
pub mod task;

pub use events::{BufferingSink, LoggingSink, PayloadAdapter, ProgressSink, TaskTransition};
pub use executor::{Executor, ExecutorConfig, Submission};
pub use payload::ResultStore;
pub use task::{
    FnTask, RetryPolicy, Task, TaskHandle, TaskId, TaskMeta, TaskSpec, TaskState, TaskTermination,
};
