//! Aggregation-focused tests built on closure tasks: fan-in across
//! independent roots, partial aggregates after failures, and the
//! inspection API.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use taskflow::{Executor, FnTask, RetryPolicy, TaskFlowError, TaskSpec, TaskState};

fn constant(value: Value) -> FnTask {
    FnTask::new(move |_payload| {
        let value = value.clone();
        async move { Ok(value) }
    })
}

#[tokio::test]
async fn fan_in_across_independent_roots_follows_submission_order() {
    let executor = Executor::new(None, None, None).unwrap();
    let seen = Arc::new(Mutex::new(Value::Null));
    let seen_in_task = Arc::clone(&seen);

    let specs = vec![
        TaskSpec::new(constant(json!(1)).named("x")),
        TaskSpec::new(constant(json!(2)).named("x")),
        TaskSpec::new(FnTask::new(move |payload| {
            let seen = Arc::clone(&seen_in_task);
            async move {
                *seen.lock().unwrap() = payload.clone();
                Ok(json!(payload["x"].as_array().map(|v| v.len())))
            }
        })
        .named("count"))
        .after(["0", "1"]),
    ];
    let all = executor.run_and_wait(specs).await.unwrap();

    assert_eq!(*seen.lock().unwrap(), json!({"x": [1, 2]}));
    assert_eq!(all, json!({"x": [1, 2], "count": 2}));
}

#[tokio::test]
async fn partial_aggregate_excludes_failed_and_skipped_tasks() {
    let executor = Executor::new(None, None, None).unwrap();
    let specs = vec![
        TaskSpec::new(constant(json!("root"))),
        TaskSpec::new(FnTask::new(|_payload| async {
            Err(anyhow!("boom"))
        }))
        .after(["0"]),
        TaskSpec::new(constant(json!("leaf"))).after(["1"]),
        TaskSpec::new(constant(json!("side"))),
    ];
    let err = executor.run_and_wait(specs).await.unwrap_err();

    match err {
        TaskFlowError::RunFailed { completed } => {
            assert_eq!(completed, json!({"0": "root", "3": "side"}));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(executor.results().await, json!({"0": "root", "3": "side"}));
    assert_eq!(executor.task_state("1").await, Some(TaskState::Error));
    assert_eq!(executor.task_state("2").await, Some(TaskState::Skipped));
}

#[tokio::test]
async fn closure_tasks_retry_like_any_other_task() {
    let executor = Executor::new(None, None, None).unwrap();
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_in_task = Arc::clone(&attempts);

    let flaky = FnTask::new(move |_payload| {
        let attempts = Arc::clone(&attempts_in_task);
        async move {
            if attempts.fetch_add(1, Ordering::SeqCst) < 1 {
                Err(anyhow!("transient"))
            } else {
                Ok(json!("recovered"))
            }
        }
    })
    .with_retries(RetryPolicy::new(1, Duration::from_millis(1)));

    let all = executor.run_and_wait(vec![TaskSpec::new(flaky)]).await.unwrap();
    assert_eq!(all, json!({"0": "recovered"}));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn inspection_api_reflects_the_submitted_graph() {
    let executor = Executor::new(None, None, None).unwrap();
    let specs = vec![
        TaskSpec::new(constant(json!("a"))).with_id("alpha"),
        TaskSpec::new(constant(json!("b")).named("beta")).after(["alpha"]),
    ];
    let submission = executor.run(specs).await.unwrap();

    assert_eq!(submission.tasks.len(), 2);
    assert_eq!(submission.tasks[0].id, "alpha");
    assert_eq!(submission.tasks[0].name, "alpha");
    assert_eq!(submission.tasks[1].id, "1");
    assert_eq!(submission.tasks[1].name, "beta");
    assert_eq!(submission.tasks[1].index, 1);

    for handle in executor.handles().await {
        handle.wait().await.unwrap();
    }
    assert_eq!(executor.tasks().await, submission.tasks);
    assert_eq!(executor.task_state("nope").await, None);
    assert_eq!(
        executor.results().await,
        json!({"alpha": "a", "beta": "b"})
    );
}
