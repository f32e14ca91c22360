//! Submission normalization and dependency wiring.
//!
//! A submission is validated as a whole before any of it is committed to
//! the run state: duplicate ids, unresolvable dependency references and
//! dependency cycles all reject the submission and leave the executor
//! untouched.

use std::collections::HashMap;

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::core::errors::{Result, TaskFlowError};

use super::state::RunState;
use super::task::{TaskId, TaskRecord, TaskSpec};

/// Normalize one submission into task records and wire parent/child edges
/// in both directions. Returns the new ids in submission order.
///
/// In serial mode each task's sole parent is its predecessor: within the
/// batch the previous task, for the first task of the batch the previously
/// last-submitted task (if any). Otherwise `depends_on` references are
/// resolved against the batch and all previously submitted tasks.
pub(crate) fn build(
    state: &mut RunState,
    specs: Vec<TaskSpec>,
    serial: bool,
) -> Result<Vec<TaskId>> {
    let base = state.order.len();
    let mut new_ids: Vec<TaskId> = Vec::with_capacity(specs.len());
    let mut records: Vec<TaskRecord> = Vec::with_capacity(specs.len());
    let mut deps: Vec<Vec<String>> = Vec::with_capacity(specs.len());

    for (offset, spec) in specs.into_iter().enumerate() {
        let index = base + offset;
        let id = spec.id.unwrap_or_else(|| index.to_string());
        if state.records.contains_key(&id) || new_ids.contains(&id) {
            return Err(TaskFlowError::validation(format!(
                "duplicate task id '{id}'"
            )));
        }
        let name = spec.task.name().unwrap_or_else(|| id.clone());
        new_ids.push(id.clone());
        deps.push(spec.depends_on);
        records.push(TaskRecord {
            id,
            name,
            index,
            task: spec.task,
            parents: Vec::new(),
            children: Vec::new(),
        });
    }

    let mut edges: Vec<(TaskId, TaskId)> = Vec::new();
    if serial {
        for (offset, id) in new_ids.iter().enumerate() {
            let parent = if offset == 0 {
                state.order.last().cloned()
            } else {
                Some(new_ids[offset - 1].clone())
            };
            if let Some(parent) = parent {
                edges.push((parent, id.clone()));
            }
        }
    } else {
        for (offset, task_deps) in deps.iter().enumerate() {
            for dep in task_deps {
                if !state.records.contains_key(dep.as_str()) && !new_ids.contains(dep) {
                    return Err(TaskFlowError::validation(format!(
                        "task '{}' depends on unknown task '{dep}'",
                        new_ids[offset]
                    )));
                }
                edges.push((dep.clone(), new_ids[offset].clone()));
            }
        }
    }

    validate_acyclic(state, &new_ids, &edges)?;

    for record in records {
        debug!(task = %record.id, name = %record.name, "task registered");
        state.order.push(record.id.clone());
        state.records.insert(record.id.clone(), record);
    }
    for (parent, child) in edges {
        if let Some(record) = state.records.get_mut(&parent) {
            record.children.push(child.clone());
        }
        if let Some(record) = state.records.get_mut(&child) {
            record.parents.push(parent);
        }
    }

    Ok(new_ids)
}

/// Reject a submission whose edges would close a cycle over the combined
/// graph of existing and new tasks.
fn validate_acyclic(state: &RunState, new_ids: &[TaskId], edges: &[(TaskId, TaskId)]) -> Result<()> {
    let mut graph: DiGraph<(), ()> = DiGraph::new();
    let mut indices: HashMap<TaskId, NodeIndex> = HashMap::new();
    for id in state.order.iter().chain(new_ids.iter()) {
        indices.insert(id.clone(), graph.add_node(()));
    }
    for (id, record) in &state.records {
        for child in &record.children {
            graph.add_edge(indices[id], indices[child], ());
        }
    }
    for (parent, child) in edges {
        graph.add_edge(indices[parent], indices[child], ());
    }
    if is_cyclic_directed(&graph) {
        return Err(TaskFlowError::validation(
            "dependency cycle detected in submission",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::task::FnTask;
    use serde_json::json;

    fn spec() -> TaskSpec {
        TaskSpec::new(FnTask::new(|_payload| async { Ok(json!(null)) }))
    }

    #[test]
    fn assigns_positional_ids_and_wires_both_directions() {
        let mut state = RunState::new();
        let ids = build(
            &mut state,
            vec![spec(), spec().after(["0"]), spec().after(["0", "1"])],
            false,
        )
        .unwrap();
        assert_eq!(ids, vec!["0", "1", "2"]);
        assert_eq!(state.records["0"].children, vec!["1", "2"]);
        assert_eq!(state.records["2"].parents, vec!["0", "1"]);
        assert!(state.records["0"].parents.is_empty());
    }

    #[test]
    fn forward_references_resolve_within_a_batch() {
        let mut state = RunState::new();
        build(&mut state, vec![spec().after(["1"]), spec()], false).unwrap();
        assert_eq!(state.records["0"].parents, vec!["1"]);
        assert_eq!(state.records["1"].children, vec!["0"]);
    }

    #[test]
    fn serial_mode_chains_tasks_across_batches() {
        let mut state = RunState::new();
        build(&mut state, vec![spec(), spec()], true).unwrap();
        let ids = build(&mut state, vec![spec()], true).unwrap();
        assert_eq!(ids, vec!["2"]);
        assert_eq!(state.records["1"].parents, vec!["0"]);
        assert_eq!(state.records["2"].parents, vec!["1"]);
        assert_eq!(state.records["1"].children, vec!["2"]);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut state = RunState::new();
        let err = build(
            &mut state,
            vec![spec().with_id("a"), spec().with_id("a")],
            false,
        )
        .unwrap_err();
        assert!(matches!(err, TaskFlowError::Validation { .. }));
        assert!(state.order.is_empty());
    }

    #[test]
    fn unknown_dependencies_are_rejected() {
        let mut state = RunState::new();
        let err = build(&mut state, vec![spec().after(["missing"])], false).unwrap_err();
        assert!(matches!(err, TaskFlowError::Validation { .. }));
        assert!(state.order.is_empty());
    }

    #[test]
    fn cycles_are_rejected_before_committing() {
        let mut state = RunState::new();
        let err = build(
            &mut state,
            vec![spec().after(["1"]), spec().after(["0"])],
            false,
        )
        .unwrap_err();
        assert!(matches!(err, TaskFlowError::Validation { .. }));
        assert!(state.order.is_empty());
        assert!(state.records.is_empty());
    }
}
