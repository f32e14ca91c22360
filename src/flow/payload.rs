//! Result storage and ancestor payload aggregation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};

use super::state::RunState;
use super::task::{TaskId, TaskState};

/// Store of completed task results, keyed by task id.
///
/// Each slot is written exactly once, before the task's `Done` state is
/// published; aggregation reads it from concurrently running tasks.
#[derive(Debug, Default, Clone)]
pub struct ResultStore {
    data: Arc<DashMap<TaskId, Value>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: &str, value: Value) {
        self.data.insert(id.to_string(), value);
    }

    pub fn get(&self, id: &str) -> Option<Value> {
        self.data.get(id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Collect the ids of every transitive ancestor of `target`, deduplicated,
/// the target itself excluded.
pub(crate) fn ancestors_of(state: &RunState, target: &str) -> HashSet<TaskId> {
    let mut collected: HashSet<TaskId> = HashSet::new();
    let mut stack: Vec<TaskId> = state.records[target].parents.clone();
    while let Some(id) = stack.pop() {
        if collected.insert(id.clone()) {
            stack.extend(state.records[&id].parents.iter().cloned());
        }
    }
    collected
}

/// Merge ancestor results into the input payload for `target`, or into the
/// whole-run aggregate when no target is given.
///
/// Only `Done` ancestors contribute. Ancestors sharing a display name fan
/// into a list-valued entry; scalar entries and fan-in lists both follow
/// overall submission order, not graph order.
pub(crate) fn aggregate(state: &RunState, results: &ResultStore, target: Option<&str>) -> Value {
    let scope: HashSet<TaskId> = match target {
        Some(id) => ancestors_of(state, id),
        None => state.order.iter().cloned().collect(),
    };

    let mut name_counts: HashMap<&str, usize> = HashMap::new();
    for id in &state.order {
        if scope.contains(id) {
            *name_counts.entry(state.records[id].name.as_str()).or_default() += 1;
        }
    }

    let mut merged = Map::new();
    for id in &state.order {
        if !scope.contains(id) || state.state_of(id) != Some(TaskState::Done) {
            continue;
        }
        let Some(result) = results.get(id) else {
            continue;
        };
        let name = &state.records[id].name;
        if name_counts.get(name.as_str()).copied().unwrap_or(0) > 1 {
            let entry = merged
                .entry(name.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(values) = entry {
                values.push(result);
            }
        } else {
            merged.insert(name.clone(), result);
        }
    }
    Value::Object(merged)
}
