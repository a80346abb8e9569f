//! Thread-safe state container.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{EngineError, EngineResult};
use crate::plan::validate_levelization;

use super::patch::StatePatch;
use super::types::{
    ErrorEntry, MessageRecord, ProgressAction, ProgressEntry, ResultRecord, RunState,
};

/// Run-scoped container for the shared state.
///
/// All mutation goes through [`StateStore::apply`] (or the atomic append
/// helpers, which are single-field patches in disguise). Reads always return
/// a deep copy taken under the same lock, so readers never observe mutations
/// made after their call returns. No await points exist inside the critical
/// sections.
pub struct StateStore {
    inner: Mutex<RunState>,
}

impl StateStore {
    pub fn new(state: RunState) -> Self {
        Self {
            inner: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deep copy of the current state.
    pub fn snapshot(&self) -> RunState {
        self.lock().clone()
    }

    /// Validate and merge a patch. On rejection the state is untouched.
    pub fn apply(&self, patch: &StatePatch) -> EngineResult<()> {
        let mut guard = self.lock();
        let mut next = guard.clone();
        merge_into(&mut next, patch)?;
        *guard = next;
        Ok(())
    }

    /// Append a single message record.
    pub fn append_message(&self, message: MessageRecord) {
        self.lock().messages.push(message);
    }

    /// Append a single progress entry.
    pub fn append_progress(&self, entry: ProgressEntry) {
        self.lock().progress.push(entry);
    }

    /// Append a single error entry.
    pub fn append_error(&self, entry: ErrorEntry) {
        self.lock().errors.push(entry);
    }

    /// Replace an agent's result slot. Records a `completed` progress entry
    /// unless the caller indicates a fallback (the fallback path records its
    /// own `fallback` entry).
    pub fn set_result(&self, agent: &str, record: ResultRecord, fallback_used: bool) {
        let mut guard = self.lock();
        guard.results.insert(agent.to_string(), record);
        if !fallback_used {
            guard
                .progress
                .push(ProgressEntry::new(agent, ProgressAction::Completed));
        }
    }

    /// Set or clear the currently executing agent.
    pub fn set_current_agent(&self, agent: Option<String>) {
        self.lock().current_agent = agent;
    }

    /// Advance to the next parallel group, returning the new index.
    pub fn advance_group(&self) -> usize {
        let mut guard = self.lock();
        guard.current_group += 1;
        guard.current_group
    }

    /// Set the terminal flag.
    pub fn mark_complete(&self) {
        self.lock().is_complete = true;
    }
}

/// Merge a patch into a state copy, validating every field.
fn merge_into(state: &mut RunState, patch: &StatePatch) -> EngineResult<()> {
    if let Some(group) = patch.current_group {
        if group < state.current_group {
            return Err(EngineError::InvalidStateUpdate(format!(
                "current_group may not decrease ({} -> {})",
                state.current_group, group
            )));
        }
    }

    if let Some(plan) = &patch.execution_plan {
        if !plan.starts_with(&state.execution_plan) {
            return Err(EngineError::InvalidStateUpdate(
                "execution_plan may only be augmented, never shrunk or reordered".into(),
            ));
        }
        let mut seen = std::collections::BTreeSet::new();
        for agent in plan {
            if !seen.insert(agent.as_str()) {
                return Err(EngineError::InvalidStateUpdate(format!(
                    "duplicate agent in execution_plan: {agent}"
                )));
            }
        }
    }

    // Scalars overwrite.
    if let Some(agent) = &patch.current_agent {
        state.current_agent = Some(agent.clone());
    }
    if let Some(task) = &patch.task_description {
        state.task_description = task.clone();
    }
    if let Some(plan) = &patch.execution_plan {
        state.execution_plan = plan.clone();
    }
    if let Some(deps) = &patch.dependencies {
        for (agent, agent_deps) in deps {
            state.dependencies.insert(agent.clone(), agent_deps.clone());
        }
    }
    if let Some(groups) = &patch.parallel_groups {
        state.parallel_groups = groups.clone();
    }
    if let Some(group) = patch.current_group {
        state.current_group = group;
    }
    if let Some(step) = patch.current_step {
        state.current_step = step;
    }
    if let Some(complete) = patch.is_complete {
        state.is_complete = complete;
    }

    // Accumulating sequences are appended.
    state.messages.extend(patch.messages.iter().cloned());
    state.progress.extend(patch.progress.iter().cloned());
    state.errors.extend(patch.errors.iter().cloned());

    // Mappings are key-merged, last write wins per key.
    for (agent, record) in &patch.results {
        state.results.insert(agent.clone(), record.clone());
    }
    for (key, value) in &patch.context {
        state.context.insert(key.clone(), value.clone());
    }

    // Structural invariants, re-checked whenever the plan shape changed.
    let touches_structure = patch.execution_plan.is_some()
        || patch.dependencies.is_some()
        || patch.parallel_groups.is_some();
    if touches_structure {
        validate_levelization(
            &state.execution_plan,
            &state.dependencies,
            &state.parallel_groups,
        )
        .map_err(EngineError::InvalidStateUpdate)?;
        if state.current_group > state.parallel_groups.len() {
            return Err(EngineError::InvalidStateUpdate(format!(
                "current_group {} exceeds group count {}",
                state.current_group,
                state.parallel_groups.len()
            )));
        }
    }

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ThreadId;
    use serde_json::json;
    use std::collections::{BTreeMap, BTreeSet};

    fn group(agents: &[&str]) -> BTreeSet<String> {
        agents.iter().map(|a| a.to_string()).collect()
    }

    fn planned_store() -> StateStore {
        let store = StateStore::new(RunState::new(ThreadId::new("t")));
        let patch = StatePatch {
            execution_plan: Some(vec!["search".into(), "document".into()]),
            dependencies: Some(BTreeMap::from([(
                "document".to_string(),
                BTreeSet::from(["search".to_string()]),
            )])),
            parallel_groups: Some(vec![group(&["search"]), group(&["document"])]),
            ..Default::default()
        };
        store.apply(&patch).unwrap();
        store
    }

    #[test]
    fn test_snapshot_is_deep_copy() {
        let store = StateStore::new(RunState::new(ThreadId::new("t")));
        let before = store.snapshot();
        store.append_message(MessageRecord::user("hi"));
        assert!(before.messages.is_empty());
        assert_eq!(store.snapshot().messages.len(), 1);
    }

    #[test]
    fn test_apply_accumulates_sequences() {
        let store = StateStore::new(RunState::new(ThreadId::new("t")));
        let patch = StatePatch::new()
            .with_message(MessageRecord::user("one"))
            .with_progress(ProgressEntry::new("supervisor", ProgressAction::Completed));
        store.apply(&patch).unwrap();
        store.apply(&patch).unwrap();

        let state = store.snapshot();
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.progress.len(), 2);
    }

    #[test]
    fn test_apply_merges_maps() {
        let store = StateStore::new(RunState::new(ThreadId::new("t")));
        store
            .apply(&StatePatch::new().with_context("a", json!(1)))
            .unwrap();
        store
            .apply(
                &StatePatch::new()
                    .with_context("a", json!(2))
                    .with_context("b", json!(true)),
            )
            .unwrap();

        let state = store.snapshot();
        assert_eq!(state.context["a"], json!(2));
        assert_eq!(state.context["b"], json!(true));
    }

    #[test]
    fn test_rejected_patch_leaves_state_untouched() {
        let store = planned_store();
        let bad = StatePatch {
            execution_plan: Some(vec!["document".into()]),
            messages: vec![MessageRecord::user("should not land")],
            ..Default::default()
        };
        let err = store.apply(&bad).unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateUpdate(_)));

        let state = store.snapshot();
        assert_eq!(state.execution_plan.len(), 2);
        assert!(state.messages.is_empty());
    }

    #[test]
    fn test_current_group_monotone() {
        let store = planned_store();
        store
            .apply(&StatePatch {
                current_group: Some(1),
                ..Default::default()
            })
            .unwrap();
        let err = store
            .apply(&StatePatch {
                current_group: Some(0),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateUpdate(_)));
    }

    #[test]
    fn test_plan_augment_only() {
        let store = planned_store();
        // Appending is fine.
        store
            .apply(&StatePatch {
                execution_plan: Some(vec![
                    "search".into(),
                    "document".into(),
                    "compliance".into(),
                ]),
                dependencies: Some(BTreeMap::from([(
                    "compliance".to_string(),
                    BTreeSet::from(["document".to_string()]),
                )])),
                parallel_groups: Some(vec![
                    group(&["search"]),
                    group(&["document"]),
                    group(&["compliance"]),
                ]),
                ..Default::default()
            })
            .unwrap();

        // Reordering is rejected.
        let err = store
            .apply(&StatePatch {
                execution_plan: Some(vec![
                    "document".into(),
                    "search".into(),
                    "compliance".into(),
                ]),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateUpdate(_)));
    }

    #[test]
    fn test_invalid_levelization_rejected() {
        let store = StateStore::new(RunState::new(ThreadId::new("t")));
        // document depends on search but shares its group.
        let patch = StatePatch {
            execution_plan: Some(vec!["search".into(), "document".into()]),
            dependencies: Some(BTreeMap::from([(
                "document".to_string(),
                BTreeSet::from(["search".to_string()]),
            )])),
            parallel_groups: Some(vec![group(&["search", "document"])]),
            ..Default::default()
        };
        let err = store.apply(&patch).unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateUpdate(_)));
    }

    #[test]
    fn test_set_result_records_progress() {
        let store = planned_store();
        store.set_result("search", ResultRecord::success(json!({"hits": 2})), false);
        let state = store.snapshot();
        assert!(state.results.contains_key("search"));
        assert!(state
            .progress
            .iter()
            .any(|p| p.agent == "search" && p.action == ProgressAction::Completed));

        // Fallback path records no completed entry here.
        store.set_result("document", ResultRecord::fallback("degraded"), true);
        let state = store.snapshot();
        assert!(!state
            .progress
            .iter()
            .any(|p| p.agent == "document" && p.action == ProgressAction::Completed));
    }

    #[test]
    fn test_advance_group() {
        let store = planned_store();
        assert_eq!(store.advance_group(), 1);
        assert_eq!(store.advance_group(), 2);
        assert_eq!(store.snapshot().current_group, 2);
    }
}
