//! State patches - the only way state gets mutated.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::types::{ErrorEntry, MessageRecord, ProgressEntry, ResultRecord};

/// A partial update to the run state.
///
/// Merge semantics applied by [`super::StateStore::apply`]:
/// - `messages`, `progress`, `errors` are *accumulating*: entries are
///   appended, never replaced.
/// - `results`, `context`, `dependencies` are key-merged, last write wins
///   per key.
/// - Scalars (`current_agent`, `task_description`, `current_group`,
///   `current_step`, `is_complete`) overwrite when present.
/// - `execution_plan` and `parallel_groups` are replaced wholesale, subject
///   to augment-only and levelization validation.
///
/// Unknown fields are rejected on deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StatePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_plan: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<BTreeMap<String, BTreeSet<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_groups: Option<Vec<BTreeSet<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_group: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<MessageRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub progress: Vec<ProgressEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorEntry>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub results: BTreeMap<String, ResultRecord>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_complete: Option<bool>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(mut self, message: MessageRecord) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_progress(mut self, entry: ProgressEntry) -> Self {
        self.progress.push(entry);
        self
    }

    pub fn with_error(mut self, entry: ErrorEntry) -> Self {
        self.errors.push(entry);
        self
    }

    pub fn with_result(mut self, agent: impl Into<String>, record: ResultRecord) -> Self {
        self.results.insert(agent.into(), record);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_current_agent(mut self, agent: impl Into<String>) -> Self {
        self.current_agent = Some(agent.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.current_agent.is_none()
            && self.task_description.is_none()
            && self.execution_plan.is_none()
            && self.dependencies.is_none()
            && self.parallel_groups.is_none()
            && self.current_group.is_none()
            && self.current_step.is_none()
            && self.messages.is_empty()
            && self.progress.is_empty()
            && self.errors.is_empty()
            && self.results.is_empty()
            && self.context.is_empty()
            && self.is_complete.is_none()
    }

    /// Whether this patch writes the error log. Agents are not allowed to;
    /// the retry wrapper owns that log.
    pub fn touches_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::types::ProgressAction;
    use serde_json::json;

    #[test]
    fn test_empty_patch() {
        let patch = StatePatch::new();
        assert!(patch.is_empty());
        assert!(!patch.touches_errors());
    }

    #[test]
    fn test_builder_accumulates() {
        let patch = StatePatch::new()
            .with_message(MessageRecord::assistant("search", "found 3 entries"))
            .with_result("search", ResultRecord::success(json!({"hits": 3})))
            .with_context("document_ready", json!(true))
            .with_progress(ProgressEntry::new("search", ProgressAction::Completed));

        assert!(!patch.is_empty());
        assert_eq!(patch.messages.len(), 1);
        assert_eq!(patch.results.len(), 1);
        assert!(patch.context.contains_key("document_ready"));
    }

    #[test]
    fn test_patch_rejects_unknown_fields() {
        let raw = json!({"results": {}, "next_agent": "search"});
        let parsed: Result<StatePatch, _> = serde_json::from_value(raw);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_patch_serde_skips_empty() {
        let patch = StatePatch::new().with_context("k", json!(1));
        let value = serde_json::to_value(&patch).unwrap();
        let obj = value.as_object().unwrap();
        assert!(obj.contains_key("context"));
        assert!(!obj.contains_key("messages"));
        assert!(!obj.contains_key("execution_plan"));
    }
}
