//! Record types that make up the shared run state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::ErrorKind;
use crate::types::ThreadId;

// ============================================================================
// MESSAGES
// ============================================================================

/// Who authored a message record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// One entry in the append-only conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

impl MessageRecord {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            agent: None,
        }
    }

    pub fn assistant(agent: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            agent: Some(agent.into()),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            timestamp: Utc::now(),
            agent: None,
        }
    }
}

// ============================================================================
// PROGRESS
// ============================================================================

/// Lifecycle actions recorded in the append-only progress log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressAction {
    Started,
    Completed,
    Failed,
    Fallback,
}

/// One entry in the append-only progress log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub agent: String,
    pub action: ProgressAction,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl ProgressEntry {
    pub fn new(agent: impl Into<String>, action: ProgressAction) -> Self {
        Self {
            agent: agent.into(),
            action,
            timestamp: Utc::now(),
            meta: None,
        }
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// One entry in the append-only error log. Only the retry wrapper and the
/// streaming coordinator write these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub agent: String,
    pub error_message: String,
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    pub kind: ErrorKind,
}

impl ErrorEntry {
    pub fn new(
        agent: impl Into<String>,
        error_message: impl Into<String>,
        attempt: u32,
        kind: ErrorKind,
    ) -> Self {
        Self {
            agent: agent.into(),
            error_message: error_message.into(),
            attempt,
            timestamp: Utc::now(),
            kind,
        }
    }
}

// ============================================================================
// RESULTS
// ============================================================================

/// Outcome discriminant for an agent's result slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Error,
    Fallback,
}

/// Per-agent result record. Write-once per run: a retry overwrites, and a
/// fresh re-invocation after a rework signal overwrites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub status: ResultStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ResultRecord {
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            status: ResultStatus::Success,
            timestamp: Utc::now(),
            message: None,
            data,
        }
    }

    /// A degraded, canned record installed when retries are exhausted or the
    /// breaker is open.
    pub fn fallback(message: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Fallback,
            timestamp: Utc::now(),
            message: Some(message.into()),
            data: serde_json::Value::Null,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Whether this record counts as settled for plan completion.
    pub fn is_settled(&self) -> bool {
        matches!(self.status, ResultStatus::Success | ResultStatus::Fallback)
    }
}

// ============================================================================
// RUN STATE
// ============================================================================

/// The shared state accumulated across one run.
///
/// Unknown fields are rejected on deserialization so that a persisted
/// snapshot always round-trips the full schema and nothing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunState {
    /// Session identifier, stable across resumptions.
    pub thread_id: ThreadId,
    /// Append-only conversation log.
    pub messages: Vec<MessageRecord>,
    /// Agent currently executing, if any.
    pub current_agent: Option<String>,
    /// Canonical, preprocessed request string.
    pub task_description: String,
    /// Ordered sequence of agent names to visit. Also defines the canonical
    /// order used to serialize outbound events within a parallel group.
    pub execution_plan: Vec<String>,
    /// Agent name -> set of agents that must have completed first.
    pub dependencies: BTreeMap<String, BTreeSet<String>>,
    /// Levelized form of `(execution_plan, dependencies)`.
    pub parallel_groups: Vec<BTreeSet<String>>,
    /// Index of the next group to execute; monotonically non-decreasing.
    pub current_group: usize,
    /// Index into `execution_plan` for sequential bookkeeping.
    pub current_step: usize,
    /// Agent name -> result record.
    pub results: BTreeMap<String, ResultRecord>,
    /// Free-form hints and flags exchanged between planner, router and agents.
    pub context: BTreeMap<String, serde_json::Value>,
    /// Append-only progress log.
    pub progress: Vec<ProgressEntry>,
    /// Append-only error log.
    pub errors: Vec<ErrorEntry>,
    /// Terminal flag set by the router.
    pub is_complete: bool,
}

impl RunState {
    pub fn new(thread_id: ThreadId) -> Self {
        Self {
            thread_id,
            messages: Vec::new(),
            current_agent: None,
            task_description: String::new(),
            execution_plan: Vec::new(),
            dependencies: BTreeMap::new(),
            parallel_groups: Vec::new(),
            current_group: 0,
            current_step: 0,
            results: BTreeMap::new(),
            context: BTreeMap::new(),
            progress: Vec::new(),
            errors: Vec::new(),
            is_complete: false,
        }
    }

    /// Number of error entries attributed to one agent.
    pub fn error_count_for(&self, agent: &str) -> usize {
        self.errors.iter().filter(|e| e.agent == agent).count()
    }

    /// Whether every planned agent has a settled result.
    pub fn plan_settled(&self) -> bool {
        !self.execution_plan.is_empty()
            && self
                .execution_plan
                .iter()
                .all(|a| self.results.get(a).is_some_and(ResultRecord::is_settled))
    }

    /// Overall completion as a percentage of the plan.
    pub fn completion_percent(&self) -> u8 {
        if self.execution_plan.is_empty() {
            return 0;
        }
        let settled = self
            .execution_plan
            .iter()
            .filter(|a| self.results.contains_key(*a))
            .count();
        ((settled * 100) / self.execution_plan.len()).min(100) as u8
    }

    /// A context flag interpreted as boolean, defaulting to false.
    pub fn context_flag(&self, key: &str) -> bool {
        self.context
            .get(key)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// A context string value, if present.
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(serde_json::Value::as_str)
    }
}

// ============================================================================
// TESTS
// ============================================================================
