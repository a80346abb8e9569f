//! Error types for the orchestration engine.
//!
//! Two layers exist:
//! - [`EngineError`] — kernel-scoped failures that terminate a run
//!   (cyclic plans, invariant violations, rejected state updates).
//! - [`AgentFailure`] — agent-scoped failures that stay local to one
//!   invocation and are recovered by the retry wrapper.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// ERROR KIND TAXONOMY
// ============================================================================

/// Classification for every surfaced error, carried on error events,
/// `errors` entries, and agent failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed subscriber message; surfaced before any state mutation.
    InvalidInput,
    /// An agent returned a patch violating the state schema.
    InvalidStateUpdate,
    /// An agent did not return within the configured timeout.
    AgentTimeout,
    /// An agent failed; handled by retry/breaker.
    #[default]
    AgentFailure,
    /// The dependency graph contains a cycle; fatal to the run.
    CyclicPlan,
    /// The planner could not classify the request; run continues degraded.
    PlannerDegraded,
    /// Subscriber backpressure caused event loss.
    StreamDropped,
    /// An invocation short-circuited to a fallback via the open breaker.
    BreakerOpen,
    /// Invariant violation inside the kernel itself.
    FatalKernel,
}

// ============================================================================
// ENGINE ERRORS (kernel-scoped)
// ============================================================================

/// Kernel-level errors. These terminate the run and are surfaced to the
/// subscriber; agent-scoped failures never appear here.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid state update: {0}")]
    InvalidStateUpdate(String),

    #[error("Cyclic dependency graph involving agents: {0:?}")]
    CyclicPlan(Vec<String>),

    #[error("Agent not registered: {0}")]
    AgentNotFound(String),

    #[error("Subscriber disconnected")]
    SubscriberGone,

    #[error("Checkpoint store error: {0}")]
    Checkpoint(String),

    #[error("Fatal kernel error: {0}")]
    Fatal(String),
}

impl EngineError {
    /// The taxonomy kind this error surfaces as.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidInput(_) => ErrorKind::InvalidInput,
            EngineError::InvalidStateUpdate(_) => ErrorKind::InvalidStateUpdate,
            EngineError::CyclicPlan(_) => ErrorKind::CyclicPlan,
            EngineError::AgentNotFound(_) | EngineError::Fatal(_) => ErrorKind::FatalKernel,
            EngineError::SubscriberGone => ErrorKind::StreamDropped,
            EngineError::Checkpoint(_) => ErrorKind::FatalKernel,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

// ============================================================================
// AGENT FAILURES (agent-scoped)
// ============================================================================

/// A failure raised by (or on behalf of) a single agent invocation.
///
/// The retry wrapper is the only code that catches and classifies these;
/// agents return them instead of using panics as control flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentFailure {
    pub agent: String,
    pub message: String,
    pub kind: ErrorKind,
    pub retriable: bool,
}

impl AgentFailure {
    pub fn new(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            message: message.into(),
            kind: ErrorKind::AgentFailure,
            retriable: true,
        }
    }

    /// A timeout failure synthesized by the retry wrapper.
    pub fn timeout(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            message: "agent did not return within the configured timeout".into(),
            kind: ErrorKind::AgentTimeout,
            retriable: true,
        }
    }

    /// A schema-violation failure synthesized when a patch is rejected.
    pub fn invalid_patch(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            message: message.into(),
            kind: ErrorKind::InvalidStateUpdate,
            retriable: true,
        }
    }

    pub fn non_retriable(mut self) -> Self {
        self.retriable = false;
        self
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }
}

impl fmt::Display for AgentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.agent, self.message)
    }
}

impl std::error::Error for AgentFailure {}

// ============================================================================
// TESTS
// ============================================================================
