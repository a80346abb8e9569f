//! Agent contract - the interface every pluggable agent implements.
//!
//! An agent is a pure function from a state snapshot to a state patch. It
//! never mutates the snapshot, must populate its own result slot, may append
//! messages and progress, and must not write the error log (the retry
//! wrapper owns that). Re-invocation with the same snapshot must produce an
//! equivalent patch. The kernel treats the agent body as opaque.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::AgentFailure;
use crate::state::{RunState, StatePatch};
use crate::stream::{StreamCoordinator, StreamEvent, UpdateStatus};

// ============================================================================
// AGENT CONTEXT
// ============================================================================

/// Handle an agent uses to report progress while it runs.
///
/// Emissions are queued per agent and re-serialized by the streaming
/// coordinator after the group settles, so concurrent agents never interleave
/// on the wire.
pub struct AgentContext {
    agent: String,
    coordinator: Arc<StreamCoordinator>,
    progress_percent: u8,
}

impl AgentContext {
    pub fn new(
        agent: impl Into<String>,
        coordinator: Arc<StreamCoordinator>,
        progress_percent: u8,
    ) -> Self {
        let agent = agent.into();
        coordinator.register(&agent);
        Self {
            agent,
            coordinator,
            progress_percent,
        }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Queue an `agent_update` event for the subscriber.
    pub fn update(
        &self,
        message: impl Into<String>,
        data: serde_json::Value,
        status: UpdateStatus,
    ) {
        self.coordinator.queue(
            &self.agent,
            StreamEvent::AgentUpdate {
                agent: self.agent.clone(),
                message: message.into(),
                data,
                progress: self.progress_percent,
                status,
            },
        );
    }
}

// ============================================================================
// AGENT TRAIT
// ============================================================================

/// A specialized collaborator plugged into the orchestration kernel.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Canonical name, unique within a registry.
    fn name(&self) -> &str;

    /// Human-readable description for listings.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Produce a patch from the snapshot, or fail. The returned patch must
    /// contain a result record under [`Agent::name`].
    async fn run(&self, snapshot: &RunState, ctx: &AgentContext)
        -> Result<StatePatch, AgentFailure>;
}

// ============================================================================
// AGENT REGISTRY
// ============================================================================

/// Mapping from canonical agent name to implementation, populated at
/// startup. The kernel never hard-codes a list of agents.
#[derive(Default)]
pub struct AgentRegistry {
    agents: BTreeMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under its canonical name. A later registration for
    /// the same name replaces the earlier one.
    pub fn register(&mut self, agent: impl Agent + 'static) {
        self.agents
            .insert(agent.name().to_string(), Arc::new(agent));
    }

    pub fn register_arc(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.name().to_string(), agent);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }

    /// Name/description pairs for listings.
    pub fn descriptions(&self) -> Vec<(String, Option<String>)> {
        self.agents
            .values()
            .map(|a| (a.name().to_string(), a.description().map(String::from)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================
