//! # maestro-agents
//!
//! Reference domain agents for the maestro orchestration engine:
//! analytics, search, document, and compliance. Each is a deterministic
//! implementation over an embedded mock dataset, useful for development and
//! as the template for production agents.

mod analytics;
mod compliance;
pub mod data;
mod document;
mod search;

pub use analytics::AnalyticsAgent;
pub use compliance::ComplianceAgent;
pub use document::DocumentAgent;
pub use search::SearchAgent;

use maestro_core::AgentRegistry;

/// Registry preloaded with all four reference agents.
pub fn default_registry() -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    registry.register(AnalyticsAgent::new());
    registry.register(SearchAgent::new());
    registry.register(DocumentAgent::new());
    registry.register(ComplianceAgent::new());
    registry
}
