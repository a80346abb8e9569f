//! Planning: request classification and dependency-aware grouping.

mod grouper;
mod supervisor;

pub use grouper::{levelize, validate_levelization};
pub use supervisor::{Intent, PlanDraft, Planner, Supervisor};
