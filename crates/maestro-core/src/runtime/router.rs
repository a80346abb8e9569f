//! Router - decides the next node after each boundary.
//!
//! A pure function of the snapshot: given the same state it always returns
//! the same answer. Checked in priority order:
//!
//! 1. Critical-failure guard: three or more logged errors for the current
//!    agent terminate the run.
//! 2. Parallel continuation: unexecuted groups run next.
//! 3. Declarative rules keyed on `(current_agent, context flag)`.
//! 4. Plan completion: every planned agent settled terminates the run.
//! 5. Default: back to the supervisor for re-planning.

use crate::state::RunState;

/// Maximum error entries tolerated for one agent before the run is cut off.
const CRITICAL_FAILURE_THRESHOLD: usize = 3;

/// Routing decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Execute `parallel_groups[current_group]`.
    RunGroup,
    /// Route directly to one agent. `consumes` names the context flag that
    /// triggered the rule; the controller clears it so the signal fires once.
    ToAgent {
        agent: String,
        reason: String,
        consumes: String,
    },
    /// Hand back to the supervisor for augment-only re-planning.
    Replan,
    /// The run is finished.
    Terminate { reason: String },
}

/// Stateless decision function.
#[derive(Debug, Default)]
pub struct Router;

impl Router {
    /// Decide the next node for a snapshot.
    pub fn decide(state: &RunState) -> Route {
        // 1. Critical-failure guard.
        if let Some(current) = &state.current_agent {
            if state.error_count_for(current) >= CRITICAL_FAILURE_THRESHOLD {
                return Route::Terminate {
                    reason: format!("critical failure threshold reached for {current}"),
                };
            }
        }

        // 2. Parallel mode continuation.
        if !state.parallel_groups.is_empty() && state.current_group < state.parallel_groups.len() {
            return Route::RunGroup;
        }

        // 3. Declarative rules, evaluated in order.
        if let Some(current) = state.current_agent.as_deref() {
            if current == "document" && state.context_flag("requires_compliance") {
                return Route::ToAgent {
                    agent: "compliance".into(),
                    reason: "document requires compliance validation".into(),
                    consumes: "requires_compliance".into(),
                };
            }
            if current == "compliance" && state.context_flag("needs_rework") {
                let target = state
                    .context_str("rework_target")
                    .unwrap_or("document")
                    .to_string();
                return Route::ToAgent {
                    agent: target.clone(),
                    reason: format!("compliance requested rework of {target}"),
                    consumes: "needs_rework".into(),
                };
            }
            if current == "analytics" && state.context_flag("search_needed") {
                return Route::ToAgent {
                    agent: "search".into(),
                    reason: "analytics flagged missing research data".into(),
                    consumes: "search_needed".into(),
                };
            }
            if current == "search" && state.context_flag("document_ready") {
                return Route::ToAgent {
                    agent: "document".into(),
                    reason: "search gathered enough material for the document".into(),
                    consumes: "document_ready".into(),
                };
            }
        }

        // 4. Plan completion.
        if state.plan_settled() {
            return Route::Terminate {
                reason: "all planned agents have settled results".into(),
            };
        }

        // 5. Default: allow re-planning.
        Route::Replan
    }
}

// ============================================================================
// TESTS
// ============================================================================
