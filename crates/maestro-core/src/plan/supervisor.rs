//! Supervisor - classifies a request into an execution plan.
//!
//! The supervisor maps the task description onto a closed set of intents,
//! expands each intent into the downstream agents it requires, deduplicates
//! while preserving the order agents first appear in the request, and
//! attaches static dependencies. Invoked again mid-run it augments the
//! existing plan: agents that already produced results are never removed.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::EngineResult;
use crate::state::RunState;

/// Closed set of request intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Intent {
    Analyze,
    Search,
    Generate,
    Validate,
    Compare,
    Predict,
}

impl Intent {
    /// The downstream agents this intent requires, in expansion order.
    fn agents(self) -> &'static [&'static str] {
        match self {
            Intent::Analyze => &["analytics"],
            Intent::Search => &["search"],
            Intent::Generate => &["document"],
            Intent::Validate => &["compliance"],
            Intent::Compare => &["analytics", "search"],
            Intent::Predict => &["analytics"],
        }
    }

    fn keywords(self) -> &'static [&'static str] {
        match self {
            Intent::Analyze => &[
                "analyze", "analysis", "analytics", "kpi", "metric", "revenue", "sales", "trend",
                "performance", "insight",
            ],
            Intent::Search => &[
                "search",
                "find",
                "lookup",
                "look up",
                "research",
                "competitor",
                "information",
                "info",
                "market",
            ],
            Intent::Generate => &[
                "write", "draft", "create", "generate", "document", "report", "proposal", "doc",
                "summary", "email",
            ],
            Intent::Validate => &[
                "compliance",
                "comply",
                "regulation",
                "regulatory",
                "validate",
                "check",
                "audit",
                "policy",
                "legal",
            ],
            Intent::Compare => &["compare", "comparison", "versus", " vs "],
            Intent::Predict => &["predict", "forecast", "projection"],
        }
    }

    const ALL: [Intent; 6] = [
        Intent::Analyze,
        Intent::Search,
        Intent::Generate,
        Intent::Validate,
        Intent::Compare,
        Intent::Predict,
    ];
}

/// The planner's answer: an ordered agent list plus its dependency map.
///
/// The controller turns this into parallel groups and a state patch.
#[derive(Debug, Clone)]
pub struct PlanDraft {
    /// Full ordered plan, including any agents carried over from a previous
    /// planning round.
    pub agents: Vec<String>,
    /// Agent -> agents that must have completed first.
    pub dependencies: BTreeMap<String, BTreeSet<String>>,
    /// Human-readable rationale for the decision.
    pub reason: String,
    /// True when classification failed and the minimal plan was substituted.
    pub degraded: bool,
}

/// Produces an execution plan from the current snapshot.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, snapshot: &RunState) -> EngineResult<PlanDraft>;
}

/// Deterministic keyword-table supervisor.
#[derive(Debug, Default)]
pub struct Supervisor;

impl Supervisor {
    pub fn new() -> Self {
        Self
    }

    /// Classify the request into intents, ordered by where each intent first
    /// appears in the text.
    fn classify(task: &str) -> Vec<Intent> {
        let text = task.to_lowercase();
        let mut hits: Vec<(usize, Intent)> = Vec::new();
        for intent in Intent::ALL {
            let first = intent
                .keywords()
                .iter()
                .filter_map(|kw| text.find(kw))
                .min();
            if let Some(position) = first {
                hits.push((position, intent));
            }
        }
        hits.sort();
        hits.into_iter().map(|(_, intent)| intent).collect()
    }

    /// Expand intents into agents, deduplicating on first occurrence.
    fn required_agents(intents: &[Intent]) -> Vec<String> {
        let mut agents: Vec<String> = Vec::new();
        for intent in intents {
            for agent in intent.agents() {
                if !agents.iter().any(|a| a == agent) {
                    agents.push((*agent).to_string());
                }
            }
        }
        agents
    }

    /// Static dependency table, restricted to agents actually in the plan:
    /// compliance waits for the document it validates; a document waits for
    /// whatever analysis or research feeds it.
    fn static_dependencies(plan: &[String]) -> BTreeMap<String, BTreeSet<String>> {
        let has = |name: &str| plan.iter().any(|a| a == name);
        let mut deps: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        if has("document") {
            let mut doc_deps = BTreeSet::new();
            if has("analytics") {
                doc_deps.insert("analytics".to_string());
            }
            if has("search") {
                doc_deps.insert("search".to_string());
            }
            if !doc_deps.is_empty() {
                deps.insert("document".to_string(), doc_deps);
            }
        }
        if has("compliance") && has("document") {
            deps.insert(
                "compliance".to_string(),
                BTreeSet::from(["document".to_string()]),
            );
        }

        deps
    }
}

#[async_trait]
impl Planner for Supervisor {
    async fn plan(&self, snapshot: &RunState) -> EngineResult<PlanDraft> {
        let intents = Self::classify(&snapshot.task_description);
        let required = Self::required_agents(&intents);
        let degraded = required.is_empty();

        // Augment-only: start from the existing plan and append what is new.
        let mut agents = snapshot.execution_plan.clone();
        for agent in required {
            if !agents.iter().any(|a| *a == agent) {
                agents.push(agent);
            }
        }
        if agents.is_empty() {
            // Classification produced nothing; run the most conservative
            // agent rather than an empty plan.
            agents.push("search".to_string());
        }

        let dependencies = Self::static_dependencies(&agents);
        let reason = if degraded {
            "request could not be classified; defaulting to search".to_string()
        } else {
            format!(
                "classified intents {:?}; agents: {}",
                intents,
                agents.join(" -> ")
            )
        };

        tracing::debug!(
            task = %snapshot.task_description,
            plan = ?agents,
            degraded,
            "supervisor produced execution plan"
        );

        Ok(PlanDraft {
            agents,
            dependencies,
            reason,
            degraded,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
