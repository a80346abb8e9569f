//! Search agent - keyword retrieval over the knowledge base.

use async_trait::async_trait;
use serde_json::json;

use maestro_core::{
    Agent, AgentContext, AgentFailure, MessageRecord, ResultRecord, RunState, StatePatch,
    UpdateStatus,
};

use crate::data::{KbEntry, KNOWLEDGE_BASE};

const MAX_HITS: usize = 5;

/// Scores knowledge-base entries by term overlap with the request.
#[derive(Debug, Default)]
pub struct SearchAgent;

impl SearchAgent {
    pub fn new() -> Self {
        Self
    }

    fn terms(task: &str) -> Vec<String> {
        task.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2)
            .map(String::from)
            .collect()
    }

    fn score(entry: &KbEntry, terms: &[String]) -> usize {
        let haystack = format!(
            "{} {} {}",
            entry.name.to_lowercase(),
            entry.summary.to_lowercase(),
            entry.tags.join(" ")
        );
        terms.iter().filter(|t| haystack.contains(t.as_str())).count()
    }
}

#[async_trait]
impl Agent for SearchAgent {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> Option<&str> {
        Some("Retrieves companies, products, and market notes from the knowledge base")
    }

    async fn run(
        &self,
        snapshot: &RunState,
        ctx: &AgentContext,
    ) -> Result<StatePatch, AgentFailure> {
        ctx.update(
            "querying knowledge base",
            json!({}),
            UpdateStatus::Processing,
        );

        let terms = Self::terms(&snapshot.task_description);
        let mut scored: Vec<(usize, &KbEntry)> = KNOWLEDGE_BASE
            .iter()
            .map(|entry| (Self::score(entry, &terms), entry))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.name.cmp(b.1.name)));
        scored.truncate(MAX_HITS);

        let entries: Vec<serde_json::Value> = scored
            .iter()
            .map(|(score, entry)| {
                json!({
                    "name": entry.name,
                    "kind": entry.kind,
                    "summary": entry.summary,
                    "score": score,
                })
            })
            .collect();

        let companies_found = scored
            .iter()
            .filter(|(_, e)| e.kind == "customer" || e.kind == "competitor")
            .count();
        let products_found = scored.iter().filter(|(_, e)| e.kind == "product").count();

        ctx.update(
            format!("{} entries matched", entries.len()),
            json!({ "hits": entries.len() }),
            UpdateStatus::Processing,
        );
        tracing::debug!(hits = entries.len(), "search retrieved knowledge-base entries");

        let data = json!({
            "hits": entries.len(),
            "companies_found": companies_found,
            "products_found": products_found,
            "entries": entries,
        });
        let summary = if scored.is_empty() {
            "No knowledge-base entries matched the request.".to_string()
        } else {
            format!(
                "Found {} relevant entries ({} companies, {} products).",
                scored.len(),
                companies_found,
                products_found
            )
        };

        let mut patch = StatePatch::new()
            .with_result("search", ResultRecord::success(data))
            .with_message(MessageRecord::assistant("search", summary));

        // Signal downstream document generation once material is gathered.
        let document_planned = snapshot.execution_plan.iter().any(|a| a == "document");
        if document_planned && !scored.is_empty() {
            patch = patch.with_context("document_ready", json!(true));
        }

        Ok(patch)
    }
}

// ============================================================================
// TESTS
// ============================================================================
