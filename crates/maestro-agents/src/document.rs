//! Document agent - renders a markdown report from accumulated results.

use async_trait::async_trait;
use serde_json::json;

use maestro_core::{
    Agent, AgentContext, AgentFailure, MessageRecord, ResultRecord, RunState, StatePatch,
    UpdateStatus,
};

use crate::data::DISCLAIMER;

/// Builds a markdown document from whatever analytics and search produced.
/// A rework pass redacts the phrases compliance objected to.
#[derive(Debug, Default)]
pub struct DocumentAgent;

impl DocumentAgent {
    pub fn new() -> Self {
        Self
    }

    fn title_for(task: &str) -> String {
        let task = task.trim();
        if task.is_empty() {
            "Generated Report".to_string()
        } else {
            let mut title: String = task.chars().take(60).collect();
            if let Some(first) = title.get(0..1) {
                title.replace_range(0..1, &first.to_uppercase());
            }
            title
        }
    }
}

#[async_trait]
impl Agent for DocumentAgent {
    fn name(&self) -> &str {
        "document"
    }

    fn description(&self) -> Option<&str> {
        Some("Generates reports and proposals from prior agent results")
    }

    async fn run(
        &self,
        snapshot: &RunState,
        ctx: &AgentContext,
    ) -> Result<StatePatch, AgentFailure> {
        ctx.update("drafting document", json!({}), UpdateStatus::Processing);

        let task = snapshot.task_description.to_lowercase();
        let revision = if snapshot.context_flag("rework_attempted") {
            2
        } else {
            1
        };
        let title = Self::title_for(&snapshot.task_description);

        let mut sections: Vec<String> = vec![format!("# {title}")];

        if let Some(analytics) = snapshot.results.get("analytics") {
            let trend = &analytics.data["trend"];
            sections.push(format!(
                "## Performance\n\nLatest quarter {} closed at {}M ({}% growth, trend {}).",
                trend["latest_quarter"].as_str().unwrap_or("n/a"),
                trend["latest_revenue_m"],
                trend["growth_rate_pct"],
                trend["direction"].as_str().unwrap_or("n/a"),
            ));
        }

        if let Some(search) = snapshot.results.get("search") {
            let mut lines = vec!["## Research findings".to_string(), String::new()];
            if let Some(entries) = search.data["entries"].as_array() {
                for entry in entries {
                    lines.push(format!(
                        "- **{}** ({}): {}",
                        entry["name"].as_str().unwrap_or("unknown"),
                        entry["kind"].as_str().unwrap_or(""),
                        entry["summary"].as_str().unwrap_or(""),
                    ));
                }
            }
            sections.push(lines.join("\n"));
        }

        if task.contains("guarantee") {
            sections.push(
                "## Commercial terms\n\nThe engagement offers guaranteed returns under the \
                 standard partner program."
                    .to_string(),
            );
        }

        sections.push(format!("---\n\n{DISCLAIMER}"));
        let mut content = sections.join("\n\n");

        // Rework pass: redact everything compliance flagged.
        let redactions: Vec<String> = snapshot
            .context
            .get("compliance_violations")
            .and_then(|v| v.as_array())
            .map(|phrases| {
                phrases
                    .iter()
                    .filter_map(|p| p.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        for phrase in &redactions {
            content = content.replace(phrase.as_str(), "[redacted]");
        }

        let word_count = content.split_whitespace().count();
        let document_id = format!("doc-{}-r{revision}", snapshot.thread_id.as_str());

        ctx.update(
            format!("document {document_id} drafted ({word_count} words)"),
            json!({ "document_id": document_id, "revision": revision }),
            UpdateStatus::Processing,
        );
        tracing::debug!(%document_id, revision, word_count, "document rendered");

        let data = json!({
            "document_id": document_id,
            "title": title,
            "format": "markdown",
            "revision": revision,
            "word_count": word_count,
            "content": content,
        });

        let mut patch = StatePatch::new()
            .with_result("document", ResultRecord::success(data))
            .with_message(MessageRecord::assistant(
                "document",
                format!("Document {document_id} ready (revision {revision})."),
            ));

        // Regulated output gets validated before delivery.
        let compliance_planned = snapshot.execution_plan.iter().any(|a| a == "compliance");
        let regulated = task.contains("compliance")
            || task.contains("regulation")
            || task.contains("contract")
            || task.contains("guarantee");
        if compliance_planned || regulated {
            patch = patch.with_context("requires_compliance", json!(true));
        }

        Ok(patch)
    }
}

// ============================================================================
// TESTS
// ============================================================================
