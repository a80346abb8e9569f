//! Compliance agent - rule-table validation of generated documents.

use async_trait::async_trait;
use serde_json::json;

use maestro_core::{
    Agent, AgentContext, AgentFailure, MessageRecord, ResultRecord, RunState, StatePatch,
    UpdateStatus,
};

use crate::data::PROHIBITED_PHRASES;

/// Scans the generated document against the rule book. Critical violations
/// request one rework pass of the offending document; the latch in context
/// keeps the rework loop from repeating.
#[derive(Debug, Default)]
pub struct ComplianceAgent;

impl ComplianceAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for ComplianceAgent {
    fn name(&self) -> &str {
        "compliance"
    }

    fn description(&self) -> Option<&str> {
        Some("Validates documents against regulatory and policy rules")
    }

    async fn run(
        &self,
        snapshot: &RunState,
        ctx: &AgentContext,
    ) -> Result<StatePatch, AgentFailure> {
        ctx.update("validating document", json!({}), UpdateStatus::Processing);

        let Some(document) = snapshot.results.get("document") else {
            let data = json!({ "status": "skipped", "reason": "no document to validate" });
            return Ok(StatePatch::new()
                .with_result("compliance", ResultRecord::success(data))
                .with_message(MessageRecord::assistant(
                    "compliance",
                    "No document present; compliance check skipped.",
                )));
        };

        let content = document.data["content"].as_str().unwrap_or("");
        let lowered = content.to_lowercase();

        let mut violations: Vec<serde_json::Value> = Vec::new();
        let mut critical_phrases: Vec<String> = Vec::new();
        for (phrase, level, code) in PROHIBITED_PHRASES {
            if lowered.contains(phrase) {
                violations.push(json!({ "code": code, "level": level, "phrase": phrase }));
                if *level == "critical" {
                    critical_phrases.push((*phrase).to_string());
                }
            }
        }
        if !lowered.contains("disclaimer") {
            violations.push(json!({
                "code": "doc-001",
                "level": "medium",
                "phrase": "missing disclaimer",
            }));
        }

        let status = if !critical_phrases.is_empty() {
            "FAILED"
        } else if !violations.is_empty() {
            "CONDITIONAL"
        } else {
            "PASSED"
        };

        ctx.update(
            format!("validation {status}: {} violations", violations.len()),
            json!({ "status": status, "total_violations": violations.len() }),
            UpdateStatus::Processing,
        );
        tracing::debug!(status, violations = violations.len(), "compliance check finished");

        let data = json!({
            "status": status,
            "total_violations": violations.len(),
            "violations": violations,
            "document_id": document.data["document_id"],
        });

        let mut patch = StatePatch::new()
            .with_result("compliance", ResultRecord::success(data))
            .with_message(MessageRecord::assistant(
                "compliance",
                format!("Compliance validation finished: {status}."),
            ))
            .with_context("compliance_checked", json!(true));

        // Critical findings earn exactly one regeneration of the document.
        if status == "FAILED" && !snapshot.context_flag("rework_attempted") {
            patch = patch
                .with_context("needs_rework", json!(true))
                .with_context("rework_target", json!("document"))
                .with_context("rework_attempted", json!(true))
                .with_context("compliance_violations", json!(critical_phrases));
            tracing::warn!("critical violations found; requesting document rework");
        }

        Ok(patch)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_core::{StreamCoordinator, ThreadId};
    use std::sync::Arc;

    fn ctx() -> AgentContext {
        AgentContext::new("compliance", Arc::new(StreamCoordinator::new(16)), 0)
    }

    fn state_with_document(content: &str) -> RunState {
        let mut state = RunState::new(ThreadId::new("t-comp"));
        state.results.insert(
            "document".into(),
            ResultRecord::success(json!({
                "document_id": "doc-t-comp-r1",
                "content": content,
            })),
        );
        state
    }

    #[tokio::test]
    async fn test_clean_document_passes() {
        let snapshot =
            state_with_document("# Report\n\nEverything in order.\n\nDisclaimer: indicative.");
        let patch = ComplianceAgent::new().run(&snapshot, &ctx()).await.unwrap();
        let data = &patch.results["compliance"].data;
        assert_eq!(data["status"], "PASSED");
        assert_eq!(data["total_violations"], 0);
        assert!(!patch.context.contains_key("needs_rework"));
    }

    #[tokio::test]
    async fn test_critical_violation_requests_rework() {
        let snapshot = state_with_document(
            "# Offer\n\nWe promise guaranteed returns.\n\nDisclaimer: indicative.",
        );
        let patch = ComplianceAgent::new().run(&snapshot, &ctx()).await.unwrap();
        let data = &patch.results["compliance"].data;
        assert_eq!(data["status"], "FAILED");
        assert_eq!(patch.context["needs_rework"], json!(true));
        assert_eq!(patch.context["rework_target"], json!("document"));
        assert_eq!(patch.context["rework_attempted"], json!(true));
        assert_eq!(
            patch.context["compliance_violations"],
            json!(["guaranteed returns"])
        );
    }

    #[tokio::test]
    async fn test_rework_latch_blocks_second_pass() {
        let mut snapshot = state_with_document(
            "# Offer\n\nStill promising guaranteed returns.\n\nDisclaimer: indicative.",
        );
        snapshot
            .context
            .insert("rework_attempted".into(), json!(true));
        let patch = ComplianceAgent::new().run(&snapshot, &ctx()).await.unwrap();
        assert_eq!(patch.results["compliance"].data["status"], "FAILED");
        assert!(!patch.context.contains_key("needs_rework"));
    }

    #[tokio::test]
    async fn test_missing_disclaimer_is_conditional() {
        let snapshot = state_with_document("# Report\n\nAll numbers look fine.");
        let patch = ComplianceAgent::new().run(&snapshot, &ctx()).await.unwrap();
        let data = &patch.results["compliance"].data;
        assert_eq!(data["status"], "CONDITIONAL");
        assert!(!patch.context.contains_key("needs_rework"));
    }

    #[tokio::test]
    async fn test_no_document_is_skipped() {
        let snapshot = RunState::new(ThreadId::new("t-comp"));
        let patch = ComplianceAgent::new().run(&snapshot, &ctx()).await.unwrap();
        assert_eq!(patch.results["compliance"].data["status"], "skipped");
    }
}
