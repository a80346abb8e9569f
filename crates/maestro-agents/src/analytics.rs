//! Analytics agent - sales trends, KPIs, and a health score.

use async_trait::async_trait;
use serde_json::json;

use maestro_core::{
    Agent, AgentContext, AgentFailure, MessageRecord, ResultRecord, RunState, StatePatch,
    UpdateStatus,
};

use crate::data::QUARTERLY_SALES;

/// Aggregates the sales series into trend direction, growth rate, and KPIs.
#[derive(Debug, Default)]
pub struct AnalyticsAgent;

impl AnalyticsAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for AnalyticsAgent {
    fn name(&self) -> &str {
        "analytics"
    }

    fn description(&self) -> Option<&str> {
        Some("Performs data analysis, metrics calculation, and trend detection")
    }

    async fn run(
        &self,
        snapshot: &RunState,
        ctx: &AgentContext,
    ) -> Result<StatePatch, AgentFailure> {
        ctx.update(
            "analyzing quarterly sales data",
            json!({}),
            UpdateStatus::Processing,
        );

        let series = QUARTERLY_SALES;
        let (latest_quarter, latest_revenue, latest_deals) = series[series.len() - 1];
        let (_, previous_revenue, _) = series[series.len() - 2];

        let growth_rate = (latest_revenue - previous_revenue) / previous_revenue * 100.0;
        let trend = if growth_rate > 1.0 {
            "up"
        } else if growth_rate < -1.0 {
            "down"
        } else {
            "flat"
        };
        let total_revenue: f64 = series.iter().map(|(_, r, _)| r).sum();
        let total_deals: u32 = series.iter().map(|(_, _, d)| d).sum();
        let avg_deal_size = latest_revenue / f64::from(latest_deals);
        let health_score = (50.0 + growth_rate * 2.0).clamp(0.0, 100.0).round();

        let data = json!({
            "trend": {
                "latest_quarter": latest_quarter,
                "latest_revenue_m": latest_revenue,
                "growth_rate_pct": (growth_rate * 10.0).round() / 10.0,
                "direction": trend,
            },
            "kpis": {
                "total_revenue_m": (total_revenue * 10.0).round() / 10.0,
                "total_deals": total_deals,
                "avg_deal_size_m": (avg_deal_size * 100.0).round() / 100.0,
            },
            "key_insights": {
                "health_score": health_score,
                "quarters_analyzed": series.len(),
            },
        });

        ctx.update(
            format!("trend {trend}, growth {growth_rate:.1}%"),
            data.clone(),
            UpdateStatus::Processing,
        );
        tracing::debug!(growth = growth_rate, trend, "analytics computed sales trend");

        let summary = format!(
            "Revenue for {latest_quarter} came in at {latest_revenue:.1}M \
             ({growth_rate:+.1}% quarter over quarter, trend {trend}). \
             Health score: {health_score:.0}/100."
        );

        let mut patch = StatePatch::new()
            .with_result("analytics", ResultRecord::success(data))
            .with_message(MessageRecord::assistant("analytics", summary));

        // Competitive questions need research data this agent cannot supply.
        let task = snapshot.task_description.to_lowercase();
        let wants_market_context = task.contains("competitor") || task.contains("market");
        let search_planned = snapshot.execution_plan.iter().any(|a| a == "search");
        if wants_market_context && !search_planned && !snapshot.results.contains_key("search") {
            patch = patch.with_context("search_needed", json!(true));
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
        AgentContext::new("analytics", Arc::new(StreamCoordinator::new(16)), 0)
    }

    fn state(task: &str) -> RunState {
        let mut state = RunState::new(ThreadId::new("t"));
        state.task_description = task.to_string();
        state
    }

    #[tokio::test]
    async fn test_produces_trend_and_kpis() {
        let patch = AnalyticsAgent::new()
            .run(&state("analyze last quarter sales"), &ctx())
            .await
            .unwrap();

        let record = &patch.results["analytics"];
        assert_eq!(record.data["trend"]["latest_quarter"], "2025-Q2");
        assert_eq!(record.data["trend"]["direction"], "up");
        assert!(record.data["key_insights"]["health_score"].as_f64().unwrap() > 50.0);
        assert_eq!(patch.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_idempotent_for_same_snapshot() {
        let agent = AnalyticsAgent::new();
        let snapshot = state("analyze sales");
        let first = agent.run(&snapshot, &ctx()).await.unwrap();
        let second = agent.run(&snapshot, &ctx()).await.unwrap();
        assert_eq!(
            first.results["analytics"].data,
            second.results["analytics"].data
        );
    }

    #[tokio::test]
    async fn test_flags_missing_research() {
        let patch = AnalyticsAgent::new()
            .run(&state("analyze our market position"), &ctx())
            .await
            .unwrap();
        assert_eq!(patch.context["search_needed"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn test_no_flag_when_search_planned() {
        let mut snapshot = state("analyze competitor pressure");
        snapshot.execution_plan = vec!["search".into(), "analytics".into()];
        let patch = AnalyticsAgent::new().run(&snapshot, &ctx()).await.unwrap();
        assert!(!patch.context.contains_key("search_needed"));
    }
}
