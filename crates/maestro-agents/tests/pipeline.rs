//! Full pipeline runs with the reference agents.

use std::sync::Arc;
use std::time::Duration;

use maestro_agents::default_registry;
use maestro_core::prelude::*;
use maestro_core::RunController;
use maestro_store::MemoryCheckpointer;

fn controller() -> (RunController, Arc<MemoryCheckpointer>) {
    let checkpointer = Arc::new(MemoryCheckpointer::new());
    let config = EngineConfig::new()
        .with_retry_backoff(Duration::from_millis(5), Duration::from_millis(50));
    let controller = RunController::new(Arc::new(default_registry()), checkpointer.clone())
        .with_config(config);
    (controller, checkpointer)
}

async fn run(
    controller: &RunController,
    request: InvokeRequest,
) -> (RunOutcome, Vec<StreamEvent>) {
    let (sink, mut rx) = ChannelSink::pair(1024);
    let outcome = controller.run(request, Arc::new(sink)).await.unwrap();
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    (outcome, events)
}

#[tokio::test]
async fn test_research_report_pipeline() {
    let (controller, checkpointer) = controller();
    let (outcome, events) = run(
        &controller,
        InvokeRequest::new("search info about hospital tenders, write doc, check compliance"),
    )
    .await;

    assert!(outcome.is_complete);
    for agent in ["search", "document", "compliance"] {
        assert_eq!(
            outcome.results[agent].status,
            ResultStatus::Success,
            "agent {agent} should succeed"
        );
    }

    // The document embedded the research findings.
    let content = outcome.results["document"].data["content"].as_str().unwrap();
    assert!(content.contains("## Research findings"));
    assert!(content.contains("Disclaimer"));

    // Clean document: compliance passes outright.
    assert_eq!(outcome.results["compliance"].data["status"], "PASSED");

    // Plan event announced all three agents in request order.
    match &events[0] {
        StreamEvent::ExecutionPlan { agents, .. } => {
            assert_eq!(
                agents,
                &vec![
                    "search".to_string(),
                    "document".to_string(),
                    "compliance".to_string()
                ]
            );
        }
        other => panic!("expected execution_plan, got {other:?}"),
    }

    // Sequential groups in the terminal snapshot.
    let terminal = checkpointer
        .get(&outcome.thread_id, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(terminal.parallel_groups.len(), 3);
}

#[tokio::test]
async fn test_compliance_rework_loop() {
    let (controller, checkpointer) = controller();
    let (outcome, _) = run(
        &controller,
        InvokeRequest::new("draft a proposal with guaranteed returns and check compliance"),
    )
    .await;

    assert!(outcome.is_complete);

    // The first draft tripped the rule book; the rework pass redacted it and
    // revalidation passed.
    let document = &outcome.results["document"].data;
    assert_eq!(document["revision"], 2);
    let content = document["content"].as_str().unwrap();
    assert!(!content.to_lowercase().contains("guaranteed returns"));
    assert_eq!(outcome.results["compliance"].data["status"], "PASSED");

    let terminal = checkpointer
        .get(&outcome.thread_id, None)
        .await
        .unwrap()
        .unwrap();
    // The rework signal was consumed and latched.
    assert!(!terminal.context_flag("needs_rework"));
    assert!(terminal.context_flag("rework_attempted"));
    // Both document passes and both compliance passes are on record.
    let document_runs = terminal
        .progress
        .iter()
        .filter(|p| p.agent == "document" && p.action == ProgressAction::Completed)
        .count();
    assert_eq!(document_runs, 2);
}

#[tokio::test]
async fn test_parallel_research_and_analytics() {
    let (controller, checkpointer) = controller();
    let (outcome, _) = run(
        &controller,
        InvokeRequest::new("find competitors and analyze our revenue"),
    )
    .await;

    assert!(outcome.is_complete);
    assert_eq!(outcome.results["search"].status, ResultStatus::Success);
    assert_eq!(outcome.results["analytics"].status, ResultStatus::Success);

    let terminal = checkpointer
        .get(&outcome.thread_id, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(terminal.parallel_groups.len(), 1);
    assert_eq!(terminal.parallel_groups[0].len(), 2);
}

#[tokio::test]
async fn test_session_resume_accumulates_state() {
    let (controller, checkpointer) = controller();

    let (first, _) = run(
        &controller,
        InvokeRequest::new("analyze last quarter sales").with_thread_id("t-resume"),
    )
    .await;
    assert!(first.results.contains_key("analytics"));
    let checkpoints_after_first = checkpointer.list(&first.thread_id).await.unwrap().len();

    // Second request on the same session reuses the analytics result.
    let (second, _) = run(
        &controller,
        InvokeRequest::new("write a report").with_thread_id("t-resume"),
    )
    .await;
    assert!(second.is_complete);
    assert!(second.results.contains_key("document"));

    let content = second.results["document"].data["content"].as_str().unwrap();
    assert!(
        content.contains("## Performance"),
        "document should embed the earlier analytics result"
    );

    let terminal = checkpointer
        .get(&second.thread_id, None)
        .await
        .unwrap()
        .unwrap();
    // Both user messages are in the session transcript.
    let user_messages = terminal
        .messages
        .iter()
        .filter(|m| m.role == maestro_core::Role::User)
        .count();
    assert_eq!(user_messages, 2);
    assert!(checkpointer.list(&second.thread_id).await.unwrap().len() > checkpoints_after_first);
}

#[tokio::test]
async fn test_unclassifiable_request_degrades_gracefully() {
    let (controller, checkpointer) = controller();
    let (outcome, _) = run(&controller, InvokeRequest::new("xyzzy plugh")).await;

    assert!(outcome.is_complete);
    assert_eq!(outcome.results["search"].status, ResultStatus::Success);
    let terminal = checkpointer
        .get(&outcome.thread_id, None)
        .await
        .unwrap()
        .unwrap();
    assert!(terminal.context_flag("planner_degraded"));
}
