//! Run controller - accepts a request, drives the graph to a terminal state.
//!
//! One run: validate the inbound request, resolve the session, seed the user
//! message, run the supervisor, then alternate router decisions and group
//! executions until the router terminates. State is checkpointed at every
//! node boundary and the subscriber receives a single ordered event stream.

use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use crate::agent::AgentRegistry;
use crate::checkpoint::{CheckpointMeta, Checkpointer};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::plan::{levelize, Planner, Supervisor};
use crate::runtime::breaker::BreakerRegistry;
use crate::runtime::executor::GroupExecutor;
use crate::runtime::router::{Route, Router};
use crate::state::{
    MessageRecord, ProgressAction, ProgressEntry, ResultRecord, RunState, StatePatch, StateStore,
};
use crate::stream::{EventSink, StreamCoordinator, StreamEvent};
use crate::types::{CheckpointId, ThreadId};

// ============================================================================
// REQUEST / OUTCOME
// ============================================================================

/// A run request, however it arrived.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub input: String,
    pub thread_id: Option<String>,
}

impl InvokeRequest {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            thread_id: None,
        }
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }
}

impl From<crate::stream::InboundMessage> for InvokeRequest {
    fn from(msg: crate::stream::InboundMessage) -> Self {
        match msg {
            crate::stream::InboundMessage::Invoke { input, thread_id } => {
                Self { input, thread_id }
            }
        }
    }
}

/// What a finished run hands back to the caller.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub thread_id: ThreadId,
    pub results: BTreeMap<String, ResultRecord>,
    pub is_complete: bool,
}

/// How the node loop ended.
enum Termination {
    Complete,
    Cancelled,
    Error(EngineError),
}

// ============================================================================
// RUN CONTROLLER
// ============================================================================

/// Entry point wiring registry, planner, checkpointer, breakers and stream.
pub struct RunController {
    registry: Arc<AgentRegistry>,
    planner: Arc<dyn Planner>,
    checkpointer: Arc<dyn Checkpointer>,
    breakers: Arc<BreakerRegistry>,
    config: EngineConfig,
}

impl RunController {
    pub fn new(registry: Arc<AgentRegistry>, checkpointer: Arc<dyn Checkpointer>) -> Self {
        let config = EngineConfig::default();
        let breakers = Arc::new(BreakerRegistry::new(
            config.breaker_threshold,
            config.breaker_timeout,
        ));
        Self {
            registry,
            planner: Arc::new(Supervisor::new()),
            checkpointer,
            breakers,
            config,
        }
    }

    /// Replace the configuration. Re-derives the breaker registry from the
    /// new thresholds; call `with_breakers` afterwards to share one instead.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.breakers = Arc::new(BreakerRegistry::new(
            config.breaker_threshold,
            config.breaker_timeout,
        ));
        self.config = config;
        self
    }

    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = planner;
        self
    }

    /// Share a breaker registry across controllers (or hand a spy to tests).
    pub fn with_breakers(mut self, breakers: Arc<BreakerRegistry>) -> Self {
        self.breakers = breakers;
        self
    }

    pub fn registry(&self) -> Arc<AgentRegistry> {
        self.registry.clone()
    }

    pub fn checkpointer(&self) -> Arc<dyn Checkpointer> {
        self.checkpointer.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Drive one request to a terminal state, streaming events to `sink`.
    pub async fn run(
        &self,
        request: InvokeRequest,
        sink: Arc<dyn EventSink>,
    ) -> EngineResult<RunOutcome> {
        let input = request.input.trim().to_string();
        if input.is_empty() {
            let _ = sink
                .emit(StreamEvent::Error {
                    agent: None,
                    message: "input must not be empty".into(),
                    kind: ErrorKind::InvalidInput,
                })
                .await;
            return Err(EngineError::InvalidInput("input must not be empty".into()));
        }

        let thread_id = match request.thread_id.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => ThreadId::new(t),
            _ => ThreadId::generate(),
        };

        let mut step = self
            .checkpointer
            .list(&thread_id)
            .await
            .map(|entries| entries.len() as u64)
            .unwrap_or(0);

        let state = match self.checkpointer.get(&thread_id, None).await? {
            Some(mut previous) => {
                tracing::info!(thread = %thread_id, "resuming session from latest snapshot");
                previous.is_complete = false;
                previous.current_agent = None;
                previous
            }
            None => RunState::new(thread_id.clone()),
        };

        let store = Arc::new(StateStore::new(state));
        store.apply(&StatePatch {
            task_description: Some(normalize_request(&input)),
            messages: vec![MessageRecord::user(&input)],
            ..Default::default()
        })?;

        let coordinator = Arc::new(StreamCoordinator::new(self.config.stream_hwm));
        let executor = GroupExecutor::new(
            self.registry.clone(),
            self.breakers.clone(),
            coordinator,
            self.config.clone(),
        );

        self.checkpoint(&store, &thread_id, &mut step, "seed").await?;

        let mut connected = true;
        let termination = self
            .drive(&store, &executor, &thread_id, &mut step, &sink, &mut connected)
            .await;

        self.finalize(termination, &store, &thread_id, &mut step, &sink, connected)
            .await
    }

    /// The supervisor entry node plus the router/executor loop.
    async fn drive(
        &self,
        store: &Arc<StateStore>,
        executor: &GroupExecutor,
        thread_id: &ThreadId,
        step: &mut u64,
        sink: &Arc<dyn EventSink>,
        connected: &mut bool,
    ) -> Termination {
        let started = Instant::now();

        // Entry node: every run begins at the supervisor.
        match self.run_supervisor_node(store).await {
            Ok(_) => {}
            Err(err) => return Termination::Error(err),
        }
        if let Err(err) = self.checkpoint(store, thread_id, step, "supervisor").await {
            return Termination::Error(err);
        }
        if !self.emit_plan_event(store, sink, connected).await {
            return Termination::Cancelled;
        }

        let mut transitions: u32 = 0;
        loop {
            transitions += 1;
            if transitions > self.config.max_transitions {
                return Termination::Error(EngineError::Fatal(
                    "node transition limit exceeded".into(),
                ));
            }
            if started.elapsed() >= self.config.run_deadline {
                tracing::warn!(thread = %thread_id, "run deadline exceeded; terminating at group boundary");
                store.append_progress(
                    ProgressEntry::new("router", ProgressAction::Completed)
                        .with_meta(json!({ "to": "end", "reason": "run deadline exceeded" })),
                );
                return Termination::Complete;
            }

            let snapshot = store.snapshot();
            let route = Router::decide(&snapshot);
            record_routing(store, &snapshot, &route);

            match route {
                Route::RunGroup => {
                    let index = snapshot.current_group;
                    let Some(group) = snapshot.parallel_groups.get(index).cloned() else {
                        return Termination::Error(EngineError::Fatal(format!(
                            "group index {index} out of range"
                        )));
                    };
                    match executor
                        .run_group(store, &group, active_sink(*connected, sink))
                        .await
                    {
                        Ok(()) => {}
                        Err(EngineError::SubscriberGone) => {
                            *connected = false;
                            return Termination::Cancelled;
                        }
                        Err(err) => return Termination::Error(err),
                    }
                    if let Err(err) = self
                        .checkpoint(store, thread_id, step, &format!("group-{index}"))
                        .await
                    {
                        return Termination::Error(err);
                    }
                }
                Route::ToAgent {
                    agent, consumes, ..
                } => {
                    // Consume the signal so the rule fires exactly once.
                    if let Err(err) =
                        store.apply(&StatePatch::new().with_context(&consumes, json!(false)))
                    {
                        return Termination::Error(err);
                    }
                    if snapshot.execution_plan.iter().any(|a| *a == agent) {
                        // Re-invocation: the agent keeps its plan slot and
                        // overwrites its result.
                        match executor
                            .run_single(store, &agent, active_sink(*connected, sink))
                            .await
                        {
                            Ok(()) => {}
                            Err(EngineError::SubscriberGone) => {
                                *connected = false;
                                return Termination::Cancelled;
                            }
                            Err(err) => return Termination::Error(err),
                        }
                        if let Err(err) = self
                            .checkpoint(store, thread_id, step, &format!("agent-{agent}"))
                            .await
                        {
                            return Termination::Error(err);
                        }
                    } else {
                        // New agent: appended as its own trailing group; the
                        // next iteration executes it through the group path.
                        if let Err(err) = self.extend_plan(store, &agent) {
                            return Termination::Error(err);
                        }
                    }
                }
                Route::Replan => {
                    let added = match self.run_supervisor_node(store).await {
                        Ok(added) => added,
                        Err(err) => return Termination::Error(err),
                    };
                    if let Err(err) = self.checkpoint(store, thread_id, step, "supervisor").await {
                        return Termination::Error(err);
                    }
                    if !self.emit_plan_event(store, sink, connected).await {
                        return Termination::Cancelled;
                    }
                    if !added {
                        let snapshot = store.snapshot();
                        let runnable = snapshot.current_group < snapshot.parallel_groups.len();
                        if !runnable && !snapshot.plan_settled() {
                            return Termination::Error(EngineError::Fatal(
                                "planner made no progress on an unsettled plan".into(),
                            ));
                        }
                        if !runnable && snapshot.plan_settled() {
                            return Termination::Complete;
                        }
                    }
                }
                Route::Terminate { reason } => {
                    tracing::info!(thread = %thread_id, reason = %reason, "run terminating");
                    return Termination::Complete;
                }
            }
        }
    }

    /// Persist the terminal snapshot and emit the closing event.
    async fn finalize(
        &self,
        termination: Termination,
        store: &Arc<StateStore>,
        thread_id: &ThreadId,
        step: &mut u64,
        sink: &Arc<dyn EventSink>,
        connected: bool,
    ) -> EngineResult<RunOutcome> {
        match termination {
            Termination::Complete => {
                store.mark_complete();
                let snapshot = store.snapshot();
                self.checkpoint(store, thread_id, step, "terminal").await?;
                if connected {
                    let _ = sink
                        .emit(StreamEvent::Complete {
                            thread_id: thread_id.clone(),
                            results: snapshot.results.clone(),
                        })
                        .await;
                }
                Ok(RunOutcome {
                    thread_id: thread_id.clone(),
                    results: snapshot.results,
                    is_complete: true,
                })
            }
            Termination::Cancelled => {
                tracing::warn!(thread = %thread_id, "subscriber disconnected; run cancelled after in-flight work settled");
                let snapshot = store.snapshot();
                self.checkpoint(store, thread_id, step, "cancelled").await?;
                Ok(RunOutcome {
                    thread_id: thread_id.clone(),
                    results: snapshot.results,
                    is_complete: false,
                })
            }
            Termination::Error(err) => {
                tracing::error!(thread = %thread_id, error = %err, "run terminated with kernel error");
                // Best effort: persist what we have and surface the error.
                let _ = self.checkpoint(store, thread_id, step, "terminal").await;
                if connected {
                    let _ = sink
                        .emit(StreamEvent::Error {
                            agent: None,
                            message: err.to_string(),
                            kind: err.kind(),
                        })
                        .await;
                }
                Err(err)
            }
        }
    }

    /// Run the planner, levelize whatever it added, and commit the plan
    /// patch. Returns whether the plan gained agents.
    async fn run_supervisor_node(&self, store: &Arc<StateStore>) -> EngineResult<bool> {
        let snapshot = store.snapshot();
        let draft = self.planner.plan(&snapshot).await?;

        let existing = snapshot.execution_plan.len();
        let added: Vec<String> = draft.agents.iter().skip(existing).cloned().collect();
        let new_groups = levelize(&added, &draft.dependencies)?;
        let mut groups = snapshot.parallel_groups.clone();
        groups.extend(new_groups);

        let mut patch = StatePatch {
            execution_plan: Some(draft.agents.clone()),
            dependencies: Some(draft.dependencies.clone()),
            parallel_groups: Some(groups),
            ..Default::default()
        };
        patch.messages.push(MessageRecord::assistant(
            "supervisor",
            format!(
                "Execution plan: {}. {}",
                draft.agents.join(" -> "),
                draft.reason
            ),
        ));
        patch.progress.push(
            ProgressEntry::new("supervisor", ProgressAction::Completed)
                .with_meta(json!({ "plan": draft.agents, "reason": draft.reason })),
        );
        if draft.degraded {
            patch.context.insert("planner_degraded".into(), json!(true));
        }
        store.apply(&patch)?;
        Ok(!added.is_empty())
    }

    /// Emit the current plan to the subscriber. Returns false once the
    /// subscriber is gone.
    async fn emit_plan_event(
        &self,
        store: &Arc<StateStore>,
        sink: &Arc<dyn EventSink>,
        connected: &mut bool,
    ) -> bool {
        if !*connected {
            return false;
        }
        let snapshot = store.snapshot();
        let reason = snapshot
            .progress
            .iter()
            .rev()
            .find(|p| p.agent == "supervisor")
            .and_then(|p| p.meta.as_ref())
            .and_then(|m| m.get("reason"))
            .and_then(|r| r.as_str())
            .map(String::from);
        let event = StreamEvent::ExecutionPlan {
            agents: snapshot.execution_plan.clone(),
            total_steps: snapshot.execution_plan.len(),
            reason,
        };
        if sink.emit(event).await.is_err() {
            *connected = false;
            return false;
        }
        true
    }

    /// Append a routed-to agent to the plan as its own trailing group.
    fn extend_plan(&self, store: &Arc<StateStore>, agent: &str) -> EngineResult<()> {
        let snapshot = store.snapshot();
        let mut plan = snapshot.execution_plan.clone();
        plan.push(agent.to_string());

        let mut dependencies: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        match agent {
            "compliance" if plan.iter().any(|a| a == "document") => {
                dependencies.insert(
                    "compliance".to_string(),
                    BTreeSet::from(["document".to_string()]),
                );
            }
            "document" => {
                let mut feeds = BTreeSet::new();
                if plan.iter().any(|a| a == "analytics") {
                    feeds.insert("analytics".to_string());
                }
                if plan.iter().any(|a| a == "search") {
                    feeds.insert("search".to_string());
                }
                if !feeds.is_empty() {
                    dependencies.insert("document".to_string(), feeds);
                }
            }
            _ => {}
        }

        let mut groups = snapshot.parallel_groups.clone();
        groups.push(BTreeSet::from([agent.to_string()]));

        store.apply(&StatePatch {
            execution_plan: Some(plan),
            dependencies: (!dependencies.is_empty()).then_some(dependencies),
            parallel_groups: Some(groups),
            ..Default::default()
        })
    }

    async fn checkpoint(
        &self,
        store: &Arc<StateStore>,
        thread_id: &ThreadId,
        step: &mut u64,
        node: &str,
    ) -> EngineResult<()> {
        *step += 1;
        let id = CheckpointId::new(format!("{:04}-{node}", *step));
        let snapshot = store.snapshot();
        self.checkpointer
            .put(thread_id, &id, &snapshot, CheckpointMeta::new(node, *step))
            .await?;
        Ok(())
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn normalize_request(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn active_sink<'a>(connected: bool, sink: &'a Arc<dyn EventSink>) -> Option<&'a dyn EventSink> {
    if connected {
        Some(sink.as_ref())
    } else {
        None
    }
}

/// Record one routing decision in the progress log.
fn record_routing(store: &StateStore, snapshot: &RunState, route: &Route) {
    let (to, reason) = match route {
        Route::RunGroup => (
            format!("group-{}", snapshot.current_group),
            "parallel plan continuation".to_string(),
        ),
        Route::ToAgent { agent, reason, .. } => (agent.clone(), reason.clone()),
        Route::Replan => (
            "supervisor".to_string(),
            "no matching rule; handing back for re-planning".to_string(),
        ),
        Route::Terminate { reason } => ("end".to_string(), reason.clone()),
    };
    store.append_progress(
        ProgressEntry::new("router", ProgressAction::Completed).with_meta(json!({
            "from": snapshot.current_agent,
            "to": to,
            "reason": reason,
        })),
    );
}

// ============================================================================
// TESTS
// ============================================================================
