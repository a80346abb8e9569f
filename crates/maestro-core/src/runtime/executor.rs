//! Parallel group executor.
//!
//! Runs one parallel group at a time: every agent in the group is spawned as
//! its own task, bounded by a semaphore, and the group settles only when all
//! of them finished (success or fallback). A failing agent never cancels its
//! siblings. State merges are serialized through the state store; outbound
//! events are re-serialized by the streaming coordinator after the group
//! settles.

use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::agent::{AgentContext, AgentRegistry};
use crate::config::EngineConfig;
use crate::error::{AgentFailure, EngineError, EngineResult, ErrorKind};
use crate::runtime::breaker::BreakerRegistry;
use crate::runtime::memory;
use crate::state::{
    ErrorEntry, ProgressAction, ProgressEntry, ResultRecord, StatePatch, StateStore,
};
use crate::stream::{EventSink, StreamCoordinator, StreamEvent, UpdateStatus};

/// Executes parallel groups of agents against the shared state.
pub struct GroupExecutor {
    registry: Arc<AgentRegistry>,
    breakers: Arc<BreakerRegistry>,
    coordinator: Arc<StreamCoordinator>,
    config: EngineConfig,
    semaphore: Arc<Semaphore>,
}

impl GroupExecutor {
    pub fn new(
        registry: Arc<AgentRegistry>,
        breakers: Arc<BreakerRegistry>,
        coordinator: Arc<StreamCoordinator>,
        config: EngineConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            registry,
            breakers,
            coordinator,
            config,
            semaphore,
        }
    }

    pub fn coordinator(&self) -> Arc<StreamCoordinator> {
        self.coordinator.clone()
    }

    /// Run every agent of `group` concurrently, wait for all of them to
    /// settle, advance the group cursor, and flush queued events.
    pub async fn run_group(
        &self,
        store: &Arc<StateStore>,
        group: &BTreeSet<String>,
        sink: Option<&dyn EventSink>,
    ) -> EngineResult<()> {
        let snapshot = store.snapshot();
        let plan = snapshot.execution_plan.clone();
        let members: Vec<String> = plan.iter().filter(|a| group.contains(*a)).cloned().collect();

        tracing::info!(group = ?members, "executing parallel group");

        for name in &members {
            self.enqueue_progress(name, &plan);
        }

        let mut tasks: JoinSet<()> = JoinSet::new();
        for name in members.clone() {
            let registry = self.registry.clone();
            let breakers = self.breakers.clone();
            let coordinator = self.coordinator.clone();
            let store = store.clone();
            let config = self.config.clone();
            let semaphore = self.semaphore.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                invoke_agent(registry, breakers, coordinator, store, config, name).await;
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.map_err(|e| EngineError::Fatal(format!("agent task failed to join: {e}")))?;
        }

        if let Some(last) = members.last() {
            store.set_current_agent(Some(last.clone()));
        }
        store.advance_group();
        let step_patch = StatePatch {
            current_step: Some(snapshot.current_step + members.len()),
            ..Default::default()
        };
        if let Err(err) = store.apply(&step_patch) {
            tracing::error!(error = %err, "failed to advance step cursor");
        }

        self.flush(store, group, &plan, sink).await
    }

    /// Run one agent outside the group machinery. Used for re-invocations
    /// after a rework signal, where the agent already sits in the plan and
    /// its result slot is simply overwritten.
    pub async fn run_single(
        &self,
        store: &Arc<StateStore>,
        name: &str,
        sink: Option<&dyn EventSink>,
    ) -> EngineResult<()> {
        let snapshot = store.snapshot();
        let plan = snapshot.execution_plan.clone();
        self.enqueue_progress(name, &plan);

        invoke_agent(
            self.registry.clone(),
            self.breakers.clone(),
            self.coordinator.clone(),
            store.clone(),
            self.config.clone(),
            name.to_string(),
        )
        .await;

        store.set_current_agent(Some(name.to_string()));
        let group = BTreeSet::from([name.to_string()]);
        let canonical = vec![name.to_string()];
        self.flush(store, &group, &canonical, sink).await
    }

    fn enqueue_progress(&self, name: &str, plan: &[String]) {
        self.coordinator.register(name);
        let step = plan
            .iter()
            .position(|a| a == name)
            .map(|i| i + 1)
            .unwrap_or(plan.len());
        self.coordinator.queue(
            name,
            StreamEvent::Progress {
                node: name.to_string(),
                current_step: step,
                total_steps: plan.len(),
                execution_plan: plan.to_vec(),
            },
        );
    }

    /// Drain queued events to the sink and surface any backpressure drops.
    async fn flush(
        &self,
        store: &Arc<StateStore>,
        group: &BTreeSet<String>,
        canonical: &[String],
        sink: Option<&dyn EventSink>,
    ) -> EngineResult<()> {
        let Some(sink) = sink else {
            return Ok(());
        };
        let shed = self.coordinator.drain_group(sink, group, canonical).await?;
        for (agent, count) in shed {
            store.append_error(ErrorEntry::new(
                agent,
                format!("dropped {count} queued events under backpressure"),
                0,
                ErrorKind::StreamDropped,
            ));
        }
        Ok(())
    }
}

// ============================================================================
// RETRY WRAPPER
// ============================================================================

/// Invoke one agent with breaker gating, bounded retries, and fallback
/// installation. All mutation flows through the state store, so concurrent
/// invocations within a group serialize on its lock.
async fn invoke_agent(
    registry: Arc<AgentRegistry>,
    breakers: Arc<BreakerRegistry>,
    coordinator: Arc<StreamCoordinator>,
    store: Arc<StateStore>,
    config: EngineConfig,
    name: String,
) {
    store.set_current_agent(Some(name.clone()));
    store.append_progress(ProgressEntry::new(&name, ProgressAction::Started));

    let Some(agent) = registry.get(&name) else {
        store.append_error(ErrorEntry::new(
            &name,
            "agent not registered",
            1,
            ErrorKind::AgentFailure,
        ));
        install_fallback(&store, &name, "agent not registered");
        return;
    };

    if !breakers.allows(&name) {
        tracing::warn!(agent = %name, "circuit breaker open; short-circuiting to fallback");
        install_fallback(
            &store,
            &name,
            "circuit breaker open; invocation short-circuited",
        );
        return;
    }

    let percent = store.snapshot().completion_percent();
    let ctx = AgentContext::new(&name, coordinator.clone(), percent);
    let mem_before = memory::current_rss_mb();
    let mut failures: u32 = 0;

    let last_failure = loop {
        let snapshot = store.snapshot();
        let attempt = failures + 1;
        let outcome = tokio::time::timeout(config.agent_timeout, agent.run(&snapshot, &ctx)).await;

        let failure = match outcome {
            Ok(Ok(patch)) => match commit_patch(&store, &name, &patch) {
                Ok(record) => {
                    breakers.record_success(&name);
                    store.append_progress(ProgressEntry::new(&name, ProgressAction::Completed));
                    coordinator.queue(
                        &name,
                        StreamEvent::AgentUpdate {
                            agent: name.clone(),
                            message: "completed".into(),
                            data: record.data,
                            progress: store.snapshot().completion_percent(),
                            status: UpdateStatus::Completed,
                        },
                    );
                    guard_memory(&store, &config, &name, mem_before);
                    return;
                }
                Err(failure) => failure,
            },
            Ok(Err(failure)) => failure,
            Err(_) => AgentFailure::timeout(&name),
        };

        failures += 1;
        store.append_error(ErrorEntry::new(
            &name,
            failure.message.clone(),
            attempt,
            failure.kind,
        ));
        store.append_progress(
            ProgressEntry::new(&name, ProgressAction::Failed)
                .with_meta(json!({ "attempt": attempt })),
        );
        tracing::warn!(agent = %name, attempt, error = %failure.message, "agent attempt failed");

        if failures >= config.max_retries || !failure.retriable {
            break failure;
        }
        let delay = config
            .retry_policy
            .jittered(failures, config.retry_base, config.retry_max_delay);
        tokio::time::sleep(delay).await;
    };

    breakers.record_failure(&name);
    coordinator.queue(
        &name,
        StreamEvent::Error {
            agent: Some(name.clone()),
            message: last_failure.message.clone(),
            kind: last_failure.kind,
        },
    );
    install_fallback(
        &store,
        &name,
        format!("retries exhausted: {}", last_failure.message),
    );
}

/// Validate and apply an agent's patch, returning the committed result
/// record on success.
fn commit_patch(
    store: &StateStore,
    name: &str,
    patch: &StatePatch,
) -> Result<ResultRecord, AgentFailure> {
    if patch.touches_errors() {
        return Err(AgentFailure::invalid_patch(
            name,
            "agents may not write the error log",
        ));
    }
    let Some(record) = patch.results.get(name) else {
        return Err(AgentFailure::invalid_patch(
            name,
            "patch is missing the agent's result record",
        ));
    };
    match store.apply(patch) {
        Ok(()) => Ok(record.clone()),
        Err(EngineError::InvalidStateUpdate(msg)) => Err(AgentFailure::invalid_patch(name, msg)),
        Err(other) => Err(AgentFailure::new(name, other.to_string())),
    }
}

/// Install the canned degraded result for an agent and flag it in context.
fn install_fallback(store: &StateStore, name: &str, message: impl Into<String>) {
    let message = message.into();
    let patch = StatePatch::new()
        .with_result(name, ResultRecord::fallback(message.clone()))
        .with_context(format!("{name}_fallback_used"), json!(true))
        .with_context(format!("{name}_needs_retry"), json!(true))
        .with_progress(
            ProgressEntry::new(name, ProgressAction::Fallback)
                .with_meta(json!({ "message": message })),
        );
    if let Err(err) = store.apply(&patch) {
        tracing::error!(agent = name, error = %err, "failed to install fallback record");
    }
}

/// Warn and tag context when one invocation grew the process past the
/// configured threshold.
fn guard_memory(store: &StateStore, config: &EngineConfig, name: &str, before: Option<u64>) {
    let (Some(before), Some(after)) = (before, memory::current_rss_mb()) else {
        return;
    };
    let delta = after.saturating_sub(before);
    if delta > config.memory_guard_mb {
        tracing::warn!(
            agent = name,
            delta_mb = delta,
            threshold_mb = config.memory_guard_mb,
            "memory growth exceeded guard threshold"
        );
        let patch = StatePatch::new().with_context(format!("{name}_mem_delta_mb"), json!(delta));
        if let Err(err) = store.apply(&patch) {
            tracing::error!(agent = name, error = %err, "failed to tag memory delta");
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::state::RunState;
    use crate::types::ThreadId;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Agent that fails a configured number of times before succeeding.
    struct FlakyAgent {
        name: String,
        fail_first: u32,
        calls: AtomicU32,
    }

    impl FlakyAgent {
        fn new(name: &str, fail_first: u32) -> Self {
            Self {
                name: name.to_string(),
                fail_first,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Agent for FlakyAgent {
        fn name(&self) -> &str {
            &self.name
        }

        async fn run(
            &self,
            _snapshot: &RunState,
            _ctx: &AgentContext,
        ) -> Result<StatePatch, AgentFailure> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_first {
                return Err(AgentFailure::new(&self.name, "transient backend error"));
            }
            Ok(StatePatch::new()
                .with_result(&self.name, ResultRecord::success(json!({ "call": call }))))
        }
    }

    /// Agent that tracks how many invocations overlap in time.
    struct ConcurrencyProbe {
        name: String,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Agent for ConcurrencyProbe {
        fn name(&self) -> &str {
            &self.name
        }

        async fn run(
            &self,
            _snapshot: &RunState,
            _ctx: &AgentContext,
        ) -> Result<StatePatch, AgentFailure> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(25)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(StatePatch::new().with_result(&self.name, ResultRecord::success(json!({}))))
        }
    }

    fn fast_config() -> EngineConfig {
        EngineConfig::new()
            .with_retry_backoff(Duration::from_millis(1), Duration::from_millis(5))
            .with_agent_timeout(Duration::from_millis(500))
    }

    fn store_with_plan(agents: &[&str]) -> Arc<StateStore> {
        let mut state = RunState::new(ThreadId::new("t"));
        state.execution_plan = agents.iter().map(|a| a.to_string()).collect();
        state.parallel_groups = vec![agents.iter().map(|a| a.to_string()).collect()];
        Arc::new(StateStore::new(state))
    }

    fn executor_for(registry: AgentRegistry, config: EngineConfig) -> GroupExecutor {
        GroupExecutor::new(
            Arc::new(registry),
            Arc::new(BreakerRegistry::new(
                config.breaker_threshold,
                config.breaker_timeout,
            )),
            Arc::new(StreamCoordinator::new(config.stream_hwm)),
            config,
        )
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let mut registry = AgentRegistry::new();
        registry.register(FlakyAgent::new("analytics", 2));
        let executor = executor_for(registry, fast_config());
        let store = store_with_plan(&["analytics"]);

        let group = BTreeSet::from(["analytics".to_string()]);
        executor.run_group(&store, &group, None).await.unwrap();

        let state = store.snapshot();
        assert_eq!(state.errors.len(), 2);
        assert_eq!(
            state.results["analytics"].status,
            crate::state::ResultStatus::Success
        );
        assert!(!state.context_flag("analytics_fallback_used"));
        assert_eq!(state.current_group, 1);
    }

    #[tokio::test]
    async fn test_exhaustion_installs_fallback() {
        let mut registry = AgentRegistry::new();
        registry.register(FlakyAgent::new("search", 99));
        let executor = executor_for(registry, fast_config());
        let store = store_with_plan(&["search"]);

        let group = BTreeSet::from(["search".to_string()]);
        executor.run_group(&store, &group, None).await.unwrap();

        let state = store.snapshot();
        assert_eq!(state.errors.len(), 3);
        assert_eq!(
            state.results["search"].status,
            crate::state::ResultStatus::Fallback
        );
        assert!(state.context_flag("search_fallback_used"));
        assert!(state.context_flag("search_needs_retry"));
        assert!(state
            .progress
            .iter()
            .any(|p| p.agent == "search" && p.action == ProgressAction::Fallback));
    }

    #[tokio::test]
    async fn test_sibling_survives_failure() {
        let mut registry = AgentRegistry::new();
        registry.register(FlakyAgent::new("search", 99));
        registry.register(FlakyAgent::new("analytics", 0));
        let executor = executor_for(registry, fast_config());
        let store = store_with_plan(&["search", "analytics"]);

        let group = BTreeSet::from(["search".to_string(), "analytics".to_string()]);
        executor.run_group(&store, &group, None).await.unwrap();

        let state = store.snapshot();
        assert_eq!(
            state.results["analytics"].status,
            crate::state::ResultStatus::Success
        );
        assert_eq!(
            state.results["search"].status,
            crate::state::ResultStatus::Fallback
        );
    }

    #[tokio::test]
    async fn test_concurrency_capped_by_semaphore() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut registry = AgentRegistry::new();
        let names = ["a", "b", "c", "d", "e"];
        for name in names {
            registry.register(ConcurrencyProbe {
                name: name.to_string(),
                active: active.clone(),
                peak: peak.clone(),
            });
        }
        let config = fast_config().with_max_concurrent(2);
        let executor = executor_for(registry, config);
        let store = store_with_plan(&names);

        let group: BTreeSet<String> = names.iter().map(|a| a.to_string()).collect();
        executor.run_group(&store, &group, None).await.unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(store.snapshot().results.len(), 5);
    }

    #[tokio::test]
    async fn test_breaker_short_circuits_without_calling_body() {
        let agent = FlakyAgent::new("document", 99);
        let mut registry = AgentRegistry::new();
        registry.register(agent);
        let config = fast_config().with_breaker(1, Duration::from_secs(60));
        let breakers = Arc::new(BreakerRegistry::new(
            config.breaker_threshold,
            config.breaker_timeout,
        ));
        breakers.record_failure("document");

        let executor = GroupExecutor::new(
            Arc::new(registry),
            breakers,
            Arc::new(StreamCoordinator::new(16)),
            config,
        );
        let store = store_with_plan(&["document"]);
        let group = BTreeSet::from(["document".to_string()]);
        executor.run_group(&store, &group, None).await.unwrap();

        let state = store.snapshot();
        // No attempt errors were recorded: the body never ran.
        assert!(state.errors.is_empty());
        assert_eq!(
            state.results["document"].status,
            crate::state::ResultStatus::Fallback
        );
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failed_attempt() {
        struct SlowAgent;

        #[async_trait]
        impl Agent for SlowAgent {
            fn name(&self) -> &str {
                "slow"
            }

            async fn run(
                &self,
                _snapshot: &RunState,
                _ctx: &AgentContext,
            ) -> Result<StatePatch, AgentFailure> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(StatePatch::new().with_result("slow", ResultRecord::success(json!({}))))
            }
        }

        let mut registry = AgentRegistry::new();
        registry.register(SlowAgent);
        let config = fast_config()
            .with_max_retries(2)
            .with_agent_timeout(Duration::from_millis(10));
        let executor = executor_for(registry, config);
        let store = store_with_plan(&["slow"]);

        let group = BTreeSet::from(["slow".to_string()]);
        executor.run_group(&store, &group, None).await.unwrap();

        let state = store.snapshot();
        assert_eq!(state.errors.len(), 2);
        assert!(state.errors.iter().all(|e| e.kind == ErrorKind::AgentTimeout));
        assert_eq!(
            state.results["slow"].status,
            crate::state::ResultStatus::Fallback
        );
    }

    #[tokio::test]
    async fn test_missing_result_record_is_invalid_patch() {
        struct ForgetfulAgent;

        #[async_trait]
        impl Agent for ForgetfulAgent {
            fn name(&self) -> &str {
                "forgetful"
            }

            async fn run(
                &self,
                _snapshot: &RunState,
                _ctx: &AgentContext,
            ) -> Result<StatePatch, AgentFailure> {
                Ok(StatePatch::new().with_context("orphan", json!(true)))
            }
        }

        let mut registry = AgentRegistry::new();
        registry.register(ForgetfulAgent);
        let executor = executor_for(registry, fast_config());
        let store = store_with_plan(&["forgetful"]);

        let group = BTreeSet::from(["forgetful".to_string()]);
        executor.run_group(&store, &group, None).await.unwrap();

        let state = store.snapshot();
        assert!(state
            .errors
            .iter()
            .all(|e| e.kind == ErrorKind::InvalidStateUpdate));
        assert_eq!(
            state.results["forgetful"].status,
            crate::state::ResultStatus::Fallback
        );
    }

    #[tokio::test]
    async fn test_unregistered_agent_falls_back() {
        let registry = AgentRegistry::new();
        let executor = executor_for(registry, fast_config());
        let store = store_with_plan(&["ghost"]);

        let group = BTreeSet::from(["ghost".to_string()]);
        executor.run_group(&store, &group, None).await.unwrap();

        let state = store.snapshot();
        assert_eq!(
            state.results["ghost"].status,
            crate::state::ResultStatus::Fallback
        );
        assert_eq!(state.errors.len(), 1);
    }
}
