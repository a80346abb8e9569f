//! Per-agent circuit breakers.
//!
//! Each agent name gets a failure counter. Once the counter reaches the
//! threshold the breaker opens: invocations inside the timeout window
//! short-circuit to a fallback without calling the agent body. After the
//! window elapses the breaker half-opens and the next call probes the agent;
//! success closes it again, another failure re-opens the window.
//!
//! Registries are plain values handed to the executor by constructor
//! injection, so tests get fresh breaker state without global teardown.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Observable breaker position for one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Default)]
struct BreakerEntry {
    failure_count: u32,
    opened_at: Option<Instant>,
}

/// Process-wide breaker table, keyed by agent name.
#[derive(Debug)]
pub struct BreakerRegistry {
    entries: Mutex<HashMap<String, BreakerEntry>>,
    threshold: u32,
    timeout: Duration,
}

impl BreakerRegistry {
    pub fn new(threshold: u32, timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            threshold: threshold.max(1),
            timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, BreakerEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current breaker position for an agent.
    pub fn state(&self, agent: &str) -> BreakerState {
        let entries = self.lock();
        match entries.get(agent).and_then(|e| e.opened_at) {
            Some(opened_at) if opened_at.elapsed() < self.timeout => BreakerState::Open,
            Some(_) => BreakerState::HalfOpen,
            None => BreakerState::Closed,
        }
    }

    /// Whether an invocation may proceed (closed or half-open probe).
    pub fn allows(&self, agent: &str) -> bool {
        self.state(agent) != BreakerState::Open
    }

    /// A successful call closes the breaker and resets its counter.
    pub fn record_success(&self, agent: &str) {
        self.lock().remove(agent);
    }

    /// An exhausted invocation bumps the counter; reaching the threshold
    /// opens the breaker for the timeout window.
    pub fn record_failure(&self, agent: &str) {
        let mut entries = self.lock();
        let entry = entries.entry(agent.to_string()).or_default();
        entry.failure_count += 1;
        if entry.failure_count >= self.threshold {
            entry.opened_at = Some(Instant::now());
        }
    }

    pub fn failure_count(&self, agent: &str) -> u32 {
        self.lock().get(agent).map_or(0, |e| e.failure_count)
    }
}

// ============================================================================
// TESTS
// ============================================================================
