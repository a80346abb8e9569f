//! Engine configuration.
//!
//! Every knob can be set programmatically (builder style) or picked up from
//! the environment via [`EngineConfig::from_env`]:
//!
//! | Variable | Effect | Default |
//! |---|---|---|
//! | `MAX_CONCURRENT` | Semaphore size for intra-group parallelism | 3 |
//! | `MAX_RETRIES` | Retry attempts per agent call | 3 |
//! | `RETRY_POLICY` | `exponential` \| `linear` \| `fibonacci` | `exponential` |
//! | `BREAKER_THRESHOLD` | Failures before the breaker opens | 5 |
//! | `BREAKER_TIMEOUT_S` | Open-state duration in seconds | 60 |
//! | `AGENT_TIMEOUT_S` | Per-agent hard timeout in seconds | 60 |
//! | `RUN_DEADLINE_S` | Soft run deadline in seconds | 600 |
//! | `STREAM_HWM` | Per-agent event queue high-water mark | 1024 |
//! | `CHECKPOINT_STORE` | `memory` \| `local_durable` | `memory` |

use std::str::FromStr;
use std::time::Duration;

use crate::runtime::retry::RetryPolicy;

// ============================================================================
// CHECKPOINT STORE SELECTION
// ============================================================================

/// Which checkpoint store variant the run controller should be wired with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckpointStoreKind {
    /// Volatile, single-process store for tests and development.
    #[default]
    Memory,
    /// Embedded write-ahead-log store on the local filesystem.
    LocalDurable,
}

impl FromStr for CheckpointStoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(CheckpointStoreKind::Memory),
            "local_durable" => Ok(CheckpointStoreKind::LocalDurable),
            other => Err(format!("unknown checkpoint store: {other}")),
        }
    }
}

// ============================================================================
// ENGINE CONFIGURATION
// ============================================================================

/// Configuration for the orchestration engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum concurrent agent invocations within a group.
    pub max_concurrent: usize,
    /// Retry attempts per agent invocation.
    pub max_retries: u32,
    /// Backoff policy between retry attempts.
    pub retry_policy: RetryPolicy,
    /// Base delay for the backoff policy.
    pub retry_base: Duration,
    /// Cap for any single backoff delay.
    pub retry_max_delay: Duration,
    /// Consecutive exhausted invocations before the breaker opens.
    pub breaker_threshold: u32,
    /// How long an open breaker short-circuits invocations.
    pub breaker_timeout: Duration,
    /// Hard timeout for a single agent invocation.
    pub agent_timeout: Duration,
    /// Soft deadline for a whole run, checked at group boundaries.
    pub run_deadline: Duration,
    /// Per-agent outbound event queue high-water mark.
    pub stream_hwm: usize,
    /// Checkpoint store variant to wire at startup.
    pub checkpoint_store: CheckpointStoreKind,
    /// Memory-growth threshold per agent invocation, in megabytes.
    pub memory_guard_mb: u64,
    /// Upper bound on node transitions per run, as a runaway backstop.
    pub max_transitions: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_retries: 3,
            retry_policy: RetryPolicy::Exponential,
            retry_base: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
            breaker_threshold: 5,
            breaker_timeout: Duration::from_secs(60),
            agent_timeout: Duration::from_secs(60),
            run_deadline: Duration::from_secs(600),
            stream_hwm: 1024,
            checkpoint_store: CheckpointStoreKind::Memory,
            memory_guard_mb: 100,
            max_transitions: 100,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from recognized environment variables,
    /// falling back to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_parse("MAX_CONCURRENT") {
            config.max_concurrent = v;
        }
        if let Some(v) = env_parse("MAX_RETRIES") {
            config.max_retries = v;
        }
        if let Some(v) = env_parse::<RetryPolicy>("RETRY_POLICY") {
            config.retry_policy = v;
        }
        if let Some(v) = env_parse::<u32>("BREAKER_THRESHOLD") {
            config.breaker_threshold = v;
        }
        if let Some(v) = env_parse::<u64>("BREAKER_TIMEOUT_S") {
            config.breaker_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("AGENT_TIMEOUT_S") {
            config.agent_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("RUN_DEADLINE_S") {
            config.run_deadline = Duration::from_secs(v);
        }
        if let Some(v) = env_parse("STREAM_HWM") {
            config.stream_hwm = v;
        }
        if let Some(v) = env_parse::<CheckpointStoreKind>("CHECKPOINT_STORE") {
            config.checkpoint_store = v;
        }
        config
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set backoff parameters.
    ///
    /// Delay formula for the default policy: `min(base * 2^k, max)`.
    pub fn with_retry_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base = base;
        self.retry_max_delay = max;
        self
    }

    pub fn with_breaker(mut self, threshold: u32, timeout: Duration) -> Self {
        self.breaker_threshold = threshold;
        self.breaker_timeout = timeout;
        self
    }

    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout = timeout;
        self
    }

    pub fn with_run_deadline(mut self, deadline: Duration) -> Self {
        self.run_deadline = deadline;
        self
    }

    pub fn with_stream_hwm(mut self, hwm: usize) -> Self {
        self.stream_hwm = hwm;
        self
    }

    pub fn with_checkpoint_store(mut self, kind: CheckpointStoreKind) -> Self {
        self.checkpoint_store = kind;
        self
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

// ============================================================================
// TESTS
// ============================================================================
