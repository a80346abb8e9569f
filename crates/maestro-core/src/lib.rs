//! # maestro-core
//!
//! Plan-driven multi-agent orchestration kernel.
//!
//! A run takes a natural-language request through a supervisor that decides
//! which agents to execute, a grouper that levelizes the plan into
//! parallel-safe groups, and a bounded parallel executor that invokes each
//! agent through a retry wrapper with per-agent circuit breaking. Agents
//! accumulate a typed shared state; a streaming coordinator serializes their
//! concurrent emissions into one ordered stream; a checkpointer snapshots
//! the state at every node boundary so a session can be resumed by its
//! thread id.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use maestro_core::prelude::*;
//! use std::sync::Arc;
//!
//! let mut registry = AgentRegistry::new();
//! registry.register(MyAgent::default());
//!
//! let controller = RunController::new(Arc::new(registry), checkpointer)
//!     .with_config(EngineConfig::from_env());
//!
//! let (sink, mut events) = ChannelSink::pair(64);
//! let outcome = controller
//!     .run(InvokeRequest::new("analyze last quarter sales"), Arc::new(sink))
//!     .await?;
//! ```

pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod plan;
pub mod prelude;
pub mod runtime;
pub mod state;
pub mod stream;
pub mod types;

pub use agent::{Agent, AgentContext, AgentRegistry};
pub use checkpoint::{CheckpointError, CheckpointMeta, Checkpointer};
pub use config::{CheckpointStoreKind, EngineConfig};
pub use error::{AgentFailure, EngineError, EngineResult, ErrorKind};
pub use plan::{levelize, PlanDraft, Planner, Supervisor};
pub use runtime::{
    BreakerRegistry, GroupExecutor, InvokeRequest, RetryPolicy, Route, RunController, RunOutcome,
    Router,
};
pub use state::{
    ErrorEntry, MessageRecord, ProgressAction, ProgressEntry, ResultRecord, ResultStatus, Role,
    RunState, StatePatch, StateStore,
};
pub use stream::{
    ChannelSink, EventSink, InboundMessage, NullSink, StreamCoordinator, StreamEvent, UpdateStatus,
};
pub use types::{CheckpointId, ThreadId};
