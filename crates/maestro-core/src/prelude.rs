//! Prelude - import everything needed to build and run agents.
//!
//! ```rust
//! use maestro_core::prelude::*;
//! ```

pub use crate::agent::{Agent, AgentContext, AgentRegistry};
pub use crate::checkpoint::{CheckpointMeta, Checkpointer};
pub use crate::config::{CheckpointStoreKind, EngineConfig};
pub use crate::error::{AgentFailure, EngineError, EngineResult, ErrorKind};
pub use crate::plan::{PlanDraft, Planner, Supervisor};
pub use crate::runtime::{InvokeRequest, RetryPolicy, RunController, RunOutcome};
pub use crate::state::{
    MessageRecord, ProgressAction, ProgressEntry, ResultRecord, ResultStatus, RunState, StatePatch,
};
pub use crate::stream::{
    ChannelSink, EventSink, InboundMessage, NullSink, StreamEvent, UpdateStatus,
};
pub use crate::types::{CheckpointId, ThreadId};
