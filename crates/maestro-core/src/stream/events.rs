//! Subscriber protocol: message shapes for the duplex channel.
//!
//! Every message is a JSON object discriminated by its `type` field. The
//! transport carrying these (WebSocket, channel, test harness) is an
//! adapter concern; only the shapes live here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::mpsc;

use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::state::ResultRecord;
use crate::types::ThreadId;

// ============================================================================
// OUTBOUND EVENTS
// ============================================================================

/// Status carried on an `agent_update` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    Processing,
    Completed,
}

/// Events delivered to the subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// The supervisor settled on a plan.
    ExecutionPlan {
        agents: Vec<String>,
        total_steps: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// A node is about to execute.
    Progress {
        node: String,
        current_step: usize,
        total_steps: usize,
        execution_plan: Vec<String>,
    },
    /// An agent reported intermediate or final output.
    AgentUpdate {
        agent: String,
        message: String,
        data: serde_json::Value,
        progress: u8,
        status: UpdateStatus,
    },
    /// The run reached a terminal state.
    Complete {
        thread_id: ThreadId,
        results: BTreeMap<String, ResultRecord>,
    },
    /// Something went wrong; `kind` classifies it.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
        message: String,
        kind: ErrorKind,
    },
}

impl StreamEvent {
    /// Whether backpressure may shed this event. Errors and completions are
    /// never dropped.
    pub fn droppable(&self) -> bool {
        matches!(
            self,
            StreamEvent::Progress { .. } | StreamEvent::AgentUpdate { .. }
        )
    }
}

// ============================================================================
// INBOUND MESSAGES
// ============================================================================

/// Messages a subscriber may send over the duplex channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Invoke {
        input: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thread_id: Option<String>,
    },
}

// ============================================================================
// EVENT SINKS
// ============================================================================

/// Destination for outbound events. Implementations wrap whatever transport
/// the subscriber is connected through.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event. Returns [`EngineError::SubscriberGone`] once the
    /// subscriber can no longer receive.
    async fn emit(&self, event: StreamEvent) -> EngineResult<()>;
}

/// Sink backed by a bounded channel; the receiving half is typically wrapped
/// into a `Stream` for the transport.
pub struct ChannelSink {
    tx: mpsc::Sender<StreamEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self { tx }
    }

    /// Convenience constructor returning both halves.
    pub fn pair(capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, event: StreamEvent) -> EngineResult<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| EngineError::SubscriberGone)
    }
}

/// Sink that discards everything; used by the synchronous invocation path.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn emit(&self, _event: StreamEvent) -> EngineResult<()> {
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_wire_format() {
        let event = StreamEvent::ExecutionPlan {
            agents: vec!["search".into(), "analytics".into()],
            total_steps: 2,
            reason: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "execution_plan");
        assert_eq!(value["agents"][0], "search");
        assert_eq!(value["total_steps"], 2);
        assert!(value.get("reason").is_none());
    }

    #[test]
    fn test_agent_update_wire_format() {
        let event = StreamEvent::AgentUpdate {
            agent: "search".into(),
            message: "querying knowledge base".into(),
            data: json!({"hits": 3}),
            progress: 33,
            status: UpdateStatus::Processing,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "agent_update");
        assert_eq!(value["progress"], 33);
        assert_eq!(value["status"], "processing");
    }

    #[test]
    fn test_inbound_invoke_parses() {
        let msg: InboundMessage =
            serde_json::from_str(r#"{"type":"invoke","input":"analyze sales"}"#).unwrap();
        match msg {
            InboundMessage::Invoke { input, thread_id } => {
                assert_eq!(input, "analyze sales");
                assert!(thread_id.is_none());
            }
        }
    }

    #[test]
    fn test_inbound_unknown_type_rejected() {
        let parsed: Result<InboundMessage, _> =
            serde_json::from_str(r#"{"type":"subscribe","input":"x"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_droppable_classification() {
        let progress = StreamEvent::Progress {
            node: "analytics".into(),
            current_step: 1,
            total_steps: 2,
            execution_plan: vec![],
        };
        assert!(progress.droppable());

        let error = StreamEvent::Error {
            agent: None,
            message: "boom".into(),
            kind: ErrorKind::AgentFailure,
        };
        assert!(!error.droppable());

        let complete = StreamEvent::Complete {
            thread_id: ThreadId::new("t"),
            results: BTreeMap::new(),
        };
        assert!(!complete.droppable());
    }

    #[tokio::test]
    async fn test_channel_sink_reports_subscriber_gone() {
        let (sink, rx) = ChannelSink::pair(1);
        drop(rx);
        let err = sink
            .emit(StreamEvent::Error {
                agent: None,
                message: "late".into(),
                kind: ErrorKind::AgentFailure,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SubscriberGone));
    }
}
