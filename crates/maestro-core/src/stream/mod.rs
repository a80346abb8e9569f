//! Outbound event stream: taxonomy, sinks, and the ordering coordinator.

mod coordinator;
mod events;

pub use coordinator::StreamCoordinator;
pub use events::{ChannelSink, EventSink, InboundMessage, NullSink, StreamEvent, UpdateStatus};
