//! Streaming coordinator - serializes concurrent agent emissions.
//!
//! Agents in a parallel group emit events concurrently; subscribers expect a
//! single stream that groups events by agent and respects the canonical
//! intra-group agent order. Each agent gets a FIFO queue; after a group
//! settles, the queues are drained to the sink agent-by-agent in canonical
//! order. Intra-agent order is preserved.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::EngineResult;

use super::events::{EventSink, StreamEvent};

#[derive(Debug, Default)]
struct AgentQueue {
    events: VecDeque<StreamEvent>,
    dropped: usize,
}

/// Per-agent event queues with a high-water mark.
///
/// When a queue exceeds the high-water mark, the oldest droppable event
/// (progress or agent update) is shed; errors and completions are never
/// dropped. Shed counts are reported by [`StreamCoordinator::drain_group`]
/// so the caller can surface them in the error log.
pub struct StreamCoordinator {
    queues: Mutex<BTreeMap<String, AgentQueue>>,
    hwm: usize,
}

impl StreamCoordinator {
    pub fn new(hwm: usize) -> Self {
        Self {
            queues: Mutex::new(BTreeMap::new()),
            hwm: hwm.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, AgentQueue>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the queue for an agent ahead of its first emission.
    pub fn register(&self, agent: &str) {
        self.lock().entry(agent.to_string()).or_default();
    }

    /// Append an event to an agent's queue, shedding the oldest droppable
    /// event once the high-water mark is exceeded.
    pub fn queue(&self, agent: &str, event: StreamEvent) {
        let mut queues = self.lock();
        let queue = queues.entry(agent.to_string()).or_default();
        queue.events.push_back(event);

        if queue.events.len() > self.hwm {
            if let Some(index) = queue.events.iter().position(StreamEvent::droppable) {
                queue.events.remove(index);
                queue.dropped += 1;
                tracing::warn!(agent, "stream high-water mark reached; dropped oldest event");
            }
        }
    }

    /// Number of queued events for an agent.
    pub fn queued_len(&self, agent: &str) -> usize {
        self.lock().get(agent).map_or(0, |q| q.events.len())
    }

    /// Drain every agent of `group` to the sink, whole-agent at a time, in
    /// the order agents appear in `canonical_order`. Returns the number of
    /// events shed per agent since the last drain.
    pub async fn drain_group(
        &self,
        sink: &dyn EventSink,
        group: &BTreeSet<String>,
        canonical_order: &[String],
    ) -> EngineResult<Vec<(String, usize)>> {
        let mut drained: Vec<(String, VecDeque<StreamEvent>, usize)> = Vec::new();
        {
            let mut queues = self.lock();
            for agent in canonical_order.iter().filter(|a| group.contains(*a)) {
                if let Some(queue) = queues.get_mut(agent) {
                    let events = std::mem::take(&mut queue.events);
                    let dropped = std::mem::take(&mut queue.dropped);
                    drained.push((agent.clone(), events, dropped));
                }
            }
        }

        let mut shed: Vec<(String, usize)> = Vec::new();
        for (agent, events, dropped) in drained {
            for event in events {
                sink.emit(event).await?;
            }
            if dropped > 0 {
                shed.push((agent, dropped));
            }
        }
        Ok(shed)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::stream::events::{ChannelSink, UpdateStatus};
    use serde_json::json;

    fn update(agent: &str, message: &str) -> StreamEvent {
        StreamEvent::AgentUpdate {
            agent: agent.into(),
            message: message.into(),
            data: json!({}),
            progress: 0,
            status: UpdateStatus::Processing,
        }
    }

    fn error(agent: &str) -> StreamEvent {
        StreamEvent::Error {
            agent: Some(agent.into()),
            message: "failed".into(),
            kind: ErrorKind::AgentFailure,
        }
    }

    fn group(agents: &[&str]) -> BTreeSet<String> {
        agents.iter().map(|a| a.to_string()).collect()
    }

    fn order(agents: &[&str]) -> Vec<String> {
        agents.iter().map(|a| a.to_string()).collect()
    }

    #[tokio::test]
    async fn test_drain_respects_canonical_order() {
        let coordinator = StreamCoordinator::new(64);
        // Interleaved arrival: analytics first, then search, then analytics.
        coordinator.queue("analytics", update("analytics", "a1"));
        coordinator.queue("search", update("search", "s1"));
        coordinator.queue("analytics", update("analytics", "a2"));
        coordinator.queue("search", update("search", "s2"));

        let (sink, mut rx) = ChannelSink::pair(16);
        coordinator
            .drain_group(
                &sink,
                &group(&["search", "analytics"]),
                &order(&["search", "analytics"]),
            )
            .await
            .unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let StreamEvent::AgentUpdate { agent, message, .. } = event {
                seen.push((agent, message));
            }
        }
        // All of search's events precede all of analytics' events, and each
        // agent's own events keep their FIFO order.
        assert_eq!(
            seen,
            vec![
                ("search".to_string(), "s1".to_string()),
                ("search".to_string(), "s2".to_string()),
                ("analytics".to_string(), "a1".to_string()),
                ("analytics".to_string(), "a2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_drain_skips_agents_outside_group() {
        let coordinator = StreamCoordinator::new(64);
        coordinator.queue("search", update("search", "s1"));
        coordinator.queue("document", update("document", "d1"));

        let (sink, mut rx) = ChannelSink::pair(16);
        coordinator
            .drain_group(&sink, &group(&["search"]), &order(&["search", "document"]))
            .await
            .unwrap();

        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 1);
        assert_eq!(coordinator.queued_len("document"), 1);
    }

    #[tokio::test]
    async fn test_high_water_mark_sheds_oldest_droppable() {
        let coordinator = StreamCoordinator::new(2);
        coordinator.queue("search", update("search", "oldest"));
        coordinator.queue("search", update("search", "middle"));
        coordinator.queue("search", update("search", "newest"));
        assert_eq!(coordinator.queued_len("search"), 2);

        let (sink, mut rx) = ChannelSink::pair(16);
        let shed = coordinator
            .drain_group(&sink, &group(&["search"]), &order(&["search"]))
            .await
            .unwrap();
        assert_eq!(shed, vec![("search".to_string(), 1)]);

        let mut messages = Vec::new();
        while let Ok(StreamEvent::AgentUpdate { message, .. }) = rx.try_recv() {
            messages.push(message);
        }
        assert_eq!(messages, vec!["middle".to_string(), "newest".to_string()]);
    }

    #[tokio::test]
    async fn test_errors_never_dropped() {
        let coordinator = StreamCoordinator::new(1);
        coordinator.queue("search", error("search"));
        coordinator.queue("search", error("search"));
        coordinator.queue("search", error("search"));
        // No droppable events exist; the queue grows past the mark.
        assert_eq!(coordinator.queued_len("search"), 3);

        coordinator.queue("search", update("search", "droppable"));
        // The update is the only droppable event and is shed immediately.
        assert_eq!(coordinator.queued_len("search"), 3);
    }

    #[tokio::test]
    async fn test_drain_resets_queues() {
        let coordinator = StreamCoordinator::new(8);
        coordinator.queue("search", update("search", "s1"));

        let (sink, _rx) = ChannelSink::pair(16);
        coordinator
            .drain_group(&sink, &group(&["search"]), &order(&["search"]))
            .await
            .unwrap();
        assert_eq!(coordinator.queued_len("search"), 0);
    }
}
