// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event Bus: in-process fanout with durable spillover.
//!
//! Publishes fan to (a) a broadcast channel for push clients, (b) the
//! durable [`EventLog`], and (c) the Command Queue, for `nudge_requested`
//! events only — direct command submissions enqueue against the Command
//! Queue directly and never pass through the bus.

pub mod log;

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::model::{Event, EventKind};
use crate::queue::CommandQueue;
pub use log::EventLog;

const BROADCAST_CAPACITY: usize = 1024;

/// In-process publisher fanning events to push subscribers, a durable log,
/// and (for nudges) the Command Queue.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    log: Arc<EventLog>,
    command_queue: Option<Arc<CommandQueue>>,
    dropped: std::sync::atomic::AtomicU64,
}

impl EventBus {
    pub fn new(log: Arc<EventLog>) -> Self {
        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx, log, command_queue: None, dropped: std::sync::atomic::AtomicU64::new(0) }
    }

    /// Wire the Command Queue sink. Called once during startup wiring.
    pub fn with_command_queue(mut self, queue: Arc<CommandQueue>) -> Self {
        self.command_queue = Some(queue);
        self
    }

    /// Publish an event. Never blocks the caller longer than a bounded
    /// enqueue: the broadcast send is non-blocking (lagging subscribers drop
    /// the oldest entries rather than stall the publisher).
    ///
    /// Returns the Command Queue job id when this event was a
    /// `nudge_requested` that got forwarded into the queue.
    pub async fn publish(&self, event: Event) -> Option<String> {
        let seq = self.log.append(&event);
        debug!(kind = event.kind.as_str(), session = %event.session_key, seq, "event published");

        if let Err(broadcast::error::SendError(_)) = self.tx.send(event.clone()) {
            // No subscribers currently connected; not an error.
        }

        let mut job_id = None;
        if event.kind == EventKind::NudgeRequested {
            if let Some(ref queue) = self.command_queue {
                let payload = event
                    .payload
                    .get("command")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_owned();
                match queue.enqueue(event.session_key.clone(), payload, "nudge".into()).await {
                    Ok(id) => job_id = Some(id),
                    Err(e) => warn!(error = %e, "failed to enqueue nudge-derived command"),
                }
            }
        }
        job_id
    }

    /// Subscribe to the live broadcast fanout. Independent of other
    /// subscribers; a slow subscriber only drops its own lagging messages.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Read events with seq greater than `since_seq` from the durable log.
    pub fn catchup(&self, since_seq: u64) -> Vec<log::LogEntry> {
        self.log.catchup(since_seq)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Record `n` messages a subscriber missed because it lagged behind the
    /// broadcast channel's retention window.
    pub fn note_dropped(&self, n: u64) {
        self.dropped.fetch_add(n, std::sync::atomic::Ordering::Relaxed);
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").field("subscribers", &self.tx.receiver_count()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SessionKey;

    #[tokio::test]
    async fn publish_reaches_subscriber_in_order() {
        let bus = EventBus::new(Arc::new(EventLog::new(None, 100)));
        let mut rx = bus.subscribe();
        let key = SessionKey::new("demo").unwrap();
        bus.publish(Event::new(EventKind::Progress, key.clone(), serde_json::json!({"n": 1})))
            .await;
        bus.publish(Event::new(EventKind::Progress, key.clone(), serde_json::json!({"n": 2})))
            .await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.payload["n"], 1);
        assert_eq!(second.payload["n"], 2);
    }

    #[tokio::test]
    async fn independent_subscribers_each_see_every_event() {
        let bus = EventBus::new(Arc::new(EventLog::new(None, 100)));
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        let key = SessionKey::new("demo").unwrap();
        bus.publish(Event::new(EventKind::Progress, key, serde_json::json!({}))).await;
        assert!(a.recv().await.is_ok());
        assert!(b.recv().await.is_ok());
    }
}
