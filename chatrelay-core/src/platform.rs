//! Chat-platform collaborators used by the response handler.
//!
//! The concrete chat backend client lives outside this crate; it only has to
//! implement [`ChatClient`] and [`ChannelEvents`]. The stop-signal bus is an
//! in-process publish/subscribe value that the platform bridge publishes into.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::CoreResult;
use crate::model::{ChannelEvent, MessageUpdate, StopEvent};

/// Message-update side of the chat platform client.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Replace the named fields on a message. Safe to repeat with the same text.
    async fn partial_update_message(&self, message_id: &str, update: MessageUpdate)
    -> CoreResult<()>;
}

/// Channel the target message lives in.
#[async_trait]
pub trait ChannelEvents: Send + Sync {
    async fn send_event(&self, event: ChannelEvent) -> CoreResult<()>;
}

/// Handle identifying one registered stop listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Receiving half handed to a subscriber by [`StopBus::on`].
#[derive(Debug)]
pub struct StopListener {
    pub id: ListenerId,
    pub events: mpsc::UnboundedReceiver<StopEvent>,
}

#[derive(Debug, Default)]
struct BusInner {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<ListenerId, mpsc::UnboundedSender<StopEvent>>>,
}

/// Client-wide "stop generating" bus. Every listener sees every event; filtering
/// by message identity is the subscriber's job.
#[derive(Debug, Clone, Default)]
pub struct StopBus {
    inner: Arc<BusInner>,
}

impl StopBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    pub fn on(&self) -> StopListener {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners().insert(id, tx);
        StopListener { id, events: rx }
    }

    /// Remove a listener. Returns false if it was already gone.
    pub fn off(&self, id: ListenerId) -> bool {
        self.listeners().remove(&id).is_some()
    }

    /// Deliver a stop event to all current listeners; returns how many received it.
    pub fn publish(&self, event: StopEvent) -> usize {
        let mut listeners = self.listeners();
        listeners.retain(|_, tx| !tx.is_closed());
        listeners
            .values()
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners().len()
    }

    fn listeners(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<ListenerId, mpsc::UnboundedSender<StopEvent>>> {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop(id: &str) -> StopEvent {
        StopEvent {
            message_id: id.into(),
        }
    }

    #[tokio::test]
    async fn every_listener_sees_every_event() {
        let bus = StopBus::new();
        let mut a = bus.on();
        let mut b = bus.on();
        assert_ne!(a.id, b.id);

        assert_eq!(bus.publish(stop("m1")), 2);
        assert_eq!(a.events.recv().await, Some(stop("m1")));
        assert_eq!(b.events.recv().await, Some(stop("m1")));
    }

    #[tokio::test]
    async fn off_removes_listener_once() {
        let bus = StopBus::new();
        let mut a = bus.on();
        assert_eq!(bus.listener_count(), 1);
        assert!(bus.off(a.id));
        assert!(!bus.off(a.id));
        assert_eq!(bus.publish(stop("m1")), 0);
        assert_eq!(a.events.recv().await, None);
    }

    #[test]
    fn dropped_receivers_are_pruned_on_publish() {
        let bus = StopBus::new();
        let a = bus.on();
        let _b = bus.on();
        drop(a);
        assert_eq!(bus.publish(stop("m1")), 1);
        assert_eq!(bus.listener_count(), 1);
    }
}
