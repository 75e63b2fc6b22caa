//! Broadcast channel for [`LifecycleEvent`]s.
//!
//! Uses [`tokio::sync::broadcast`] so every subscriber sees every event.
//! Sending and `try_recv` are synchronous; no runtime is required.

use facet_types::LifecycleEvent;
use tokio::sync::broadcast;

/// Receiving end of an [`EventBus`] subscription.
pub type EventReceiver = broadcast::Receiver<LifecycleEvent>;

/// Default number of buffered events before slow subscribers lag.
const DEFAULT_CAPACITY: usize = 256;

/// Shared lifecycle event bus.  Clones share the same channel.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish `event`.  Returns the number of subscribers that received it;
    /// zero subscribers is normal.
    pub fn publish(&self, event: LifecycleEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }
}

/// Drain every event currently buffered in `rx`, skipping over lag gaps.
pub fn drain(rx: &mut EventReceiver) -> Vec<LifecycleEvent> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(ev) => out.push(ev),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    out
}
