// crates/server/src/hub.rs
//! Fan-out of progress messages to live stream subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use autofollow_core::ProgressMessage;
use tokio::sync::mpsc;

use crate::jobs::SharedJobState;

pub type SubscriberId = u64;

/// Set of connected subscribers.
///
/// Subscribe and broadcast serialize on one lock: a new subscriber's `Status`
/// snapshot is queued before any broadcast that follows it, so every
/// subscriber sees non-decreasing counts.
pub struct BroadcastHub {
    state: Arc<SharedJobState>,
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<SubscriberId, mpsc::UnboundedSender<ProgressMessage>>>,
}

impl BroadcastHub {
    pub fn new(state: Arc<SharedJobState>) -> Self {
        Self {
            state,
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriberId, mpsc::UnboundedSender<ProgressMessage>>> {
        self.subscribers.lock().unwrap_or_else(|e| {
            tracing::error!("Mutex poisoned on subscriber set: {e}");
            e.into_inner()
        })
    }

    /// Register a subscriber. Its receiver already holds a `Status` snapshot.
    pub fn subscribe(&self) -> (SubscriberId, mpsc::UnboundedReceiver<ProgressMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut subscribers = self.lock();
        let snap = self.state.snapshot();
        // The receiver is in hand, so this cannot fail.
        let _ = tx.send(ProgressMessage::Status {
            is_running: snap.is_running,
            target_count: snap.target_count,
            current_count: snap.current_count,
        });
        subscribers.insert(id, tx);
        tracing::debug!(subscriber_id = id, total = subscribers.len(), "subscriber connected");

        (id, rx)
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.lock();
        let removed = subscribers.remove(&id).is_some();
        if removed {
            tracing::debug!(subscriber_id = id, total = subscribers.len(), "subscriber disconnected");
        }
        removed
    }

    /// Deliver `message` to every subscriber, dropping the ones whose
    /// receiver is gone. Returns the number of successful deliveries.
    pub fn broadcast(&self, message: ProgressMessage) -> usize {
        let mut subscribers = self.lock();
        let mut delivered = 0;
        subscribers.retain(|id, tx| match tx.send(message.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => {
                tracing::debug!(subscriber_id = *id, "dropping unreachable subscriber");
                false
            }
        });
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }
}
