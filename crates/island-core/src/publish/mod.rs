//! State-change fan-out
//!
//! Publishes ordered `StateUpdate`s to any number of subscribers over a
//! broadcast ring. Publication never blocks on a subscriber: a slow consumer
//! lags independently and loses the oldest updates it had not read yet, which
//! its `Subscription` handle surfaces as a dropped-notification counter.
//! Dropping the handle unsubscribes, safe at any point.

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::session::{SessionId, StateChange, StateUpdate};

/// Fan-out point for session state changes
#[derive(Clone, Debug)]
pub struct StatePublisher {
    tx: broadcast::Sender<StateUpdate>,
}

impl StatePublisher {
    /// Create a publisher whose ring holds `capacity` updates
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish one state change for a session.
    ///
    /// Updates for a session reach every subscriber in publication order.
    /// With no subscribers the update is dropped silently.
    pub fn publish(&self, session_id: &SessionId, change: StateChange) {
        let update = StateUpdate {
            session_id: session_id.clone(),
            change,
        };
        if self.tx.send(update).is_err() {
            debug!("No subscribers; state update dropped");
        }
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            dropped: 0,
        }
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A subscriber handle; drop it to unsubscribe
pub struct Subscription {
    rx: broadcast::Receiver<StateUpdate>,
    dropped: u64,
}

impl Subscription {
    /// Receive the next state update.
    ///
    /// Returns `None` once the publisher is gone and the backlog is drained.
    /// Overflow (this subscriber fell behind the ring) is absorbed into the
    /// dropped counter and reception continues with the oldest retained
    /// update.
    pub async fn recv(&mut self) -> Option<StateUpdate> {
        loop {
            match self.rx.recv().await {
                Ok(update) => return Some(update),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped += n;
                    warn!(skipped = n, total = self.dropped, "Subscriber lagged; updates dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive; `None` when nothing is queued
    pub fn try_recv(&mut self) -> Option<StateUpdate> {
        loop {
            match self.rx.try_recv() {
                Ok(update) => return Some(update),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    self.dropped += n;
                }
                Err(_) => return None,
            }
        }
    }

    /// Total updates this subscriber lost to overflow
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
