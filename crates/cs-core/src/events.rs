use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Notification published whenever the authenticated-session state flips.
///
/// Fire-and-forget: consumers that missed the event learn the truth on their
/// next `is_authenticated()` read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthStateChanged {
    pub is_authenticated: bool,
}

// ---------------------------------------------------------------------------
// AuthEventBus
// ---------------------------------------------------------------------------

/// A broadcast-style bus for authentication-state changes, built on flume
/// channels.
///
/// Each call to [`subscribe`] creates a new receiver that will receive all
/// events published after the subscription was created. The bus is
/// thread-safe and can be cloned cheaply (it wraps its internals in an
/// `Arc`), so route guards and UI components can each hold their own handle.
///
/// [`subscribe`]: AuthEventBus::subscribe
#[derive(Clone)]
pub struct AuthEventBus {
    inner: Arc<Mutex<Vec<flume::Sender<AuthStateChanged>>>>,
}

impl AuthEventBus {
    /// Create a new, empty bus with no subscribers.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a new subscriber and return its receiving end.
    pub fn subscribe(&self) -> flume::Receiver<AuthStateChanged> {
        let (tx, rx) = flume::unbounded();
        let mut senders = self.inner.lock().expect("AuthEventBus lock poisoned");
        senders.push(tx);
        rx
    }

    /// Publish an event to all current subscribers.
    ///
    /// Disconnected subscribers (whose receivers have been dropped) are
    /// automatically pruned.
    pub fn publish(&self, event: AuthStateChanged) {
        let mut senders = self.inner.lock().expect("AuthEventBus lock poisoned");
        senders.retain(|tx| tx.send(event).is_ok());
    }

    /// Shorthand for publishing a state flip.
    pub fn publish_state(&self, is_authenticated: bool) {
        self.publish(AuthStateChanged { is_authenticated });
    }

    /// Return the number of currently active subscribers.
    pub fn subscriber_count(&self) -> usize {
        let senders = self.inner.lock().expect("AuthEventBus lock poisoned");
        senders.len()
    }
}

impl Default for AuthEventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
