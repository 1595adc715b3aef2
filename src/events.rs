//! Wallet lifecycle events.
//!
//! Lifecycle outcomes that callers observe asynchronously (load results,
//! save results and synchronization progress) are broadcast through an
//! [`EventBus`]. All subscribers receive all events; late subscribers do
//! not receive past events. Emission never fails: having no receivers is
//! not an error.

use thiserror::Error;
use tokio::sync::broadcast;

use crate::sync::SyncPlan;
use crate::wallet_id::WalletId;

const DEFAULT_EVENT_LIMIT: usize = 1024;

/// Event-related errors.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("event receiver failed: {0}")]
    ReceiveFailure(String),
}

type Result<T> = std::result::Result<T, EventError>;

/// Asynchronous lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    /// A wallet reached the open state. `backup_used` marks a load served
    /// from a rolling backup after a primary-file failure.
    WalletLoaded {
        id: WalletId,
        backup_used: bool,
    },
    WalletLoadFailed {
        id: WalletId,
        reason: String,
    },
    WalletSaved {
        id: WalletId,
    },
    WalletSaveFailed {
        id: WalletId,
        reason: String,
    },
    /// Synchronization was submitted to the background worker. Observable
    /// only after the open transition has fully completed.
    SyncStarted {
        plan: SyncPlan,
    },
    SyncCompleted,
    SyncFailed {
        reason: String,
    },
}

/// Broadcast bus for wallet events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WalletEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
        }
    }

    /// Create a new subscriber to receive events.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: WalletEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_LIMIT)
    }
}

/// Receiving half of the event bus.
#[derive(Debug)]
pub struct EventReceiver {
    receiver: broadcast::Receiver<WalletEvent>,
}

impl EventReceiver {
    /// Wait for the next event.
    pub async fn recv(&mut self) -> Result<WalletEvent> {
        match self.receiver.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                Err(EventError::ReceiveFailure(format!("lagged {n} events")))
            }
            Err(broadcast::error::RecvError::Closed) => {
                Err(EventError::ReceiveFailure("event bus closed".to_string()))
            }
        }
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<WalletEvent> {
        self.receiver.try_recv().ok()
    }
}
