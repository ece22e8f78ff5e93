//! Client events and the listener registry that fans them out.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tracing::error;

use crate::stream::error::{ClientError, ErrorKind};
use crate::stream::state::ConnectionState;
use crate::stream::transport::CloseInfo;

/// Everything the client reports to listeners.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    Open,
    /// Application payload; liveness frames are never delivered here.
    Message(Value),
    Close(CloseInfo),
    Error(ClientError),
    StateChange {
        from: ConnectionState,
        to: ConnectionState,
    },
    MessageSent {
        /// True when the frame was flushed from the outbound queue.
        from_queue: bool,
    },
    ReconnectScheduled {
        attempt: u32,
        delay: Duration,
    },
    MaxReconnectAttemptsReached {
        attempts: u32,
    },
    AuthRecoveryNeeded {
        code: u16,
        reason: String,
    },
    MaxRecoveryAttemptsReached {
        kind: ErrorKind,
        attempts: u32,
    },
    ErrorRecoveryAttempt {
        kind: ErrorKind,
        attempt: u32,
        max_attempts: u32,
    },
    QueueCleared {
        discarded: usize,
    },
    RecommendPageReload,
    ContactSupportRecommended,
}

/// Discriminant of [`ClientEvent`], used to register for one event type.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EventKind {
    Open,
    Message,
    Close,
    Error,
    StateChange,
    MessageSent,
    ReconnectScheduled,
    MaxReconnectAttemptsReached,
    AuthRecoveryNeeded,
    MaxRecoveryAttemptsReached,
    ErrorRecoveryAttempt,
    QueueCleared,
    RecommendPageReload,
    ContactSupportRecommended,
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::Open => EventKind::Open,
            ClientEvent::Message(_) => EventKind::Message,
            ClientEvent::Close(_) => EventKind::Close,
            ClientEvent::Error(_) => EventKind::Error,
            ClientEvent::StateChange { .. } => EventKind::StateChange,
            ClientEvent::MessageSent { .. } => EventKind::MessageSent,
            ClientEvent::ReconnectScheduled { .. } => EventKind::ReconnectScheduled,
            ClientEvent::MaxReconnectAttemptsReached { .. } => {
                EventKind::MaxReconnectAttemptsReached
            }
            ClientEvent::AuthRecoveryNeeded { .. } => EventKind::AuthRecoveryNeeded,
            ClientEvent::MaxRecoveryAttemptsReached { .. } => EventKind::MaxRecoveryAttemptsReached,
            ClientEvent::ErrorRecoveryAttempt { .. } => EventKind::ErrorRecoveryAttempt,
            ClientEvent::QueueCleared { .. } => EventKind::QueueCleared,
            ClientEvent::RecommendPageReload => EventKind::RecommendPageReload,
            ClientEvent::ContactSupportRecommended => EventKind::ContactSupportRecommended,
        }
    }
}

/// Handle returned by `on`, passed to `off` to unregister.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ListenerId(u64);

type Callback = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

struct Entry {
    id: ListenerId,
    kind: Option<EventKind>,
    callback: Callback,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<Entry>,
}

/// Listener registry. Emission works on a snapshot, so callbacks may add or
/// remove listeners (or call back into the client) while being notified.
#[derive(Default)]
pub(crate) struct Listeners {
    registry: Mutex<Registry>,
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.len())
            .finish()
    }
}

impl Listeners {
    /// Registers `callback` for `kind`, or for every event when `kind` is
    /// `None`.
    pub(crate) fn add(&self, kind: Option<EventKind>, callback: Callback) -> ListenerId {
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = ListenerId(registry.next_id);
        registry.entries.push(Entry { id, kind, callback });
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut registry = self.lock();
        let before = registry.entries.len();
        registry.entries.retain(|entry| entry.id != id);
        registry.entries.len() != before
    }

    pub(crate) fn clear(&self) {
        self.lock().entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Delivers `event` to matching listeners in registration order.
    ///
    /// A panicking listener is logged and skipped; the rest still run.
    pub(crate) fn emit(&self, event: &ClientEvent) {
        let kind = event.kind();
        let targets: Vec<Callback> = self
            .lock()
            .entries
            .iter()
            .filter(|entry| entry.kind.map_or(true, |wanted| wanted == kind))
            .map(|entry| Arc::clone(&entry.callback))
            .collect();

        for callback in targets {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!(event = "listener_panicked", kind = ?kind);
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
