//! Fan-out of inbound payloads to independent consumers.
//!
//! [`MessageRelay`] sits beside the client rather than inside it: it
//! subscribes to `message` events and republishes each payload on a
//! [`tokio::sync::broadcast`] channel, so several parts of a host (views,
//! caches, other tabs of a UI shell) can share one connection.

use serde_json::Value;
use tokio::sync::broadcast;

use crate::stream::client::RealtimeClient;
use crate::stream::events::{ClientEvent, EventKind, ListenerId};

/// Republishes every inbound payload of a client.
///
/// Lagging receivers lose the oldest payloads once `capacity` is exceeded.
/// Dropping the relay unregisters its listener.
#[derive(Debug)]
pub struct MessageRelay {
    client: RealtimeClient,
    listener: Option<ListenerId>,
    sender: broadcast::Sender<Value>,
}

impl MessageRelay {
    pub fn attach(client: &RealtimeClient, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        let publish = sender.clone();
        let listener = client.on(EventKind::Message, move |event| {
            if let ClientEvent::Message(payload) = event {
                // No receivers is fine; the payload is simply not relayed.
                let _ = publish.send(payload.clone());
            }
        });
        Self {
            client: client.clone(),
            listener: Some(listener),
            sender,
        }
    }

    /// Receiver for every payload relayed after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.sender.subscribe()
    }

    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Stops relaying. Open receivers see the channel close once drained.
    pub fn detach(mut self) {
        self.unregister();
    }

    fn unregister(&mut self) {
        if let Some(id) = self.listener.take() {
            self.client.off(id);
        }
    }
}

impl Drop for MessageRelay {
    fn drop(&mut self) {
        self.unregister();
    }
}
