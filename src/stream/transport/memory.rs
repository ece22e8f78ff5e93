//! In-process [`Connector`] for tests and local simulations.
//!
//! Every accepted open hands a [`ServerEnd`] to the paired
//! [`MemoryListener`], which plays the server: it reads what the client wrote
//! and injects frames or closures back.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::{self, BoxFuture};
use tokio::sync::mpsc;

use super::{
    CloseInfo, Connector, Link, OpenRequest, Outbound, TransportError, TransportEvent,
};

/// Scripted result for the next `open` call.
#[derive(Clone, Debug)]
pub enum OpenOutcome {
    Accept,
    /// Reject the upgrade with an HTTP status.
    Reject(u16),
    /// Fail as if the host were unreachable.
    Unreachable,
    /// Never resolve; exercises the connection timeout.
    Hang,
}

#[derive(Debug, Default)]
struct Script {
    outcomes: VecDeque<OpenOutcome>,
    fallback: Option<OpenOutcome>,
    attempts: usize,
}

/// Connector that links the client to an in-memory peer.
#[derive(Clone, Debug)]
pub struct MemoryConnector {
    script: Arc<Mutex<Script>>,
    accepted: mpsc::UnboundedSender<ServerEnd>,
}

/// Receives the server side of each accepted link.
#[derive(Debug)]
pub struct MemoryListener {
    accepted: mpsc::UnboundedReceiver<ServerEnd>,
}

impl MemoryConnector {
    pub fn new() -> (Self, MemoryListener) {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        let connector = Self {
            script: Arc::new(Mutex::new(Script::default())),
            accepted: accepted_tx,
        };
        (connector, MemoryListener { accepted: accepted_rx })
    }

    /// Queues the outcome of a future `open` call. Unscripted opens accept.
    pub fn push_outcome(&self, outcome: OpenOutcome) {
        self.lock().outcomes.push_back(outcome);
    }

    /// Outcome used once the scripted queue is empty.
    pub fn set_fallback(&self, outcome: OpenOutcome) {
        self.lock().fallback = Some(outcome);
    }

    /// Number of `open` calls made so far.
    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    fn next_outcome(&self) -> OpenOutcome {
        let mut script = self.lock();
        script.attempts += 1;
        script
            .outcomes
            .pop_front()
            .or_else(|| script.fallback.clone())
            .unwrap_or(OpenOutcome::Accept)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Connector for MemoryConnector {
    fn open(&self, request: OpenRequest) -> BoxFuture<'static, Result<Link, TransportError>> {
        match self.next_outcome() {
            OpenOutcome::Accept => {
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                let (events_tx, events_rx) = mpsc::unbounded_channel();
                let server = ServerEnd {
                    url: request.url,
                    has_token: request.token.is_some(),
                    outbound: outbound_rx,
                    events: events_tx,
                };
                if self.accepted.send(server).is_err() {
                    return Box::pin(future::ready(Err(TransportError::Unreachable(
                        "memory listener dropped".to_string(),
                    ))));
                }
                Box::pin(future::ready(Ok(Link::new(outbound_tx, events_rx))))
            }
            OpenOutcome::Reject(status) => {
                Box::pin(future::ready(Err(TransportError::Rejected(status))))
            }
            OpenOutcome::Unreachable => Box::pin(future::ready(Err(
                TransportError::Unreachable("connection refused".to_string()),
            ))),
            OpenOutcome::Hang => Box::pin(future::pending()),
        }
    }
}

impl MemoryListener {
    /// Waits for the next accepted link.
    pub async fn accept(&mut self) -> Option<ServerEnd> {
        self.accepted.recv().await
    }
}

/// Server half of an in-memory link.
#[derive(Debug)]
pub struct ServerEnd {
    url: String,
    has_token: bool,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl ServerEnd {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn has_token(&self) -> bool {
        self.has_token
    }

    /// Next frame or close instruction written by the client.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    /// Next text frame written by the client, skipping close instructions.
    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.outbound.recv().await? {
                Outbound::Text(text) => return Some(text),
                Outbound::Close(_) => continue,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<Outbound> {
        self.outbound.try_recv().ok()
    }

    /// Delivers a text frame to the client.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.events
            .send(TransportEvent::Message(text.into()))
            .is_ok()
    }

    /// Closes with a close frame.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self
            .events
            .send(TransportEvent::Closed(CloseInfo::new(code, reason)));
    }

    /// Drops the connection without a close frame.
    pub fn drop_connection(&self) {
        let _ = self
            .events
            .send(TransportEvent::Closed(CloseInfo::abnormal("connection reset")));
    }

    /// Reports that frames the client wrote never reached the wire.
    pub fn fail_writes(&mut self, error: &str) {
        let mut unsent = Vec::new();
        while let Ok(next) = self.outbound.try_recv() {
            if let Outbound::Text(text) = next {
                unsent.push(text);
            }
        }
        let _ = self.events.send(TransportEvent::Unsent(unsent));
        let _ = self.events.send(TransportEvent::Errored(error.to_string()));
    }
}
