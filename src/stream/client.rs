//! Self-healing realtime client.
//!
//! [`RealtimeClient`] owns the connection state machine. It opens links
//! through a [`Connector`], keeps them alive with a ping/pong heartbeat,
//! classifies every failure and reconnects with backoff, buffering sends made
//! while the link is down.
//!
//! All state sits behind one mutex and every callback (socket event, timer,
//! public call) runs to completion while holding it. Events raised during a
//! callback join a single FIFO before the lock is released and are delivered
//! from it after, so listeners see them in the order they happened and may
//! call back into the client.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use secrecy::SecretString;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::retry::{with_timeout, ReconnectPolicy};
use crate::stream::diagnostics::{
    recommend, ConnectionStats, HealthInputs, HealthReport, Recommendation, RecoveryAction,
};
use crate::stream::error::{ClientError, ErrorKind};
use crate::stream::events::{ClientEvent, EventKind, ListenerId, Listeners};
use crate::stream::heartbeat::HeartbeatState;
use crate::stream::network::{AssumeOnline, NetworkMonitor};
use crate::stream::options::ClientOptions;
use crate::stream::proto::{now_ms, ControlFrame, InboundFrame};
use crate::stream::queue::OutboundQueue;
use crate::stream::recovery::{classify, ErrorRecord, Failure, RecoveryDecision, RecoveryRegistry};
use crate::stream::state::{ConnectionState, StateTransition, TransitionLog};
use crate::stream::transport::{
    CloseInfo, Connector, Link, OpenRequest, TransportError, TransportEvent, WebSocketConnector,
    CLOSE_NORMAL, CLOSE_PONG_TIMEOUT,
};

const DISCONNECT_REASON: &str = "client disconnect";
const MANUAL_RECONNECT_REASON: &str = "manual reconnect";
const PONG_TIMEOUT_REASON: &str = "pong timeout";

/// Builder for [`RealtimeClient`].
pub struct RealtimeClientBuilder {
    url: String,
    options: ClientOptions,
    token: Option<SecretString>,
    connector: Arc<dyn Connector>,
    network: Arc<dyn NetworkMonitor>,
}

impl RealtimeClientBuilder {
    /// Replaces the default [`ClientOptions`]. Validated by [`build`](Self::build).
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Bearer token presented on every connection attempt.
    ///
    /// The client neither refreshes nor validates it.
    pub fn token(mut self, token: SecretString) -> Self {
        self.token = Some(token);
        self
    }

    /// Transport used to open links. Defaults to [`WebSocketConnector`].
    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Source of online/offline signals. Defaults to [`AssumeOnline`].
    pub fn network_monitor(mut self, network: impl NetworkMonitor) -> Self {
        self.network = Arc::new(network);
        self
    }

    /// Validates the options and creates a `disconnected` client.
    ///
    /// Trailing whitespace is trimmed from the url.
    pub fn build(self) -> Result<RealtimeClient, ClientError> {
        self.options.validate()?;
        let url = self.url.trim_end().to_string();
        let inner = Inner::new(&self.options);
        Ok(RealtimeClient {
            core: Arc::new(Core {
                url,
                token: self.token,
                policy: self.options.reconnect_policy(),
                options: self.options,
                connector: self.connector,
                network: self.network,
                listeners: Listeners::default(),
                inner: Mutex::new(inner),
                outbox: Mutex::new(Outbox::default()),
            }),
        })
    }
}

/// Handle to a realtime connection. Cheap to clone; clones share the
/// connection.
#[derive(Clone)]
pub struct RealtimeClient {
    core: Arc<Core>,
}

impl fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("url", &self.core.url)
            .field("state", &self.state())
            .finish()
    }
}

/// Snapshot returned by [`RealtimeClient::status`].
#[derive(Clone, Debug, Serialize)]
pub struct ClientStatus {
    pub url: String,
    pub state: ConnectionState,
    pub is_connected: bool,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    pub consecutive_errors: u32,
    pub queue_length: usize,
    pub awaiting_network: bool,
    pub last_ping_ms: Option<u64>,
    pub last_pong_ms: Option<u64>,
    pub awaiting_pong: bool,
    pub recovery_attempts: Vec<(ErrorKind, u32)>,
    pub stats: ConnectionStats,
    pub transitions: Vec<StateTransition>,
    pub recent_errors: Vec<ErrorRecord>,
}

impl RealtimeClient {
    /// Creates a websocket client for `url` in the `disconnected` state.
    pub fn new(url: impl Into<String>, options: ClientOptions) -> Result<Self, ClientError> {
        Self::builder(url).options(options).build()
    }

    /// Starts a builder with default options, no token and the websocket
    /// transport.
    pub fn builder(url: impl Into<String>) -> RealtimeClientBuilder {
        RealtimeClientBuilder {
            url: url.into(),
            options: ClientOptions::default(),
            token: None,
            connector: Arc::new(WebSocketConnector::new()),
            network: Arc::new(AssumeOnline),
        }
    }

    /// Connects, or joins the attempt already in flight.
    ///
    /// Resolves once the client is `connected`; fails with the error of the
    /// attempt it joined, or with [`ClientError::Disconnected`] if
    /// [`disconnect`](Self::disconnect) runs first. Later failures are
    /// handled by the reconnect machinery and reported through events.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let waiter = self.core.update(|inner, core| {
            inner.capture_runtime();
            inner.auto_reconnect = core.options.enable_auto_reconnect;
            if inner.state == ConnectionState::Connected {
                return None;
            }
            // Registered first so an attempt that fails on the spot settles it.
            let (tx, rx) = oneshot::channel();
            inner.waiters.push(tx);
            match inner.state {
                ConnectionState::Connecting if inner.timers.attempt.is_some() => {}
                ConnectionState::Failed => inner.restart(core),
                _ => inner.start_attempt(core),
            }
            Some(rx)
        });

        match waiter {
            None => Ok(()),
            Some(rx) => rx.await.unwrap_or(Err(ClientError::Disconnected)),
        }
    }

    /// Closes the connection and stops all automatic activity.
    ///
    /// Safe to call from any state and more than once. Queued messages are
    /// kept; a later [`connect`](Self::connect) flushes them.
    pub fn disconnect(&self) {
        self.core.update(|inner, _| {
            inner.auto_reconnect = false;
            inner.cancel_timers();
            inner.stop_heartbeat();
            inner.close_link(CloseInfo::new(CLOSE_NORMAL, DISCONNECT_REASON));
            inner.settle_waiters(Err(ClientError::Disconnected));
            inner.transition(ConnectionState::Disconnected);
        });
    }

    /// Resets every counter and starts a fresh connection attempt.
    ///
    /// The only way out of `failed`.
    pub fn reconnect(&self) {
        self.core.update(|inner, core| {
            inner.capture_runtime();
            inner.auto_reconnect = core.options.enable_auto_reconnect;
            inner.restart(core);
        });
    }

    /// Serializes `message` as JSON and sends it.
    ///
    /// Returns `true` when the frame was handed to the live link. Otherwise
    /// the frame is queued (unless rejected as too large) and `false` is
    /// returned; never blocks.
    pub fn send<T>(&self, message: &T) -> bool
    where
        T: Serialize + ?Sized,
    {
        match serde_json::to_string(message) {
            Ok(text) => self.send_text(text),
            Err(err) => {
                self.core.update(|inner, _| inner.report(ClientError::from(err)));
                false
            }
        }
    }

    /// Sends a pre-encoded text frame. Same contract as [`send`](Self::send).
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        let text = text.into();
        self.core.update(|inner, core| inner.send_frame(core, text))
    }

    /// Registers a listener for one event kind.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.core.listeners.add(Some(kind), Arc::new(callback))
    }

    /// Registers a listener for every event.
    pub fn on_any<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.core.listeners.add(None, Arc::new(callback))
    }

    /// Removes a listener. Returns `false` if it was already gone.
    pub fn off(&self, id: ListenerId) -> bool {
        self.core.listeners.remove(id)
    }

    /// Removes every listener, including channel subscriptions.
    pub fn clear_listeners(&self) {
        self.core.listeners.clear();
    }

    /// Streams every event into a channel.
    ///
    /// The listener stays registered until [`off`](Self::off) is called with
    /// the returned id.
    pub fn subscribe(&self) -> (ListenerId, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.on_any(move |event| {
            let _ = tx.send(event.clone());
        });
        (id, rx)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.core.lock().state
    }

    /// Shorthand for `state() == Connected`.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Endpoint url, as trimmed by the builder.
    pub fn url(&self) -> &str {
        &self.core.url
    }

    /// Options the client was built with.
    pub fn options(&self) -> &ClientOptions {
        &self.core.options
    }

    /// Number of frames waiting for a live link.
    pub fn queue_len(&self) -> usize {
        self.core.lock().queue.len()
    }

    /// Discards every queued frame and emits `QueueCleared`.
    pub fn clear_queue(&self) -> usize {
        self.core.update(|inner, _| inner.clear_queue())
    }

    /// Point-in-time snapshot of state, counters and recent history.
    pub fn status(&self) -> ClientStatus {
        let inner = self.core.lock();
        ClientStatus {
            url: self.core.url.clone(),
            state: inner.state,
            is_connected: inner.state == ConnectionState::Connected,
            reconnect_attempts: inner.reconnect_attempts,
            max_reconnect_attempts: self.core.policy.max_attempts,
            consecutive_errors: inner.recovery.consecutive_errors(),
            queue_length: inner.queue.len(),
            awaiting_network: inner.awaiting_network,
            last_ping_ms: inner.heartbeat.last_ping_ms(),
            last_pong_ms: inner.heartbeat.last_pong_ms(),
            awaiting_pong: inner.heartbeat.is_awaiting_pong(),
            recovery_attempts: ErrorKind::ALL
                .iter()
                .map(|kind| (*kind, inner.recovery.attempts_for(*kind)))
                .collect(),
            stats: inner.stats_snapshot(),
            transitions: inner.history.to_vec(),
            recent_errors: inner.recovery.history(),
        }
    }

    /// Short human readable description of the connection.
    pub fn user_friendly_status(&self) -> String {
        let inner = self.core.lock();
        match inner.state {
            ConnectionState::Connected => "Connected".to_string(),
            ConnectionState::Connecting => "Connecting...".to_string(),
            ConnectionState::Reconnecting if inner.awaiting_network => {
                "Offline. Waiting for network...".to_string()
            }
            ConnectionState::Reconnecting => format!(
                "Reconnecting (attempt {} of {})...",
                inner.reconnect_attempts, self.core.policy.max_attempts
            ),
            ConnectionState::Failed => "Connection failed. Please try again.".to_string(),
            ConnectionState::Disconnected => "Disconnected".to_string(),
        }
    }

    /// Scores the connection against the health thresholds.
    pub fn check_connection_health(&self) -> HealthReport {
        let inner = self.core.lock();
        let stats = inner.stats_snapshot();
        HealthReport::evaluate(HealthInputs {
            state: inner.state,
            consecutive_errors: inner.recovery.consecutive_errors(),
            reconnect_attempts: inner.reconnect_attempts,
            queue_length: inner.queue.len(),
            queue_capacity: inner.queue.capacity(),
            time_since_last_pong: inner.heartbeat.since_last_pong(),
            is_online: self.core.network.is_online(),
            stats: &stats,
        })
    }

    /// Actions suggested by the current health report, most urgent first.
    pub fn recovery_recommendations(&self) -> Vec<Recommendation> {
        recommend(&self.check_connection_health())
    }

    /// Carries out the mechanical part of a recommendation.
    ///
    /// Page reloads and support contact are only signalled through events.
    /// Returns `false` when the action could not be applied right now.
    pub fn apply_recovery_recommendation(&self, action: RecoveryAction) -> bool {
        match action {
            RecoveryAction::ClearQueue => {
                self.clear_queue();
                true
            }
            RecoveryAction::ReloadPage => {
                self.core.update(|inner, _| {
                    inner.pending.push(ClientEvent::RecommendPageReload);
                });
                true
            }
            RecoveryAction::ContactSupport => {
                self.core.update(|inner, _| {
                    inner.pending.push(ClientEvent::ContactSupportRecommended);
                });
                true
            }
            RecoveryAction::CheckNetwork => {
                if !self.core.network.is_online() {
                    return false;
                }
                if matches!(
                    self.state(),
                    ConnectionState::Failed | ConnectionState::Reconnecting
                ) {
                    self.reconnect();
                }
                true
            }
            RecoveryAction::CheckServer => {
                self.reconnect();
                true
            }
        }
    }
}

struct Core {
    url: String,
    token: Option<SecretString>,
    options: ClientOptions,
    policy: ReconnectPolicy,
    connector: Arc<dyn Connector>,
    network: Arc<dyn NetworkMonitor>,
    listeners: Listeners,
    inner: Mutex<Inner>,
    /// Events waiting for delivery, in the order the state machine raised
    /// them. Always locked after `inner`, never before.
    outbox: Mutex<Outbox>,
}

#[derive(Default)]
struct Outbox {
    events: VecDeque<ClientEvent>,
    draining: bool,
}

impl Core {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_outbox(&self) -> MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` under the lock, then delivers the events it raised.
    fn update<R>(self: &Arc<Self>, f: impl FnOnce(&mut Inner, &Arc<Core>) -> R) -> R {
        let result = {
            let mut inner = self.lock();
            let result = f(&mut *inner, self);
            if !inner.pending.is_empty() {
                let raised = std::mem::take(&mut inner.pending);
                self.lock_outbox().events.extend(raised);
            }
            result
        };
        self.deliver();
        result
    }

    /// Hands queued events to listeners one at a time, oldest first.
    ///
    /// Only one caller drains. A call made while another is draining (a
    /// listener re-entering the client, or a concurrent task) returns at once
    /// and its events are delivered by the active drainer.
    fn deliver(&self) {
        {
            let mut outbox = self.lock_outbox();
            if outbox.draining {
                return;
            }
            outbox.draining = true;
        }
        loop {
            let next = {
                let mut outbox = self.lock_outbox();
                match outbox.events.pop_front() {
                    Some(event) => event,
                    None => {
                        outbox.draining = false;
                        return;
                    }
                }
            };
            self.listeners.emit(&next);
        }
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        inner.cancel_timers();
        cancel(&mut inner.timers.reader);
        if let Some(mut active) = inner.link.take() {
            active.link.close(CLOSE_NORMAL, DISCONNECT_REASON);
        }
    }
}

/// A spawned timer (or socket reader) and the token its callback must
/// present. A callback whose token no longer matches raced its cancellation
/// and does nothing.
struct Timer {
    token: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Timers {
    next_token: u64,
    attempt: Option<Timer>,
    ping: Option<Timer>,
    pong: Option<Timer>,
    reconnect: Option<Timer>,
    offline: Option<Timer>,
    reader: Option<Timer>,
}

impl Timers {
    fn next_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }
}

fn cancel(slot: &mut Option<Timer>) {
    if let Some(timer) = slot.take() {
        timer.handle.abort();
    }
}

fn is_current(slot: &Option<Timer>, token: u64) -> bool {
    slot.as_ref().is_some_and(|timer| timer.token == token)
}

struct ActiveLink {
    link: Link,
    epoch: u64,
}

struct Inner {
    state: ConnectionState,
    history: TransitionLog,
    link: Option<ActiveLink>,
    /// Bumped for every attempt; tags the events of the link it produced.
    epoch: u64,
    /// Cleared by `disconnect`, restored by `connect`/`reconnect`.
    auto_reconnect: bool,
    reconnect_attempts: u32,
    /// Delay of the last scheduled reconnect; delays never shrink until a
    /// connection succeeds.
    last_delay: Duration,
    /// Set while recovering from a lost connection.
    recovering: bool,
    awaiting_network: bool,
    recovery: RecoveryRegistry,
    heartbeat: HeartbeatState,
    queue: OutboundQueue,
    stats: ConnectionStats,
    connected_since: Option<Instant>,
    timers: Timers,
    waiters: Vec<oneshot::Sender<Result<(), ClientError>>>,
    runtime: Option<Handle>,
    pending: Vec<ClientEvent>,
}

impl Inner {
    fn new(options: &ClientOptions) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            history: TransitionLog::default(),
            link: None,
            epoch: 0,
            auto_reconnect: options.enable_auto_reconnect,
            reconnect_attempts: 0,
            last_delay: Duration::ZERO,
            recovering: false,
            awaiting_network: false,
            recovery: RecoveryRegistry::new(options.recovery.clone()),
            heartbeat: HeartbeatState::default(),
            queue: OutboundQueue::new(options.max_queue_size),
            stats: ConnectionStats::default(),
            connected_since: None,
            timers: Timers::default(),
            waiters: Vec::new(),
            runtime: Handle::try_current().ok(),
            pending: Vec::new(),
        }
    }

    fn capture_runtime(&mut self) {
        if self.runtime.is_none() {
            self.runtime = Handle::try_current().ok();
        }
    }

    fn spawn<F>(&mut self, task: F) -> Option<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.capture_runtime();
        match self.runtime.as_ref() {
            Some(runtime) => Some(runtime.spawn(task)),
            None => {
                warn!(event = "no_tokio_runtime");
                None
            }
        }
    }

    fn arm<F>(&mut self, task: impl FnOnce(u64) -> F) -> Option<Timer>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.timers.next_token();
        let handle = self.spawn(task(token))?;
        Some(Timer { token, handle })
    }

    // ── state machine ───────────────────────────────────────────────────

    fn transition(&mut self, next: ConnectionState) {
        let from = self.state;
        if from == next {
            return;
        }
        if !from.can_transition_to(next) {
            warn!(event = "invalid_transition", from = %from, to = %next);
            return;
        }

        self.state = next;
        self.history.record(StateTransition {
            from,
            to: next,
            at_ms: now_ms(),
        });
        info!(event = "state_change", from = %from, to = %next);
        self.pending.push(ClientEvent::StateChange { from, to: next });

        if from == ConnectionState::Connected {
            self.stop_heartbeat();
        }
        if matches!(next, ConnectionState::Disconnected | ConnectionState::Failed) {
            self.cancel_timers();
            self.awaiting_network = false;
            self.recovering = false;
            self.settle_waiters(Err(ClientError::Disconnected));
        }
    }

    /// Manual restart: resets every counter and opens a new link.
    fn restart(&mut self, core: &Arc<Core>) {
        self.reconnect_attempts = 0;
        self.last_delay = Duration::ZERO;
        self.recovery.reset_all();
        self.cancel_timers();
        self.stop_heartbeat();
        self.close_link(CloseInfo::new(CLOSE_NORMAL, MANUAL_RECONNECT_REASON));
        if self.state == ConnectionState::Connected {
            self.transition(ConnectionState::Disconnected);
        }
        self.start_attempt(core);
    }

    fn start_attempt(&mut self, core: &Arc<Core>) {
        self.capture_runtime();
        if self.runtime.is_none() {
            warn!(event = "no_tokio_runtime", url = %core.url);
            let error =
                ClientError::Transport("no tokio runtime to drive the connection".to_string());
            self.report(error.clone());
            self.settle_waiters(Err(error));
            return;
        }
        cancel(&mut self.timers.reconnect);
        cancel(&mut self.timers.offline);
        cancel(&mut self.timers.attempt);
        self.awaiting_network = false;
        self.transition(ConnectionState::Connecting);
        self.epoch += 1;

        let open = core.connector.open(OpenRequest {
            url: core.url.clone(),
            token: core.token.clone(),
        });
        let timeout = core.options.connection_timeout;
        let weak = Arc::downgrade(core);
        debug!(event = "connect_attempt", url = %core.url, epoch = self.epoch);

        self.timers.attempt = self.arm(move |token| async move {
            let result = with_timeout(timeout, open).await;
            if let Some(core) = weak.upgrade() {
                core.update(|inner, core| inner.on_open_result(core, token, result));
            }
        });
    }

    fn on_open_result(
        &mut self,
        core: &Arc<Core>,
        token: u64,
        result: Result<Result<Link, TransportError>, tokio::time::error::Elapsed>,
    ) {
        if !is_current(&self.timers.attempt, token) || self.state != ConnectionState::Connecting
        {
            if let Ok(Ok(mut link)) = result {
                link.close(CLOSE_NORMAL, "superseded attempt");
            }
            return;
        }
        self.timers.attempt = None;

        match result {
            Ok(Ok(link)) => self.on_opened(core, link),
            Ok(Err(err)) => {
                let message = err.to_string();
                warn!(event = "connect_failed", error = %message);
                self.fail_attempt(
                    core,
                    Failure::OpenFailed {
                        status: err.status(),
                        message: message.clone(),
                    },
                    ClientError::Transport(message),
                );
            }
            Err(_) => {
                let timeout = core.options.connection_timeout;
                warn!(event = "connect_timeout", timeout_ms = timeout.as_millis() as u64);
                self.fail_attempt(
                    core,
                    Failure::OpenTimedOut,
                    ClientError::ConnectionTimeout(timeout),
                );
            }
        }
    }

    fn on_opened(&mut self, core: &Arc<Core>, mut link: Link) {
        let epoch = self.epoch;
        let events = link.take_events();
        self.link = Some(ActiveLink { link, epoch });

        self.reconnect_attempts = 0;
        self.last_delay = Duration::ZERO;
        self.recovery.reset_consecutive();
        self.heartbeat.reset();
        self.stats.connections += 1;
        if self.recovering {
            self.stats.reconnections += 1;
        }
        self.stats.last_connected_ms = Some(now_ms());
        self.connected_since = Some(Instant::now());

        self.transition(ConnectionState::Connected);
        self.recovering = false;
        self.pending.push(ClientEvent::Open);

        if let Some(mut events) = events {
            let weak = Arc::downgrade(core);
            cancel(&mut self.timers.reader);
            self.timers.reader = self.arm(move |_| async move {
                while let Some(event) = events.recv().await {
                    let Some(core) = weak.upgrade() else {
                        return;
                    };
                    core.update(|inner, core| inner.on_transport_event(core, epoch, event));
                }
            });
        }

        self.start_heartbeat(core);
        self.flush_queue();
        self.settle_waiters(Ok(()));
    }

    fn fail_attempt(&mut self, core: &Arc<Core>, failure: Failure, error: ClientError) {
        self.report(error.clone());
        self.settle_waiters(Err(error));
        self.handle_failure(core, failure);
    }

    fn on_transport_event(&mut self, core: &Arc<Core>, epoch: u64, event: TransportEvent) {
        if self.link.as_ref().map(|active| active.epoch) != Some(epoch) {
            return;
        }
        match event {
            TransportEvent::Message(text) => self.on_frame(&text),
            TransportEvent::Unsent(frames) => self.requeue_unsent(frames),
            TransportEvent::Errored(message) => {
                self.report(ClientError::Transport(message));
            }
            TransportEvent::Closed(info) => {
                info!(event = "connection_lost", code = info.code, reason = %info.reason);
                self.take_link();
                self.stop_heartbeat();
                self.pending.push(ClientEvent::Close(info.clone()));
                self.handle_failure(core, Failure::Closed(info));
            }
        }
    }

    fn on_frame(&mut self, text: &str) {
        match InboundFrame::from_text(text) {
            InboundFrame::Control(ControlFrame::Pong { timestamp }) => {
                if self.heartbeat.on_pong(timestamp, now_ms()) {
                    cancel(&mut self.timers.pong);
                } else {
                    debug!(event = "unmatched_pong", timestamp = ?timestamp);
                }
            }
            InboundFrame::Control(ControlFrame::Ping { timestamp }) => {
                if let Ok(pong) = ControlFrame::pong(timestamp).to_text() {
                    if let Some(active) = self.link.as_mut() {
                        active.link.send(pong);
                    }
                }
            }
            InboundFrame::Payload(value) => {
                self.stats.messages_received += 1;
                self.pending.push(ClientEvent::Message(value));
            }
        }
    }

    // ── failure handling ────────────────────────────────────────────────

    fn handle_failure(&mut self, core: &Arc<Core>, failure: Failure) {
        let online = core.network.is_online();
        let kind = classify(&failure, online);
        self.stats.errors += 1;
        if matches!(failure, Failure::Closed(_) | Failure::HeartbeatTimedOut) {
            let info = failure.close_info();
            self.report(ClientError::ConnectionClosed {
                kind,
                code: info.code,
                reason: info.reason,
            });
        }

        if !self.auto_reconnect {
            self.recovery.record(kind);
            self.give_up();
            return;
        }

        let mut min_delay = Duration::ZERO;
        let mut await_network = !online;
        if core.options.enable_error_recovery {
            let decision = self.recovery.invoke(kind, online);
            let record = self.recovery.record(kind);
            if !matches!(decision, RecoveryDecision::Exhausted { .. }) {
                self.pending.push(ClientEvent::ErrorRecoveryAttempt {
                    kind,
                    attempt: record.attempt,
                    max_attempts: self.recovery.max_attempts_for(kind),
                });
            }
            match decision {
                RecoveryDecision::Exhausted { attempts } => {
                    warn!(event = "max_recovery_attempts_reached", kind = %kind, attempts);
                    self.pending
                        .push(ClientEvent::MaxRecoveryAttemptsReached { kind, attempts });
                    self.give_up();
                    return;
                }
                RecoveryDecision::NeedsAuth => {
                    self.request_auth(&failure);
                    return;
                }
                RecoveryDecision::AwaitNetwork { min_delay: floor } => {
                    await_network = true;
                    min_delay = floor;
                }
                RecoveryDecision::Retry { min_delay: floor } => min_delay = floor,
            }
        } else {
            self.recovery.record(kind);
            if kind == ErrorKind::Auth {
                self.request_auth(&failure);
                return;
            }
        }

        self.schedule_reconnect(core, min_delay, await_network);
    }

    fn request_auth(&mut self, failure: &Failure) {
        let info = failure.close_info();
        warn!(event = "auth_recovery_needed", code = info.code);
        self.pending.push(ClientEvent::AuthRecoveryNeeded {
            code: info.code,
            reason: info.reason,
        });
        self.give_up();
    }

    /// Enters `failed`. A live connection is first marked lost.
    fn give_up(&mut self) {
        if self.state == ConnectionState::Connected {
            self.transition(ConnectionState::Reconnecting);
        }
        self.transition(ConnectionState::Failed);
    }

    fn schedule_reconnect(&mut self, core: &Arc<Core>, min_delay: Duration, await_network: bool) {
        if core.policy.is_exhausted(self.reconnect_attempts) {
            warn!(
                event = "max_reconnect_attempts_reached",
                attempts = self.reconnect_attempts
            );
            self.pending.push(ClientEvent::MaxReconnectAttemptsReached {
                attempts: self.reconnect_attempts,
            });
            self.give_up();
            return;
        }

        self.transition(ConnectionState::Reconnecting);
        self.recovering = true;

        if await_network || !core.network.is_online() {
            self.await_network(core);
            return;
        }

        self.reconnect_attempts += 1;
        let attempt = self.reconnect_attempts;
        let backoff = core
            .policy
            .delay_for_attempt(attempt, self.recovery.consecutive_errors());
        let delay = backoff
            .max(min_delay)
            .max(self.last_delay)
            .min(core.policy.max_delay);
        self.last_delay = delay;

        debug!(
            event = "reconnect_scheduled",
            attempt,
            max_attempts = core.policy.max_attempts,
            delay_ms = delay.as_millis() as u64
        );
        self.pending
            .push(ClientEvent::ReconnectScheduled { attempt, delay });

        let weak = Arc::downgrade(core);
        cancel(&mut self.timers.reconnect);
        self.timers.reconnect = self.arm(move |token| async move {
            tokio::time::sleep(delay).await;
            if let Some(core) = weak.upgrade() {
                core.update(|inner, core| inner.on_reconnect_timer(core, token));
            }
        });
    }

    fn on_reconnect_timer(&mut self, core: &Arc<Core>, token: u64) {
        if !is_current(&self.timers.reconnect, token) {
            return;
        }
        self.timers.reconnect = None;
        if self.state == ConnectionState::Reconnecting {
            self.start_attempt(core);
        }
    }

    /// Parks the reconnect until the network returns: the monitor's online
    /// signal raced against a periodic poll. A signal that fires while the
    /// monitor still reports offline is ignored for one poll interval.
    fn await_network(&mut self, core: &Arc<Core>) {
        if self.timers.offline.is_some() {
            return;
        }
        self.awaiting_network = true;
        info!(event = "awaiting_network");

        let network = Arc::clone(&core.network);
        let poll_every = core.options.offline_poll_interval;
        let weak = Arc::downgrade(core);
        self.timers.offline = self.arm(move |token| async move {
            loop {
                let signalled = tokio::select! {
                    _ = network.wait_online() => true,
                    _ = tokio::time::sleep(poll_every) => false,
                };
                if network.is_online() {
                    break;
                }
                if signalled {
                    tokio::time::sleep(poll_every).await;
                }
            }
            if let Some(core) = weak.upgrade() {
                core.update(|inner, core| inner.on_network_online(core, token));
            }
        });
    }

    fn on_network_online(&mut self, core: &Arc<Core>, token: u64) {
        if !is_current(&self.timers.offline, token) {
            return;
        }
        self.timers.offline = None;
        self.awaiting_network = false;
        if self.state != ConnectionState::Reconnecting {
            return;
        }
        if !core.network.is_online() {
            self.await_network(core);
            return;
        }
        if core.policy.is_exhausted(self.reconnect_attempts) {
            self.schedule_reconnect(core, Duration::ZERO, false);
            return;
        }

        info!(event = "network_restored");
        self.reconnect_attempts += 1;
        self.pending.push(ClientEvent::ReconnectScheduled {
            attempt: self.reconnect_attempts,
            delay: Duration::ZERO,
        });
        self.start_attempt(core);
    }

    // ── heartbeat ───────────────────────────────────────────────────────

    fn start_heartbeat(&mut self, core: &Arc<Core>) {
        if !core.options.enable_heartbeat {
            return;
        }
        self.stop_heartbeat();

        let interval = core.options.ping_interval;
        let weak = Arc::downgrade(core);
        self.timers.ping = self.arm(move |token| async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(core) = weak.upgrade() else {
                    return;
                };
                if !core.update(|inner, core| inner.on_ping_tick(core, token)) {
                    return;
                }
            }
        });
    }

    /// Returns whether the ping loop should keep running.
    fn on_ping_tick(&mut self, core: &Arc<Core>, token: u64) -> bool {
        if !is_current(&self.timers.ping, token) || self.state != ConnectionState::Connected {
            return false;
        }
        let Some(ping) = self.heartbeat.begin_ping(now_ms()) else {
            return true;
        };
        if let (Ok(text), Some(active)) = (ping.to_text(), self.link.as_mut()) {
            active.link.send(text);
        }

        let timeout = core.options.pong_timeout;
        let weak = Arc::downgrade(core);
        cancel(&mut self.timers.pong);
        self.timers.pong = self.arm(move |token| async move {
            tokio::time::sleep(timeout).await;
            if let Some(core) = weak.upgrade() {
                core.update(|inner, core| inner.on_pong_timeout(core, token));
            }
        });
        true
    }

    fn on_pong_timeout(&mut self, core: &Arc<Core>, token: u64) {
        if !is_current(&self.timers.pong, token) {
            return;
        }
        self.timers.pong = None;
        if self.state != ConnectionState::Connected {
            return;
        }

        warn!(
            event = "pong_timeout",
            timeout_ms = core.options.pong_timeout.as_millis() as u64
        );
        let info = CloseInfo::new(CLOSE_PONG_TIMEOUT, PONG_TIMEOUT_REASON);
        self.close_link(info);
        self.stop_heartbeat();
        self.handle_failure(core, Failure::HeartbeatTimedOut);
    }

    fn stop_heartbeat(&mut self) {
        cancel(&mut self.timers.ping);
        cancel(&mut self.timers.pong);
        self.heartbeat.stop();
    }

    // ── outbound queue ──────────────────────────────────────────────────

    fn send_frame(&mut self, core: &Arc<Core>, text: String) -> bool {
        let max = core.options.max_message_size;
        if text.len() > max {
            warn!(event = "message_too_large", size = text.len(), max);
            self.report(ClientError::MessageTooLarge {
                size: text.len(),
                max,
            });
            return false;
        }

        if self.state == ConnectionState::Connected {
            if let Some(active) = self.link.as_mut() {
                if active.link.send(text.clone()) {
                    self.stats.messages_sent += 1;
                    self.pending
                        .push(ClientEvent::MessageSent { from_queue: false });
                    return true;
                }
                self.report(ClientError::SendFailed);
            }
        }

        self.enqueue(text);
        if self.auto_reconnect && self.state == ConnectionState::Disconnected {
            debug!(event = "send_triggered_connect");
            self.start_attempt(core);
        }
        false
    }

    fn enqueue(&mut self, frame: String) {
        if self.queue.push(frame).is_some() {
            self.stats.messages_dropped += 1;
            warn!(
                event = "outbound_queue_overflow",
                capacity = self.queue.capacity()
            );
        }
    }

    /// Drains the queue FIFO. Stops at the first rejected write and puts
    /// that frame back at the head.
    fn flush_queue(&mut self) {
        let Some(active) = self.link.as_mut() else {
            return;
        };
        let mut flushed = 0usize;
        while let Some(frame) = self.queue.pop_front() {
            if !active.link.send(frame.clone()) {
                self.queue.restore_front(frame);
                self.report(ClientError::SendFailed);
                break;
            }
            flushed += 1;
            self.stats.messages_sent += 1;
            self.pending.push(ClientEvent::MessageSent { from_queue: true });
        }
        if flushed > 0 {
            debug!(event = "queue_flushed", flushed, remaining = self.queue.len());
        }
    }

    /// Puts frames the socket never wrote back at the head, in order.
    /// Heartbeat frames are dropped; they are meaningless on a new link.
    fn requeue_unsent(&mut self, frames: Vec<String>) {
        let frames: Vec<String> = frames
            .into_iter()
            .filter(|frame| !matches!(InboundFrame::from_text(frame), InboundFrame::Control(_)))
            .collect();
        if frames.is_empty() {
            return;
        }
        self.stats.messages_sent = self.stats.messages_sent.saturating_sub(frames.len() as u64);
        for frame in frames.into_iter().rev() {
            self.queue.restore_front(frame);
        }
        while self.queue.len() > self.queue.capacity() {
            self.queue.pop_front();
            self.stats.messages_dropped += 1;
        }
        self.report(ClientError::SendFailed);
    }

    fn clear_queue(&mut self) -> usize {
        let discarded = self.queue.clear();
        self.pending.push(ClientEvent::QueueCleared { discarded });
        discarded
    }

    // ── housekeeping ────────────────────────────────────────────────────

    fn take_link(&mut self) -> Option<ActiveLink> {
        let active = self.link.take()?;
        cancel(&mut self.timers.reader);
        if let Some(since) = self.connected_since.take() {
            self.stats.connected_duration += since.elapsed();
        }
        self.stats.last_disconnected_ms = Some(now_ms());
        Some(active)
    }

    /// Closes the live link, if any, and reports the closure.
    fn close_link(&mut self, info: CloseInfo) {
        if let Some(mut active) = self.take_link() {
            active.link.close(info.code, &info.reason);
            self.pending.push(ClientEvent::Close(info));
        }
    }

    fn cancel_timers(&mut self) {
        cancel(&mut self.timers.attempt);
        cancel(&mut self.timers.reconnect);
        cancel(&mut self.timers.offline);
        cancel(&mut self.timers.ping);
        cancel(&mut self.timers.pong);
    }

    /// Logs an error and queues it for listeners.
    fn report(&mut self, error: ClientError) {
        if error.is_local() {
            debug!(event = "client_error", error = %error);
        } else {
            warn!(event = "client_error", error = %error);
        }
        self.pending.push(ClientEvent::Error(error));
    }

    fn settle_waiters(&mut self, result: Result<(), ClientError>) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    fn stats_snapshot(&self) -> ConnectionStats {
        let mut stats = self.stats.clone();
        if let Some(since) = self.connected_since {
            stats.connected_duration += since.elapsed();
        }
        stats
    }
}
