use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{self, BoxFuture};
use realtime_link::stream::diagnostics::RecoveryAction;
use realtime_link::stream::network::{NetworkMonitor, NetworkStatus};
use realtime_link::stream::recovery::RecoveryPolicy;
use realtime_link::stream::transport::{
    MemoryConnector, MemoryListener, OpenOutcome, Outbound, ServerEnd,
};
use realtime_link::stream::{ErrorKind, EventKind};
use realtime_link::{ClientError, ClientEvent, ClientOptions, ConnectionState, RealtimeClient};
use secrecy::SecretString;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{timeout, Instant};

const URL: &str = "ws://realtime.test/socket";

fn quiet_options() -> ClientOptions {
    ClientOptions::default().with_heartbeat_enabled(false)
}

fn build_client(options: ClientOptions) -> (RealtimeClient, MemoryConnector, MemoryListener) {
    let (connector, listener) = MemoryConnector::new();
    let client = RealtimeClient::builder(URL)
        .options(options)
        .connector(connector.clone())
        .build()
        .expect("build client");
    (client, connector, listener)
}

async fn accept(listener: &mut MemoryListener) -> ServerEnd {
    timeout(Duration::from_secs(60), listener.accept())
        .await
        .expect("timed out waiting for an accepted link")
        .expect("listener closed")
}

async fn next_event(events: &mut UnboundedReceiver<ClientEvent>) -> ClientEvent {
    timeout(Duration::from_secs(600), events.recv())
        .await
        .expect("timed out waiting for client event")
        .expect("event channel closed")
}

async fn wait_for<F>(
    events: &mut UnboundedReceiver<ClientEvent>,
    mut matches: F,
) -> Vec<ClientEvent>
where
    F: FnMut(&ClientEvent) -> bool,
{
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let done = matches(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

fn drain(events: &mut UnboundedReceiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

fn is_state_change_to(event: &ClientEvent, state: ConnectionState) -> bool {
    matches!(event, ClientEvent::StateChange { to, .. } if *to == state)
}

/// Edges the client may take on its own, plus leaving `failed` through a
/// manual reconnect.
fn is_automatic_edge(from: ConnectionState, to: ConnectionState) -> bool {
    use ConnectionState::*;

    matches!(
        (from, to),
        (Disconnected, Connecting)
            | (Connecting, Connected)
            | (Connecting, Reconnecting)
            | (Connecting, Failed)
            | (Connected, Reconnecting)
            | (Reconnecting, Connecting)
            | (Reconnecting, Failed)
            | (Failed, Connecting)
    )
}

/// Checks that state changes form one unbroken chain from `disconnected`
/// and never take an edge outside the automatic lifecycle.
fn assert_lifecycle(seen: &[ClientEvent]) {
    let changes: Vec<(ConnectionState, ConnectionState)> = seen
        .iter()
        .filter_map(|event| match event {
            ClientEvent::StateChange { from, to } => Some((*from, *to)),
            _ => None,
        })
        .collect();
    let mut current = ConnectionState::Disconnected;
    for (from, to) in &changes {
        assert_eq!(*from, current, "broken chain in {changes:?}");
        assert!(is_automatic_edge(*from, *to), "{from} -> {to} in {changes:?}");
        current = *to;
    }
}

/// Monitor whose online signal fires on every call, whatever the status.
#[derive(Clone, Debug)]
struct RestlessMonitor {
    online: Arc<AtomicBool>,
    wakeups: Arc<AtomicUsize>,
}

impl RestlessMonitor {
    fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
            wakeups: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn wakeups(&self) -> usize {
        self.wakeups.load(Ordering::SeqCst)
    }
}

impl NetworkMonitor for RestlessMonitor {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn wait_online(&self) -> BoxFuture<'static, ()> {
        self.wakeups.fetch_add(1, Ordering::SeqCst);
        Box::pin(future::ready(()))
    }
}

#[tokio::test(start_paused = true)]
async fn abnormal_closes_back_off_then_fail() {
    let options = quiet_options()
        .with_max_reconnect_attempts(3)
        .with_reconnect_delay(Duration::from_millis(100), Duration::from_secs(30));
    let (client, connector, mut listener) = build_client(options);
    let (_id, mut events) = client.subscribe();

    client.connect().await.expect("initial connect");
    let server = accept(&mut listener).await;
    connector.set_fallback(OpenOutcome::Unreachable);

    server.drop_connection();
    let seen = wait_for(&mut events, |event| {
        matches!(event, ClientEvent::MaxReconnectAttemptsReached { .. })
    })
    .await;

    let delays: Vec<Duration> = seen
        .iter()
        .filter_map(|event| match event {
            ClientEvent::ReconnectScheduled { delay, .. } => Some(*delay),
            _ => None,
        })
        .collect();
    assert_eq!(
        delays,
        [
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400),
        ]
    );
    assert!(matches!(
        seen.last(),
        Some(ClientEvent::MaxReconnectAttemptsReached { attempts: 3 })
    ));
    let mut seen = seen;
    seen.extend(
        wait_for(&mut events, |event| {
            is_state_change_to(event, ConnectionState::Failed)
        })
        .await,
    );
    assert_lifecycle(&seen);
    assert_eq!(client.state(), ConnectionState::Failed);
    assert_eq!(connector.attempts(), 4);
    assert_eq!(
        client.user_friendly_status(),
        "Connection failed. Please try again."
    );

    // Failed is terminal until a manual reconnect.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 4);

    connector.set_fallback(OpenOutcome::Accept);
    client.reconnect();
    wait_for(&mut events, |event| matches!(event, ClientEvent::Open)).await;
    let status = client.status();
    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(status.reconnect_attempts, 0);
    assert_eq!(status.consecutive_errors, 0);
    assert_eq!(status.stats.connections, 2);
}

#[tokio::test(start_paused = true)]
async fn queued_messages_flush_before_new_sends() {
    let (client, _connector, mut listener) = build_client(quiet_options());

    assert!(!client.send(&json!({"a": 1})));
    assert_eq!(client.queue_len(), 1);

    client.connect().await.expect("connect");
    assert_eq!(client.queue_len(), 0);
    assert!(client.send(&json!({"b": 2})));

    let mut server = accept(&mut listener).await;
    let first: Value = serde_json::from_str(&server.recv_text().await.expect("first frame"))
        .expect("json frame");
    let second: Value = serde_json::from_str(&server.recv_text().await.expect("second frame"))
        .expect("json frame");
    assert_eq!(first, json!({"a": 1}));
    assert_eq!(second, json!({"b": 2}));
    assert_eq!(client.status().stats.messages_sent, 2);
}

#[tokio::test(start_paused = true)]
async fn missing_pong_forces_close_and_reconnect() {
    let ping_interval = Duration::from_secs(1);
    let pong_timeout = Duration::from_millis(500);
    let options = ClientOptions::default().with_heartbeat(ping_interval, pong_timeout);
    let (client, _connector, mut listener) = build_client(options);
    let (_id, mut events) = client.subscribe();

    client.connect().await.expect("connect");
    let mut server = accept(&mut listener).await;

    for _ in 0..2 {
        let ping: Value = serde_json::from_str(&server.recv_text().await.expect("ping"))
            .expect("json ping");
        assert_eq!(ping["type"], "ping");
        server.send_text(json!({"type": "pong", "timestamp": ping["timestamp"]}).to_string());
    }

    let ping: Value =
        serde_json::from_str(&server.recv_text().await.expect("third ping")).expect("json ping");
    assert_eq!(ping["type"], "ping");
    let pinged_at = Instant::now();
    assert!(client.status().awaiting_pong);

    match server.recv().await {
        Some(Outbound::Close(info)) => {
            assert_eq!(info.code, 4000);
            assert!(info.reason.contains("pong timeout"));
        }
        other => panic!("expected a forced close, got {other:?}"),
    }
    assert!(pinged_at.elapsed() <= pong_timeout + Duration::from_millis(10));
    assert_eq!(client.state(), ConnectionState::Reconnecting);

    let seen = wait_for(&mut events, |event| matches!(event, ClientEvent::Close(_))).await;
    match seen.last() {
        Some(ClientEvent::Close(info)) => assert!(info.reason.contains("pong timeout")),
        other => panic!("expected close event, got {other:?}"),
    }
    assert!(!seen.iter().any(|event| matches!(event, ClientEvent::Message(_))));
    let seen = wait_for(&mut events, |event| {
        matches!(event, ClientEvent::Error(ClientError::ConnectionClosed { .. }))
    })
    .await;
    assert!(matches!(
        seen.last(),
        Some(ClientEvent::Error(ClientError::ConnectionClosed { code: 4000, .. }))
    ));
    assert!(!client.status().awaiting_pong);
}

#[tokio::test(start_paused = true)]
async fn auth_close_requests_credentials_instead_of_retrying() {
    for code in [4401_u16, 1008] {
        let (client, connector, mut listener) = build_client(quiet_options());
        let (_id, mut events) = client.subscribe();

        client.connect().await.expect("connect");
        let server = accept(&mut listener).await;
        server.close(code, "unauthorized");

        let seen = wait_for(&mut events, |event| {
            is_state_change_to(event, ConnectionState::Failed)
        })
        .await;

        assert_lifecycle(&seen);
        assert!(seen.iter().any(|event| matches!(
            event,
            ClientEvent::AuthRecoveryNeeded { code: got, .. } if *got == code
        )));
        assert!(!seen
            .iter()
            .any(|event| matches!(event, ClientEvent::ReconnectScheduled { .. })));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(client.state(), ConnectionState::Failed);
        assert_eq!(client.status().recovery_attempts[0], (ErrorKind::Auth, 1));
    }
}

#[tokio::test(start_paused = true)]
async fn disconnect_twice_closes_once_and_stays_down() {
    let (client, connector, mut listener) = build_client(quiet_options());
    let (_id, mut events) = client.subscribe();

    client.connect().await.expect("connect");
    let mut server = accept(&mut listener).await;
    client.send_text("sent-before-close");

    client.disconnect();
    client.disconnect();

    let closes = drain(&mut events)
        .into_iter()
        .filter(|event| matches!(event, ClientEvent::Close(_)))
        .count();
    assert_eq!(closes, 1);
    assert_eq!(client.state(), ConnectionState::Disconnected);

    assert_eq!(
        server.recv().await,
        Some(Outbound::Text("sent-before-close".to_string()))
    );
    match server.recv().await {
        Some(Outbound::Close(info)) => assert_eq!(info.code, 1000),
        other => panic!("expected close, got {other:?}"),
    }

    // Sends after a manual disconnect queue up without reconnecting.
    assert!(!client.send_text("later"));
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(client.queue_len(), 1);
}

#[tokio::test(start_paused = true)]
async fn overflowing_queue_keeps_most_recent_frames() {
    let options = quiet_options()
        .with_max_queue_size(3)
        .with_auto_reconnect(false);
    let (client, connector, mut listener) = build_client(options);

    for n in 1..=5 {
        assert!(!client.send_text(format!("m{n}")));
    }
    assert_eq!(client.queue_len(), 3);
    assert_eq!(connector.attempts(), 0);

    client.connect().await.expect("connect");
    let mut server = accept(&mut listener).await;
    for expected in ["m3", "m4", "m5"] {
        assert_eq!(server.recv_text().await.as_deref(), Some(expected));
    }
    assert_eq!(client.status().stats.messages_dropped, 2);
}

#[tokio::test(start_paused = true)]
async fn offline_reconnect_waits_for_network() {
    let network = NetworkStatus::new(true);
    let (connector, mut listener) = MemoryConnector::new();
    let client = RealtimeClient::builder(URL)
        .options(quiet_options())
        .connector(connector.clone())
        .network_monitor(network.clone())
        .build()
        .expect("build client");
    let (_id, mut events) = client.subscribe();

    client.connect().await.expect("connect");
    let server = accept(&mut listener).await;

    network.set_online(false);
    server.drop_connection();
    wait_for(&mut events, |event| {
        matches!(
            event,
            ClientEvent::StateChange {
                to: ConnectionState::Reconnecting,
                ..
            }
        )
    })
    .await;
    assert_eq!(
        client.user_friendly_status(),
        "Offline. Waiting for network..."
    );
    assert_eq!(
        client.recovery_recommendations()[0].action,
        RecoveryAction::CheckNetwork
    );

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 1);
    assert!(!drain(&mut events)
        .iter()
        .any(|event| matches!(event, ClientEvent::ReconnectScheduled { .. })));

    network.set_online(true);
    let seen = wait_for(&mut events, |event| matches!(event, ClientEvent::Open)).await;
    assert!(seen.iter().any(|event| matches!(
        event,
        ClientEvent::ReconnectScheduled { delay, .. } if delay.is_zero()
    )));
    let _server = accept(&mut listener).await;
    assert_eq!(client.status().stats.reconnections, 1);
}

#[tokio::test(start_paused = true)]
async fn oversized_message_is_rejected_locally() {
    let options = quiet_options().with_max_message_size(16);
    let (client, _connector, _listener) = build_client(options);
    let (_id, mut events) = client.subscribe();

    assert!(!client.send_text("x".repeat(17)));
    assert_eq!(client.queue_len(), 0);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(
        drain(&mut events),
        [ClientEvent::Error(ClientError::MessageTooLarge { size: 17, max: 16 })]
    );
}

#[tokio::test(start_paused = true)]
async fn hung_open_times_out_then_retries() {
    let options = quiet_options().with_connection_timeout(Duration::from_secs(2));
    let (client, connector, mut listener) = build_client(options);
    let (_id, mut events) = client.subscribe();
    connector.push_outcome(OpenOutcome::Hang);

    let started = Instant::now();
    let err = client.connect().await.expect_err("first attempt hangs");
    assert_eq!(err, ClientError::ConnectionTimeout(Duration::from_secs(2)));
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(2) && waited < Duration::from_millis(2_010));
    assert_eq!(client.state(), ConnectionState::Reconnecting);

    wait_for(&mut events, |event| matches!(event, ClientEvent::Open)).await;
    let _server = accept(&mut listener).await;
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn listeners_may_call_back_into_the_client() {
    let (client, _connector, mut listener) = build_client(quiet_options());
    let opens = Arc::new(AtomicUsize::new(0));

    let reentrant = client.clone();
    let counter = Arc::clone(&opens);
    client.on(EventKind::Open, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        reentrant.send_text("hello-from-listener");
    });

    client.connect().await.expect("connect");
    let mut server = accept(&mut listener).await;
    assert_eq!(
        server.recv_text().await.as_deref(),
        Some("hello-from-listener")
    );
    assert_eq!(opens.load(Ordering::SeqCst), 1);
    client.clear_listeners();
    client.disconnect();
}

#[tokio::test(start_paused = true)]
async fn server_ping_is_answered_and_filtered() {
    let (client, _connector, mut listener) = build_client(quiet_options());
    let (_id, mut events) = client.subscribe();

    client.connect().await.expect("connect");
    let mut server = accept(&mut listener).await;
    server.send_text(r#"{"type":"ping","timestamp":7}"#);
    server.send_text(r#"{"type":"update","id":1}"#);

    let pong: Value =
        serde_json::from_str(&server.recv_text().await.expect("pong")).expect("json pong");
    assert_eq!(pong, json!({"type": "pong", "timestamp": 7}));

    let seen = wait_for(&mut events, |event| matches!(event, ClientEvent::Message(_))).await;
    assert_eq!(
        seen.last(),
        Some(&ClientEvent::Message(json!({"type": "update", "id": 1})))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn listeners_observe_state_changes_in_order() {
    for _ in 0..50 {
        let options = quiet_options()
            .with_reconnect_delay(Duration::from_millis(1), Duration::from_millis(10));
        let (client, _connector, mut listener) = build_client(options);
        let (_id, mut events) = client.subscribe();

        let server = tokio::spawn(async move {
            let first = accept(&mut listener).await;
            first.drop_connection();
            let second = accept(&mut listener).await;
            (listener, second)
        });

        client.connect().await.expect("connect");
        let mut opens = 0;
        let seen = wait_for(&mut events, |event| {
            if matches!(event, ClientEvent::Open) {
                opens += 1;
            }
            opens == 2
        })
        .await;
        let _server = server.await.expect("server task");

        assert_lifecycle(&seen);
        client.disconnect();
    }
}

#[tokio::test(start_paused = true)]
async fn rejected_writes_are_requeued_in_order() {
    let (client, _connector, mut listener) = build_client(quiet_options());
    let (_id, mut events) = client.subscribe();

    client.connect().await.expect("connect");
    let mut server = accept(&mut listener).await;
    assert!(client.send_text("a"));
    assert!(client.send_text("b"));

    server.fail_writes("broken pipe");
    let seen = wait_for(&mut events, |event| {
        matches!(event, ClientEvent::Error(ClientError::Transport(_)))
    })
    .await;
    assert!(seen
        .iter()
        .any(|event| matches!(event, ClientEvent::Error(ClientError::SendFailed))));
    assert_eq!(client.queue_len(), 2);
    assert_eq!(client.status().stats.messages_sent, 0);

    server.drop_connection();
    wait_for(&mut events, |event| matches!(event, ClientEvent::Open)).await;
    let mut next = accept(&mut listener).await;
    assert_eq!(next.recv_text().await.as_deref(), Some("a"));
    assert_eq!(next.recv_text().await.as_deref(), Some("b"));
    assert_eq!(client.queue_len(), 0);
    assert_eq!(client.status().stats.messages_sent, 2);
}

#[tokio::test(start_paused = true)]
async fn exhausted_recovery_kind_fails_through_reconnecting() {
    let mut recovery = RecoveryPolicy::default();
    recovery.unknown.max_attempts = 1;
    let (client, connector, mut listener) =
        build_client(quiet_options().with_recovery_policy(recovery));
    let (_id, mut events) = client.subscribe();

    client.connect().await.expect("connect");
    accept(&mut listener).await.close(4999, "odd");
    let mut seen = wait_for(&mut events, |event| matches!(event, ClientEvent::Open)).await;
    assert!(seen.iter().any(|event| matches!(
        event,
        ClientEvent::ErrorRecoveryAttempt {
            kind: ErrorKind::Unknown,
            attempt: 1,
            max_attempts: 1,
        }
    )));

    accept(&mut listener).await.close(4999, "odd again");
    let after = wait_for(&mut events, |event| {
        is_state_change_to(event, ConnectionState::Failed)
    })
    .await;
    assert!(after.iter().any(|event| matches!(
        event,
        ClientEvent::MaxRecoveryAttemptsReached {
            kind: ErrorKind::Unknown,
            attempts: 1,
        }
    )));
    assert!(!after
        .iter()
        .any(|event| matches!(event, ClientEvent::ErrorRecoveryAttempt { .. })));
    assert!(after.iter().any(|event| matches!(
        event,
        ClientEvent::Error(ClientError::ConnectionClosed {
            kind: ErrorKind::Unknown,
            code: 4999,
            ..
        })
    )));
    seen.extend(after);
    assert_lifecycle(&seen);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(client.state(), ConnectionState::Failed);
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn disabled_recovery_still_reconnects_and_flags_auth() {
    let (client, connector, mut listener) =
        build_client(quiet_options().with_error_recovery(false));
    let (_id, mut events) = client.subscribe();

    client.connect().await.expect("connect");
    accept(&mut listener).await.drop_connection();
    let mut seen = wait_for(&mut events, |event| matches!(event, ClientEvent::Open)).await;
    assert!(seen
        .iter()
        .any(|event| matches!(event, ClientEvent::ReconnectScheduled { attempt: 1, .. })));

    accept(&mut listener).await.close(4401, "token expired");
    seen.extend(
        wait_for(&mut events, |event| {
            is_state_change_to(event, ConnectionState::Failed)
        })
        .await,
    );
    assert!(seen.iter().any(|event| matches!(
        event,
        ClientEvent::AuthRecoveryNeeded { code: 4401, .. }
    )));
    assert!(!seen
        .iter()
        .any(|event| matches!(event, ClientEvent::ErrorRecoveryAttempt { .. })));
    assert_lifecycle(&seen);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn unexpected_close_without_auto_reconnect_fails() {
    let (client, connector, mut listener) =
        build_client(quiet_options().with_auto_reconnect(false));
    let (_id, mut events) = client.subscribe();

    client.connect().await.expect("connect");
    accept(&mut listener).await.close(1011, "internal error");
    let seen = wait_for(&mut events, |event| {
        is_state_change_to(event, ConnectionState::Failed)
    })
    .await;
    assert_lifecycle(&seen);
    assert!(!seen
        .iter()
        .any(|event| matches!(event, ClientEvent::ReconnectScheduled { .. })));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn recovery_actions_drive_the_connection() {
    let network = NetworkStatus::new(true);
    let (connector, mut listener) = MemoryConnector::new();
    let client = RealtimeClient::builder(URL)
        .options(quiet_options())
        .connector(connector.clone())
        .network_monitor(network.clone())
        .build()
        .expect("build client");
    let (_id, mut events) = client.subscribe();

    client.connect().await.expect("connect");
    let mut server = accept(&mut listener).await;

    assert!(client.apply_recovery_recommendation(RecoveryAction::ContactSupport));
    wait_for(&mut events, |event| {
        matches!(event, ClientEvent::ContactSupportRecommended)
    })
    .await;
    assert_eq!(client.state(), ConnectionState::Connected);

    assert!(client.apply_recovery_recommendation(RecoveryAction::CheckServer));
    match server.recv().await {
        Some(Outbound::Close(info)) => assert_eq!(info.code, 1000),
        other => panic!("expected the old link to close, got {other:?}"),
    }
    wait_for(&mut events, |event| matches!(event, ClientEvent::Open)).await;
    let server = accept(&mut listener).await;
    assert_eq!(connector.attempts(), 2);

    server.close(4401, "token expired");
    wait_for(&mut events, |event| {
        is_state_change_to(event, ConnectionState::Failed)
    })
    .await;

    network.set_online(false);
    assert!(!client.apply_recovery_recommendation(RecoveryAction::CheckNetwork));
    assert_eq!(client.state(), ConnectionState::Failed);
    assert_eq!(connector.attempts(), 2);

    network.set_online(true);
    assert!(client.apply_recovery_recommendation(RecoveryAction::CheckNetwork));
    wait_for(&mut events, |event| matches!(event, ClientEvent::Open)).await;
    let _server = accept(&mut listener).await;
    assert_eq!(connector.attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn attempts_carry_the_url_and_token_presence() {
    let (connector, mut listener) = MemoryConnector::new();
    let client = RealtimeClient::builder(URL)
        .options(quiet_options())
        .token(SecretString::new("session-token".to_string()))
        .connector(connector)
        .build()
        .expect("build client");
    client.connect().await.expect("connect");
    let server = accept(&mut listener).await;
    assert_eq!(server.url(), URL);
    assert!(server.has_token());

    let (anonymous, _connector, mut listener) = build_client(quiet_options());
    anonymous.connect().await.expect("connect");
    assert!(!accept(&mut listener).await.has_token());
}

#[tokio::test(start_paused = true)]
async fn spurious_online_signals_wait_for_the_poll() {
    let monitor = RestlessMonitor::new(true);
    let (connector, mut listener) = MemoryConnector::new();
    let client = RealtimeClient::builder(URL)
        .options(quiet_options().with_offline_poll_interval(Duration::from_secs(5)))
        .connector(connector.clone())
        .network_monitor(monitor.clone())
        .build()
        .expect("build client");
    let (_id, mut events) = client.subscribe();

    client.connect().await.expect("connect");
    let server = accept(&mut listener).await;
    monitor.set_online(false);
    server.drop_connection();
    wait_for(&mut events, |event| {
        is_state_change_to(event, ConnectionState::Reconnecting)
    })
    .await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    let wakeups = monitor.wakeups();
    assert!(wakeups <= 14, "online signal polled {wakeups} times in 60s");
    assert_eq!(connector.attempts(), 1);
    assert!(client.status().awaiting_network);

    monitor.set_online(true);
    wait_for(&mut events, |event| matches!(event, ClientEvent::Open)).await;
    let _server = accept(&mut listener).await;
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn reconnect_after_long_outage_starts_healthy() {
    let network = NetworkStatus::new(true);
    let (connector, mut listener) = MemoryConnector::new();
    let client = RealtimeClient::builder(URL)
        .options(
            ClientOptions::default()
                .with_heartbeat(Duration::from_secs(1), Duration::from_millis(500)),
        )
        .connector(connector)
        .network_monitor(network.clone())
        .build()
        .expect("build client");
    let (_id, mut events) = client.subscribe();

    client.connect().await.expect("connect");
    let mut server = accept(&mut listener).await;
    let ping: Value =
        serde_json::from_str(&server.recv_text().await.expect("ping")).expect("json ping");
    server.send_text(json!({"type": "pong", "timestamp": ping["timestamp"]}).to_string());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(client.status().last_pong_ms.is_some());

    network.set_online(false);
    server.drop_connection();
    wait_for(&mut events, |event| {
        is_state_change_to(event, ConnectionState::Reconnecting)
    })
    .await;
    tokio::time::sleep(Duration::from_secs(90)).await;

    network.set_online(true);
    wait_for(&mut events, |event| matches!(event, ClientEvent::Open)).await;
    let report = client.check_connection_health();
    assert!(report.is_healthy, "{report:?}");
    assert_eq!(report.time_since_last_pong, None);
    assert!(client.status().last_pong_ms.is_some());
}
