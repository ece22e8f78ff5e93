//! Production [`Connector`] backed by `tokio-tungstenite`.

use std::borrow::Cow;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, WebSocketStream};
use tracing::debug;

use super::{
    CloseInfo, Connector, Link, OpenRequest, Outbound, TransportError, TransportEvent,
    CLOSE_NO_STATUS,
};

/// Opens websocket links with `connect_async`.
#[derive(Clone, Debug, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WebSocketConnector {
    fn open(&self, request: OpenRequest) -> BoxFuture<'static, Result<Link, TransportError>> {
        Box::pin(open_websocket(request))
    }
}

async fn open_websocket(request: OpenRequest) -> Result<Link, TransportError> {
    let mut upgrade = request.url.as_str().into_client_request()?;
    if let Some(token) = request.token.as_ref() {
        let header = format!("Bearer {}", token.expose_secret()).parse()?;
        upgrade.headers_mut().insert(AUTHORIZATION, header);
    }

    let (socket, _) = connect_async(upgrade).await.map_err(map_open_error)?;
    debug!(event = "websocket_opened", url = %request.url);

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    tokio::spawn(run_socket(socket, outbound_rx, events_tx));

    Ok(Link::new(outbound_tx, events_rx))
}

fn map_open_error(err: WsError) -> TransportError {
    match err {
        WsError::Http(response) => TransportError::Rejected(response.status().as_u16()),
        WsError::Io(io) => TransportError::Unreachable(io.to_string()),
        other => TransportError::WebSocket(other),
    }
}

/// Owns the socket until either side closes it.
async fn run_socket<S>(
    mut socket: WebSocketStream<S>,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            maybe_outbound = outbound_rx.recv() => {
                match maybe_outbound {
                    Some(Outbound::Text(text)) => {
                        if let Err(err) = socket.send(Message::Text(text.clone())).await {
                            let _ = events_tx.send(TransportEvent::Errored(err.to_string()));
                            report_lost(
                                &mut outbound_rx,
                                &events_tx,
                                vec![text],
                                CloseInfo::abnormal(err.to_string()),
                            );
                            return;
                        }
                    }
                    Some(Outbound::Close(info)) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(info.code),
                            reason: Cow::Owned(info.reason),
                        };
                        let _ = socket.close(Some(frame)).await;
                        return;
                    }
                    None => {
                        let _ = socket.close(None).await;
                        return;
                    }
                }
            }
            maybe_inbound = socket.next() => {
                let info = match maybe_inbound {
                    Some(Ok(Message::Text(text))) => {
                        let _ = events_tx.send(TransportEvent::Message(text));
                        continue;
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        let event = match String::from_utf8(bytes) {
                            Ok(text) => TransportEvent::Message(text),
                            Err(_) => TransportEvent::Errored(
                                "dropped non-utf8 binary frame".to_string(),
                            ),
                        };
                        let _ = events_tx.send(event);
                        continue;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        match socket.send(Message::Pong(payload)).await {
                            Ok(()) => continue,
                            Err(err) => CloseInfo::abnormal(err.to_string()),
                        }
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => continue,
                    Some(Ok(Message::Close(frame))) => match frame {
                        Some(frame) => CloseInfo::new(u16::from(frame.code), frame.reason.into_owned()),
                        None => CloseInfo::new(CLOSE_NO_STATUS, ""),
                    },
                    Some(Err(err)) => CloseInfo::abnormal(err.to_string()),
                    None => CloseInfo::abnormal("connection dropped"),
                };
                report_lost(&mut outbound_rx, &events_tx, Vec::new(), info);
                return;
            }
        }
    }
}

/// Reports a lost socket. Frames still waiting in the channel are handed
/// back as `Unsent` ahead of `Closed` so the client can requeue them.
fn report_lost(
    outbound_rx: &mut mpsc::UnboundedReceiver<Outbound>,
    events_tx: &mpsc::UnboundedSender<TransportEvent>,
    mut unsent: Vec<String>,
    info: CloseInfo,
) {
    while let Ok(next) = outbound_rx.try_recv() {
        if let Outbound::Text(frame) = next {
            unsent.push(frame);
        }
    }
    if !unsent.is_empty() {
        let _ = events_tx.send(TransportEvent::Unsent(unsent));
    }
    let _ = events_tx.send(TransportEvent::Closed(info));
}
