//! [`Transport`] backed by `tokio-tungstenite`.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt as _, StreamExt as _};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{Inbound, Session, SessionEvents, Transport, TransportError};
use crate::config::HeaderMap;
use crate::message::Message;

type Reply = oneshot::Sender<Result<(), TransportError>>;

/// Requests from the session handle to the task that owns the socket.
enum Outbound {
    Message(Message, Reply),
    Ping(Reply),
}

/// Opens real WebSocket sessions with `tokio-tungstenite`.
///
/// Each session runs one background task that owns the socket: it performs
/// the handshake (with the configured extra headers), forwards text and binary
/// frames to [`Session::receive`], matches PONG frames to outstanding pings
/// by payload, and reports open/close through [`SessionEvents`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteTransport;

impl Transport for TungsteniteTransport {
    fn open(&self, endpoint: &Url, headers: &HeaderMap, events: SessionEvents) -> Arc<dyn Session> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let request = build_request(endpoint, headers);
        tokio::spawn(drive(request, outbound_rx, inbound_tx, events, token.clone()));

        Arc::new(TungsteniteSession {
            outbound: outbound_tx,
            inbound: Mutex::new(inbound_rx),
            token,
        })
    }
}

fn build_request(endpoint: &Url, headers: &HeaderMap) -> Result<Request, TransportError> {
    let mut request = endpoint.as_str().into_client_request()?;
    for (name, value) in headers {
        request.headers_mut().insert(name.clone(), value.clone());
    }
    Ok(request)
}

struct TungsteniteSession {
    outbound: mpsc::UnboundedSender<Outbound>,
    inbound: Mutex<mpsc::UnboundedReceiver<Inbound>>,
    token: CancellationToken,
}

impl TungsteniteSession {
    async fn request<F>(&self, make: F) -> Result<(), TransportError>
    where
        F: FnOnce(Reply) -> Outbound,
    {
        let (tx, rx) = oneshot::channel();
        self.outbound
            .send(make(tx))
            .map_err(|_e| TransportError::ConnectionClosed)?;
        rx.await.unwrap_or(Err(TransportError::ConnectionClosed))
    }
}

#[async_trait]
impl Session for TungsteniteSession {
    async fn send(&self, message: Message) -> Result<(), TransportError> {
        self.request(|reply| Outbound::Message(message, reply)).await
    }

    async fn receive(&self) -> Inbound {
        self.inbound
            .lock()
            .await
            .recv()
            .await
            .unwrap_or(Err(TransportError::ConnectionClosed))
    }

    async fn send_ping(&self) -> Result<(), TransportError> {
        self.request(Outbound::Ping).await
    }

    fn close(&self) {
        self.token.cancel();
    }
}

impl Drop for TungsteniteSession {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Owns one socket from handshake to close.
async fn drive(
    request: Result<Request, TransportError>,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    events: SessionEvents,
    token: CancellationToken,
) {
    let request = match request {
        Ok(request) => request,
        Err(e) => {
            events.closed(None, e.to_string());
            return;
        }
    };

    let connected = tokio::select! {
        () = token.cancelled() => return,
        result = connect_async(request) => result,
    };

    let ws_stream = match connected {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            let error = TransportError::from(e);
            #[cfg(feature = "tracing")]
            tracing::warn!("Unable to connect: {error}");
            events.closed(None, error.to_string());
            return;
        }
    };

    events.opened();

    let (mut write, mut read) = ws_stream.split();
    let mut pending_pings = PendingPings::default();

    let (code, reason) = loop {
        tokio::select! {
            () = token.cancelled() => {
                _ = write.send(WsMessage::Close(None)).await;
                break (Some(u16::from(CloseCode::Normal)), String::from("closed by client"));
            }

            frame = read.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!(text = text.as_str(), "Received WebSocket text message");
                        _ = inbound_tx.send(Ok(Message::Text(text.as_str().to_owned())));
                    }
                    Some(Ok(WsMessage::Binary(bytes))) => {
                        _ = inbound_tx.send(Ok(Message::Binary(bytes.to_vec())));
                    }
                    Some(Ok(WsMessage::Pong(payload))) => pending_pings.resolve(&payload),
                    Some(Ok(WsMessage::Close(frame))) => {
                        break frame.map_or((None, String::new()), |frame| {
                            (Some(u16::from(frame.code)), frame.reason.as_str().to_owned())
                        });
                    }
                    Some(Ok(_)) => {
                        // Incoming PINGs are answered by tungstenite itself.
                    }
                    Some(Err(e)) => {
                        let error = TransportError::from(e);
                        _ = inbound_tx.send(Err(error.clone()));
                        break (None, error.to_string());
                    }
                    None => break (None, String::from("stream ended")),
                }
            }

            Some(request) = outbound_rx.recv() => {
                match request {
                    Outbound::Message(message, reply) => {
                        let result = write.send(message.into()).await.map_err(TransportError::from);
                        _ = reply.send(result);
                    }
                    Outbound::Ping(reply) => {
                        let sequence = pending_pings.next_sequence();
                        let payload = Vec::from(sequence.to_be_bytes());
                        match write.send(WsMessage::Ping(payload.into())).await {
                            Ok(()) => pending_pings.wait(sequence, reply),
                            Err(e) => {
                                _ = reply.send(Err(e.into()));
                            }
                        }
                    }
                }
            }
        }
    };

    #[cfg(feature = "tracing")]
    tracing::debug!(?code, %reason, "WebSocket session closed");

    // Outstanding pings and readers observe the drop as ConnectionClosed.
    drop(pending_pings);
    drop(inbound_tx);
    events.closed(code, reason);
}

/// Pings awaiting their PONG, oldest first.
///
/// Each PING carries a big-endian sequence number. A peer may answer only the
/// most recent PING, so a PONG resolves its own ping and fails every older one.
#[derive(Default)]
struct PendingPings {
    next: u64,
    waiters: VecDeque<(u64, Reply)>,
}

impl PendingPings {
    fn next_sequence(&mut self) -> u64 {
        let sequence = self.next;
        self.next = self.next.wrapping_add(1);
        sequence
    }

    fn wait(&mut self, sequence: u64, reply: Reply) {
        // Probes that timed out have dropped their receiver.
        self.waiters.retain(|(_, waiter)| !waiter.is_closed());
        self.waiters.push_back((sequence, reply));
    }

    fn resolve(&mut self, payload: &[u8]) {
        let Ok(bytes) = <[u8; 8]>::try_from(payload) else {
            #[cfg(feature = "tracing")]
            tracing::trace!(len = payload.len(), "Ignoring PONG with foreign payload");
            return;
        };
        let sequence = u64::from_be_bytes(bytes);
        if !self.waiters.iter().any(|(pending, _)| *pending == sequence) {
            return;
        }

        while let Some((pending, waiter)) = self.waiters.pop_front() {
            if pending == sequence {
                _ = waiter.send(Ok(()));
                break;
            }
            _ = waiter.send(Err(TransportError::Timeout));
        }
    }
}

impl From<Message> for WsMessage {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => WsMessage::Text(text.into()),
            Message::Binary(bytes) => WsMessage::Binary(bytes.into()),
        }
    }
}
