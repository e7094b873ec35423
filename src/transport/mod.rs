//! Transport port.
//!
//! The connection core never touches sockets directly: it asks a [`Transport`]
//! to open a [`Session`] and drives that session through this narrow
//! interface. [`TungsteniteTransport`] is the stock implementation; tests and
//! alternative stacks can supply their own.

pub mod error;
pub mod tungstenite;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

pub use error::TransportError;
pub use tungstenite::TungsteniteTransport;

use crate::command::{Command, SessionEvent};
use crate::config::HeaderMap;
use crate::message::Message;

/// One inbound delivery: a message, or the error the transport reported instead.
pub type Inbound = std::result::Result<Message, TransportError>;

/// A live duplex session created by [`Transport::open`].
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// Write one message.
    async fn send(&self, message: Message) -> Result<(), TransportError>;

    /// Wait for the next inbound message. One-shot: call again for the next one.
    ///
    /// Once the session can produce nothing further this must return
    /// [`TransportError::ConnectionClosed`].
    async fn receive(&self) -> Inbound;

    /// Send a protocol-level ping and resolve when the matching pong arrives.
    async fn send_ping(&self) -> Result<(), TransportError>;

    /// Tear the session down. Must not block.
    fn close(&self);
}

/// Opens sessions to a remote endpoint.
pub trait Transport: Send + Sync + 'static {
    /// Create a session handle and start the handshake in the background.
    ///
    /// Must return without waiting for the handshake; completion or failure is
    /// reported through `events`.
    fn open(
        &self,
        endpoint: &Url,
        headers: &HeaderMap,
        events: SessionEvents,
    ) -> Arc<dyn Session>;
}

/// Sink for a session's open/close notifications.
///
/// Each instance is bound to the session it was handed out with; events from
/// a session that has since been replaced are ignored by the client.
#[derive(Clone)]
pub struct SessionEvents {
    epoch: u64,
    commands: mpsc::UnboundedSender<Command>,
}

impl SessionEvents {
    pub(crate) fn new(epoch: u64, commands: mpsc::UnboundedSender<Command>) -> Self {
        Self { epoch, commands }
    }

    /// The handshake completed.
    pub fn opened(&self) {
        self.emit(SessionEvent::Opened);
    }

    /// The session closed, either by the peer or because the handshake failed.
    pub fn closed<S: Into<String>>(&self, code: Option<u16>, reason: S) {
        self.emit(SessionEvent::Closed {
            code,
            reason: reason.into(),
        });
    }

    fn emit(&self, event: SessionEvent) {
        // The client may already be gone; nothing is listening then.
        _ = self.commands.send(Command::Session {
            epoch: self.epoch,
            event,
        });
    }
}

impl std::fmt::Debug for SessionEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEvents")
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}
