//! Work items for the connection actor.
//!
//! Every producer (caller, keepalive loop, message pump, transport events,
//! reachability signals) talks to the actor exclusively through these, so all
//! mutations of connection state happen one at a time on a single task.

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::Result;
use crate::client::MessageObserver;
use crate::keepalive::KeepaliveAction;
use crate::state::StateObserver;
use crate::transport::{Inbound, Session, TransportError};

/// Open/close notifications emitted by a transport session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionEvent {
    Opened,
    Closed {
        /// WebSocket close code, when the peer supplied one
        code: Option<u16>,
        reason: String,
    },
}

pub(crate) enum Command {
    Connect,
    Disconnect {
        remove_reachability: bool,
    },
    Reconnect,
    /// Ask for the live session so the caller can write to it off the actor.
    Send {
        reply: oneshot::Sender<Result<Arc<dyn Session>>>,
    },
    ObserveMessages(MessageObserver),
    ObserveState(StateObserver),
    Session {
        epoch: u64,
        event: SessionEvent,
    },
    Inbound {
        epoch: u64,
        message: Inbound,
    },
    KeepaliveWake {
        epoch: u64,
        reply: oneshot::Sender<KeepaliveAction>,
    },
    ProbeResult {
        epoch: u64,
        outcome: std::result::Result<(), TransportError>,
    },
    Reachability {
        generation: u64,
        reachable: bool,
    },
}
