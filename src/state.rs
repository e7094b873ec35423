//! Connection state machine.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No session, and none being attempted
    Disconnected,
    /// Session created, handshake in flight
    Connecting,
    /// Handshake acknowledged by the transport
    Connected,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether `next` is a legal successor of `self`.
    ///
    /// Reaching [`Connected`](Self::Connected) always goes through
    /// [`Connecting`](Self::Connecting); either active state may drop back to
    /// [`Disconnected`](Self::Disconnected).
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::Connected)
                | (Self::Connecting | Self::Connected, Self::Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// Callback invoked synchronously on every state transition.
pub type StateObserver = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Owns the current [`ConnectionState`] and notifies observers on change.
///
/// Lives inside the connection actor, so transitions are applied and observed
/// strictly in order.
pub(crate) struct StateMachine {
    current: ConnectionState,
    observers: Vec<StateObserver>,
    watch_tx: watch::Sender<ConnectionState>,
}

impl StateMachine {
    pub(crate) fn new(watch_tx: watch::Sender<ConnectionState>) -> Self {
        let current = *watch_tx.borrow();
        Self {
            current,
            observers: Vec::new(),
            watch_tx,
        }
    }

    pub(crate) fn current(&self) -> ConnectionState {
        self.current
    }

    pub(crate) fn observe(&mut self, observer: StateObserver) {
        self.observers.push(observer);
    }

    /// Move to `next`, returning whether a transition happened.
    ///
    /// Assigning the current state again is not a transition. Illegal moves are
    /// dropped.
    pub(crate) fn transition(&mut self, next: ConnectionState) -> bool {
        if self.current == next {
            return false;
        }

        if !self.current.can_transition_to(next) {
            #[cfg(feature = "tracing")]
            tracing::warn!(from = %self.current, to = %next, "Ignoring illegal state transition");
            return false;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(from = %self.current, to = %next, "Connection state changed");

        self.current = next;
        self.watch_tx.send_replace(next);
        for observer in &self.observers {
            observer(next);
        }

        true
    }
}
