#![expect(
    clippy::module_name_repetitions,
    reason = "TransportError includes module name for clarity when used outside this module"
)]

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use tokio_tungstenite::tungstenite;

/// Errors reported by a transport session.
///
/// Cheap to clone so a single inbound error can reach every observer.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum TransportError {
    /// Error connecting to or communicating with the remote endpoint
    Connection(Arc<dyn StdError + Send + Sync + 'static>),
    /// The session is closed and will produce nothing further
    ConnectionClosed,
    /// Operation timed out
    Timeout,
    /// Received an invalid or unexpected message
    ///
    /// Never produced by [`TungsteniteTransport`](super::TungsteniteTransport),
    /// which rejects malformed frames as [`Connection`](Self::Connection).
    /// Available to other [`Transport`](super::Transport) implementations that
    /// validate payloads before handing them to the client.
    InvalidMessage(String),
    /// Message stream lagged and missed messages
    Lagged {
        /// Number of messages that were missed
        count: u64,
    },
}

impl TransportError {
    pub fn connection<E: StdError + Send + Sync + 'static>(error: E) -> Self {
        Self::Connection(Arc::new(error))
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Self::Timeout => write!(f, "WebSocket operation timed out"),
            Self::InvalidMessage(msg) => write!(f, "Invalid WebSocket message: {msg}"),
            Self::Lagged { count } => write!(f, "Message stream lagged, missed {count} messages"),
        }
    }
}

impl StdError for TransportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<tungstenite::Error> for TransportError {
    fn from(e: tungstenite::Error) -> Self {
        match e {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Self::ConnectionClosed
            }
            other => Self::connection(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_tungstenite_errors_map_to_connection_closed() {
        assert!(
            matches!(
                TransportError::from(tungstenite::Error::AlreadyClosed),
                TransportError::ConnectionClosed
            ),
            "AlreadyClosed means the session is finished"
        );
    }

    #[test]
    fn connection_error_exposes_source() {
        let io = std::io::Error::other("reset");
        let error = TransportError::connection(io);

        assert!(error.source().is_some(), "wrapped error should be the source");
        assert_eq!(error.to_string(), "WebSocket connection error: reset");
    }
}
