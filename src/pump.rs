//! Message pump: drains a session's inbound side into the actor.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::command::Command;
use crate::transport::{Session, TransportError};

/// Receive from `session` until `token` is cancelled, forwarding every
/// delivery (message or error) tagged with `epoch`.
pub(crate) fn spawn(
    epoch: u64,
    session: Arc<dyn Session>,
    token: CancellationToken,
    commands: mpsc::UnboundedSender<Command>,
) {
    tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                biased;

                () = token.cancelled() => break,
                message = session.receive() => message,
            };

            // A finished session would answer every further receive immediately.
            let finished = matches!(message, Err(TransportError::ConnectionClosed));

            if commands.send(Command::Inbound { epoch, message }).is_err() {
                break;
            }

            if finished {
                token.cancelled().await;
                break;
            }
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(epoch, "Message pump stopped");
    });
}
