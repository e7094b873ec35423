//! Keepalive scheduler.
//!
//! One loop per session. The loop owns no connection state: at every wakeup it
//! asks the actor what to do, performs the probe off the actor, and reports
//! the outcome back. The failure counter and the reconnect decision live in
//! the actor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::command::Command;
use crate::transport::{Session, TransportError};

/// The actor's answer to a keepalive wakeup.
pub(crate) enum KeepaliveAction {
    /// Ping this session and report the outcome.
    Probe(Arc<dyn Session>),
    /// The session is gone or being replaced; end the loop.
    Stop,
}

pub(crate) struct Keepalive {
    pub(crate) epoch: u64,
    pub(crate) interval: Duration,
    pub(crate) ping_timeout: Duration,
    pub(crate) token: CancellationToken,
    pub(crate) commands: mpsc::UnboundedSender<Command>,
}

impl Keepalive {
    pub(crate) fn spawn(self) {
        tokio::spawn(self.run());
    }

    async fn run(self) {
        loop {
            tokio::select! {
                biased;

                () = self.token.cancelled() => break,
                () = sleep(self.interval) => {}
            }

            let (reply_tx, reply_rx) = oneshot::channel();
            let wake = Command::KeepaliveWake {
                epoch: self.epoch,
                reply: reply_tx,
            };
            if self.commands.send(wake).is_err() {
                break;
            }

            let session = match reply_rx.await {
                Ok(KeepaliveAction::Probe(session)) => session,
                Ok(KeepaliveAction::Stop) | Err(_) => break,
            };

            let outcome = tokio::select! {
                biased;

                () = self.token.cancelled() => break,
                result = timeout(self.ping_timeout, session.send_ping()) => {
                    result.unwrap_or(Err(TransportError::Timeout))
                }
            };

            if self
                .commands
                .send(Command::ProbeResult {
                    epoch: self.epoch,
                    outcome,
                })
                .is_err()
            {
                break;
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(epoch = self.epoch, "Keepalive loop stopped");
    }
}
