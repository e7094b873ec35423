//! Reachability port.
//!
//! A [`Reachability`] source yields `true`/`false` whenever the network
//! becomes reachable or unreachable. The client subscribes on its first
//! `connect` and keeps the subscription across network-loss disconnects so it
//! can reconnect by itself once the network comes back.

use async_stream::stream;
use futures::StreamExt as _;
use futures::stream::{self, BoxStream};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::command::Command;

/// Source of network reachability signals.
pub trait Reachability: Send + Sync + 'static {
    /// Start watching. Dropping the returned stream unsubscribes.
    fn watch(&self) -> BoxStream<'static, bool>;
}

/// A [`Reachability`] that never reports a change.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReachable;

impl Reachability for AlwaysReachable {
    fn watch(&self) -> BoxStream<'static, bool> {
        stream::pending::<bool>().boxed()
    }
}

/// A [`Reachability`] fed by the application through a [`watch`] channel.
///
/// Each subscriber first sees the current value, then every value sent
/// afterwards, including repeats.
///
/// ```
/// use resilient_ws::reachability::ChannelReachability;
///
/// let (signal, reachability) = ChannelReachability::new(true);
/// // Forward OS callbacks into `signal`:
/// signal.send_replace(false);
/// # drop(reachability);
/// ```
#[derive(Debug, Clone)]
pub struct ChannelReachability {
    rx: watch::Receiver<bool>,
}

impl ChannelReachability {
    #[must_use]
    pub fn new(initial: bool) -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(initial);
        (tx, Self { rx })
    }
}

impl Reachability for ChannelReachability {
    fn watch(&self) -> BoxStream<'static, bool> {
        let mut rx = self.rx.clone();

        stream! {
            let current = *rx.borrow_and_update();
            yield current;

            while rx.changed().await.is_ok() {
                let reachable = *rx.borrow_and_update();
                yield reachable;
            }
        }
        .boxed()
    }
}

/// A live subscription owned by the connection actor. Dropping it stops
/// forwarding.
pub(crate) struct Subscription {
    pub(crate) generation: u64,
    _guard: DropGuard,
}

/// Forward `source`'s signals to the actor, tagged with `generation`.
pub(crate) fn subscribe(
    source: &dyn Reachability,
    generation: u64,
    token: CancellationToken,
    commands: mpsc::UnboundedSender<Command>,
) -> Subscription {
    let mut signals = source.watch();
    let forward_token = token.clone();

    tokio::spawn(async move {
        loop {
            let reachable = tokio::select! {
                biased;

                () = forward_token.cancelled() => break,
                signal = signals.next() => match signal {
                    Some(reachable) => reachable,
                    None => break,
                },
            };

            #[cfg(feature = "tracing")]
            tracing::debug!(reachable, "Reachability changed");

            if commands
                .send(Command::Reachability {
                    generation,
                    reachable,
                })
                .is_err()
            {
                break;
            }
        }
    });

    Subscription {
        generation,
        _guard: token.drop_guard(),
    }
}
