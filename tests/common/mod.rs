#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every helper"
)]

use std::collections::VecDeque;
use std::future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use resilient_ws::config::{Config, HeaderMap};
use resilient_ws::reachability::{AlwaysReachable, Reachability};
use resilient_ws::transport::{Inbound, Session, SessionEvents, Transport, TransportError};
use resilient_ws::{Client, ConnectionState, Message};
use tokio::sync::mpsc;
use tokio::time::timeout;
use url::Url;

pub const ENDPOINT: &str = "wss://example.test/socket";

/// Scripted outcomes shared by every session a [`MockTransport`] opens.
#[derive(Default)]
struct Script {
    /// Popped by each `send_ping`; empty means the pong arrives.
    pings: VecDeque<Result<(), TransportError>>,
    /// Every `send_ping` waits forever
    hang: bool,
}

/// In-memory transport that records every session it opens.
#[derive(Clone)]
pub struct MockTransport {
    /// Emit `opened` as soon as a session is created
    auto_open: bool,
    script: Arc<Mutex<Script>>,
    sessions: Arc<Mutex<Vec<(Arc<MockSession>, SessionEvents)>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            auto_open: true,
            script: Arc::default(),
            sessions: Arc::default(),
        }
    }

    /// Sessions stay in `Connecting` until [`Self::events`] reports them open.
    pub fn manual() -> Self {
        Self {
            auto_open: false,
            ..Self::new()
        }
    }

    pub fn fail_pings(&self, count: usize) {
        let mut script = self.script.lock().unwrap();
        for _ in 0..count {
            script.pings.push_back(Err(TransportError::Timeout));
        }
    }

    pub fn script_pings<I>(&self, outcomes: I)
    where
        I: IntoIterator<Item = Result<(), TransportError>>,
    {
        self.script.lock().unwrap().pings.extend(outcomes);
    }

    /// Pings from now on never get a pong.
    pub fn hang_pings(&self) {
        self.script.lock().unwrap().hang = true;
    }

    pub fn open_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn session(&self, index: usize) -> Arc<MockSession> {
        Arc::clone(&self.sessions.lock().unwrap()[index].0)
    }

    pub fn events(&self, index: usize) -> SessionEvents {
        self.sessions.lock().unwrap()[index].1.clone()
    }

    pub fn latest(&self) -> Arc<MockSession> {
        let sessions = self.sessions.lock().unwrap();
        Arc::clone(&sessions.last().unwrap().0)
    }

    pub fn total_pings(&self) -> usize {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .map(|(session, _)| session.pings())
            .sum()
    }
}

impl Transport for MockTransport {
    fn open(
        &self,
        _endpoint: &Url,
        headers: &HeaderMap,
        events: SessionEvents,
    ) -> Arc<dyn Session> {
        let session = Arc::new(MockSession::new(Arc::clone(&self.script), headers.clone()));
        self.sessions
            .lock()
            .unwrap()
            .push((Arc::clone(&session), events.clone()));

        if self.auto_open {
            events.opened();
        }

        session
    }
}

pub struct MockSession {
    script: Arc<Mutex<Script>>,
    pub headers: HeaderMap,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>,
    sent: Mutex<Vec<Message>>,
    pings: AtomicUsize,
    abandoned: AtomicUsize,
    closed: AtomicBool,
}

/// Counts a hanging ping whose future was dropped.
struct AbandonOnDrop<'session>(&'session AtomicUsize);

impl Drop for AbandonOnDrop<'_> {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl MockSession {
    fn new(script: Arc<Mutex<Script>>, headers: HeaderMap) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            script,
            headers,
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            sent: Mutex::default(),
            pings: AtomicUsize::new(0),
            abandoned: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Make `message` the next result of `receive`.
    pub fn push(&self, message: Inbound) {
        self.inbound_tx.send(message).unwrap();
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    /// Hanging pings that were given up on, by timeout or cancellation.
    pub fn abandoned_pings(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Session for MockSession {
    async fn send(&self, message: Message) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn receive(&self) -> Inbound {
        let mut rx = self.inbound_rx.lock().await;
        // The session holds its own sender, so this only ends on cancellation.
        rx.recv()
            .await
            .unwrap_or(Err(TransportError::ConnectionClosed))
    }

    async fn send_ping(&self) -> Result<(), TransportError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        let hang = self.script.lock().unwrap().hang;
        if hang {
            let _abandoned = AbandonOnDrop(&self.abandoned);
            return future::pending().await;
        }
        let outcome = self.script.lock().unwrap().pings.pop_front();
        outcome.unwrap_or(Ok(()))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub fn config(ping_interval: Duration, threshold: u32) -> Config {
    Config::builder()
        .ping_interval(ping_interval)
        .ping_failure_threshold(threshold)
        .build()
}

pub fn client<R: Reachability>(
    transport: &MockTransport,
    config: Config,
    reachability: R,
) -> Client {
    Client::with_ports(ENDPOINT, config, transport.clone(), reachability).unwrap()
}

/// Client with a custom keepalive schedule and no reachability signals.
pub fn keepalive_client(
    transport: &MockTransport,
    ping_interval: Duration,
    threshold: u32,
) -> Client {
    client(transport, config(ping_interval, threshold), AlwaysReachable::default())
}

pub fn plain_client(transport: &MockTransport) -> Client {
    client(transport, Config::default(), AlwaysReachable::default())
}

/// Collect every state the client reports.
pub fn record_states(client: &Client) -> mpsc::UnboundedReceiver<ConnectionState> {
    let (tx, rx) = mpsc::unbounded_channel();
    client
        .on_state_change(move |state| {
            _ = tx.send(state);
        })
        .unwrap();
    rx
}

/// Collect every inbound delivery.
pub fn record_messages(client: &Client) -> mpsc::UnboundedReceiver<Inbound> {
    let (tx, rx) = mpsc::unbounded_channel();
    client
        .on_message(move |message| {
            _ = tx.send(message);
        })
        .unwrap();
    rx
}

/// Wait for the next `count` reported states.
pub async fn next_states(
    rx: &mut mpsc::UnboundedReceiver<ConnectionState>,
    count: usize,
) -> Vec<ConnectionState> {
    let mut states = Vec::with_capacity(count);
    for _ in 0..count {
        let state = timeout(Duration::from_secs(60), rx.recv())
            .await
            .expect("timed out waiting for a state change")
            .unwrap();
        states.push(state);
    }
    states
}

/// Let every spawned task run until the runtime is idle.
///
/// Under a paused clock this also auto-advances time by `duration`.
pub async fn settle(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// Assert nothing else was reported.
pub fn assert_no_more<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>) {
    let next = rx.try_recv();
    assert!(next.is_err(), "unexpected extra event: {next:?}");
}
