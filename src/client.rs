use std::sync::Arc;

use async_stream::stream;
use futures::Stream;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::Result;
use crate::command::{Command, SessionEvent};
use crate::config::Config;
use crate::error::{Error, Shutdown};
use crate::keepalive::{Keepalive, KeepaliveAction};
use crate::message::Message;
use crate::pump;
use crate::reachability::{self, AlwaysReachable, Reachability, Subscription};
use crate::state::{ConnectionState, StateMachine, StateObserver};
use crate::transport::{
    Inbound, Session, SessionEvents, Transport, TransportError, TungsteniteTransport,
};

/// Callback invoked for every inbound message or transport error, in arrival order.
pub type MessageObserver = Arc<dyn Fn(Inbound) + Send + Sync>;

/// Resilient WebSocket client.
///
/// Keeps a single logical connection to one endpoint alive: it probes the
/// session with pings and reconnects once too many go unanswered, drops the
/// session when the network becomes unreachable and reopens it when the
/// network returns.
///
/// Every operation is funneled into one background task that owns the
/// connection state, so triggers from timers, the network and the caller
/// never interleave. Cloning a [`Client`] yields another handle to the same
/// connection; dropping the last handle tears everything down.
///
/// # Examples
///
/// ```rust, no_run
/// use resilient_ws::Client;
/// use resilient_ws::config::Config;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = Client::new("wss://echo.example.com", Config::default())?;
///
///     client.on_state_change(|state| println!("state: {state}"))?;
///     client.on_message(|message| println!("message: {message:?}"))?;
///     client.connect()?;
///
///     // Later, once connected:
///     client.send("hello").await?;
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    endpoint: Url,
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    broadcast_tx: broadcast::Sender<Inbound>,
    _shutdown: DroppingCancellationToken,
}

/// Cancels the wrapped token when the last [`Client`] handle goes away, which
/// stops the connection task and everything it owns.
struct DroppingCancellationToken(CancellationToken);

impl Drop for DroppingCancellationToken {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

impl Client {
    /// Create a client for `endpoint` using [`TungsteniteTransport`] and no
    /// reachability monitoring.
    ///
    /// Must be called within a Tokio runtime. Nothing is opened until
    /// [`connect`](Self::connect).
    pub fn new(endpoint: &str, config: Config) -> Result<Self> {
        Self::with_ports(endpoint, config, TungsteniteTransport, AlwaysReachable)
    }

    /// Create a client with explicit transport and reachability ports.
    pub fn with_ports<T, R>(
        endpoint: &str,
        config: Config,
        transport: T,
        reachability: R,
    ) -> Result<Self>
    where
        T: Transport,
        R: Reachability,
    {
        config.validate()?;
        let endpoint = Url::parse(endpoint)?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (broadcast_tx, _) = broadcast::channel(config.message_capacity);
        let shutdown = CancellationToken::new();

        let orchestrator = Orchestrator {
            endpoint: endpoint.clone(),
            config,
            transport: Arc::new(transport),
            reachability: Arc::new(reachability),
            commands: commands_tx.clone(),
            shutdown: shutdown.clone(),
            state: StateMachine::new(state_tx),
            message_observers: Vec::new(),
            broadcast_tx: broadcast_tx.clone(),
            session: None,
            subscription: None,
            epoch: 0,
            generation: 0,
            ping_failures: 0,
        };

        tokio::spawn(orchestrator.run(commands_rx));

        Ok(Self {
            inner: Arc::new(ClientInner {
                endpoint,
                commands: commands_tx,
                state_rx,
                broadcast_tx,
                _shutdown: DroppingCancellationToken(shutdown),
            }),
        })
    }

    /// Open a session if none exists. Repeated calls while a session exists are ignored.
    pub fn connect(&self) -> Result<()> {
        self.post(Command::Connect)
    }

    /// Close the session and stop keepalive and reachability monitoring.
    pub fn disconnect(&self) -> Result<()> {
        self.post(Command::Disconnect {
            remove_reachability: true,
        })
    }

    /// Replace the current session with a fresh one.
    pub fn reconnect(&self) -> Result<()> {
        self.post(Command::Reconnect)
    }

    /// Send a message over the live session.
    ///
    /// Fails with [`Kind::NotConnected`](crate::error::Kind::NotConnected)
    /// unless the client is [`ConnectionState::Connected`].
    pub async fn send<M: Into<Message>>(&self, message: M) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.post(Command::Send { reply: reply_tx })?;

        let session = reply_rx.await.map_err(|_e| Shutdown)??;
        session.send(message.into()).await?;
        Ok(())
    }

    /// Serialize `request` as JSON and send it as a text message.
    pub async fn send_json<R: Serialize>(&self, request: &R) -> Result<()> {
        let json = serde_json::to_string(request)?;
        self.send(json).await
    }

    /// Register a callback for inbound messages and transport errors.
    pub fn on_message<F>(&self, observer: F) -> Result<()>
    where
        F: Fn(Inbound) + Send + Sync + 'static,
    {
        self.post(Command::ObserveMessages(Arc::new(observer)))
    }

    /// Register a callback for connection state transitions.
    ///
    /// Every transition is reported exactly once, in order.
    pub fn on_state_change<F>(&self, observer: F) -> Result<()>
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let observer: StateObserver = Arc::new(observer);
        self.post(Command::ObserveState(observer))
    }

    /// Subscribe to inbound messages as a stream.
    ///
    /// Each call returns an independent stream. A subscriber that falls more
    /// than [`Config::message_capacity`] messages behind receives
    /// [`TransportError::Lagged`] and continues from the oldest retained
    /// message.
    pub fn subscribe(&self) -> impl Stream<Item = Inbound> + use<> {
        let mut rx = self.inner.broadcast_tx.subscribe();

        stream! {
            loop {
                match rx.recv().await {
                    Ok(message) => yield message,
                    Err(RecvError::Lagged(count)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Message subscriber lagged, missed {count} messages");
                        yield Err(TransportError::Lagged { count });
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_rx.borrow()
    }

    /// Subscribe to connection state changes.
    ///
    /// A [`watch::Receiver`] only holds the latest value; use
    /// [`on_state_change`](Self::on_state_change) to see every transition.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    fn post(&self, command: Command) -> Result<()> {
        self.inner
            .commands
            .send(command)
            .map_err(|_e| Error::from(Shutdown))
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.inner.endpoint.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// The session currently owned by the orchestrator.
struct ActiveSession {
    epoch: u64,
    handle: Arc<dyn Session>,
    /// Cancels this session's pump and keepalive loop
    token: CancellationToken,
}

/// Single writer for all connection state. Runs as one task and applies
/// [`Command`]s strictly in the order they were sent.
struct Orchestrator {
    endpoint: Url,
    config: Config,
    transport: Arc<dyn Transport>,
    reachability: Arc<dyn Reachability>,
    /// Handed to the tasks this orchestrator spawns
    commands: mpsc::UnboundedSender<Command>,
    shutdown: CancellationToken,
    state: StateMachine,
    message_observers: Vec<MessageObserver>,
    broadcast_tx: broadcast::Sender<Inbound>,
    session: Option<ActiveSession>,
    subscription: Option<Subscription>,
    /// Incremented for every session opened
    epoch: u64,
    /// Incremented for every reachability subscription
    generation: u64,
    ping_failures: u32,
}

impl Orchestrator {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            let command = tokio::select! {
                biased;

                () = self.shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };

            self.handle(command);
        }

        self.release();
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Connect => self.connect(),
            Command::Disconnect {
                remove_reachability,
            } => self.disconnect(remove_reachability),
            Command::Reconnect => self.reconnect(),
            Command::Send { reply } => {
                _ = reply.send(self.writable_session());
            }
            Command::ObserveMessages(observer) => self.message_observers.push(observer),
            Command::ObserveState(observer) => self.state.observe(observer),
            Command::Session { epoch, event } => self.on_session_event(epoch, event),
            Command::Inbound { epoch, message } => self.on_inbound(epoch, message),
            Command::KeepaliveWake { epoch, reply } => {
                _ = reply.send(self.on_keepalive_wake(epoch));
            }
            Command::ProbeResult { epoch, outcome } => self.on_probe_result(epoch, outcome),
            Command::Reachability {
                generation,
                reachable,
            } => self.on_reachability(generation, reachable),
        }
    }

    fn connect(&mut self) {
        if self.session.is_some() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Ignoring connect: a session already exists");
            return;
        }

        self.epoch = self.epoch.wrapping_add(1);
        let epoch = self.epoch;
        let token = self.shutdown.child_token();

        #[cfg(feature = "tracing")]
        tracing::debug!(epoch, endpoint = %self.endpoint, "Opening session");

        let events = SessionEvents::new(epoch, self.commands.clone());
        let handle = self
            .transport
            .open(&self.endpoint, &self.config.headers, events);

        self.ping_failures = 0;
        self.session = Some(ActiveSession {
            epoch,
            handle: Arc::clone(&handle),
            token: token.clone(),
        });
        self.state.transition(ConnectionState::Connecting);

        pump::spawn(epoch, handle, token.clone(), self.commands.clone());

        if self.subscription.is_none() {
            self.generation = self.generation.wrapping_add(1);
            self.subscription = Some(reachability::subscribe(
                self.reachability.as_ref(),
                self.generation,
                self.shutdown.child_token(),
                self.commands.clone(),
            ));
        }

        Keepalive {
            epoch,
            interval: self.config.ping_interval,
            ping_timeout: self.config.ping_timeout,
            token,
            commands: self.commands.clone(),
        }
        .spawn();
    }

    fn disconnect(&mut self, remove_reachability: bool) {
        if let Some(session) = self.session.take() {
            #[cfg(feature = "tracing")]
            tracing::debug!(epoch = session.epoch, "Closing session");

            session.token.cancel();
            session.handle.close();
        }

        self.ping_failures = 0;
        self.state.transition(ConnectionState::Disconnected);

        if remove_reachability {
            self.subscription = None;
        }
    }

    fn reconnect(&mut self) {
        self.disconnect(false);
        self.connect();
    }

    /// The session for `epoch`, if it is still the live one.
    fn live_session(&self, epoch: u64) -> Option<&ActiveSession> {
        self.session
            .as_ref()
            .filter(|session| session.epoch == epoch)
    }

    fn writable_session(&self) -> Result<Arc<dyn Session>> {
        match &self.session {
            Some(session) if self.state.current().is_connected() => {
                Ok(Arc::clone(&session.handle))
            }
            _ => Err(Error::not_connected(self.state.current())),
        }
    }

    fn on_session_event(&mut self, epoch: u64, event: SessionEvent) {
        if self.live_session(epoch).is_none() {
            #[cfg(feature = "tracing")]
            tracing::trace!(epoch, ?event, "Dropping event from stale session");
            return;
        }

        match event {
            SessionEvent::Opened => {
                self.state.transition(ConnectionState::Connected);
            }
            SessionEvent::Closed { code, reason } => {
                #[cfg(feature = "tracing")]
                tracing::warn!(?code, %reason, "Session closed by transport");
                #[cfg(not(feature = "tracing"))]
                let _ = (&code, &reason);

                self.state.transition(ConnectionState::Disconnected);
            }
        }
    }

    fn on_inbound(&mut self, epoch: u64, message: Inbound) {
        if self.live_session(epoch).is_none() {
            return;
        }

        for observer in &self.message_observers {
            observer(message.clone());
        }
        // No stream subscribers is fine.
        _ = self.broadcast_tx.send(message);
    }

    fn on_keepalive_wake(&mut self, epoch: u64) -> KeepaliveAction {
        let Some(handle) = self
            .live_session(epoch)
            .map(|session| Arc::clone(&session.handle))
        else {
            return KeepaliveAction::Stop;
        };

        if self.ping_failures >= self.config.ping_failure_threshold {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                failures = self.ping_failures,
                "Keepalive exhausted, reconnecting"
            );
            self.reconnect();
            return KeepaliveAction::Stop;
        }

        KeepaliveAction::Probe(handle)
    }

    fn on_probe_result(&mut self, epoch: u64, outcome: std::result::Result<(), TransportError>) {
        if self.live_session(epoch).is_none() {
            return;
        }

        match outcome {
            Ok(()) => self.ping_failures = 0,
            Err(e) => {
                self.ping_failures = self.ping_failures.saturating_add(1);
                #[cfg(feature = "tracing")]
                tracing::warn!(failures = self.ping_failures, "Keepalive probe failed: {e}");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }

    fn on_reachability(&mut self, generation: u64, reachable: bool) {
        if self
            .subscription
            .as_ref()
            .is_none_or(|subscription| subscription.generation != generation)
        {
            return;
        }

        if reachable {
            if self.session.is_none() {
                self.connect();
            }
        } else {
            self.disconnect(false);
        }
    }

    /// Drop every resource without notifying observers.
    fn release(&mut self) {
        if let Some(session) = self.session.take() {
            session.token.cancel();
            session.handle.close();
        }
        self.subscription = None;

        #[cfg(feature = "tracing")]
        tracing::debug!("Connection task stopped");
    }
}
