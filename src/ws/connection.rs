#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::collections::VecDeque;
use std::future::{Future, pending};
use std::pin::Pin;
use std::sync::Arc;

use async_stream::try_stream;
use futures::future::BoxFuture;
use futures::{SinkExt as _, Stream, StreamExt as _};
use secrecy::ExposeSecret as _;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep, interval_at, sleep, timeout};
use url::Url;

use super::config::Config;
use super::envelope::{Envelope, EnvelopeKind, parse_envelopes};
use super::error::{ConnectionFailure, WsError};
pub use super::machine::ConnectionState;
use super::machine::{Action, Input, Machine};
use super::traits::Connector;
use super::transport::{CloseReason, Frame, Link, TungsteniteConnector};
use crate::auth::{TokenProvider, fresh_token};
use crate::{Result, error::Error};

/// Broadcast channel capacity for incoming messages.
const BROADCAST_CAPACITY: usize = 1024;

/// Broadcast channel capacity for state transitions.
const TRANSITIONS_CAPACITY: usize = 64;

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    Send(String),
}

/// Manages the WebSocket connection lifecycle, reconnection, and heartbeat.
///
/// All connection state lives in a background driver task; this handle talks to it over an
/// ordered command channel. Handles are cheap to clone and share one connection. Dropping the
/// last handle disconnects and stops the driver.
///
/// - `connect()` is idempotent and reads a fresh token on every attempt
/// - reconnects use a fixed delay with a bounded number of attempts per episode
/// - a `ping` envelope is sent every heartbeat interval while connected
/// - inbound `pong` envelopes are consumed; every other envelope is broadcast in arrival order
///
/// # Example
///
/// ```ignore
/// let connection = ConnectionManager::new("wss://chat.example.com/ws", Config::default(), EnvToken)?;
/// connection.connect();
///
/// let mut rx = connection.subscribe();
/// while let Ok(envelope) = rx.recv().await {
///     println!("Received: {envelope:?}");
/// }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    /// Watch channel receiver for the current state
    state_rx: watch::Receiver<ConnectionState>,
    /// Most recent failure, cleared on a successful open
    failure_rx: watch::Receiver<Option<ConnectionFailure>>,
    /// Every state transition, in order
    transitions_tx: broadcast::Sender<ConnectionState>,
    /// Broadcast sender for incoming envelopes
    broadcast_tx: broadcast::Sender<Envelope>,
    /// Command channel into the driver; closes when the last handle is dropped
    commands: mpsc::UnboundedSender<Command>,
}

impl ConnectionManager {
    /// Create a connection manager backed by `tokio-tungstenite`.
    ///
    /// The manager starts `Disconnected`; call [`connect`](Self::connect) to open the connection.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the endpoint is empty, unparsable or not `ws`/`wss`,
    /// when a configured duration is zero, or when called outside a Tokio runtime.
    pub fn new<T: TokenProvider>(endpoint: &str, config: Config, tokens: T) -> Result<Self> {
        Self::with_connector(endpoint, config, tokens, TungsteniteConnector)
    }

    /// Create a connection manager that opens transports through `connector`.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn with_connector<T, C>(
        endpoint: &str,
        config: Config,
        tokens: T,
        connector: C,
    ) -> Result<Self>
    where
        T: TokenProvider,
        C: Connector,
    {
        let endpoint = parse_endpoint(endpoint)?;
        if config.heartbeat_interval.is_zero() {
            return Err(Error::validation("heartbeat interval must be greater than zero"));
        }
        if config.connect_timeout.is_zero() {
            return Err(Error::validation("connect timeout must be greater than zero"));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_e| {
            Error::validation("ConnectionManager must be created inside a Tokio runtime")
        })?;

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (transitions_tx, _) = broadcast::channel(TRANSITIONS_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (failure_tx, failure_rx) = watch::channel(None);

        let driver = Driver {
            machine: Machine::new(&config.reconnect),
            endpoint,
            config,
            connector: Arc::new(connector),
            tokens: Arc::new(tokens),
            commands: commands_rx,
            state_tx,
            failure_tx,
            transitions_tx: transitions_tx.clone(),
            broadcast_tx: broadcast_tx.clone(),
            opening: None,
            link: None,
            heartbeat: None,
            reconnect: None,
        };
        runtime.spawn(driver.run());

        Ok(Self {
            state_rx,
            failure_rx,
            transitions_tx,
            broadcast_tx,
            commands,
        })
    }

    /// Open the connection. A no-op while `Connecting` or `Connected`.
    ///
    /// From `Errored` this starts a new reconnect episode with a fresh attempt budget. Queued
    /// behind earlier commands, so `disconnect(); connect();` reopens.
    pub fn connect(&self) {
        _ = self.commands.send(Command::Connect);
    }

    /// Close the connection and cancel any pending reconnect. Safe to call repeatedly.
    pub fn disconnect(&self) {
        _ = self.commands.send(Command::Disconnect);
    }

    /// Queue `envelope` for the transport.
    ///
    /// Returns `false` without queueing anything unless the connection is `Connected`. The
    /// envelope is sent as-is; its timestamp is not touched.
    pub fn send(&self, envelope: &Envelope) -> bool {
        if !self.state().is_connected() {
            return false;
        }

        match serde_json::to_string(envelope) {
            Ok(text) => self.commands.send(Command::Send(text)).is_ok(),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Failed to serialize outbound envelope");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                false
            }
        }
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to connection state changes.
    ///
    /// A watch receiver only keeps the latest value. Use [`transitions`](Self::transitions) to
    /// observe every intermediate state.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Receive every state transition made after this call, in order.
    #[must_use]
    pub fn transitions(&self) -> broadcast::Receiver<ConnectionState> {
        self.transitions_tx.subscribe()
    }

    /// The most recent connection failure, if the connection has not opened since.
    #[must_use]
    pub fn last_failure(&self) -> Option<ConnectionFailure> {
        self.failure_rx.borrow().clone()
    }

    /// Subscribe to failure changes. `None` is published when the connection opens.
    #[must_use]
    pub fn failure_receiver(&self) -> watch::Receiver<Option<ConnectionFailure>> {
        self.failure_rx.clone()
    }

    /// Subscribe to incoming envelopes.
    ///
    /// Each call returns a new independent receiver. Multiple subscribers can
    /// receive envelopes concurrently without blocking each other.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.broadcast_tx.subscribe()
    }

    /// Incoming envelopes as a stream.
    ///
    /// The stream yields a [`WsError::Lagged`] error and ends if the consumer falls more than
    /// the broadcast capacity behind. It ends cleanly once the connection manager is gone.
    pub fn messages(&self) -> impl Stream<Item = Result<Envelope>> + use<> {
        let mut rx = self.subscribe();

        try_stream! {
            loop {
                match rx.recv().await {
                    Ok(envelope) => yield envelope,
                    Err(RecvError::Lagged(n)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Subscription lagged, missed {n} messages");
                        Err(WsError::Lagged { count: n })?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// Invoke `callback` for every incoming envelope on a spawned task.
    ///
    /// Lagged envelopes are skipped. Abort the returned handle to unregister.
    pub fn on_message<F, Fut>(&self, mut callback: F) -> JoinHandle<()>
    where
        F: FnMut(Envelope) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut rx = self.subscribe();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => callback(envelope).await,
                    Err(RecvError::Lagged(n)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Message callback lagged, missed {n} messages");
                        #[cfg(not(feature = "tracing"))]
                        let _ = n;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(Error::validation("endpoint must not be empty"));
    }

    let url = Url::parse(endpoint)?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(Error::validation(format!(
            "endpoint scheme must be ws or wss, got {other}"
        ))),
    }
}

enum Event {
    Command(Option<Command>),
    Opened(Result<Link>),
    Frame(Option<Result<Frame>>),
    RetryDue,
    Heartbeat,
}

/// Owns the connection and every timer. Runs until the last handle is dropped.
struct Driver {
    endpoint: Url,
    config: Config,
    connector: Arc<dyn Connector>,
    tokens: Arc<dyn TokenProvider>,
    machine: Machine,
    commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    failure_tx: watch::Sender<Option<ConnectionFailure>>,
    transitions_tx: broadcast::Sender<ConnectionState>,
    broadcast_tx: broadcast::Sender<Envelope>,
    opening: Option<BoxFuture<'static, Result<Link>>>,
    link: Option<Link>,
    heartbeat: Option<Interval>,
    reconnect: Option<Pin<Box<Sleep>>>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            // Commands first: a disconnect issued before a timer fires always wins.
            let event = tokio::select! {
                biased;
                command = self.commands.recv() => Event::Command(command),
                result = poll_open(&mut self.opening) => Event::Opened(result),
                frame = next_frame(&mut self.link) => Event::Frame(frame),
                () = wait_reconnect(&mut self.reconnect) => Event::RetryDue,
                () = tick(&mut self.heartbeat) => Event::Heartbeat,
            };

            match event {
                Event::Command(Some(Command::Connect)) => self.apply(Input::Connect).await,
                Event::Command(Some(Command::Disconnect)) => self.apply(Input::Disconnect).await,
                Event::Command(Some(Command::Send(text))) => self.write(text).await,
                Event::Command(None) => {
                    self.apply(Input::Disconnect).await;
                    break;
                }
                Event::Opened(Ok(link)) => {
                    self.link = Some(link);
                    self.apply(Input::Opened).await;
                }
                Event::Opened(Err(e)) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Unable to connect: {e:?}");
                    self.apply(Input::OpenFailed(e.to_string())).await;
                }
                Event::Frame(Some(Ok(Frame::Text(text)))) => self.dispatch(&text).await,
                Event::Frame(Some(Ok(Frame::Close(reason)))) => {
                    self.transport_closed(reason.map(|r| r.to_string())).await;
                }
                Event::Frame(Some(Err(e))) => self.transport_closed(Some(e.to_string())).await,
                Event::Frame(None) => self.transport_closed(None).await,
                Event::RetryDue => self.apply(Input::RetryDue).await,
                Event::Heartbeat => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!("Sending heartbeat ping");
                    self.send_envelope(&Envelope::ping()).await;
                }
            }
        }
    }

    /// Feeds `input` to the machine and performs the resulting actions, including any
    /// follow-up inputs the actions produce.
    async fn apply(&mut self, input: Input) {
        let mut inputs = VecDeque::from([input]);

        while let Some(input) = inputs.pop_front() {
            for action in self.machine.handle(input) {
                if let Some(next) = self.perform(action).await {
                    inputs.push_back(next);
                }
            }
        }
    }

    async fn perform(&mut self, action: Action) -> Option<Input> {
        match action {
            Action::Enter(state) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(?state, "Connection state changed");
                self.state_tx.send_replace(state);
                _ = self.transitions_tx.send(state);
            }
            Action::Open => return self.open(),
            Action::AbortOpen => self.opening = None,
            Action::StartHeartbeat => {
                let period = self.config.heartbeat_interval;
                let mut heartbeat = interval_at(Instant::now() + period, period);
                heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.heartbeat = Some(heartbeat);
            }
            Action::StopHeartbeat => self.heartbeat = None,
            Action::ScheduleReconnect { attempt, delay } => {
                #[cfg(feature = "tracing")]
                tracing::info!(attempt, ?delay, "Scheduling reconnect");
                #[cfg(not(feature = "tracing"))]
                let _ = attempt;
                self.reconnect = Some(Box::pin(sleep(delay)));
            }
            Action::CancelReconnect => self.reconnect = None,
            Action::CloseTransport => self.close_transport().await,
            Action::Fail(failure) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%failure, "Connection failed");
                self.failure_tx.send_replace(Some(failure));
            }
            Action::ClearFailure => {
                self.failure_tx.send_replace(None);
            }
        }

        None
    }

    /// Starts opening the transport with a token read for this attempt only.
    fn open(&mut self) -> Option<Input> {
        let Some(token) = fresh_token(self.tokens.as_ref()) else {
            return Some(Input::TokenMissing);
        };

        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("token", token.expose_secret());

        let connector = Arc::clone(&self.connector);
        let limit = self.config.connect_timeout;
        self.opening = Some(Box::pin(async move {
            match timeout(limit, connector.connect(url)).await {
                Ok(result) => result,
                Err(_elapsed) => Err(WsError::Timeout.into()),
            }
        }));

        None
    }

    async fn transport_closed(&mut self, reason: Option<String>) {
        #[cfg(feature = "tracing")]
        tracing::debug!(?reason, "Transport closed");
        #[cfg(not(feature = "tracing"))]
        let _ = reason;
        self.link = None;
        self.apply(Input::Closed).await;
    }

    async fn close_transport(&mut self) {
        let Some(mut link) = self.link.take() else {
            return;
        };

        let close = async {
            link.sink.send(Frame::Close(Some(CloseReason::normal()))).await?;
            link.sink.close().await?;
            Ok::<_, Error>(())
        };
        match timeout(self.config.connect_timeout, close).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %e, "Error while closing transport");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
            Err(_elapsed) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Timed out closing transport");
            }
        }
    }

    async fn dispatch(&mut self, text: &str) {
        let envelopes = match parse_envelopes(text.as_bytes()) {
            Ok(envelopes) => envelopes,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%text, error = %e, "Failed to parse WebSocket message");
                #[cfg(not(feature = "tracing"))]
                let _ = (&text, &e);
                return;
            }
        };

        for envelope in envelopes {
            #[cfg(feature = "tracing")]
            tracing::trace!(?envelope, "Parsed WebSocket message");

            match envelope.kind {
                EnvelopeKind::Pong => {}
                EnvelopeKind::Ping => {
                    if self.config.answer_pings {
                        self.send_envelope(&Envelope::pong()).await;
                    }
                    _ = self.broadcast_tx.send(envelope);
                }
                _ => {
                    _ = self.broadcast_tx.send(envelope);
                }
            }
        }
    }

    async fn send_envelope(&mut self, envelope: &Envelope) {
        match serde_json::to_string(envelope) {
            Ok(text) => self.write(text).await,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Failed to serialize envelope");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }

    async fn write(&mut self, text: String) {
        let Some(link) = self.link.as_mut() else {
            #[cfg(feature = "tracing")]
            tracing::debug!("Dropping outbound frame, transport is not open");
            return;
        };

        if let Err(e) = link.sink.send(Frame::Text(text)).await {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %e, "Failed to write to transport");
            self.transport_closed(Some(e.to_string())).await;
        }
    }
}

async fn poll_open(opening: &mut Option<BoxFuture<'static, Result<Link>>>) -> Result<Link> {
    match opening {
        Some(future) => {
            let result = future.await;
            *opening = None;
            result
        }
        None => pending().await,
    }
}

async fn next_frame(link: &mut Option<Link>) -> Option<Result<Frame>> {
    match link {
        Some(link) => link.stream.next().await,
        None => pending().await,
    }
}

async fn wait_reconnect(reconnect: &mut Option<Pin<Box<Sleep>>>) {
    match reconnect {
        Some(delay) => {
            delay.as_mut().await;
            *reconnect = None;
        }
        None => pending().await,
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}
