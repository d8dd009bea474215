#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Deeply nested uses in sub-modules are falsely flagged as being unused"
)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as channel;
use futures::{FutureExt as _, SinkExt as _, StreamExt as _};
use qa_realtime_client::Result;
use qa_realtime_client::auth::TokenProvider;
use qa_realtime_client::error::Error;
use qa_realtime_client::ws::config::{Config, ReconnectConfig};
use qa_realtime_client::ws::{ConnectionManager, ConnectionState, Connector, Frame, Link, WsError};
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use url::Url;

pub const ENDPOINT: &str = "ws://chat.test/ws";
pub const TOKEN: &str = "token-abc";

/// Generous upper bound for waits. Time is paused in these tests, so this never slows them down.
pub const WAIT: Duration = Duration::from_secs(600);

/// How the next connection attempt resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accept,
    Refuse,
    /// Never resolves, so only the connect timeout ends the attempt
    Stall,
}

/// Server end of an accepted mock connection.
pub struct MockPeer {
    pub url: Url,
    outbound: channel::UnboundedSender<Result<Frame>>,
    inbound: channel::UnboundedReceiver<Frame>,
}

impl MockPeer {
    pub fn send_text(&self, text: &str) {
        self.outbound
            .unbounded_send(Ok(Frame::Text(text.to_owned())))
            .unwrap();
    }

    pub fn send_json(&self, value: &Value) {
        self.send_text(&value.to_string());
    }

    /// Ends the client's read half, as if the server went away.
    pub fn hang_up(&self) {
        self.outbound.close_channel();
    }

    pub fn fail(&self, error: WsError) {
        _ = self.outbound.unbounded_send(Err(error.into()));
    }

    pub async fn recv(&mut self) -> Option<Frame> {
        timeout(WAIT, self.inbound.next()).await.ok().flatten()
    }

    /// Frames written by the client so far, without waiting.
    pub fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(Some(frame)) = self.inbound.next().now_or_never() {
            frames.push(frame);
        }
        frames
    }

    /// Text frames written by the client so far, parsed as JSON.
    pub fn drain_json(&mut self) -> Vec<Value> {
        self.drain()
            .into_iter()
            .filter_map(|frame| match frame {
                Frame::Text(text) => Some(serde_json::from_str(&text).unwrap()),
                _ => None,
            })
            .collect()
    }

    pub fn token(&self) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned())
    }
}

struct Inner {
    plan: Mutex<VecDeque<Outcome>>,
    urls: Mutex<Vec<Url>>,
    peers: mpsc::UnboundedSender<MockPeer>,
}

/// In-memory [`Connector`] that follows a scripted plan of outcomes, accepting once the plan
/// is used up.
#[derive(Clone)]
pub struct MockConnector {
    inner: Arc<Inner>,
}

impl MockConnector {
    pub fn new<I: IntoIterator<Item = Outcome>>(plan: I) -> (Self, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, peers_rx) = mpsc::unbounded_channel();
        let connector = Self {
            inner: Arc::new(Inner {
                plan: Mutex::new(plan.into_iter().collect()),
                urls: Mutex::new(Vec::new()),
                peers,
            }),
        };
        (connector, peers_rx)
    }

    pub fn accepting() -> (Self, mpsc::UnboundedReceiver<MockPeer>) {
        Self::new([])
    }

    pub fn refusing(times: usize) -> (Self, mpsc::UnboundedReceiver<MockPeer>) {
        Self::new(std::iter::repeat_n(Outcome::Refuse, times))
    }

    pub fn push(&self, outcome: Outcome) {
        self.inner.plan.lock().unwrap().push_back(outcome);
    }

    /// Number of transport opens attempted so far.
    pub fn attempts(&self) -> usize {
        self.inner.urls.lock().unwrap().len()
    }

    pub fn urls(&self) -> Vec<Url> {
        self.inner.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: Url) -> Result<Link> {
        self.inner.urls.lock().unwrap().push(url.clone());
        let outcome = self
            .inner
            .plan
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Outcome::Accept);

        match outcome {
            Outcome::Refuse => Err(WsError::ConnectionClosed.into()),
            Outcome::Stall => std::future::pending().await,
            Outcome::Accept => {
                let (client_tx, server_rx) = channel::unbounded::<Frame>();
                let (server_tx, client_rx) = channel::unbounded::<Result<Frame>>();
                _ = self.inner.peers.send(MockPeer {
                    url,
                    outbound: server_tx,
                    inbound: server_rx,
                });

                let sink = client_tx.sink_map_err(|_e| Error::from(WsError::ConnectionClosed));
                Ok(Link::new(sink, client_rx))
            }
        }
    }
}

/// Config with the given attempt budget and otherwise default timings.
pub fn config(max_attempts: u32) -> Config {
    Config::builder()
        .reconnect(ReconnectConfig::builder().max_attempts(max_attempts).build())
        .build()
}

pub fn manager<T: TokenProvider>(
    config: Config,
    tokens: T,
    connector: &MockConnector,
) -> ConnectionManager {
    ConnectionManager::with_connector(ENDPOINT, config, tokens, connector.clone()).unwrap()
}

pub async fn wait_for_state(connection: &ConnectionManager, state: ConnectionState) {
    let mut rx = connection.state_receiver();
    timeout(WAIT, rx.wait_for(|current| *current == state))
        .await
        .unwrap()
        .unwrap();
}

pub async fn next_peer(peers: &mut mpsc::UnboundedReceiver<MockPeer>) -> MockPeer {
    timeout(WAIT, peers.recv()).await.unwrap().unwrap()
}

pub async fn next_transition(rx: &mut broadcast::Receiver<ConnectionState>) -> ConnectionState {
    timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

/// Collects transitions until `last` is seen, inclusive.
pub async fn transitions_until(
    rx: &mut broadcast::Receiver<ConnectionState>,
    last: ConnectionState,
) -> Vec<ConnectionState> {
    let mut seen = Vec::new();
    loop {
        let state = next_transition(rx).await;
        seen.push(state);
        if state == last {
            return seen;
        }
    }
}

pub fn message_envelope(id: &str, content: &str) -> Value {
    json!({
        "type": "message",
        "payload": {
            "conversation_id": "c-1",
            "message": {
                "id": id,
                "conversation_id": "c-1",
                "content": content,
                "role": "assistant",
                "status": "sent",
                "created_at": "2025-03-01T10:00:00Z"
            }
        },
        "timestamp": "2025-03-01T10:00:00Z"
    })
}

pub fn typing_envelope(is_typing: bool) -> Value {
    json!({
        "type": "typing",
        "payload": { "conversation_id": "c-1", "is_typing": is_typing },
        "timestamp": "2025-03-01T10:00:00Z"
    })
}
