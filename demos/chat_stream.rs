//! Live view of the chat channel.
//!
//! Connects with the token from `QA_CHAT_ACCESS_TOKEN`, logs every state transition, folds
//! inbound envelopes into a message log and prints new messages as they arrive.
//!
//! Run with tracing enabled:
//! ```sh
//! QA_CHAT_ACCESS_TOKEN=... RUST_LOG=info,qa_realtime_client=debug \
//!     cargo run --example chat_stream --features tracing -- ws://localhost:8000/ws
//! ```

use std::time::Duration;

use futures::StreamExt as _;
use qa_realtime_client::auth::EnvToken;
use qa_realtime_client::chat::MessageLog;
use qa_realtime_client::ws::config::Config;
use qa_realtime_client::ws::{ConnectionManager, ConnectionState};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_ENDPOINT: &str = "ws://localhost:8000/ws";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let endpoint = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_owned());
    let connection = ConnectionManager::new(&endpoint, Config::default(), EnvToken::default())?;

    let mut transitions = connection.transitions();
    let watcher = connection.clone();
    tokio::spawn(async move {
        while let Ok(state) = transitions.recv().await {
            info!(?state, "connection state");
            if state == (ConnectionState::Errored { terminal: true }) {
                warn!(failure = ?watcher.last_failure(), "giving up");
            }
        }
    });

    connection.connect();

    let mut log = MessageLog::new();
    let mut messages = Box::pin(connection.messages());
    let idle = Duration::from_secs(120);

    while let Ok(Some(result)) = tokio::time::timeout(idle, messages.next()).await {
        match result {
            Ok(envelope) => {
                let before = log.messages().len();
                log.apply(&envelope);

                if let Some(message) = envelope.as_message() {
                    info!(
                        id = %message.id,
                        role = %message.role,
                        status = %message.status,
                        new = log.messages().len() > before,
                        "{}",
                        message.content
                    );
                } else if let Some(error) = log.error() {
                    warn!(error, "server error");
                    log.dismiss_error();
                } else {
                    debug!(kind = %envelope.kind, typing = log.is_assistant_typing());
                }
            }
            Err(e) => warn!(error = %e, "stream lagged"),
        }
    }

    info!(received = log.messages().len(), "idle, disconnecting");
    connection.disconnect();

    Ok(())
}
