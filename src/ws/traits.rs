//! Core traits for the WebSocket infrastructure.

use async_trait::async_trait;
use url::Url;

use super::transport::Link;

/// Opens transports for the connection manager.
///
/// The production implementation is [`TungsteniteConnector`](super::transport::TungsteniteConnector).
/// Tests substitute an in-memory connector to script open failures and server frames.
///
/// # Example
///
/// ```ignore
/// pub struct Loopback;
///
/// #[async_trait]
/// impl Connector for Loopback {
///     async fn connect(&self, url: Url) -> crate::Result<Link> {
///         let (client_tx, server_rx) = futures::channel::mpsc::unbounded();
///         let (server_tx, client_rx) = futures::channel::mpsc::unbounded();
///         // hand server_rx/server_tx to the test ...
///         Ok(Link::new(client_tx.sink_map_err(|_e| WsError::ConnectionClosed.into()), client_rx))
///     }
/// }
/// ```
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a transport to `url`. The URL already carries the access token.
    async fn connect(&self, url: Url) -> crate::Result<Link>;
}
