//! Core WebSocket infrastructure.
//!
//! This module provides the connection manager for the realtime chat channel: lifecycle,
//! heartbeat, bounded reconnection and fan-out of inbound envelopes.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: Public handle. Clones share one background driver task
//! - [`machine`]: Pure state machine driven by the connection manager
//! - [`Connector`]: Trait for opening transports, implemented by [`TungsteniteConnector`]
//! - [`Envelope`]: The JSON unit exchanged over the socket
//!
//! # Example
//!
//! ```ignore
//! let connection = ConnectionManager::new(endpoint, Config::default(), EnvToken)?;
//! connection.connect();
//!
//! let mut messages = Box::pin(connection.messages());
//! while let Some(envelope) = messages.next().await {
//!     println!("{:?}", envelope?);
//! }
//! ```

pub mod config;
pub mod connection;
pub mod envelope;
pub mod error;
pub mod machine;
pub mod traits;
pub mod transport;

pub use connection::ConnectionManager;
pub use envelope::{Envelope, EnvelopeKind, Payload, parse_envelopes};
pub use error::ConnectionFailure;
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use machine::ConnectionState;
pub use traits::*;
pub use transport::{CloseReason, Frame, Link, TungsteniteConnector};
