use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, SinkExt as _, Stream, StreamExt as _, future};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use url::Url;

use super::traits::Connector;
use crate::Result;
use crate::error::Error;

/// Close code for a normal, caller-initiated closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Text-level frames exchanged with a transport.
///
/// Binary frames and protocol-level ping/pong are handled (or ignored) by the transport.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close(Option<CloseReason>),
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    #[must_use]
    pub fn new<S: Into<String>>(code: u16, reason: S) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn normal() -> Self {
        Self::new(NORMAL_CLOSURE, "client disconnect")
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "code {}", self.code)
        } else {
            write!(f, "code {}: {}", self.code, self.reason)
        }
    }
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = Error> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

/// An open transport, split into its write and read halves.
pub struct Link {
    pub(crate) sink: FrameSink,
    pub(crate) stream: FrameStream,
}

impl Link {
    pub fn new<Si, St>(sink: Si, stream: St) -> Self
    where
        Si: Sink<Frame, Error = Error> + Send + 'static,
        St: Stream<Item = Result<Frame>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Close(reason) => Message::Close(reason.map(|r| CloseFrame {
                code: CloseCode::from(r.code),
                reason: r.reason.into(),
            })),
        }
    }
}

fn into_frame(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
        Message::Close(frame) => Some(Frame::Close(
            frame.map(|f| CloseReason::new(u16::from(f.code), f.reason.as_str())),
        )),
        // Binary frames are not part of the protocol; protocol pings are answered by tungstenite.
        _ => None,
    }
}

/// [`Connector`] backed by `tokio-tungstenite`, with TLS for `wss://` endpoints.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: Url) -> Result<Link> {
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (write, read) = ws_stream.split();

        let sink = write.with(|frame: Frame| future::ready(Ok::<_, Error>(Message::from(frame))));
        let stream = read.filter_map(|message| {
            future::ready(match message {
                Ok(message) => into_frame(message).map(Ok),
                Err(e) => Some(Err(Error::from(e))),
            })
        });

        Ok(Link::new(sink, stream))
    }
}
