use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::WsError;
use crate::Result;
use crate::serde_helpers::deserialize_with_warnings;
use crate::types::ChatMessage;

/// Closed set of envelope tags carried in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[non_exhaustive]
pub enum EnvelopeKind {
    /// A chat message record, new or updated
    Message,
    /// Typing indicator
    Typing,
    /// Error text to surface to the user
    Error,
    /// Connection lifecycle notice from the server
    Connection,
    /// Keep-alive request
    Ping,
    /// Keep-alive acknowledgement, consumed by the connection manager
    Pong,
}

/// Kind-dependent envelope body. Which fields are meaningful is decided by [`EnvelopeKind`].
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct Payload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_typing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl Payload {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// The unit exchanged over the socket.
///
/// ```json
/// { "type": "typing", "payload": { "is_typing": true }, "timestamp": "2025-03-01T10:00:00Z" }
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    #[serde(default, skip_serializing_if = "Payload::is_empty")]
    pub payload: Payload,
    /// Set by the sender. Frames that omit it are stamped on arrival.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Creates an envelope stamped with the current time.
    #[must_use]
    pub fn new(kind: EnvelopeKind, payload: Payload) -> Self {
        Self {
            kind,
            payload,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn ping() -> Self {
        Self::new(EnvelopeKind::Ping, Payload::default())
    }

    #[must_use]
    pub fn pong() -> Self {
        Self::new(EnvelopeKind::Pong, Payload::default())
    }

    /// A `message` envelope carrying `message` and its conversation id.
    #[must_use]
    pub fn message(message: ChatMessage) -> Self {
        let payload = Payload {
            conversation_id: Some(message.conversation_id.clone()),
            message: Some(message),
            ..Payload::default()
        };
        Self::new(EnvelopeKind::Message, payload)
    }

    /// A `typing` indicator for `conversation_id`.
    #[must_use]
    pub fn typing(conversation_id: Option<String>, is_typing: bool) -> Self {
        let payload = Payload {
            conversation_id,
            is_typing: Some(is_typing),
            ..Payload::default()
        };
        Self::new(EnvelopeKind::Typing, payload)
    }

    #[must_use]
    pub fn error<S: Into<String>>(error: S) -> Self {
        let payload = Payload {
            error: Some(error.into()),
            ..Payload::default()
        };
        Self::new(EnvelopeKind::Error, payload)
    }

    /// The chat message of a `message` envelope.
    #[must_use]
    pub fn as_message(&self) -> Option<&ChatMessage> {
        match self.kind {
            EnvelopeKind::Message => self.payload.message.as_ref(),
            _ => None,
        }
    }

    /// The typing flag of a `typing` envelope.
    #[must_use]
    pub fn typing_state(&self) -> Option<bool> {
        match self.kind {
            EnvelopeKind::Typing => self.payload.is_typing,
            _ => None,
        }
    }

    /// The error text of an `error` envelope.
    #[must_use]
    pub fn error_text(&self) -> Option<&str> {
        match self.kind {
            EnvelopeKind::Error => self.payload.error.as_deref(),
            _ => None,
        }
    }

    /// Checks that the payload carries the fields its kind requires.
    pub fn validate(&self) -> Result<()> {
        let missing = match self.kind {
            EnvelopeKind::Message if self.payload.message.is_none() => Some("message"),
            EnvelopeKind::Typing if self.payload.is_typing.is_none() => Some("is_typing"),
            EnvelopeKind::Error if self.payload.error.is_none() => Some("error"),
            _ => None,
        };

        match missing {
            Some(field) => Err(WsError::InvalidMessage(format!(
                "{} envelope without payload.{field}",
                self.kind
            ))
            .into()),
            None => Ok(()),
        }
    }
}

/// Deserialize envelopes from a raw text frame.
///
/// Handles both single objects and arrays of envelopes. Returns an empty vector for empty or
/// whitespace-only input (keepalive frames). Any envelope that fails to parse or
/// [`validate`](Envelope::validate) fails the whole frame.
pub fn parse_envelopes(bytes: &[u8]) -> Result<Vec<Envelope>> {
    let trimmed = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map_or(&[][..], |start| &bytes[start..]);

    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let value: Value = serde_json::from_slice(trimmed).map_err(WsError::MessageParse)?;
    let envelopes: Vec<Envelope> = match value {
        Value::Array(items) => items
            .into_iter()
            .map(deserialize_with_warnings)
            .collect::<Result<_>>()?,
        other => vec![deserialize_with_warnings(other)?],
    };

    for envelope in &envelopes {
        envelope.validate()?;
    }

    Ok(envelopes)
}
