//! Chat records exchanged with the backend.

use bon::Builder;
/// Date and time types for message timestamps.
pub use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::{Result, TEMP_ID_PREFIX};

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[non_exhaustive]
pub enum MessageRole {
    /// Typed by the signed-in user.
    User,
    /// Produced by the assistant. The backend's `ai` sender type maps here.
    #[serde(alias = "ai")]
    Assistant,
}

/// Delivery status of a chat message.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[non_exhaustive]
pub enum MessageStatus {
    /// Created locally, HTTP submission in flight.
    Sending,
    /// Persisted by the backend (default for records that carry no status).
    #[default]
    Sent,
    /// Seen by the peer.
    Delivered,
    /// Submission failed; kept in place so the user can retry.
    Failed,
}

/// A message rating between [`Rating::MIN`] and [`Rating::MAX`] inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Rating(u8);

impl Rating {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(value: u8) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(Error::validation(format!(
                "rating must be between {} and {}, got {value}",
                Self::MIN,
                Self::MAX
            )))
        }
    }

    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Rating {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Rating> for u8 {
    fn from(rating: Rating) -> Self {
        rating.0
    }
}

/// A single turn in a conversation.
///
/// Serialized with snake_case field names. The camelCase names used by the web frontend and the
/// backend's `sender_type` are accepted when deserializing.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct ChatMessage {
    /// Canonical id assigned by the backend, or a [`TEMP_ID_PREFIX`] id while optimistic.
    pub id: String,
    #[serde(alias = "conversationId")]
    pub conversation_id: String,
    pub content: String,
    #[serde(alias = "sender_type")]
    pub role: MessageRole,
    #[serde(default)]
    #[builder(default)]
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<Rating>,
    #[serde(alias = "createdAt")]
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[serde(default, alias = "updatedAt", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    /// A locally created user message awaiting HTTP confirmation.
    ///
    /// `conversation_id` is empty when the question starts a new conversation.
    #[must_use]
    pub fn optimistic<S: Into<String>>(conversation_id: Option<String>, content: S) -> Self {
        Self {
            id: format!("{TEMP_ID_PREFIX}{}", Uuid::new_v4()),
            conversation_id: conversation_id.unwrap_or_default(),
            content: content.into(),
            role: MessageRole::User,
            status: MessageStatus::Sending,
            rating: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    /// Whether this message still carries a client-generated id.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        self.id.starts_with(TEMP_ID_PREFIX)
    }

    /// Timestamp of the latest known revision.
    #[must_use]
    pub fn revised_at(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn rating_bounds() {
        assert!(Rating::new(0).is_err());
        assert!(Rating::new(6).is_err());
        assert_eq!(Rating::new(1).unwrap().get(), 1);
        assert_eq!(Rating::new(5).unwrap().get(), 5);
    }

    #[test]
    fn rating_rejected_on_deserialize() {
        let result: std::result::Result<Rating, _> = serde_json::from_value(json!(9));

        result.unwrap_err();
    }

    #[test]
    fn backend_message_shape_deserializes() {
        let message: ChatMessage = serde_json::from_value(json!({
            "id": "0b4e7a5e-6a41-4a4b-9f3f-93b3a1f4c0de",
            "conversation_id": "c-1",
            "sender_type": "ai",
            "content": "Lead with impact.",
            "created_at": "2025-03-01T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(message.role, MessageRole::Assistant);
        assert_eq!(message.status, MessageStatus::Sent);
        assert_eq!(message.rating, None);
        assert_eq!(message.updated_at, None);
    }

    #[test]
    fn frontend_message_shape_deserializes() {
        let message: ChatMessage = serde_json::from_value(json!({
            "id": "m1",
            "conversationId": "c-1",
            "role": "user",
            "content": "How do I list skills?",
            "status": "delivered",
            "rating": 4,
            "createdAt": "2025-03-01T10:00:00Z",
            "updatedAt": "2025-03-01T10:00:05Z"
        }))
        .unwrap();

        assert_eq!(message.conversation_id, "c-1");
        assert_eq!(message.status, MessageStatus::Delivered);
        assert_eq!(message.rating.map(Rating::get), Some(4));
        assert!(message.revised_at() > message.created_at);
    }

    #[test]
    fn optimistic_message_is_temporary() {
        let message = ChatMessage::optimistic(None, "hello");

        assert!(message.is_temporary());
        assert_eq!(message.status, MessageStatus::Sending);
        assert_eq!(message.role, MessageRole::User);
        assert!(message.conversation_id.is_empty());
    }

    #[test]
    fn serializes_with_snake_case_names() {
        let message = ChatMessage::builder()
            .id("m1")
            .conversation_id("c1")
            .content("hi")
            .role(MessageRole::User)
            .build();

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["conversation_id"], "c1");
        assert_eq!(value["role"], "user");
        assert_eq!(value["status"], "sent");
        assert!(value.get("rating").is_none());
    }
}
