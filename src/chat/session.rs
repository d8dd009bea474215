use async_trait::async_trait;
use bon::Builder;
use serde::{Deserialize, Serialize};

use super::log::MessageLog;
use crate::Result;
use crate::error::Error;
use crate::types::{ChatMessage, MessageRole, MessageStatus, Rating};
use crate::ws::{ConnectionManager, Envelope};

/// Longest accepted question, in characters, after trimming.
pub const MAX_QUESTION_CHARS: usize = 5000;

/// Longest accepted rating feedback, in characters.
pub const MAX_FEEDBACK_CHARS: usize = 1000;

/// Body of an ask-question call.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionRequest {
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl QuestionRequest {
    /// Trims `question` and checks it is non-empty and at most [`MAX_QUESTION_CHARS`] long.
    pub fn new(question: &str, conversation_id: Option<String>) -> Result<Self> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::validation("question must not be empty"));
        }
        let length = question.chars().count();
        if length > MAX_QUESTION_CHARS {
            return Err(Error::validation(format!(
                "question is {length} characters, the limit is {MAX_QUESTION_CHARS}"
            )));
        }

        Ok(Self {
            question: question.to_owned(),
            conversation_id,
        })
    }
}

/// Body of a rate-message call.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RatingRequest {
    pub rating: Rating,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_text: Option<String>,
}

impl RatingRequest {
    pub fn new(rating: Rating, feedback_text: Option<String>) -> Result<Self> {
        if let Some(feedback) = &feedback_text {
            let length = feedback.chars().count();
            if length > MAX_FEEDBACK_CHARS {
                return Err(Error::validation(format!(
                    "feedback is {length} characters, the limit is {MAX_FEEDBACK_CHARS}"
                )));
            }
        }

        Ok(Self {
            rating,
            feedback_text,
        })
    }
}

/// A conversation as returned by the HTTP API, oldest message first.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct Conversation {
    #[serde(alias = "conversation_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    #[builder(default)]
    pub messages: Vec<ChatMessage>,
}

/// HTTP surface used by [`ChatSession`].
///
/// The connection manager never calls this; it only carries the realtime channel.
#[async_trait]
pub trait ChatApi: Send + Sync + 'static {
    /// Submits a question. The returned conversation contains the persisted question and any
    /// answer produced synchronously.
    async fn ask_question(&self, request: &QuestionRequest) -> Result<Conversation>;

    async fn rate_message(&self, message_id: &str, request: &RatingRequest) -> Result<()>;
}

/// One conversation: local history kept in sync with the HTTP API and the realtime channel.
///
/// Questions are inserted optimistically, submitted over HTTP, then replaced by the confirmed
/// record (or marked failed in place) and forwarded over the socket.
#[derive(Debug)]
pub struct ChatSession<A> {
    api: A,
    connection: ConnectionManager,
    log: MessageLog,
    conversation_id: Option<String>,
}

impl<A: ChatApi> ChatSession<A> {
    /// A session that starts a new conversation with the first question.
    pub fn new(api: A, connection: ConnectionManager) -> Self {
        Self {
            api,
            connection,
            log: MessageLog::new(),
            conversation_id: None,
        }
    }

    /// A session continuing `conversation`, seeded with its history.
    pub fn resume(api: A, connection: ConnectionManager, conversation: Conversation) -> Self {
        Self {
            api,
            connection,
            log: MessageLog::with_history(conversation.messages),
            conversation_id: Some(conversation.id),
        }
    }

    #[must_use]
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    #[must_use]
    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    #[must_use]
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn dismiss_error(&mut self) {
        self.log.dismiss_error();
    }

    /// Applies an inbound envelope unless it is addressed to another conversation.
    pub fn apply(&mut self, envelope: &Envelope) {
        if self.belongs_here(envelope) {
            self.log.apply(envelope);
        }
    }

    /// Asks `question`, returning the confirmed user message.
    ///
    /// Validation failures are returned before anything is inserted. If the HTTP call fails,
    /// the optimistic message stays in the log marked [`MessageStatus::Failed`] and the error is
    /// returned.
    pub async fn ask(&mut self, question: &str) -> Result<ChatMessage> {
        let request = QuestionRequest::new(question, self.conversation_id.clone())?;

        let optimistic =
            ChatMessage::optimistic(self.conversation_id.clone(), request.question.clone());
        let temp_id = optimistic.id.clone();
        self.log.insert_optimistic(optimistic);

        self.submit(&temp_id, &request).await
    }

    /// Resubmits a failed user message in place.
    pub async fn retry(&mut self, id: &str) -> Result<ChatMessage> {
        let message = self
            .log
            .get(id)
            .ok_or_else(|| Error::validation(format!("no message with id {id}")))?;
        if message.role != MessageRole::User || message.status != MessageStatus::Failed {
            return Err(Error::validation(format!(
                "message {id} is not a failed user message"
            )));
        }

        let request = QuestionRequest::new(&message.content, self.conversation_id.clone())?;
        self.log.set_status(id, MessageStatus::Sending);

        self.submit(id, &request).await
    }

    /// Rates a confirmed message and records the rating locally.
    pub async fn rate(
        &mut self,
        message_id: &str,
        rating: Rating,
        feedback_text: Option<String>,
    ) -> Result<()> {
        match self.log.get(message_id) {
            Some(message) if message.is_temporary() => {
                return Err(Error::validation(format!(
                    "message {message_id} is not confirmed yet"
                )));
            }
            Some(_) => {}
            None => return Err(Error::validation(format!("no message with id {message_id}"))),
        }

        let request = RatingRequest::new(rating, feedback_text)?;
        self.api.rate_message(message_id, &request).await?;

        if let Some(message) = self.log.get_mut(message_id) {
            message.rating = Some(rating);
        }
        Ok(())
    }

    /// Sends the user's typing indicator. Returns `false` when not connected.
    pub fn set_typing(&self, is_typing: bool) -> bool {
        self.connection
            .send(&Envelope::typing(self.conversation_id.clone(), is_typing))
    }

    async fn submit(&mut self, temp_id: &str, request: &QuestionRequest) -> Result<ChatMessage> {
        let conversation = match self.api.ask_question(request).await {
            Ok(conversation) => conversation,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Question submission failed");
                self.log.mark_failed(temp_id);
                return Err(e);
            }
        };

        self.conversation_id = Some(conversation.id.clone());

        let position = conversation
            .messages
            .iter()
            .rposition(|m| m.role == MessageRole::User && m.content == request.question);
        let Some(position) = position else {
            // The backend persisted the question without echoing it back.
            let message = self
                .log
                .get_mut(temp_id)
                .ok_or_else(|| Error::validation(format!("no message with id {temp_id}")))?;
            message.status = MessageStatus::Sent;
            message.conversation_id.clone_from(&conversation.id);
            return Ok(message.clone());
        };

        let mut messages = conversation.messages.into_iter().skip(position);
        let Some(confirmed) = messages.next() else {
            return Err(Error::validation("conversation has no confirmed question"));
        };
        self.log.reconcile(temp_id, confirmed.clone());
        for later in messages {
            self.log.upsert(later);
        }

        if !self.connection.send(&Envelope::message(confirmed.clone())) {
            #[cfg(feature = "tracing")]
            tracing::debug!(id = %confirmed.id, "Not connected, confirmed message not forwarded");
        }

        Ok(confirmed)
    }

    fn belongs_here(&self, envelope: &Envelope) -> bool {
        let Some(current) = self.conversation_id.as_deref() else {
            return true;
        };

        let target = envelope
            .as_message()
            .map(|m| m.conversation_id.as_str())
            .or(envelope.payload.conversation_id.as_deref());
        target.is_none_or(|target| target.is_empty() || target == current)
    }
}
