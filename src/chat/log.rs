use crate::types::{ChatMessage, MessageStatus};
use crate::ws::{Envelope, EnvelopeKind};

/// Client-side view of one conversation: ordered history, typing indicator and a
/// dismissible error.
///
/// Messages are keyed by `id`. An envelope for a known id replaces that entry in place, so
/// history order is the order in which ids were first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageLog {
    messages: Vec<ChatMessage>,
    assistant_typing: bool,
    error: Option<String>,
}

impl MessageLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A log seeded with already persisted history, e.g. from a conversation fetch.
    #[must_use]
    pub fn with_history(history: Vec<ChatMessage>) -> Self {
        let mut log = Self::new();
        for message in history {
            log.upsert(message);
        }
        log
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    #[must_use]
    pub fn is_assistant_typing(&self) -> bool {
        self.assistant_typing
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn dismiss_error(&mut self) {
        self.error = None;
    }

    /// Applies an inbound envelope. Kinds other than `message`, `typing` and `error` are ignored.
    pub fn apply(&mut self, envelope: &Envelope) {
        match envelope.kind {
            EnvelopeKind::Message => {
                if let Some(message) = envelope.as_message() {
                    self.upsert(message.clone());
                    self.assistant_typing = false;
                }
            }
            EnvelopeKind::Typing => {
                if let Some(is_typing) = envelope.typing_state() {
                    self.assistant_typing = is_typing;
                }
            }
            EnvelopeKind::Error => {
                if let Some(error) = envelope.error_text() {
                    self.error = Some(error.to_owned());
                }
            }
            _ => {}
        }
    }

    /// Replaces the entry with the same id in place, or appends.
    pub fn upsert(&mut self, message: ChatMessage) {
        match self.position(&message.id) {
            Some(index) => self.messages[index] = message,
            None => self.messages.push(message),
        }
    }

    /// Appends a locally created message that has no canonical id yet.
    pub fn insert_optimistic(&mut self, message: ChatMessage) {
        debug_assert!(message.is_temporary(), "optimistic message needs a temporary id");
        self.messages.push(message);
    }

    /// Replaces the optimistic entry `temp_id` with its confirmed record.
    ///
    /// If the confirmed record already arrived over the socket, the newer revision of the two
    /// takes the optimistic entry's slot and the duplicate is removed. Without an optimistic
    /// entry this is a plain [`upsert`](Self::upsert).
    pub fn reconcile(&mut self, temp_id: &str, confirmed: ChatMessage) {
        let Some(slot) = self.position(temp_id) else {
            self.upsert(confirmed);
            return;
        };

        match self.position(&confirmed.id) {
            Some(existing) => {
                let arrived = self.messages.remove(existing);
                let slot = if existing < slot { slot - 1 } else { slot };
                self.messages[slot] = if arrived.revised_at() > confirmed.revised_at() {
                    arrived
                } else {
                    confirmed
                };
            }
            None => self.messages[slot] = confirmed,
        }
    }

    /// Marks the entry `id` as failed. Returns `false` if there is no such entry.
    pub fn mark_failed(&mut self, id: &str) -> bool {
        self.set_status(id, MessageStatus::Failed)
    }

    pub fn set_status(&mut self, id: &str, status: MessageStatus) -> bool {
        match self.position(id) {
            Some(index) => {
                self.messages[index].status = status;
                true
            }
            None => false,
        }
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }
}
