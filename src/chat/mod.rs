//! Consumer side of the realtime channel.
//!
//! [`MessageLog`] folds inbound envelopes into conversation history. [`ChatSession`] adds the
//! optimistic question flow on top of a [`ChatApi`] and a
//! [`ConnectionManager`](crate::ws::ConnectionManager).

pub mod log;
pub mod session;

pub use log::MessageLog;
pub use session::{
    ChatApi, ChatSession, Conversation, MAX_FEEDBACK_CHARS, MAX_QUESTION_CHARS, QuestionRequest,
    RatingRequest,
};
