#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod auth;
pub mod chat;
pub mod error;
pub(crate) mod serde_helpers;
pub mod types;
pub mod ws;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Environment variable read by [`auth::EnvToken`] on every connection attempt.
pub const ACCESS_TOKEN_VAR: &str = "QA_CHAT_ACCESS_TOKEN";

/// Prefix of the temporary ids given to optimistic, not yet confirmed messages.
pub const TEMP_ID_PREFIX: &str = "temp-";
