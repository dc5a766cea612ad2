//! Conversation memory
//!
//! Each session keeps an append-only log of role/text pairs which is handed
//! to the LLM as context on every advice turn.

pub mod store;

pub use store::{ConversationLog, ConversationMessage, MessageRole};
