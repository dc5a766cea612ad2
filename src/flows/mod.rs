//! Conversation flows: investment advice and the two-stage purchase

pub mod advice;
pub mod purchase;

pub use advice::{AdviceFlow, AdviceReply};
pub use purchase::{PurchaseFlow, PurchaseStep};
