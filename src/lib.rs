//! Gold Investment Agent
//!
//! A conversational agent for digital gold that:
//! - Answers gold-investment questions through an LLM, refusing anything else
//! - Answers price questions straight from a market-data oracle
//! - Walks the user through a two-stage purchase at a locked-in rate
//! - Persists confirmed purchases
//!
//! TURN LOOP:
//! MESSAGE → SESSION MODE → ADVICE | PURCHASE → REPLY + NEXT MODE

pub mod amount_parser;
pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod flows;
pub mod llm;
pub mod memory;
pub mod models;
pub mod price;
pub mod session;
pub mod storage;

pub use error::Result;

// Re-export common types
pub use amount_parser::{parse_amount, AmountParser, AmountParserConfig};
pub use controller::{SessionController, TurnOutcome};
pub use models::*;
