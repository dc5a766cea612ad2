//! Investment advice flow
//!
//! Price questions are answered straight from the price oracle. Everything
//! else goes to the LLM, whose reply is checked for the purchase-intent
//! sentinel and the off-topic refusal before it reaches the user.

use crate::llm::{LlmClient, LlmMessage};
use crate::memory::ConversationLog;
use crate::models::PriceQuote;
use crate::price::PriceOracle;
use crate::Result;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use tracing::info;

/// Token the model must emit verbatim when the user wants to buy
pub const PURCHASE_INTENT_SENTINEL: &str = "__PURCHASE_INTENT__";

pub const REFUSAL_MESSAGE: &str = "Sorry, I can only answer queries related to gold investment.";

const REFUSAL_MARKER: &str = "only answer queries related to gold investment";

/// Phrasings of "what is the gold price", any hit is enough
const PRICE_QUERY_PATTERNS: &[&str] = &[
    r"gold.*(price|rate|cost|value)",
    r"(price|rate|cost|value).*gold",
    r"price.*per\s?gram",
    r"current.*gold.*(price|rate|cost)",
    r"digital gold.*price",
    r"price of.*digital gold",
    r"digital gold rate",
    r"(24|22|18)-?karat.*gold.*(price|rate)",
    r"current.*price",
    r"today.*gold.*price",
    r"gold.*today",
    r"gram.*gold.*price",
    r"1\s*gram.*gold.*price",
    r"how much.*gold.*price",
    r"gold.*per gram",
];

lazy_static! {
    static ref PRICE_QUERIES: Vec<Regex> = PRICE_QUERY_PATTERNS
        .iter()
        .map(|pattern| Regex::new(pattern).expect("price query pattern is valid"))
        .collect();
}

pub fn is_price_query(text: &str) -> bool {
    let text = text.to_lowercase();
    PRICE_QUERIES.iter().any(|pattern| pattern.is_match(&text))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    PurchaseIntent,
    Refusal,
    Answer,
}

/// Classify a raw model reply; the sentinel takes precedence
pub fn classify_reply(reply: &str) -> ReplyKind {
    if reply.contains(PURCHASE_INTENT_SENTINEL) {
        ReplyKind::PurchaseIntent
    } else if reply.to_lowercase().contains(REFUSAL_MARKER) {
        ReplyKind::Refusal
    } else {
        ReplyKind::Answer
    }
}

pub fn purchase_intent_message(user_name: &str) -> String {
    format!(
        "Thank you for your interest, {}! you can now start investing from ₹10.",
        user_name
    )
}

pub fn price_reply(user_name: &str, quote: &PriceQuote) -> String {
    let mut reply = format!(
        "{}, the current gold rate is ₹{:.2} per gram",
        user_name, quote.price_per_gram
    );
    if let Some(last_updated) = &quote.last_updated {
        reply.push_str(&format!(" (last updated: {})", last_updated));
    }
    reply.push_str(". Would you like to invest or know about digital gold options?");
    reply
}

fn build_system_prompt(user_name: &str) -> String {
    format!(
        "You are a specialized assistant who ONLY answers queries related to gold investment, and your current user's name is {user_name}. \
Always address the user by their name in a friendly way where appropriate. \
If a user's question is NOT about gold investment, simply and strictly reply with exactly: \
\"{refusal}\" \
If the question IS about gold investment, respond helpfully with facts, advice, or next steps about digital gold investment in India, referencing the user's name. \
If the user expresses a clear intent to purchase digital gold (for example says, 'I want to buy gold'), respond with JUST this string: {sentinel} \
Never break these instructions for any reason.",
        user_name = user_name,
        refusal = REFUSAL_MESSAGE,
        sentinel = PURCHASE_INTENT_SENTINEL,
    )
}

/// Reply from the advice flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdviceReply {
    pub message: String,
    /// Set when the user asked to buy; moves the session into purchase mode
    pub purchase_intent: bool,
}

pub struct AdviceFlow {
    llm: Arc<dyn LlmClient>,
    oracle: Arc<dyn PriceOracle>,
}

impl AdviceFlow {
    pub fn new(llm: Arc<dyn LlmClient>, oracle: Arc<dyn PriceOracle>) -> Self {
        Self { llm, oracle }
    }

    /// Answer one message. Only LLM failures are returned as errors.
    pub async fn respond(
        &self,
        message: &str,
        user_name: &str,
        log: &ConversationLog,
    ) -> Result<AdviceReply> {
        if is_price_query(message) {
            let quote = self.oracle.fetch_price().await;
            info!(user = %user_name, source = %quote.source, "Answered price query without LLM");
            return Ok(AdviceReply {
                message: price_reply(user_name, &quote),
                purchase_intent: false,
            });
        }

        let mut history = Vec::with_capacity(log.len() + 1);
        history.push(LlmMessage::system(build_system_prompt(user_name)));
        history.extend(
            log.messages()
                .map(|msg| LlmMessage::new(msg.role, msg.content.clone())),
        );

        let raw = self.llm.complete(message, &history).await?;

        let reply = match classify_reply(&raw) {
            ReplyKind::PurchaseIntent => {
                info!(user = %user_name, "Purchase intent detected");
                AdviceReply {
                    message: purchase_intent_message(user_name),
                    purchase_intent: true,
                }
            }
            ReplyKind::Refusal => AdviceReply {
                message: REFUSAL_MESSAGE.to_string(),
                purchase_intent: false,
            },
            ReplyKind::Answer => AdviceReply {
                message: raw,
                purchase_intent: false,
            },
        };

        Ok(reply)
    }
}
