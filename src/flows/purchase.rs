//! Purchase flow
//!
//! Two stages:
//! 1. parse an amount, lock the current rate, quote grams/rupees and ask for
//!    contact details
//! 2. validate phone + email and persist the purchase at the locked rate
//!
//! Parse and validation problems never become errors; they come back as
//! re-prompt steps so the conversation can continue.

use crate::amount_parser::AmountParser;
use crate::models::{
    AmountUnit, ContactDetails, NewPurchase, ParsedAmount, PendingPurchase, PurchaseRecord,
    SessionMode,
};
use crate::price::PriceOracle;
use crate::storage::PurchaseStore;
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const CONTACT_REPROMPT: &str = "Please provide a valid 10-digit phone number and a valid email address (e.g. 9876543210 your@email.com).";

const EMAIL_TRIM_CHARS: &[char] = &[',', ';', ':', '(', ')', '<', '>', '"', '\'', '.', '!', '?'];

lazy_static! {
    static ref DIGIT_RUN: Regex = Regex::new(r"[0-9]+").expect("digit run pattern is valid");
    static ref INDIAN_MOBILE: Regex =
        Regex::new(r"^[6-9][0-9]{9}$").expect("mobile pattern is valid");
    static ref EMAIL_SHAPE: Regex =
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid");
}

/// Outcome of one purchase-flow turn
#[derive(Debug, Clone, PartialEq)]
pub enum PurchaseStep {
    /// No amount could be parsed
    NeedsAmount { message: String },
    /// Quote issued, waiting for contact details
    Quoted {
        message: String,
        pending: PendingPurchase,
    },
    /// Contact details missing or invalid, quote unchanged
    NeedsContact {
        message: String,
        pending: PendingPurchase,
    },
    /// Purchase persisted
    Confirmed {
        message: String,
        record: PurchaseRecord,
    },
    /// Persisting failed; `pending` is kept when the quote is still offered
    Failed {
        message: String,
        pending: Option<PendingPurchase>,
    },
}

impl PurchaseStep {
    pub fn message(&self) -> &str {
        match self {
            PurchaseStep::NeedsAmount { message }
            | PurchaseStep::Quoted { message, .. }
            | PurchaseStep::NeedsContact { message, .. }
            | PurchaseStep::Confirmed { message, .. }
            | PurchaseStep::Failed { message, .. } => message,
        }
    }

    /// Only a persisted purchase counts as success
    pub fn success(&self) -> bool {
        matches!(self, PurchaseStep::Confirmed { .. })
    }

    pub fn pending_purchase(&self) -> Option<&PendingPurchase> {
        match self {
            PurchaseStep::Quoted { pending, .. } | PurchaseStep::NeedsContact { pending, .. } => {
                Some(pending)
            }
            PurchaseStep::Failed { pending, .. } => pending.as_ref(),
            _ => None,
        }
    }

    /// Session mode after this step
    pub fn next_mode(&self) -> SessionMode {
        match self {
            PurchaseStep::Confirmed { .. } => SessionMode::Advice,
            _ => match self.pending_purchase() {
                Some(pending) => SessionMode::AwaitingContact(pending.clone()),
                None => SessionMode::AwaitingAmount,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactProblem {
    /// Phone or email not found
    Missing,
    /// Ten digits found but not an Indian mobile number
    InvalidPhone,
}

/// Grams and rupees for a parsed amount at the given rate, `None` when the
/// arithmetic overflows or the rate is not positive
pub fn quote_amounts(parsed: &ParsedAmount, price_per_gram: Decimal) -> Option<(Decimal, Decimal)> {
    if price_per_gram <= Decimal::ZERO {
        return None;
    }
    match parsed.unit {
        AmountUnit::Currency => Some((
            parsed.amount.checked_div(price_per_gram)?.round_dp(4),
            parsed.amount,
        )),
        AmountUnit::Weight => Some((
            parsed.amount,
            parsed.amount.checked_mul(price_per_gram)?.round_dp(2),
        )),
    }
}

fn usage_hint(user_name: &str) -> String {
    format!(
        "{}, to purchase digital gold, please tell me the amount (in rupees) or grams you want to buy, e.g. 'Buy gold worth 1000' or 'I want 2 grams.'",
        user_name
    )
}

/// First maximal run of exactly ten digits
pub fn extract_phone(text: &str) -> Option<&str> {
    DIGIT_RUN
        .find_iter(text)
        .map(|m| m.as_str())
        .find(|run| run.len() == 10)
}

/// First whitespace-separated token shaped like `local@domain.tld`
pub fn extract_email(text: &str) -> Option<&str> {
    text.split_whitespace()
        .map(|token| token.trim_matches(EMAIL_TRIM_CHARS))
        .find(|token| is_valid_email(token))
}

pub fn is_valid_phone(phone: &str) -> bool {
    INDIAN_MOBILE.is_match(phone)
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_SHAPE.is_match(email)
}

pub fn parse_contact(text: &str) -> std::result::Result<ContactDetails, ContactProblem> {
    let (Some(phone), Some(email)) = (extract_phone(text), extract_email(text)) else {
        return Err(ContactProblem::Missing);
    };

    if !is_valid_phone(phone) {
        return Err(ContactProblem::InvalidPhone);
    }

    Ok(ContactDetails {
        phone: phone.to_string(),
        email: email.to_string(),
    })
}

fn mask_phone(phone: &str) -> String {
    let visible = phone.len().saturating_sub(4);
    format!("{}{}", "*".repeat(visible), &phone[visible..])
}

pub struct PurchaseFlow {
    parser: AmountParser,
    oracle: Arc<dyn PriceOracle>,
    store: Arc<dyn PurchaseStore>,
    retain_pending_on_storage_failure: bool,
}

impl PurchaseFlow {
    pub fn new(
        parser: AmountParser,
        oracle: Arc<dyn PriceOracle>,
        store: Arc<dyn PurchaseStore>,
    ) -> Self {
        Self {
            parser,
            oracle,
            store,
            retain_pending_on_storage_failure: true,
        }
    }

    /// Whether a failed insert keeps the quote open for another attempt
    pub fn retain_pending_on_storage_failure(mut self, retain: bool) -> Self {
        self.retain_pending_on_storage_failure = retain;
        self
    }

    /// Run one turn: confirm when a quote is pending, otherwise quote
    pub async fn handle(
        &self,
        message: &str,
        user_name: &str,
        pending: Option<&PendingPurchase>,
    ) -> PurchaseStep {
        match pending {
            Some(pending) => self.confirm(message, pending).await,
            None => self.quote(message, user_name).await,
        }
    }

    pub async fn quote(&self, message: &str, user_name: &str) -> PurchaseStep {
        let Some(parsed) = self.parser.parse(message) else {
            info!(user = %user_name, "No purchase amount found, asking again");
            return PurchaseStep::NeedsAmount {
                message: usage_hint(user_name),
            };
        };

        let price = self.oracle.fetch_price().await;
        let Some((grams, amount_currency)) = quote_amounts(&parsed, price.price_per_gram) else {
            warn!(user = %user_name, amount = %parsed.amount, "Amount out of range, asking again");
            return PurchaseStep::NeedsAmount {
                message: usage_hint(user_name),
            };
        };

        if grams <= Decimal::ZERO || amount_currency <= Decimal::ZERO {
            info!(user = %user_name, amount = %parsed.amount, "Amount below the smallest quotable unit");
            return PurchaseStep::NeedsAmount {
                message: format!(
                    "{}, that amount is too small to buy any gold at ₹{:.2}/gram. Please enter a larger amount, e.g. 'Buy gold worth 10' or 'I want 0.01 grams.'",
                    user_name, price.price_per_gram
                ),
            };
        }

        let pending = PendingPurchase {
            user_name: user_name.to_string(),
            grams,
            amount_currency,
            price_per_gram: price.price_per_gram,
        };

        info!(
            user = %user_name,
            unit = %parsed.unit,
            grams = %pending.grams,
            amount = %pending.amount_currency,
            rate = %pending.price_per_gram,
            source = %price.source,
            "Quote issued"
        );

        PurchaseStep::Quoted {
            message: format!(
                "You're about to purchase {} grams of gold for ₹{:.2} (rate: ₹{:.2}/gram).\nPlease provide your 10-digit phone number and email address to confirm the purchase.",
                pending.grams.normalize(),
                pending.amount_currency,
                pending.price_per_gram
            ),
            pending,
        }
    }

    pub async fn confirm(&self, message: &str, pending: &PendingPurchase) -> PurchaseStep {
        let contact = match parse_contact(message) {
            Ok(contact) => contact,
            Err(problem) => {
                info!(user = %pending.user_name, ?problem, "Contact details rejected");
                let message = match problem {
                    ContactProblem::Missing => CONTACT_REPROMPT.to_string(),
                    ContactProblem::InvalidPhone => format!(
                        "Mobile numbers must start with 6, 7, 8 or 9. {}",
                        CONTACT_REPROMPT
                    ),
                };
                return PurchaseStep::NeedsContact {
                    message,
                    pending: pending.clone(),
                };
            }
        };

        let purchase = NewPurchase::from_pending(pending, &contact);

        match self.store.insert_purchase(purchase).await {
            Ok(record) => {
                info!(
                    user = %record.user_name,
                    purchase_id = record.id,
                    phone = %mask_phone(&record.phone),
                    "Purchase recorded"
                );
                PurchaseStep::Confirmed {
                    message: format!(
                        "Congratulations {}, your purchase was successful!\nYou bought {} grams of gold for ₹{:.2} (rate: ₹{:.2}/gram).\nTransaction time: {}\nContact: {}, Email: {}",
                        record.user_name,
                        record.grams.normalize(),
                        record.amount_currency,
                        record.price_per_gram,
                        record.created_at.format("%Y-%m-%d %H:%M:%S"),
                        record.phone,
                        record.email
                    ),
                    record,
                }
            }
            Err(e) => {
                error!(user = %pending.user_name, "Failed to record purchase: {}", e);
                if !self.retain_pending_on_storage_failure {
                    warn!(user = %pending.user_name, "Dropping pending purchase after storage failure");
                }
                PurchaseStep::Failed {
                    message: format!("Purchase calculated but failed to record in DB. Error: {}", e),
                    pending: self
                        .retain_pending_on_storage_failure
                        .then(|| pending.clone()),
                }
            }
        }
    }
}
