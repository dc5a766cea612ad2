//! Core data models for the gold investment agent

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::memory::ConversationLog;

//
// ================= Amounts =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AmountUnit {
    /// Rupees
    Currency,
    /// Grams
    Weight,
}

/// Quantity extracted from a free-form purchase request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParsedAmount {
    pub amount: Decimal,
    pub unit: AmountUnit,
}

impl ParsedAmount {
    pub fn currency(amount: Decimal) -> Self {
        Self {
            amount,
            unit: AmountUnit::Currency,
        }
    }

    pub fn weight(amount: Decimal) -> Self {
        Self {
            amount,
            unit: AmountUnit::Weight,
        }
    }
}

//
// ================= Prices =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceQuote {
    pub price_per_gram: Decimal,
    pub currency: String,
    pub source: String,
    pub last_updated: Option<String>,
}

//
// ================= Purchases =================
//

/// A quote awaiting contact details. The rate is locked when the quote is
/// issued and is never refreshed during confirmation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingPurchase {
    pub user_name: String,
    pub grams: Decimal,
    pub amount_currency: Decimal,
    pub price_per_gram: Decimal,
}

/// Validated contact details collected at confirmation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactDetails {
    pub phone: String,
    pub email: String,
}

/// Purchase row to be inserted by the store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewPurchase {
    pub user_name: String,
    pub phone: String,
    pub email: String,
    pub grams: Decimal,
    pub amount_currency: Decimal,
    pub price_per_gram: Decimal,
}

impl NewPurchase {
    pub fn from_pending(pending: &PendingPurchase, contact: &ContactDetails) -> Self {
        Self {
            user_name: pending.user_name.clone(),
            phone: contact.phone.clone(),
            email: contact.email.clone(),
            grams: pending.grams,
            amount_currency: pending.amount_currency,
            price_per_gram: pending.price_per_gram,
        }
    }
}

/// Persisted purchase, `created_at` assigned by the store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PurchaseRecord {
    pub id: i64,
    pub user_name: String,
    pub phone: String,
    pub email: String,
    pub grams: Decimal,
    pub amount_currency: Decimal,
    pub price_per_gram: Decimal,
    pub created_at: DateTime<Utc>,
}

//
// ================= Session =================
//

/// Conversation mode. `AwaitingAmount` and `AwaitingContact` together make up
/// the purchase mode; the pending quote only exists inside `AwaitingContact`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", content = "pending_purchase", rename_all = "snake_case")]
pub enum SessionMode {
    Advice,
    AwaitingAmount,
    AwaitingContact(PendingPurchase),
}

impl SessionMode {
    pub fn is_purchase(&self) -> bool {
        !matches!(self, SessionMode::Advice)
    }

    pub fn pending_purchase(&self) -> Option<&PendingPurchase> {
        match self {
            SessionMode::AwaitingContact(pending) => Some(pending),
            _ => None,
        }
    }

    /// Coarse state name exposed to API clients
    pub fn label(&self) -> &'static str {
        if self.is_purchase() {
            "purchase"
        } else {
            "investment"
        }
    }
}

impl Default for SessionMode {
    fn default() -> Self {
        SessionMode::Advice
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub user_identifier: String,
    pub user_name: String,
    pub mode: SessionMode,
    pub conversation_log: ConversationLog,
}

impl Session {
    pub fn new(user_identifier: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            user_identifier: user_identifier.into(),
            user_name: user_name.into(),
            mode: SessionMode::Advice,
            conversation_log: ConversationLog::new(),
        }
    }

    /// Session whose display name is the identifier itself
    pub fn for_user(user_identifier: impl Into<String>) -> Self {
        let user_identifier = user_identifier.into();
        Self::new(user_identifier.clone(), user_identifier)
    }

    pub fn pending_purchase(&self) -> Option<&PendingPurchase> {
        self.mode.pending_purchase()
    }
}

impl fmt::Display for AmountUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AmountUnit::Currency => "INR",
            AmountUnit::Weight => "grams",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionMode::Advice => "advice",
            SessionMode::AwaitingAmount => "awaiting_amount",
            SessionMode::AwaitingContact(_) => "awaiting_contact",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pending() -> PendingPurchase {
        PendingPurchase {
            user_name: "Asha".to_string(),
            grams: dec!(0.7692),
            amount_currency: dec!(5000),
            price_per_gram: dec!(6500.00),
        }
    }

    #[test]
    fn test_new_session_starts_in_advice() {
        let session = Session::for_user("asha-01");
        assert_eq!(session.user_name, "asha-01");
        assert_eq!(session.mode, SessionMode::Advice);
        assert!(session.pending_purchase().is_none());
        assert_eq!(session.mode.label(), "investment");
    }

    #[test]
    fn test_mode_labels() {
        assert_eq!(SessionMode::AwaitingAmount.label(), "purchase");
        assert_eq!(SessionMode::AwaitingContact(pending()).label(), "purchase");
        assert!(SessionMode::AwaitingAmount.pending_purchase().is_none());
        assert_eq!(
            SessionMode::AwaitingContact(pending()).pending_purchase(),
            Some(&pending())
        );
    }

    #[test]
    fn test_mode_serialization_is_tagged() {
        let json = serde_json::to_value(SessionMode::AwaitingContact(pending())).unwrap();
        assert_eq!(json["mode"], "awaiting_contact");
        assert_eq!(json["pending_purchase"]["user_name"], "Asha");

        let json = serde_json::to_value(SessionMode::Advice).unwrap();
        assert_eq!(json["mode"], "advice");
    }

    #[test]
    fn test_new_purchase_uses_locked_rate() {
        let contact = ContactDetails {
            phone: "9876543210".to_string(),
            email: "user@example.com".to_string(),
        };
        let row = NewPurchase::from_pending(&pending(), &contact);
        assert_eq!(row.price_per_gram, dec!(6500.00));
        assert_eq!(row.grams, dec!(0.7692));
        assert_eq!(row.phone, "9876543210");
    }
}
