//! Amount Parser
//!
//! Extracts a purchase quantity and its unit from free-form text, e.g.
//! "Buy gold worth 5000 rupees", "purchase 2 grams", "invest one thousand".
//!
//! Rules are tried in order and the first one that yields an amount wins:
//! 1. first digit-form number, unit taken from an adjacent marker
//! 2. same number without a marker: currency at or above the threshold,
//!    grams below it
//! 3. number words ("two thousand", "five lakh", "three hundred")
//!
//! This is a heuristic, not a grammar. Failing to parse is a normal outcome
//! and always ends in a re-prompt.

use crate::models::{AmountUnit, ParsedAmount};
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::str::FromStr;

/// Unit markers checked against the text adjacent to a number, in order
const UNIT_MARKERS: &[(&str, AmountUnit)] = &[
    ("rupee", AmountUnit::Currency),
    ("rs", AmountUnit::Currency),
    ("₹", AmountUnit::Currency),
    ("inr", AmountUnit::Currency),
    ("gram", AmountUnit::Weight),
    ("gm", AmountUnit::Weight),
    ("g", AmountUnit::Weight),
];

/// Values usable in front of "thousand", "lakh" and "crore"
const BASE_WORDS: &[(&str, u32)] = &[
    ("one", 1),
    ("two", 2),
    ("three", 3),
    ("four", 4),
    ("five", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("nine", 9),
    ("ten", 10),
    ("twenty", 20),
    ("thirty", 30),
    ("forty", 40),
    ("fifty", 50),
    ("hundred", 100),
];

/// Values usable in front of "hundred"
const SMALL_WORDS: &[&str] = &[
    "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
];

lazy_static! {
    static ref NUMERIC_AMOUNT: Regex = Regex::new(
        r"(?:(₹|\brs\.?|\binr)\s*)?([0-9]+(?:,[0-9]+)*(?:\.[0-9]+)?)\s*(rupees?\b|rs\b\.?|₹|inr\b|grams?\b|gms?\b|g\b)?"
    )
    .expect("numeric amount pattern is valid");

    /// Multiplier patterns in priority order
    static ref WORD_AMOUNTS: Vec<(Regex, Decimal)> = vec![
        (word_pattern("thousand"), dec!(1000)),
        (word_pattern("lakh"), dec!(100000)),
        (word_pattern("crore"), dec!(10000000)),
    ];

    static ref SMALL_WORD_AMOUNT: Regex = Regex::new(&format!(
        r"\b({})\s*(hundred|thousand|lakh|crore)\b",
        SMALL_WORDS.join("|")
    ))
    .expect("small word amount pattern is valid");
}

fn word_pattern(multiplier: &str) -> Regex {
    Regex::new(&format!(r"\b([a-z]+)\s*{}s?\b", multiplier))
        .expect("word amount pattern is valid")
}

fn multiplier_value(word: &str) -> Option<Decimal> {
    match word {
        "hundred" => Some(dec!(100)),
        "thousand" => Some(dec!(1000)),
        "lakh" => Some(dec!(100000)),
        "crore" => Some(dec!(10000000)),
        _ => None,
    }
}

fn base_value(word: &str) -> Option<Decimal> {
    BASE_WORDS
        .iter()
        .find(|(w, _)| *w == word)
        .map(|(_, value)| Decimal::from(*value))
}

fn small_value(word: &str) -> Option<Decimal> {
    SMALL_WORDS
        .iter()
        .position(|w| *w == word)
        .map(|index| Decimal::from(index as u32 + 1))
}

fn unit_for_marker(marker: &str) -> Option<AmountUnit> {
    UNIT_MARKERS
        .iter()
        .find(|(prefix, _)| marker.starts_with(prefix))
        .map(|(_, unit)| *unit)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmountParserConfig {
    /// Bare numbers at or above this value are read as rupees, below it as grams
    pub currency_threshold: Decimal,
}

impl Default for AmountParserConfig {
    fn default() -> Self {
        Self {
            currency_threshold: dec!(10),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AmountParser {
    config: AmountParserConfig,
}

impl AmountParser {
    pub fn new(config: AmountParserConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AmountParserConfig {
        &self.config
    }

    /// Parse an amount, or `None` when nothing usable is found
    pub fn parse(&self, text: &str) -> Option<ParsedAmount> {
        let message = text.to_lowercase();
        self.parse_numeric(&message)
            .or_else(|| parse_words(&message))
    }

    fn parse_numeric(&self, message: &str) -> Option<ParsedAmount> {
        let captures = NUMERIC_AMOUNT.captures(message)?;
        let raw = captures.get(2)?.as_str().replace(',', "");
        let amount = Decimal::from_str(&raw).ok()?.normalize();
        if amount <= Decimal::ZERO {
            return None;
        }

        let marked_unit = captures
            .get(3)
            .and_then(|m| unit_for_marker(m.as_str()))
            .or_else(|| captures.get(1).and_then(|m| unit_for_marker(m.as_str())));

        let unit = marked_unit.unwrap_or(if amount >= self.config.currency_threshold {
            AmountUnit::Currency
        } else {
            AmountUnit::Weight
        });

        Some(ParsedAmount { amount, unit })
    }
}

fn parse_words(message: &str) -> Option<ParsedAmount> {
    let amount = WORD_AMOUNTS
        .iter()
        .find_map(|(pattern, multiplier)| {
            pattern.captures_iter(message).find_map(|captures| {
                let base = base_value(captures.get(1)?.as_str())?;
                Some(base * *multiplier)
            })
        })
        .or_else(|| {
            let captures = SMALL_WORD_AMOUNT.captures(message)?;
            let base = small_value(captures.get(1)?.as_str())?;
            let multiplier = multiplier_value(captures.get(2)?.as_str())?;
            Some(base * multiplier)
        })?;

    let unit = if message.contains("gram") {
        AmountUnit::Weight
    } else {
        AmountUnit::Currency
    };

    Some(ParsedAmount { amount, unit })
}

/// Parse with the default bare-number threshold
pub fn parse_amount(text: &str) -> Option<ParsedAmount> {
    AmountParser::default().parse(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(text: &str) -> (Decimal, AmountUnit) {
        let result = parse_amount(text).unwrap_or_else(|| panic!("failed to parse {:?}", text));
        (result.amount, result.unit)
    }

    #[test]
    fn test_weight_markers() {
        let cases = vec![
            ("Purchase 2 grams", dec!(2)),
            ("Can I buy 0.5 gram?", dec!(0.5)),
            ("I want 15 g", dec!(15)),
            ("buy 3g of gold", dec!(3)),
            ("add 1.25 gms", dec!(1.25)),
        ];

        for (text, amount) in cases {
            assert_eq!(parsed(text), (amount, AmountUnit::Weight), "{}", text);
        }
    }

    #[test]
    fn test_currency_markers() {
        let cases = vec![
            ("I want to invest 5000 rupees", dec!(5000)),
            ("Buy gold worth 5 rupees", dec!(5)),
            ("invest 1 rupee", dec!(1)),
            ("200 rs please", dec!(200)),
            ("pay 7 Rs.", dec!(7)),
            ("750 INR", dec!(750)),
            ("3₹", dec!(3)),
        ];

        for (text, amount) in cases {
            assert_eq!(parsed(text), (amount, AmountUnit::Currency), "{}", text);
        }
    }

    #[test]
    fn test_leading_currency_marker() {
        assert_eq!(parsed("Buy gold worth ₹2500"), (dec!(2500), AmountUnit::Currency));
        assert_eq!(parsed("just ₹5"), (dec!(5), AmountUnit::Currency));
        assert_eq!(parsed("rs 8 only"), (dec!(8), AmountUnit::Currency));
    }

    #[test]
    fn test_bare_number_threshold() {
        assert_eq!(parsed("Invest 1000"), (dec!(1000), AmountUnit::Currency));
        assert_eq!(parsed("10"), (dec!(10), AmountUnit::Currency));
        assert_eq!(parsed("9.99"), (dec!(9.99), AmountUnit::Weight));
        assert_eq!(parsed("I'll take 2"), (dec!(2), AmountUnit::Weight));
    }

    #[test]
    fn test_configurable_threshold() {
        let parser = AmountParser::new(AmountParserConfig {
            currency_threshold: dec!(100),
        });
        assert_eq!(parser.parse("50").map(|p| p.unit), Some(AmountUnit::Weight));
        assert_eq!(parser.parse("100").map(|p| p.unit), Some(AmountUnit::Currency));
    }

    #[test]
    fn test_first_number_wins() {
        assert_eq!(parsed("2 grams or 5000 rupees"), (dec!(2), AmountUnit::Weight));
    }

    #[test]
    fn test_grouped_digits() {
        assert_eq!(parsed("invest 1,00,000 rupees"), (dec!(100000), AmountUnit::Currency));
        assert_eq!(parsed("5,000"), (dec!(5000), AmountUnit::Currency));
    }

    #[test]
    fn test_word_numbers() {
        assert_eq!(parsed("Invest one thousand rupees"), (dec!(1000), AmountUnit::Currency));
        assert_eq!(parsed("fifty thousand"), (dec!(50000), AmountUnit::Currency));
        assert_eq!(parsed("two lakh"), (dec!(200000), AmountUnit::Currency));
        assert_eq!(parsed("one crore"), (dec!(10000000), AmountUnit::Currency));
        assert_eq!(parsed("five hundred rupees"), (dec!(500), AmountUnit::Currency));
        assert_eq!(parsed("three hundred grams"), (dec!(300), AmountUnit::Weight));
    }

    #[test]
    fn test_unparseable() {
        assert!(parse_amount("I want to buy gold").is_none());
        assert!(parse_amount("some thousand").is_none());
        assert!(parse_amount("").is_none());
        assert!(parse_amount("0 grams").is_none());
    }

    #[test]
    fn test_unit_is_not_confused_by_words_starting_with_g() {
        assert_eq!(parsed("5 gold coins"), (dec!(5), AmountUnit::Weight));
        assert_eq!(parsed("5000 gold"), (dec!(5000), AmountUnit::Currency));
    }
}
