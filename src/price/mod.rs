//! Gold price oracle
//!
//! The oracle never fails outward: any problem reaching the market-data
//! service resolves to a fixed fallback quote tagged with its own `source`.

use crate::config::PriceConfig;
use crate::error::GoldAgentError;
use crate::models::PriceQuote;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

pub const LIVE_SOURCE: &str = "API Ninjas:commodityprice";
pub const FALLBACK_SOURCE: &str = "Static Fallback";
pub const CURRENCY: &str = "INR";

/// Trait for current price-per-gram lookups
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn fetch_price(&self) -> PriceQuote;
}

fn timestamp_now() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M").to_string()
}

/// Oracle backed by the commodity price HTTP API
pub struct HttpPriceOracle {
    client: Client,
    api_url: Option<String>,
    api_key: Option<String>,
    fallback_price_per_gram: Decimal,
    quote_grams: Decimal,
}

impl HttpPriceOracle {
    pub fn new(config: &PriceConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            fallback_price_per_gram: config.fallback_price_per_gram,
            quote_grams: config.quote_grams,
        })
    }

    fn fallback(&self) -> PriceQuote {
        PriceQuote {
            price_per_gram: self.fallback_price_per_gram,
            currency: CURRENCY.to_string(),
            source: FALLBACK_SOURCE.to_string(),
            last_updated: Some(timestamp_now()),
        }
    }

    async fn fetch_live(&self) -> Result<PriceQuote> {
        let (Some(url), Some(key)) = (self.api_url.as_deref(), self.api_key.as_deref()) else {
            return Err(GoldAgentError::PriceError(
                "GOLDPRICE_API_URL or GOLDPRICE_API_KEY is not configured".to_string(),
            ));
        };

        let response = self
            .client
            .get(url)
            .header("X-Api-Key", key)
            .send()
            .await
            .map_err(|e| GoldAgentError::PriceError(format!("Gold price request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .json::<Value>()
            .await
            .map_err(|e| GoldAgentError::PriceError(format!("Invalid JSON response: {}", e)))?;

        if !status.is_success() {
            return Err(GoldAgentError::PriceError(format!(
                "Gold price API returned {}: {}",
                status, body
            )));
        }

        let quoted = extract_quoted_price(&body).ok_or_else(|| {
            GoldAgentError::PriceError(format!("Gold price not found in API response: {}", body))
        })?;

        let per_gram = price_per_gram(quoted, self.quote_grams).ok_or_else(|| {
            GoldAgentError::PriceError(format!(
                "Quoted price {} does not give a positive per-gram rate",
                quoted
            ))
        })?;

        Ok(PriceQuote {
            price_per_gram: per_gram,
            currency: CURRENCY.to_string(),
            source: LIVE_SOURCE.to_string(),
            last_updated: Some(timestamp_now()),
        })
    }
}

#[async_trait]
impl PriceOracle for HttpPriceOracle {
    async fn fetch_price(&self) -> PriceQuote {
        match self.fetch_live().await {
            Ok(quote) => {
                info!(price_per_gram = %quote.price_per_gram, source = %quote.source, "Fetched gold price");
                quote
            }
            Err(e) => {
                warn!("Gold price lookup failed, using static fallback: {}", e);
                self.fallback()
            }
        }
    }
}

/// Pull a positive `price` out of either `{"price": ..}` or `[{"price": ..}, ..]`
fn extract_quoted_price(body: &Value) -> Option<Decimal> {
    let raw = match body {
        Value::Object(_) => body.get("price")?,
        Value::Array(items) => items.first()?.get("price")?,
        _ => return None,
    };

    let price = match raw {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok()?,
        Value::String(s) => Decimal::from_str(s.trim()).ok()?,
        _ => return None,
    };

    (price > Decimal::ZERO).then_some(price)
}

/// Per-gram rate at two decimals; `None` unless the result is positive
fn price_per_gram(quoted: Decimal, quote_grams: Decimal) -> Option<Decimal> {
    let rate = quoted.checked_div(quote_grams)?.round_dp(2);
    (rate > Decimal::ZERO).then_some(rate)
}

/// Oracle returning a constant price (offline runs and tests)
pub struct FixedPriceOracle {
    quote: PriceQuote,
}

impl FixedPriceOracle {
    pub fn new(price_per_gram: Decimal) -> Self {
        Self {
            quote: PriceQuote {
                price_per_gram,
                currency: CURRENCY.to_string(),
                source: "Fixed".to_string(),
                last_updated: None,
            },
        }
    }

    pub fn with_quote(quote: PriceQuote) -> Self {
        Self { quote }
    }
}

#[async_trait]
impl PriceOracle for FixedPriceOracle {
    async fn fetch_price(&self) -> PriceQuote {
        self.quote.clone()
    }
}
