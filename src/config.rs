//! Runtime configuration
//!
//! Everything is read from the process environment. Binaries load `.env`
//! first via `dotenv`, so a local `.env` file works the same way.

use crate::amount_parser::AmountParserConfig;
use crate::error::GoldAgentError;
use crate::Result;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_LLM_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_LLM_MODEL: &str = "meta-llama/llama-3.1-8b-instruct";

/// Price used when the market-data service cannot be reached.
pub const FALLBACK_PRICE_PER_GRAM: Decimal = dec!(6500.00);

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct PriceConfig {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub fallback_price_per_gram: Decimal,
    /// Grams covered by one upstream quote (the commodity feed quotes per 10 g)
    pub quote_grams: Decimal,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub llm: LlmConfig,
    pub price: PriceConfig,
    pub amount_parser: AmountParserConfig,
    pub retain_pending_on_storage_failure: bool,
    pub session_idle_timeout: Option<Duration>,
    pub database_url: Option<String>,
    pub port: u16,
}

impl AgentConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup (used by tests)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let llm = LlmConfig {
            api_url: get("OPENROUTER_API_URL").unwrap_or_else(|| DEFAULT_LLM_API_URL.to_string()),
            api_key: get("OPENROUTER_API_KEY"),
            model: get("LLAMA_MODEL_ID").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            timeout: Duration::from_secs(parse_or("LLM_TIMEOUT_SECS", get("LLM_TIMEOUT_SECS"), 30)?),
            temperature: 0.2,
            max_tokens: 1024,
        };

        let price = PriceConfig {
            api_url: get("GOLDPRICE_API_URL"),
            api_key: get("GOLDPRICE_API_KEY"),
            timeout: Duration::from_secs(parse_or(
                "GOLDPRICE_TIMEOUT_SECS",
                get("GOLDPRICE_TIMEOUT_SECS"),
                10,
            )?),
            fallback_price_per_gram: parse_positive_decimal(
                "GOLD_FALLBACK_PRICE_PER_GRAM",
                get("GOLD_FALLBACK_PRICE_PER_GRAM"),
                FALLBACK_PRICE_PER_GRAM,
            )?,
            quote_grams: parse_positive_decimal(
                "GOLDPRICE_QUOTE_GRAMS",
                get("GOLDPRICE_QUOTE_GRAMS"),
                dec!(10),
            )?,
        };

        let amount_parser = AmountParserConfig {
            currency_threshold: parse_positive_decimal(
                "BARE_NUMBER_CURRENCY_THRESHOLD",
                get("BARE_NUMBER_CURRENCY_THRESHOLD"),
                AmountParserConfig::default().currency_threshold,
            )?,
        };

        let retain_pending_on_storage_failure = match get("RETAIN_PENDING_ON_STORAGE_FAILURE") {
            None => true,
            Some(raw) => parse_bool("RETAIN_PENDING_ON_STORAGE_FAILURE", &raw)?,
        };

        let session_idle_timeout = match get("SESSION_IDLE_TIMEOUT_SECS") {
            None => None,
            Some(raw) => Some(Duration::from_secs(parse_or(
                "SESSION_IDLE_TIMEOUT_SECS",
                Some(raw),
                0,
            )?)),
        };

        let database_url = get("POSTGRES_URL").or_else(|| get("DATABASE_URL"));

        let port = parse_or("PORT", get("PORT").or_else(|| get("API_PORT")), 8080u16)?;

        Ok(Self {
            llm,
            price,
            amount_parser,
            retain_pending_on_storage_failure,
            session_idle_timeout,
            database_url,
            port,
        })
    }
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T> {
    match raw {
        None => Ok(default),
        Some(value) => value.parse::<T>().map_err(|_| {
            GoldAgentError::ConfigError(format!("{} has an invalid value: {}", key, value))
        }),
    }
}

fn parse_positive_decimal(key: &str, raw: Option<String>, default: Decimal) -> Result<Decimal> {
    let value = parse_or(key, raw, default)?;
    if value <= Decimal::ZERO {
        return Err(GoldAgentError::ConfigError(format!(
            "{} must be positive, got {}",
            key, value
        )));
    }
    Ok(value)
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(GoldAgentError::ConfigError(format!(
            "{} must be a boolean, got {}",
            key, raw
        ))),
    }
}
