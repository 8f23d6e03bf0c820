use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Latest quote for one shop and one ordered currency pair.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Rate {
    pub id: i64,
    pub shop_id: i64,
    pub from_currency: String,
    pub to_currency: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub buy_rate: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub sell_rate: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// Ordered currency pair, codes normalized to uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub from: String,
    pub to: String,
}

impl CurrencyPair {
    pub fn new(from: &str, to: &str) -> Result<Self, AppError> {
        Ok(Self {
            from: normalize_currency(from)?,
            to: normalize_currency(to)?,
        })
    }
}

/// Currency codes are exactly three ASCII letters, compared in uppercase.
pub fn normalize_currency(code: &str) -> Result<String, AppError> {
    let trimmed = code.trim();
    if trimmed.len() != 3 || !trimmed.bytes().all(|b| b.is_ascii_alphabetic()) {
        return Err(AppError::validation(format!(
            "currency code must be 3 ASCII letters, got '{}'",
            trimmed
        )));
    }
    Ok(trimmed.to_ascii_uppercase())
}

/// Stored as NUMERIC(10, 4).
pub const RATE_SCALE: u32 = 4;
const RATE_LIMIT: i64 = 1_000_000;

/// Round to the stored scale the way Postgres does, then bound the magnitude.
fn normalize_rate(field: &str, rate: Decimal) -> Result<Decimal, AppError> {
    if rate.is_sign_negative() && !rate.is_zero() {
        return Err(AppError::validation(format!("{} must be non-negative", field)));
    }
    let rounded = rate.round_dp_with_strategy(RATE_SCALE, RoundingStrategy::MidpointAwayFromZero);
    if rounded >= Decimal::from(RATE_LIMIT) {
        return Err(AppError::validation(format!(
            "{} must be below {}",
            field, RATE_LIMIT
        )));
    }
    Ok(rounded.abs())
}

/// Upsert payload: overwrites any previous quote for the same shop and pair.
#[derive(Debug, Clone)]
pub struct RateQuote {
    pub shop_id: i64,
    pub pair: CurrencyPair,
    pub buy_rate: Decimal,
    pub sell_rate: Decimal,
}

impl RateQuote {
    pub fn new(
        shop_id: i64,
        pair: CurrencyPair,
        buy_rate: Decimal,
        sell_rate: Decimal,
    ) -> Result<Self, AppError> {
        Ok(Self {
            shop_id,
            pair,
            buy_rate: normalize_rate("buy_rate", buy_rate)?,
            sell_rate: normalize_rate("sell_rate", sell_rate)?,
        })
    }
}
