use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Converted amounts are stored at cent precision.
pub const CONVERTED_SCALE: u32 = 2;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("no exchange rate available from {from} to {to}")]
    RateUnavailable { from: String, to: String },
    #[error("currency service unavailable: {0}")]
    ServiceUnavailable(String),
}

#[async_trait]
pub trait CurrencyConverter: Send + Sync {
    async fn convert(&self, amount: Decimal, from: &str, to: &str)
        -> Result<Decimal, ConversionError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRate {
    pub from: String,
    pub to: String,
    pub rate: Decimal,
}

/// Converter backed by a fixed rate table. Reverse pairs are derived from the
/// inverse of a configured rate when no explicit entry exists.
#[derive(Clone, Debug, Default)]
pub struct StaticRateConverter {
    rates: HashMap<(String, String), Decimal>,
}

impl StaticRateConverter {
    pub fn new(rates: Vec<ExchangeRate>) -> Self {
        let rates = rates
            .into_iter()
            .filter(|rate| rate.rate > Decimal::ZERO)
            .map(|rate| ((normalize_code(&rate.from), normalize_code(&rate.to)), rate.rate))
            .collect();
        Self { rates }
    }

    pub fn rate(&self, from: &str, to: &str) -> Option<Decimal> {
        let from = normalize_code(from);
        let to = normalize_code(to);
        if from == to {
            return Some(Decimal::ONE);
        }

        if let Some(rate) = self.rates.get(&(from.clone(), to.clone())) {
            return Some(*rate);
        }

        self.rates.get(&(to, from)).and_then(|inverse| Decimal::ONE.checked_div(*inverse))
    }
}

#[async_trait]
impl CurrencyConverter for StaticRateConverter {
    async fn convert(
        &self,
        amount: Decimal,
        from: &str,
        to: &str,
    ) -> Result<Decimal, ConversionError> {
        let rate = self.rate(from, to).ok_or_else(|| ConversionError::RateUnavailable {
            from: normalize_code(from),
            to: normalize_code(to),
        })?;

        amount
            .checked_mul(rate)
            .map(|converted| converted.round_dp(CONVERTED_SCALE))
            .ok_or_else(|| ConversionError::ServiceUnavailable("conversion overflowed".to_string()))
    }
}

/// Renders an amount with its currency symbol and thousands separators, e.g. `$1,234.50`.
pub fn format_amount(amount: Decimal, currency: &str) -> String {
    let code = normalize_code(currency);
    let symbol = match code.as_str() {
        "USD" => "$".to_string(),
        "EUR" => "€".to_string(),
        "GBP" => "£".to_string(),
        "JPY" | "CNY" => "¥".to_string(),
        "CAD" => "C$".to_string(),
        "AUD" => "A$".to_string(),
        "INR" => "₹".to_string(),
        "CHF" => "CHF".to_string(),
        _ => format!("{code} "),
    };

    let rounded = amount.round_dp(CONVERTED_SCALE);
    let sign = if rounded.is_sign_negative() && !rounded.is_zero() { "-" } else { "" };
    let plain = format!("{:.2}", rounded.abs());
    let (whole, fraction) = plain.split_once('.').unwrap_or((plain.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (index, digit) in whole.chars().enumerate() {
        if index > 0 && (whole.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    format!("{sign}{symbol}{grouped}.{fraction}")
}

fn normalize_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}
