// Amount helpers: currency codes and decimal <-> minor unit conversion

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount must be greater than zero")]
    NotPositive,
    #[error("amount {amount} has more than {exponent} decimal places for {currency}")]
    TooPrecise {
        amount: Decimal,
        currency: String,
        exponent: u32,
    },
    #[error("amount {0} does not fit in minor units")]
    Overflow(Decimal),
    #[error("currency must be a 3-letter code, got {0:?}")]
    InvalidCurrency(String),
}

// ISO 4217 currencies without a subunit, as Stripe treats them.
const ZERO_DECIMAL: &[&str] = &[
    "BIF", "CLP", "DJF", "GNF", "JPY", "KMF", "KRW", "MGA", "PYG", "RWF", "UGX", "VND", "VUV",
    "XAF", "XOF", "XPF",
];

const THREE_DECIMAL: &[&str] = &["BHD", "JOD", "KWD", "OMR", "TND"];

/// Number of decimal places of the currency's minor unit (2 unless listed).
pub fn subunit_exponent(currency: &str) -> u32 {
    let code = currency.to_ascii_uppercase();
    if ZERO_DECIMAL.contains(&code.as_str()) {
        0
    } else if THREE_DECIMAL.contains(&code.as_str()) {
        3
    } else {
        2
    }
}

/// Normalizes a currency code to upper case, rejecting anything that is not 3 ASCII letters.
pub fn normalize_currency(currency: &str) -> Result<String, AmountError> {
    let trimmed = currency.trim();
    if trimmed.len() != 3 || !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AmountError::InvalidCurrency(currency.to_string()));
    }
    Ok(trimmed.to_ascii_uppercase())
}

/// Positive and exactly representable in the currency's minor units.
pub fn validate_amount(amount: Decimal, currency: &str) -> Result<(), AmountError> {
    if amount <= Decimal::ZERO {
        return Err(AmountError::NotPositive);
    }
    let exponent = subunit_exponent(currency);
    if amount.normalize().scale() > exponent {
        return Err(AmountError::TooPrecise {
            amount,
            currency: currency.to_ascii_uppercase(),
            exponent,
        });
    }
    Ok(())
}

/// `round(amount * 10^exponent)` as an integer count of minor units.
pub fn to_minor_units(amount: Decimal, currency: &str) -> Result<i64, AmountError> {
    let factor = Decimal::from(10_i64.pow(subunit_exponent(currency)));
    amount
        .checked_mul(factor)
        .map(|v| v.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|v| v.to_i64())
        .ok_or(AmountError::Overflow(amount))
}
