//! Exact conversion between human token amounts and base units.

use rust_decimal::Decimal;

use crate::errors::{Result, SaveFiError};

/// Scale a display amount into the token's smallest unit.
///
/// Rejects negative values and values with more fractional digits than the
/// token carries; nothing is rounded.
pub fn to_base_units(amount: Decimal, decimals: u32) -> Result<u128> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(SaveFiError::Validation(format!(
            "amount must not be negative: {amount}"
        )));
    }

    let normalized = amount.normalize();
    let scale = normalized.scale();
    if scale > decimals {
        return Err(SaveFiError::Validation(format!(
            "amount {amount} has more than {decimals} fractional digits"
        )));
    }

    let mantissa = u128::try_from(normalized.mantissa().abs())
        .map_err(|_| SaveFiError::Validation(format!("amount out of range: {amount}")))?;
    10u128
        .checked_pow(decimals - scale)
        .and_then(|factor| mantissa.checked_mul(factor))
        .ok_or_else(|| SaveFiError::Validation(format!("amount out of range: {amount}")))
}

/// Scale a base-unit integer back into a display amount.
pub fn from_base_units(raw: u128, decimals: u32) -> Result<Decimal> {
    let signed = i128::try_from(raw)
        .map_err(|_| SaveFiError::Validation(format!("base-unit amount too large: {raw}")))?;
    Decimal::try_from_i128_with_scale(signed, decimals)
        .map(|d| d.normalize())
        .map_err(|e| SaveFiError::Validation(format!("base-unit amount {raw} not representable: {e}")))
}

/// Parse a base-unit integer rendered either as decimal digits or `0x` hex.
pub fn parse_base_units(raw: &str) -> Result<u128> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x") {
        Some(hex_digits) => u128::from_str_radix(hex_digits, 16),
        None => raw.parse::<u128>(),
    };
    parsed.map_err(|e| SaveFiError::MalformedResponse(format!("invalid base-unit amount {raw:?}: {e}")))
}
