// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Decimal-string to base-unit conversion.
//!
//! Amounts cross the API boundary as strings. Engines work in the chain's
//! smallest unit (wei, token base units, satoshis) as [`U256`].

use alloy::primitives::U256;

use crate::error::SettlementError;

/// Parse a human-readable decimal amount into base units.
///
/// `"1.5"` with 6 decimals becomes `1_500_000`. More fractional digits than
/// `decimals` is an error rather than a silent truncation.
pub fn parse_amount(amount: &str, decimals: u8) -> Result<U256, SettlementError> {
    let amount = amount.trim();
    let (whole, fraction) = match amount.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (amount, ""),
    };

    if whole.is_empty() && fraction.is_empty() {
        return Err(SettlementError::InvalidAmount(format!("'{amount}'")));
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return Err(SettlementError::InvalidAmount(format!(
            "'{amount}' is not a decimal number"
        )));
    }
    if fraction.len() > decimals as usize {
        return Err(SettlementError::InvalidAmount(format!(
            "'{amount}' has too many decimal places (max {decimals})"
        )));
    }

    let whole = if whole.is_empty() {
        U256::ZERO
    } else {
        U256::from_str_radix(whole, 10)
            .map_err(|_| SettlementError::InvalidAmount(format!("'{amount}' overflows")))?
    };
    let padded = format!("{:0<width$}", fraction, width = decimals as usize);
    let fraction = if padded.is_empty() {
        U256::ZERO
    } else {
        U256::from_str_radix(&padded, 10)
            .map_err(|_| SettlementError::InvalidAmount(format!("'{amount}' overflows")))?
    };

    let multiplier = U256::from(10u64).pow(U256::from(decimals));
    whole
        .checked_mul(multiplier)
        .and_then(|w| w.checked_add(fraction))
        .ok_or_else(|| SettlementError::InvalidAmount(format!("'{amount}' overflows")))
}

/// Parse an integer amount already expressed in base units.
pub fn parse_base_units(amount: &str) -> Result<U256, SettlementError> {
    let amount = amount.trim();
    if amount.is_empty() || !amount.chars().all(|c| c.is_ascii_digit()) {
        return Err(SettlementError::InvalidAmount(format!(
            "'{amount}' is not an integer amount"
        )));
    }
    U256::from_str_radix(amount, 10)
        .map_err(|_| SettlementError::InvalidAmount(format!("'{amount}' overflows")))
}

/// Display form of a base-unit amount: 1_500_000 at 6 decimals is `1.5`.
pub fn format_amount(amount: U256, decimals: u8) -> String {
    let whole = rescale(amount, decimals, 0);
    let fraction = amount - rescale(whole, 0, decimals);
    if fraction.is_zero() {
        return whole.to_string();
    }
    let digits = format!("{:0>width$}", fraction.to_string(), width = usize::from(decimals));
    format!("{whole}.{}", digits.trim_end_matches('0'))
}

/// Rescale base units between two precisions. Shrinking truncates.
pub fn rescale(amount: U256, from_decimals: u8, to_decimals: u8) -> U256 {
    match from_decimals.cmp(&to_decimals) {
        std::cmp::Ordering::Equal => amount,
        std::cmp::Ordering::Less => {
            let factor = U256::from(10u64).pow(U256::from(to_decimals - from_decimals));
            amount.saturating_mul(factor)
        }
        std::cmp::Ordering::Greater => {
            let factor = U256::from(10u64).pow(U256::from(from_decimals - to_decimals));
            amount / factor
        }
    }
}
