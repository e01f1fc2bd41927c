//! Amount handling utilities for token decimals

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;

/// Native SOL decimals
pub const SOL_DECIMALS: u8 = 9;

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Largest decimals value whose scale factor still fits in u64
const MAX_DECIMALS: u8 = 19;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AmountError {
    #[error("Amount cannot be negative: {0}")]
    Negative(Decimal),

    #[error("Amount {amount} with {decimals} decimals overflows u64")]
    Overflow { amount: Decimal, decimals: u8 },

    #[error("Amount {amount} too small for {decimals} decimals (rounds to 0)")]
    TooSmall { amount: Decimal, decimals: u8 },
}

/// Convert UI amount (human readable) to base units
///
/// - Rejects negative amounts
/// - Rejects amounts that do not fit in u64
/// - Rejects non-zero amounts that truncate to zero base units
pub fn to_base_units(ui_amount: Decimal, decimals: u8) -> Result<u64, AmountError> {
    if ui_amount < Decimal::ZERO {
        return Err(AmountError::Negative(ui_amount));
    }
    if decimals > MAX_DECIMALS {
        return Err(AmountError::Overflow {
            amount: ui_amount,
            decimals,
        });
    }

    let multiplier = Decimal::from(10u64.pow(decimals as u32));
    let raw = ui_amount
        .checked_mul(multiplier)
        .and_then(|r| r.trunc().to_u64())
        .ok_or(AmountError::Overflow {
            amount: ui_amount,
            decimals,
        })?;

    if raw == 0 && ui_amount > Decimal::ZERO {
        return Err(AmountError::TooSmall {
            amount: ui_amount,
            decimals,
        });
    }

    Ok(raw)
}

/// Convert base units back to a UI amount
pub fn from_base_units(raw_amount: u64, decimals: u8) -> Decimal {
    let divisor = Decimal::from(10u64.pow(decimals.min(MAX_DECIMALS) as u32));
    Decimal::from(raw_amount) / divisor
}

pub fn sol_to_lamports(sol: Decimal) -> Result<u64, AmountError> {
    to_base_units(sol, SOL_DECIMALS)
}
