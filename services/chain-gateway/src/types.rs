//! Shared gateway data types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Bonding curve reserves after a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurveState {
    pub virtual_sol_reserves: u64,
    pub virtual_token_reserves: u64,
    pub real_sol_reserves: u64,
    pub real_token_reserves: u64,
    pub complete: bool,
}

impl CurveState {
    /// Spot price in lamports per base unit of token
    pub fn spot_price(&self) -> Decimal {
        if self.virtual_token_reserves == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.virtual_sol_reserves) / Decimal::from(self.virtual_token_reserves)
    }
}

/// Outcome of a buy or sell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeReceipt {
    pub signature: String,
    /// Lamports spent (buy) or received (sell)
    pub sol_amount: u64,
    /// Token base units received (buy) or sold (sell)
    pub token_amount: u64,
    pub curve: Option<CurveState>,
}

/// How much of a token position to sell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum SellAmount {
    All,
    Percent(u8),
    Exact(u64),
}

impl SellAmount {
    /// Resolve against the current token balance
    pub fn resolve(&self, balance: u64) -> u64 {
        match *self {
            SellAmount::All => balance,
            SellAmount::Percent(pct) => {
                let pct = pct.min(100) as u128;
                (balance as u128 * pct / 100) as u64
            }
            SellAmount::Exact(amount) => amount.min(balance),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeeEstimate {
    pub base_fee: u64,
    pub priority_fee: u64,
}

impl FeeEstimate {
    pub fn total(&self) -> u64 {
        self.base_fee.saturating_add(self.priority_fee)
    }
}

/// What is being transferred
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TransferAsset {
    Sol,
    Token { mint: String, decimals: u8 },
}

impl TransferAsset {
    pub fn decimals(&self) -> u8 {
        match self {
            TransferAsset::Sol => crate::amount::SOL_DECIMALS,
            TransferAsset::Token { decimals, .. } => *decimals,
        }
    }
}

/// A value transfer between two public keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from: String,
    pub to: String,
    pub asset: TransferAsset,
    /// Amount in base units of the asset
    pub amount: u64,
    /// Explicit priority fee in lamports, overrides the estimate
    pub priority_fee: Option<u64>,
}

/// Check that a string is a base58-encoded 32-byte public key
pub fn is_valid_pubkey(value: &str) -> bool {
    match bs58::decode(value).into_vec() {
        Ok(bytes) => bytes.len() == 32,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sell_amount_resolve() {
        assert_eq!(SellAmount::All.resolve(1_000), 1_000);
        assert_eq!(SellAmount::Percent(50).resolve(1_001), 500);
        assert_eq!(SellAmount::Percent(150).resolve(1_000), 1_000);
        assert_eq!(SellAmount::Exact(300).resolve(1_000), 300);
        assert_eq!(SellAmount::Exact(3_000).resolve(1_000), 1_000);
    }

    #[test]
    fn test_pubkey_validation() {
        assert!(is_valid_pubkey("So11111111111111111111111111111111111111112"));
        assert!(is_valid_pubkey("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"));
        assert!(!is_valid_pubkey("not-a-key"));
        assert!(!is_valid_pubkey("0OIl"));
        // Valid base58 but wrong length
        assert!(!is_valid_pubkey("3mJr7AoUXx2Wqd"));
    }

    #[test]
    fn test_fee_total_saturates() {
        let fee = FeeEstimate {
            base_fee: u64::MAX,
            priority_fee: 1,
        };
        assert_eq!(fee.total(), u64::MAX);
    }
}
