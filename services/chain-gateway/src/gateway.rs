//! Blockchain gateway capability
//!
//! The control plane only ever talks to the chain through this trait.
//! Implementations are responsible for throttling their own outbound calls.

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::types::{FeeEstimate, SellAmount, TradeReceipt, TransferRequest};

/// Method names used as rate limiter keys
pub mod methods {
    pub const BUY: &str = "buy";
    pub const SELL: &str = "sell";
    pub const GET_BALANCE: &str = "getBalance";
    pub const GET_TOKEN_ACCOUNTS_BY_OWNER: &str = "getTokenAccountsByOwner";
    pub const GET_RECENT_PRIORITIZATION_FEES: &str = "getRecentPrioritizationFees";
    pub const GET_SLOT: &str = "getSlot";
    pub const SEND_TRANSACTION: &str = "sendTransaction";
    pub const GET_SIGNATURE_STATUSES: &str = "getSignatureStatuses";
}

#[async_trait]
pub trait BlockchainGateway: Send + Sync {
    /// Buy `sol_amount` lamports worth of `mint` from `wallet`
    async fn buy(&self, wallet: &str, mint: &str, sol_amount: u64)
        -> Result<TradeReceipt, GatewayError>;

    async fn sell(&self, wallet: &str, mint: &str, amount: SellAmount)
        -> Result<TradeReceipt, GatewayError>;

    /// Suspend until `blocks` more slots have been produced, returns slots waited
    async fn wait_for_blocks(&self, blocks: u64) -> Result<u64, GatewayError>;

    /// Native balance in lamports
    async fn get_balance(&self, pubkey: &str) -> Result<u64, GatewayError>;

    /// Token balance in base units, zero when no account exists
    async fn get_token_balance(&self, owner: &str, mint: &str) -> Result<u64, GatewayError>;

    async fn estimate_fee(&self, request: &TransferRequest) -> Result<FeeEstimate, GatewayError>;

    /// Send a transfer and wait for confirmation, returns the signature
    async fn send_and_confirm(&self, request: &TransferRequest) -> Result<String, GatewayError>;
}
