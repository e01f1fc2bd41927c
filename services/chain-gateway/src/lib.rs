//! Chain Gateway Library
//!
//! Everything that talks to the chain on behalf of the control plane:
//! the gateway capability trait, the outbound RPC rate limiter, a JSON-RPC
//! gateway with a remote signer, and a simulated paper gateway.

pub mod amount;
pub mod error;
pub mod gateway;
pub mod paper;
pub mod rate_limit;
pub mod rpc;
pub mod signer;
pub mod types;

// Re-export main types for convenience
pub use amount::{from_base_units, sol_to_lamports, to_base_units, AmountError, LAMPORTS_PER_SOL};
pub use error::GatewayError;
pub use gateway::{methods, BlockchainGateway};
pub use paper::{PaperConfig, PaperGateway};
pub use rate_limit::RateLimiter;
pub use rpc::{BuiltTransaction, RpcGateway, RpcGatewayConfig, TransactionBuilder};
pub use signer::RemoteSigner;
pub use types::{
    is_valid_pubkey, CurveState, FeeEstimate, SellAmount, TradeReceipt, TransferAsset,
    TransferRequest,
};
