//! JSON-RPC gateway
//!
//! Talks to a Solana-compatible JSON-RPC endpoint. Every request goes through
//! the shared [`RateLimiter`] keyed by RPC method name. Building and signing
//! transactions is delegated to a [`TransactionBuilder`].

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::gateway::{methods, BlockchainGateway};
use crate::rate_limit::RateLimiter;
use crate::types::{FeeEstimate, SellAmount, TradeReceipt, TransferRequest};

/// Base fee charged per signature
pub const LAMPORTS_PER_SIGNATURE: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct RpcGatewayConfig {
    pub url: String,
    /// Per-request HTTP timeout
    pub timeout: Duration,
    pub confirm_timeout: Duration,
    /// Delay between slot / signature status polls
    pub poll_interval: Duration,
    /// Compute units budgeted for a transfer when pricing the priority fee
    pub compute_unit_limit: u64,
}

impl Default for RpcGatewayConfig {
    fn default() -> Self {
        Self {
            url: "https://api.devnet.solana.com".to_string(),
            timeout: Duration::from_secs(30),
            confirm_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(400),
            compute_unit_limit: 200_000,
        }
    }
}

/// Signed, wire-encoded transaction plus what it is expected to do
#[derive(Debug, Clone)]
pub struct BuiltTransaction {
    /// Base64 wire transaction
    pub payload: String,
    pub sol_amount: u64,
    pub token_amount: u64,
    pub curve: Option<crate::types::CurveState>,
}

/// Instruction construction and signing, provided by the wallet/SDK layer
#[async_trait]
pub trait TransactionBuilder: Send + Sync {
    async fn build_buy(
        &self,
        wallet: &str,
        mint: &str,
        sol_amount: u64,
    ) -> Result<BuiltTransaction, GatewayError>;

    async fn build_sell(
        &self,
        wallet: &str,
        mint: &str,
        token_amount: u64,
    ) -> Result<BuiltTransaction, GatewayError>;

    async fn build_transfer(
        &self,
        request: &TransferRequest,
        fee: FeeEstimate,
    ) -> Result<BuiltTransaction, GatewayError>;
}

pub struct RpcGateway<B> {
    client: Client,
    config: RpcGatewayConfig,
    limiter: Arc<RateLimiter>,
    builder: B,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrioritizationFee {
    prioritization_fee: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatureStatus {
    confirmation_status: Option<String>,
    err: Option<Value>,
}

impl<B: TransactionBuilder> RpcGateway<B> {
    pub fn new(
        config: RpcGatewayConfig,
        limiter: Arc<RateLimiter>,
        builder: B,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::InvalidInput(format!("HTTP client: {}", e)))?;

        info!("RPC gateway initialized: url={}", config.url);

        Ok(Self {
            client,
            config,
            limiter,
            builder,
            next_id: AtomicU64::new(1),
        })
    }

    /// Issue one rate-limited JSON-RPC request
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, GatewayError> {
        self.limiter.wait_for_rate_limit(method).await;

        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        debug!(method, "RPC request");

        let response = self
            .client
            .post(&self.config.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport(method, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.map_transport(method, e))?;

        let parsed: Option<RpcResponse<T>> = serde_json::from_str(&text).ok();

        match parsed {
            Some(RpcResponse {
                error: Some(err), ..
            }) => Err(GatewayError::Rpc {
                method: method.to_string(),
                code: err.code,
                message: err.message,
            }),
            Some(RpcResponse {
                result: Some(result),
                ..
            }) if status.is_success() => Ok(result),
            _ if !status.is_success() => Err(GatewayError::Rpc {
                method: method.to_string(),
                code: status.as_u16() as i64,
                message: text,
            }),
            _ => Err(GatewayError::Rpc {
                method: method.to_string(),
                code: -32700,
                message: format!("Unparseable response: {}", text),
            }),
        }
    }

    fn map_transport(&self, method: &str, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout {
                method: method.to_string(),
                timeout_ms: self.config.timeout.as_millis() as u64,
            }
        } else {
            GatewayError::transport(method, e.to_string())
        }
    }

    async fn get_slot(&self) -> Result<u64, GatewayError> {
        self.call(methods::GET_SLOT, json!([{ "commitment": "confirmed" }]))
            .await
    }

    async fn send_raw(&self, payload: &str) -> Result<String, GatewayError> {
        self.call(
            methods::SEND_TRANSACTION,
            json!([payload, { "encoding": "base64", "preflightCommitment": "confirmed" }]),
        )
        .await
    }

    /// Poll signature status until confirmed, failed or timed out
    async fn confirm(&self, signature: &str) -> Result<(), GatewayError> {
        let deadline = Instant::now() + self.config.confirm_timeout;

        loop {
            let polled: Result<WithContext<Vec<Option<SignatureStatus>>>, GatewayError> = self
                .call(
                    methods::GET_SIGNATURE_STATUSES,
                    json!([[signature], { "searchTransactionHistory": true }]),
                )
                .await;

            match polled {
                Ok(statuses) => {
                    if let Some(Some(status)) = statuses.value.into_iter().next() {
                        if let Some(err) = status.err {
                            return Err(GatewayError::TransactionFailed {
                                signature: signature.to_string(),
                                reason: err.to_string(),
                            });
                        }
                        if matches!(
                            status.confirmation_status.as_deref(),
                            Some("confirmed") | Some("finalized")
                        ) {
                            debug!(signature, "Transaction confirmed");
                            return Ok(());
                        }
                    }
                }
                // Never resend because of a flaky status poll
                Err(e) if e.is_retryable() => {
                    warn!(signature, "Signature status poll failed: {}", e);
                }
                Err(e) => return Err(e),
            }

            if Instant::now() >= deadline {
                return Err(GatewayError::NotConfirmed {
                    signature: signature.to_string(),
                    timeout_secs: self.config.confirm_timeout.as_secs(),
                });
            }
            sleep(self.config.poll_interval).await;
        }
    }

    async fn submit(&self, built: &BuiltTransaction) -> Result<String, GatewayError> {
        let signature = self.send_raw(&built.payload).await?;
        self.confirm(&signature).await?;
        Ok(signature)
    }
}

#[async_trait]
impl<B: TransactionBuilder> BlockchainGateway for RpcGateway<B> {
    async fn buy(
        &self,
        wallet: &str,
        mint: &str,
        sol_amount: u64,
    ) -> Result<TradeReceipt, GatewayError> {
        let built = self.builder.build_buy(wallet, mint, sol_amount).await?;
        let signature = self.submit(&built).await?;

        Ok(TradeReceipt {
            signature,
            sol_amount: built.sol_amount,
            token_amount: built.token_amount,
            curve: built.curve,
        })
    }

    async fn sell(
        &self,
        wallet: &str,
        mint: &str,
        amount: SellAmount,
    ) -> Result<TradeReceipt, GatewayError> {
        let balance = self.get_token_balance(wallet, mint).await?;
        let token_amount = amount.resolve(balance);
        if token_amount == 0 {
            return Err(GatewayError::InvalidInput(format!(
                "No {} balance to sell for {}",
                mint, wallet
            )));
        }

        let built = self.builder.build_sell(wallet, mint, token_amount).await?;
        let signature = self.submit(&built).await?;

        Ok(TradeReceipt {
            signature,
            sol_amount: built.sol_amount,
            token_amount: built.token_amount,
            curve: built.curve,
        })
    }

    async fn wait_for_blocks(&self, blocks: u64) -> Result<u64, GatewayError> {
        if blocks == 0 {
            return Ok(0);
        }

        let start = self.get_slot().await?;
        let target = start.saturating_add(blocks);

        loop {
            sleep(self.config.poll_interval).await;
            let slot = self.get_slot().await?;
            if slot >= target {
                return Ok(slot - start);
            }
        }
    }

    async fn get_balance(&self, pubkey: &str) -> Result<u64, GatewayError> {
        let balance: WithContext<u64> = self
            .call(
                methods::GET_BALANCE,
                json!([pubkey, { "commitment": "confirmed" }]),
            )
            .await?;
        Ok(balance.value)
    }

    async fn get_token_balance(&self, owner: &str, mint: &str) -> Result<u64, GatewayError> {
        let accounts: WithContext<Vec<Value>> = self
            .call(
                methods::GET_TOKEN_ACCOUNTS_BY_OWNER,
                json!([owner, { "mint": mint }, { "encoding": "jsonParsed" }]),
            )
            .await?;

        let total = accounts
            .value
            .iter()
            .filter_map(|account| {
                account
                    .pointer("/account/data/parsed/info/tokenAmount/amount")
                    .and_then(Value::as_str)
                    .and_then(|amount| amount.parse::<u64>().ok())
            })
            .fold(0u64, |acc, amount| acc.saturating_add(amount));

        Ok(total)
    }

    async fn estimate_fee(&self, request: &TransferRequest) -> Result<FeeEstimate, GatewayError> {
        if let Some(priority_fee) = request.priority_fee {
            return Ok(FeeEstimate {
                base_fee: LAMPORTS_PER_SIGNATURE,
                priority_fee,
            });
        }

        let fees: Vec<PrioritizationFee> = self
            .call(
                methods::GET_RECENT_PRIORITIZATION_FEES,
                json!([[request.from]]),
            )
            .await?;

        let mut per_cu: Vec<u64> = fees.iter().map(|f| f.prioritization_fee).collect();
        per_cu.sort_unstable();
        // 75th percentile of recent micro-lamports per compute unit
        let micro_lamports = per_cu
            .get(per_cu.len().saturating_mul(3) / 4)
            .copied()
            .unwrap_or(0);

        let priority_fee =
            (micro_lamports as u128 * self.config.compute_unit_limit as u128 / 1_000_000) as u64;

        Ok(FeeEstimate {
            base_fee: LAMPORTS_PER_SIGNATURE,
            priority_fee,
        })
    }

    async fn send_and_confirm(&self, request: &TransferRequest) -> Result<String, GatewayError> {
        let fee = self.estimate_fee(request).await?;
        let built = self.builder.build_transfer(request, fee).await?;
        self.submit(&built).await
    }
}
