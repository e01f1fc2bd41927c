//! Paper gateway - simulated chain for paper trading and tests
//!
//! Keeps lamport/token balances in memory, prices trades against a
//! constant-product virtual bonding curve per mint and produces random
//! base58 signatures. Failures can be scripted per method.

use async_trait::async_trait;
use rand::RngCore;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::error::GatewayError;
use crate::gateway::{methods, BlockchainGateway};
use crate::rate_limit::RateLimiter;
use crate::rpc::LAMPORTS_PER_SIGNATURE;
use crate::types::{CurveState, FeeEstimate, SellAmount, TradeReceipt, TransferAsset, TransferRequest};

/// Fresh curves start from the usual launchpad virtual reserves
const INITIAL_VIRTUAL_SOL: u64 = 30_000_000_000;
const INITIAL_VIRTUAL_TOKENS: u64 = 1_073_000_000_000_000;
const INITIAL_REAL_TOKENS: u64 = 793_100_000_000_000;

#[derive(Debug, Clone)]
pub struct PaperConfig {
    /// Simulated time per slot
    pub slot_time: Duration,
    /// Simulated latency added to every call
    pub latency: Duration,
    /// Trade fee in basis points, taken in SOL
    pub trade_fee_bps: u64,
    /// Priority fee quoted when the request does not carry one
    pub default_priority_fee: u64,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            slot_time: Duration::from_millis(400),
            latency: Duration::ZERO,
            trade_fee_bps: 100,
            default_priority_fee: 10_000,
        }
    }
}

#[derive(Default)]
struct PaperState {
    balances: HashMap<String, u64>,
    token_balances: HashMap<(String, String), u64>,
    curves: HashMap<String, CurveState>,
    slot: u64,
    failures: HashMap<String, VecDeque<GatewayError>>,
    calls: HashMap<String, u64>,
    sent: Vec<TransferRequest>,
}

pub struct PaperGateway {
    config: PaperConfig,
    state: Mutex<PaperState>,
    limiter: Option<Arc<RateLimiter>>,
}

impl PaperGateway {
    pub fn new(config: PaperConfig) -> Self {
        Self {
            config,
            state: Mutex::new(PaperState::default()),
            limiter: None,
        }
    }

    /// Throttle simulated calls the same way live RPC calls are throttled
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn fund(&self, pubkey: &str, lamports: u64) {
        let mut state = self.lock();
        *state.balances.entry(pubkey.to_string()).or_insert(0) += lamports;
    }

    pub fn fund_token(&self, owner: &str, mint: &str, amount: u64) {
        let mut state = self.lock();
        *state
            .token_balances
            .entry((owner.to_string(), mint.to_string()))
            .or_insert(0) += amount;
    }

    /// Queue an error returned by the next call to `method`
    pub fn fail_next(&self, method: &str, error: GatewayError) {
        self.lock()
            .failures
            .entry(method.to_string())
            .or_default()
            .push_back(error);
    }

    /// Number of calls made to `method` (including failed ones)
    pub fn call_count(&self, method: &str) -> u64 {
        self.lock().calls.get(method).copied().unwrap_or(0)
    }

    /// Transfers that were actually applied
    pub fn sent_transfers(&self) -> Vec<TransferRequest> {
        self.lock().sent.clone()
    }

    pub fn balance_of(&self, pubkey: &str) -> u64 {
        self.lock().balances.get(pubkey).copied().unwrap_or(0)
    }

    pub fn curve(&self, mint: &str) -> Option<CurveState> {
        self.lock().curves.get(mint).copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PaperState> {
        // A poisoned simulator is still usable for bookkeeping
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Common per-call prologue: throttle, simulate latency, pop scripted failure
    async fn enter(&self, method: &str) -> Result<(), GatewayError> {
        if let Some(limiter) = &self.limiter {
            limiter.wait_for_rate_limit(method).await;
        }
        if !self.config.latency.is_zero() {
            sleep(self.config.latency).await;
        }

        let mut state = self.lock();
        *state.calls.entry(method.to_string()).or_insert(0) += 1;
        match state.failures.get_mut(method).and_then(VecDeque::pop_front) {
            Some(err) => {
                debug!(method, "Paper gateway returning scripted failure: {}", err);
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn trade_fee(&self, lamports: u64) -> u64 {
        (lamports as u128 * self.config.trade_fee_bps as u128 / 10_000) as u64
    }
}

impl Default for PaperGateway {
    fn default() -> Self {
        Self::new(PaperConfig::default())
    }
}

fn new_curve() -> CurveState {
    CurveState {
        virtual_sol_reserves: INITIAL_VIRTUAL_SOL,
        virtual_token_reserves: INITIAL_VIRTUAL_TOKENS,
        real_sol_reserves: 0,
        real_token_reserves: INITIAL_REAL_TOKENS,
        complete: false,
    }
}

fn random_signature() -> String {
    let mut bytes = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut bytes);
    bs58::encode(bytes).into_string()
}

#[async_trait]
impl BlockchainGateway for PaperGateway {
    async fn buy(
        &self,
        wallet: &str,
        mint: &str,
        sol_amount: u64,
    ) -> Result<TradeReceipt, GatewayError> {
        self.enter(methods::BUY).await?;
        if sol_amount == 0 {
            return Err(GatewayError::InvalidInput("Buy amount must be positive".into()));
        }

        let fee = self.trade_fee(sol_amount);
        let required = sol_amount
            .saturating_add(fee)
            .saturating_add(LAMPORTS_PER_SIGNATURE);

        let mut state = self.lock();
        let available = state.balances.get(wallet).copied().unwrap_or(0);
        if available < required {
            return Err(GatewayError::InsufficientFunds {
                required,
                available,
            });
        }

        let curve = state.curves.entry(mint.to_string()).or_insert_with(new_curve);
        if curve.complete {
            return Err(GatewayError::InvalidInput(format!("Curve for {} is complete", mint)));
        }

        let k = curve.virtual_sol_reserves as u128 * curve.virtual_token_reserves as u128;
        let new_sol = curve.virtual_sol_reserves as u128 + sol_amount as u128;
        let tokens_out = (curve.virtual_token_reserves as u128 - k / new_sol)
            .min(curve.real_token_reserves as u128) as u64;

        curve.virtual_sol_reserves += sol_amount;
        curve.virtual_token_reserves -= tokens_out;
        curve.real_sol_reserves += sol_amount;
        curve.real_token_reserves -= tokens_out;
        curve.complete = curve.real_token_reserves == 0;
        let snapshot = *curve;

        state.balances.insert(wallet.to_string(), available - required);
        *state
            .token_balances
            .entry((wallet.to_string(), mint.to_string()))
            .or_insert(0) += tokens_out;

        Ok(TradeReceipt {
            signature: random_signature(),
            sol_amount,
            token_amount: tokens_out,
            curve: Some(snapshot),
        })
    }

    async fn sell(
        &self,
        wallet: &str,
        mint: &str,
        amount: SellAmount,
    ) -> Result<TradeReceipt, GatewayError> {
        self.enter(methods::SELL).await?;

        let mut state = self.lock();
        let key = (wallet.to_string(), mint.to_string());
        let held = state.token_balances.get(&key).copied().unwrap_or(0);
        let tokens_in = amount.resolve(held);
        if tokens_in == 0 {
            return Err(GatewayError::InvalidInput(format!(
                "No {} balance to sell for {}",
                mint, wallet
            )));
        }

        let Some(curve) = state.curves.get_mut(mint) else {
            return Err(GatewayError::InvalidInput(format!("Unknown curve for {}", mint)));
        };

        let k = curve.virtual_sol_reserves as u128 * curve.virtual_token_reserves as u128;
        let new_tokens = curve.virtual_token_reserves as u128 + tokens_in as u128;
        let sol_out = (curve.virtual_sol_reserves as u128 - k / new_tokens)
            .min(curve.real_sol_reserves as u128) as u64;

        curve.virtual_token_reserves += tokens_in;
        curve.virtual_sol_reserves -= sol_out;
        curve.real_token_reserves += tokens_in;
        curve.real_sol_reserves -= sol_out;
        let snapshot = *curve;

        let fee = self.trade_fee(sol_out).saturating_add(LAMPORTS_PER_SIGNATURE);
        let proceeds = sol_out.saturating_sub(fee);

        state.token_balances.insert(key, held - tokens_in);
        *state.balances.entry(wallet.to_string()).or_insert(0) += proceeds;

        Ok(TradeReceipt {
            signature: random_signature(),
            sol_amount: proceeds,
            token_amount: tokens_in,
            curve: Some(snapshot),
        })
    }

    async fn wait_for_blocks(&self, blocks: u64) -> Result<u64, GatewayError> {
        self.enter(methods::GET_SLOT).await?;
        if blocks > 0 && !self.config.slot_time.is_zero() {
            sleep(self.config.slot_time * blocks as u32).await;
        }
        self.lock().slot += blocks;
        Ok(blocks)
    }

    async fn get_balance(&self, pubkey: &str) -> Result<u64, GatewayError> {
        self.enter(methods::GET_BALANCE).await?;
        Ok(self.balance_of(pubkey))
    }

    async fn get_token_balance(&self, owner: &str, mint: &str) -> Result<u64, GatewayError> {
        self.enter(methods::GET_TOKEN_ACCOUNTS_BY_OWNER).await?;
        Ok(self
            .lock()
            .token_balances
            .get(&(owner.to_string(), mint.to_string()))
            .copied()
            .unwrap_or(0))
    }

    async fn estimate_fee(&self, request: &TransferRequest) -> Result<FeeEstimate, GatewayError> {
        self.enter(methods::GET_RECENT_PRIORITIZATION_FEES).await?;
        Ok(FeeEstimate {
            base_fee: LAMPORTS_PER_SIGNATURE,
            priority_fee: request
                .priority_fee
                .unwrap_or(self.config.default_priority_fee),
        })
    }

    async fn send_and_confirm(&self, request: &TransferRequest) -> Result<String, GatewayError> {
        self.enter(methods::SEND_TRANSACTION).await?;

        let fee = LAMPORTS_PER_SIGNATURE
            .saturating_add(request.priority_fee.unwrap_or(self.config.default_priority_fee));

        let mut state = self.lock();
        let lamports = state.balances.get(&request.from).copied().unwrap_or(0);

        match &request.asset {
            TransferAsset::Sol => {
                let required = request.amount.saturating_add(fee);
                if lamports < required {
                    return Err(GatewayError::InsufficientFunds {
                        required,
                        available: lamports,
                    });
                }
                state.balances.insert(request.from.clone(), lamports - required);
                *state.balances.entry(request.to.clone()).or_insert(0) += request.amount;
            }
            TransferAsset::Token { mint, .. } => {
                let from_key = (request.from.clone(), mint.clone());
                let held = state.token_balances.get(&from_key).copied().unwrap_or(0);
                if held < request.amount {
                    return Err(GatewayError::InsufficientFunds {
                        required: request.amount,
                        available: held,
                    });
                }
                if lamports < fee {
                    return Err(GatewayError::InsufficientFunds {
                        required: fee,
                        available: lamports,
                    });
                }
                state.balances.insert(request.from.clone(), lamports - fee);
                state.token_balances.insert(from_key, held - request.amount);
                *state
                    .token_balances
                    .entry((request.to.clone(), mint.clone()))
                    .or_insert(0) += request.amount;
            }
        }

        state.sent.push(request.clone());
        Ok(random_signature())
    }
}
