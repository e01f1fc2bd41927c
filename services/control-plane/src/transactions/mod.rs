//! Draft/submit transaction state machine
//!
//! DRAFT is only ever written after the balance and fee check passes.
//! DRAFT -> PENDING is a compare-and-set in the store, so a draft is sent at
//! most once. PENDING always ends in CONFIRMED or FAILED.

use chain_gateway::{
    is_valid_pubkey, to_base_units, BlockchainGateway, FeeEstimate, GatewayError, TransferAsset,
    TransferRequest,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{
    Destination, DraftTransaction, TokenType, TransactionFilter, TransactionStatus, Wallet,
};
use crate::observability::{metrics, MetricsCollector};
use crate::store::{TransactionStore, WalletDirectory};

pub mod backoff;

pub use backoff::ExponentialBackoff;

use backoff::{retry_with_backoff, terminal_write_backoff, TERMINAL_WRITE_ATTEMPTS};

#[derive(Debug, Clone)]
pub struct TransactionConfig {
    pub max_send_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub backoff_jitter: f64,
    /// Used when fee estimation itself fails
    pub fallback_fee: FeeEstimate,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            max_send_attempts: 3,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(8),
            backoff_jitter: 0.2,
            fallback_fee: FeeEstimate {
                base_fee: 5_000,
                priority_fee: 100_000,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateDraft {
    pub from_wallet_id: Uuid,
    pub to_wallet_id: Option<Uuid>,
    pub to_address: Option<String>,
    /// UI amount, converted with the token's decimals
    pub amount: Decimal,
    pub token: TokenType,
}

#[derive(Clone)]
pub struct TransactionService {
    store: Arc<dyn TransactionStore>,
    wallets: Arc<dyn WalletDirectory>,
    gateway: Arc<dyn BlockchainGateway>,
    config: TransactionConfig,
    metrics: MetricsCollector,
}

impl TransactionService {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        wallets: Arc<dyn WalletDirectory>,
        gateway: Arc<dyn BlockchainGateway>,
        config: TransactionConfig,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            store,
            wallets,
            gateway,
            config,
            metrics,
        }
    }

    pub async fn create_draft(&self, request: CreateDraft) -> Result<DraftTransaction, EngineError> {
        let sender = self.wallet(request.from_wallet_id).await?;
        if !sender.is_active {
            return Err(EngineError::StateConflict(format!(
                "Wallet {} is inactive",
                sender.id
            )));
        }

        let destination = Destination::from_parts(request.to_wallet_id, request.to_address)
            .ok_or_else(|| {
                EngineError::Validation(
                    "exactly one of to_wallet_id or to_address must be set".to_string(),
                )
            })?;
        let (_, to) = self.resolve_destination(&destination).await?;
        if to == sender.pubkey {
            return Err(EngineError::Validation(
                "destination is the sending wallet".to_string(),
            ));
        }

        if let TransferAsset::Token { mint, .. } = &request.token {
            if !is_valid_pubkey(mint) {
                return Err(EngineError::Validation(format!(
                    "mint {} is not a valid public key",
                    mint
                )));
            }
        }

        let amount = to_base_units(request.amount, request.token.decimals())
            .map_err(|e| EngineError::Validation(e.to_string()))?;
        if amount == 0 {
            return Err(EngineError::Validation("amount must be positive".to_string()));
        }

        let transfer = TransferRequest {
            from: sender.pubkey.clone(),
            to,
            asset: request.token.clone(),
            amount,
            priority_fee: None,
        };

        let fee = match self.gateway.estimate_fee(&transfer).await {
            Ok(fee) => fee,
            Err(e) => {
                warn!(
                    wallet_id = %sender.id,
                    "Fee estimation failed, using fallback: {}",
                    e
                );
                self.metrics
                    .increment(metrics::FEE_ESTIMATE_FALLBACK, 1)
                    .await;
                self.config.fallback_fee
            }
        };

        self.check_balance(&transfer, fee).await?;

        let draft =
            DraftTransaction::new_draft(sender.id, destination, amount, request.token, fee);
        self.store.insert_transaction(&draft).await?;

        info!(
            transaction_id = %draft.id,
            from = %sender.id,
            amount,
            fee = fee.total(),
            "Draft transaction created"
        );
        self.metrics.increment(metrics::DRAFT_CREATED, 1).await;

        Ok(draft)
    }

    /// Send a draft. The returned record is CONFIRMED or FAILED; gateway
    /// failures are recorded on it rather than returned as errors. Once the
    /// draft is claimed the send runs to its terminal write even if the
    /// caller goes away.
    pub async fn submit(
        &self,
        id: Uuid,
        priority_fee: Option<u64>,
    ) -> Result<DraftTransaction, EngineError> {
        let mut tx = self.get_transaction(id).await?;
        if tx.status != TransactionStatus::Draft {
            return Err(already_in(id, tx.status));
        }

        let now = Utc::now();
        let claimed = self
            .store
            .transition_status(id, TransactionStatus::Draft, TransactionStatus::Pending, now)
            .await?;
        if !claimed {
            let current = self.get_transaction(id).await?;
            return Err(already_in(id, current.status));
        }
        tx.status = TransactionStatus::Pending;
        tx.submitted_at = Some(now);
        tx.updated_at = now;
        info!(transaction_id = %id, "Transaction pending");

        if let Some(fee) = priority_fee {
            tx.fee.priority_fee = fee;
        }

        let service = self.clone();
        let pending = tx.clone();
        match tokio::spawn(async move { service.complete(pending).await }).await {
            Ok(result) => result,
            Err(join_err) => {
                let message = format!("submit task failed: {}", join_err);
                error!(transaction_id = %id, "{}", message);
                tx.fail(message);
                self.persist_terminal(&tx).await?;
                self.metrics.increment(metrics::TRANSACTION_FAILED, 1).await;
                Ok(tx)
            }
        }
    }

    /// Send a claimed PENDING transaction and write its outcome
    async fn complete(&self, mut tx: DraftTransaction) -> Result<DraftTransaction, EngineError> {
        let id = tx.id;
        let mut refresh = Vec::new();
        let outcome = match self.build_transfer(&tx).await {
            Ok((transfer, wallets)) => {
                refresh = wallets;
                self.send_with_retry(id, &transfer)
                    .await
                    .map_err(|e| e.to_string())
            }
            Err(e) => Err(e.to_string()),
        };

        match outcome {
            Ok(signature) => {
                info!(transaction_id = %id, signature = %signature, "Transaction confirmed");
                tx.confirm(signature);
                self.metrics
                    .increment(metrics::TRANSACTION_CONFIRMED, 1)
                    .await;
            }
            Err(message) => {
                warn!(transaction_id = %id, "Transaction failed: {}", message);
                tx.fail(message);
                self.metrics.increment(metrics::TRANSACTION_FAILED, 1).await;
            }
        }

        self.persist_terminal(&tx).await?;
        self.spawn_balance_refresh(refresh);

        Ok(tx)
    }

    async fn persist_terminal(&self, tx: &DraftTransaction) -> Result<(), EngineError> {
        let store = self.store.as_ref();
        retry_with_backoff(
            terminal_write_backoff(),
            TERMINAL_WRITE_ATTEMPTS,
            "Final transaction write",
            move || store.update_transaction(tx),
        )
        .await
        .map_err(|e| {
            error!(
                transaction_id = %tx.id,
                status = %tx.status,
                "Failed to persist transaction outcome: {}",
                e
            );
            EngineError::from(e)
        })
    }

    pub async fn cancel_draft(&self, id: Uuid) -> Result<DraftTransaction, EngineError> {
        let tx = self.get_transaction(id).await?;
        let cancelled = self
            .store
            .transition_status(
                id,
                TransactionStatus::Draft,
                TransactionStatus::Cancelled,
                Utc::now(),
            )
            .await?;
        if !cancelled {
            let current = self.get_transaction(id).await.unwrap_or(tx);
            return Err(already_in(id, current.status));
        }

        info!(transaction_id = %id, "Draft cancelled");
        self.get_transaction(id).await
    }

    pub async fn get_transaction(&self, id: Uuid) -> Result<DraftTransaction, EngineError> {
        self.store
            .get_transaction(id)
            .await?
            .ok_or_else(|| EngineError::not_found("Transaction", id))
    }

    pub async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<DraftTransaction>, EngineError> {
        Ok(self.store.list_transactions(filter).await?)
    }

    async fn wallet(&self, id: Uuid) -> Result<Wallet, EngineError> {
        self.wallets
            .get_wallet(id)
            .await?
            .ok_or_else(|| EngineError::not_found("Wallet", id))
    }

    /// Destination public key, plus the wallet id when it is one of ours
    async fn resolve_destination(
        &self,
        destination: &Destination,
    ) -> Result<(Option<Uuid>, String), EngineError> {
        match destination {
            Destination::Wallet { wallet_id } => {
                let wallet = self.wallets.get_wallet(*wallet_id).await?.ok_or_else(|| {
                    EngineError::Validation(format!("destination wallet {} not found", wallet_id))
                })?;
                Ok((Some(wallet.id), wallet.pubkey))
            }
            Destination::Address { address } => {
                if !is_valid_pubkey(address) {
                    return Err(EngineError::Validation(format!(
                        "{} is not a valid address",
                        address
                    )));
                }
                Ok((None, address.clone()))
            }
        }
    }

    async fn check_balance(
        &self,
        transfer: &TransferRequest,
        fee: FeeEstimate,
    ) -> Result<(), EngineError> {
        let lamports = self.gateway.get_balance(&transfer.from).await?;

        match &transfer.asset {
            TransferAsset::Sol => {
                let required = transfer.amount.saturating_add(fee.total());
                if lamports < required {
                    return Err(EngineError::InsufficientBalance {
                        required,
                        available: lamports,
                    });
                }
            }
            TransferAsset::Token { mint, .. } => {
                let tokens = self
                    .gateway
                    .get_token_balance(&transfer.from, mint)
                    .await?;
                if tokens < transfer.amount {
                    return Err(EngineError::InsufficientBalance {
                        required: transfer.amount,
                        available: tokens,
                    });
                }
                if lamports < fee.total() {
                    return Err(EngineError::InsufficientBalance {
                        required: fee.total(),
                        available: lamports,
                    });
                }
            }
        }

        Ok(())
    }

    /// Resolve keys for a pending transaction, and the wallets to refresh afterwards
    async fn build_transfer(
        &self,
        tx: &DraftTransaction,
    ) -> Result<(TransferRequest, Vec<(Uuid, String)>), EngineError> {
        let sender = self.wallet(tx.from_wallet_id).await?;
        let (to_wallet, to) = self.resolve_destination(&tx.destination).await?;

        let mut refresh = vec![(sender.id, sender.pubkey.clone())];
        if let Some(id) = to_wallet {
            refresh.push((id, to.clone()));
        }

        let transfer = TransferRequest {
            from: sender.pubkey,
            to,
            asset: tx.token.clone(),
            amount: tx.amount,
            priority_fee: Some(tx.fee.priority_fee),
        };
        Ok((transfer, refresh))
    }

    async fn send_with_retry(
        &self,
        id: Uuid,
        transfer: &TransferRequest,
    ) -> Result<String, GatewayError> {
        let max_attempts = self.config.max_send_attempts.max(1);
        let mut backoff = ExponentialBackoff::new(
            self.config.backoff_base,
            self.config.backoff_max,
            self.config.backoff_jitter,
        );
        let mut attempt = 1;

        loop {
            match self.gateway.send_and_confirm(transfer).await {
                Ok(signature) => return Ok(signature),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = backoff.next_delay();
                    warn!(
                        transaction_id = %id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Send failed, retrying: {}",
                        e
                    );
                    self.metrics.increment(metrics::SEND_RETRIES, 1).await;
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn spawn_balance_refresh(&self, wallets: Vec<(Uuid, String)>) {
        if wallets.is_empty() {
            return;
        }
        let gateway = self.gateway.clone();
        let directory = self.wallets.clone();

        tokio::spawn(async move {
            for (id, pubkey) in wallets {
                match gateway.get_balance(&pubkey).await {
                    Ok(lamports) => {
                        if let Err(e) = directory.record_balance(id, lamports).await {
                            warn!(wallet_id = %id, "Failed to store refreshed balance: {}", e);
                        }
                    }
                    Err(e) => warn!(wallet_id = %id, "Balance refresh failed: {}", e),
                }
            }
        });
    }
}

fn already_in(id: Uuid, status: TransactionStatus) -> EngineError {
    EngineError::StateConflict(format!("Transaction {} is already in {} state", id, status))
}
