//! In-memory store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ExecutionStore, StoreError, TransactionStore, WalletDirectory};
use crate::models::{
    DraftTransaction, ExecutionFilter, ExecutionRecord, ExecutionStatus, TransactionFilter,
    TransactionStatus, Wallet,
};

#[derive(Default)]
pub struct MemoryStore {
    executions: RwLock<HashMap<Uuid, ExecutionRecord>>,
    transactions: RwLock<HashMap<Uuid, DraftTransaction>>,
    wallets: RwLock<HashMap<Uuid, Wallet>>,
    /// Number of upcoming execution updates that fail
    failing_updates: AtomicU32,
    /// Number of upcoming transaction updates that fail
    failing_tx_updates: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_wallet(&self, wallet: Wallet) {
        self.wallets.write().await.insert(wallet.id, wallet);
    }

    /// Make the next `count` calls to `update_execution` fail
    pub fn fail_next_updates(&self, count: u32) {
        self.failing_updates.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` calls to `update_transaction` fail
    pub fn fail_next_transaction_updates(&self, count: u32) {
        self.failing_tx_updates.store(count, Ordering::SeqCst);
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn injected() -> StoreError {
    StoreError::Unavailable("injected update failure".to_string())
}

fn newest_first<T>(mut items: Vec<T>, created: impl Fn(&T) -> DateTime<Utc>, limit: u32) -> Vec<T> {
    items.sort_by(|a, b| created(b).cmp(&created(a)));
    items.truncate(limit as usize);
    items
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn insert_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        self.executions
            .write()
            .await
            .insert(record.id, record.clone());
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<ExecutionRecord>, StoreError> {
        Ok(self.executions.read().await.get(&id).cloned())
    }

    async fn update_execution(&self, record: &ExecutionRecord) -> Result<bool, StoreError> {
        if take_failure(&self.failing_updates) {
            return Err(injected());
        }
        let mut executions = self.executions.write().await;
        match executions.get_mut(&record.id) {
            Some(stored) if stored.status.is_active() => {
                *stored = record.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finish_execution(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        message: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut executions = self.executions.write().await;
        match executions.get_mut(&id) {
            Some(stored) if stored.status.is_active() => {
                stored.status = status;
                stored.error_message = message;
                stored.completed_at = Some(at);
                stored.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn count_active(&self) -> Result<u64, StoreError> {
        let executions = self.executions.read().await;
        Ok(executions.values().filter(|r| r.status.is_active()).count() as u64)
    }

    async fn list_active(&self) -> Result<Vec<ExecutionRecord>, StoreError> {
        let executions = self.executions.read().await;
        Ok(executions
            .values()
            .filter(|r| r.status.is_active())
            .cloned()
            .collect())
    }

    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let executions = self.executions.read().await;
        let matching = executions
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        Ok(newest_first(matching, |r| r.created_at, filter.limit()))
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn insert_transaction(&self, tx: &DraftTransaction) -> Result<(), StoreError> {
        self.transactions.write().await.insert(tx.id, tx.clone());
        Ok(())
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<DraftTransaction>, StoreError> {
        Ok(self.transactions.read().await.get(&id).cloned())
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut transactions = self.transactions.write().await;
        match transactions.get_mut(&id) {
            Some(tx) if tx.status == from => {
                tx.status = to;
                tx.updated_at = at;
                if to == TransactionStatus::Pending {
                    tx.submitted_at = Some(at);
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_transaction(&self, tx: &DraftTransaction) -> Result<(), StoreError> {
        if take_failure(&self.failing_tx_updates) {
            return Err(injected());
        }
        self.transactions.write().await.insert(tx.id, tx.clone());
        Ok(())
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<DraftTransaction>, StoreError> {
        let transactions = self.transactions.read().await;
        let matching = transactions
            .values()
            .filter(|tx| filter.matches(tx))
            .cloned()
            .collect();
        Ok(newest_first(matching, |tx| tx.created_at, filter.limit()))
    }
}

#[async_trait]
impl WalletDirectory for MemoryStore {
    async fn get_wallet(&self, id: Uuid) -> Result<Option<Wallet>, StoreError> {
        Ok(self.wallets.read().await.get(&id).cloned())
    }

    async fn record_balance(&self, id: Uuid, lamports: u64) -> Result<(), StoreError> {
        if let Some(wallet) = self.wallets.write().await.get_mut(&id) {
            wallet.last_balance = Some(lamports);
            wallet.balance_updated_at = Some(Utc::now());
        }
        Ok(())
    }
}
