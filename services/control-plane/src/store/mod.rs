//! Persistence seams
//!
//! The engine only sees these traits. `MemoryStore` backs tests and the
//! database-less mode, `PgStore` backs production.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    DraftTransaction, ExecutionFilter, ExecutionRecord, ExecutionStatus, TransactionFilter,
    TransactionStatus, Wallet,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::{init_db, Db, PgStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt row {id}: {reason}")]
    Corrupt { id: Uuid, reason: String },

    #[error("Value out of range for column {column}: {value}")]
    OutOfRange { column: &'static str, value: u64 },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn insert_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError>;

    async fn get_execution(&self, id: Uuid) -> Result<Option<ExecutionRecord>, StoreError>;

    /// Replace the whole record in one write, unless the stored record is
    /// already terminal. Returns false when nothing was written.
    async fn update_execution(&self, record: &ExecutionRecord) -> Result<bool, StoreError>;

    /// Compare-and-set from PENDING/RUNNING to a terminal `status`, counters
    /// untouched. Returns false when the record was not active.
    async fn finish_execution(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        message: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Records in PENDING or RUNNING
    async fn count_active(&self) -> Result<u64, StoreError>;

    async fn list_active(&self) -> Result<Vec<ExecutionRecord>, StoreError>;

    /// Newest first
    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<ExecutionRecord>, StoreError>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert_transaction(&self, tx: &DraftTransaction) -> Result<(), StoreError>;

    async fn get_transaction(&self, id: Uuid) -> Result<Option<DraftTransaction>, StoreError>;

    /// Compare-and-set on status. Returns false when the record was not in `from`.
    /// Moving to PENDING also stamps `submitted_at`.
    async fn transition_status(
        &self,
        id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn update_transaction(&self, tx: &DraftTransaction) -> Result<(), StoreError>;

    /// Newest first
    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<DraftTransaction>, StoreError>;
}

#[async_trait]
pub trait WalletDirectory: Send + Sync {
    async fn get_wallet(&self, id: Uuid) -> Result<Option<Wallet>, StoreError>;

    async fn record_balance(&self, id: Uuid, lamports: u64) -> Result<(), StoreError>;
}
