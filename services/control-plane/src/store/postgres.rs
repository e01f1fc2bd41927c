//! Postgres-backed store

use async_trait::async_trait;
use chain_gateway::FeeEstimate;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, Pool, Postgres};
use std::time::Duration;
use uuid::Uuid;

use super::{ExecutionStore, StoreError, TransactionStore, WalletDirectory};
use crate::error::CycleError;
use crate::models::{
    BotType, Destination, DraftTransaction, ExecutionConfig, ExecutionFilter, ExecutionRecord,
    ExecutionStatus, TokenType, TransactionFilter, TransactionStatus, Wallet,
};

pub type Db = Pool<Postgres>;

pub async fn init_db(database_url: &str) -> Result<Db, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(3))
        .connect(database_url)
        .await?;

    Ok(pool)
}

#[derive(Clone)]
pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").fetch_one(&self.db).await?;
        Ok(())
    }
}

const EXECUTION_COLUMNS: &str = "id, bot_type, params, wallet_id, request_id, repeat_count, \
    interval_seconds, status, total_cycles, successful_cycles, failed_cycles, \
    execution_duration_ms, bot_specific_results, errors, error_message, created_at, \
    started_at, completed_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, from_wallet_id, to_wallet_id, to_address, amount, token, \
    base_fee, priority_fee, status, signature, error_message, created_at, updated_at, \
    submitted_at, completed_at";

#[derive(FromRow)]
struct ExecutionRow {
    id: Uuid,
    bot_type: BotType,
    params: Json<Value>,
    wallet_id: Uuid,
    request_id: Option<String>,
    repeat_count: i32,
    interval_seconds: i64,
    status: ExecutionStatus,
    total_cycles: i32,
    successful_cycles: i32,
    failed_cycles: i32,
    execution_duration_ms: Option<i64>,
    bot_specific_results: Option<Json<Value>>,
    errors: Json<Vec<CycleError>>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct TransactionRow {
    id: Uuid,
    from_wallet_id: Uuid,
    to_wallet_id: Option<Uuid>,
    to_address: Option<String>,
    amount: i64,
    token: Json<TokenType>,
    base_fee: i64,
    priority_fee: i64,
    status: TransactionStatus,
    signature: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    submitted_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

#[derive(FromRow)]
struct WalletRow {
    id: Uuid,
    label: String,
    pubkey: String,
    is_active: bool,
    last_balance: Option<i64>,
    balance_updated_at: Option<DateTime<Utc>>,
}

fn unsigned<T: TryFrom<i64>>(id: Uuid, column: &str, value: i64) -> Result<T, StoreError> {
    T::try_from(value).map_err(|_| StoreError::Corrupt {
        id,
        reason: format!("{} is {}", column, value),
    })
}

fn signed<T: Into<u64> + Copy>(column: &'static str, value: T) -> Result<i64, StoreError> {
    let value = value.into();
    i64::try_from(value).map_err(|_| StoreError::OutOfRange { column, value })
}

impl TryFrom<ExecutionRow> for ExecutionRecord {
    type Error = StoreError;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        let id = row.id;
        Ok(ExecutionRecord {
            id,
            bot_type: row.bot_type,
            params: row.params.0,
            wallet_id: row.wallet_id,
            request_id: row.request_id,
            config: ExecutionConfig {
                repeat_count: unsigned(id, "repeat_count", row.repeat_count.into())?,
                interval_seconds: unsigned(id, "interval_seconds", row.interval_seconds)?,
            },
            status: row.status,
            total_cycles: unsigned(id, "total_cycles", row.total_cycles.into())?,
            successful_cycles: unsigned(id, "successful_cycles", row.successful_cycles.into())?,
            failed_cycles: unsigned(id, "failed_cycles", row.failed_cycles.into())?,
            execution_duration_ms: row
                .execution_duration_ms
                .map(|ms| unsigned(id, "execution_duration_ms", ms))
                .transpose()?,
            bot_specific_results: row.bot_specific_results.map(|json| json.0),
            errors: row.errors.0,
            error_message: row.error_message,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<TransactionRow> for DraftTransaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let destination =
            Destination::from_parts(row.to_wallet_id, row.to_address).ok_or_else(|| {
                StoreError::Corrupt {
                    id,
                    reason: "destination must be exactly one of wallet or address".to_string(),
                }
            })?;

        Ok(DraftTransaction {
            id,
            from_wallet_id: row.from_wallet_id,
            destination,
            amount: unsigned(id, "amount", row.amount)?,
            token: row.token.0,
            fee: FeeEstimate {
                base_fee: unsigned(id, "base_fee", row.base_fee)?,
                priority_fee: unsigned(id, "priority_fee", row.priority_fee)?,
            },
            status: row.status,
            signature: row.signature,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            submitted_at: row.submitted_at,
            completed_at: row.completed_at,
        })
    }
}

impl TryFrom<WalletRow> for Wallet {
    type Error = StoreError;

    fn try_from(row: WalletRow) -> Result<Self, Self::Error> {
        Ok(Wallet {
            id: row.id,
            label: row.label,
            pubkey: row.pubkey,
            is_active: row.is_active,
            last_balance: row
                .last_balance
                .map(|b| unsigned(row.id, "last_balance", b))
                .transpose()?,
            balance_updated_at: row.balance_updated_at,
        })
    }
}

fn counter(column: &'static str, value: u32) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::OutOfRange {
        column,
        value: value.into(),
    })
}

#[async_trait]
impl ExecutionStore for PgStore {
    async fn insert_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO bot_executions (
                id, bot_type, params, wallet_id, request_id, repeat_count, interval_seconds,
                status, errors, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.id)
        .bind(record.bot_type)
        .bind(Json(&record.params))
        .bind(record.wallet_id)
        .bind(&record.request_id)
        .bind(counter("repeat_count", record.config.repeat_count)?)
        .bind(signed("interval_seconds", record.config.interval_seconds)?)
        .bind(record.status)
        .bind(Json(&record.errors))
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<ExecutionRecord>, StoreError> {
        let row = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {} FROM bot_executions WHERE id = $1",
            EXECUTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        row.map(ExecutionRecord::try_from).transpose()
    }

    async fn update_execution(&self, record: &ExecutionRecord) -> Result<bool, StoreError> {
        let duration = record
            .execution_duration_ms
            .map(|ms| signed("execution_duration_ms", ms))
            .transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE bot_executions SET
                status = $2,
                total_cycles = $3,
                successful_cycles = $4,
                failed_cycles = $5,
                execution_duration_ms = $6,
                bot_specific_results = $7,
                errors = $8,
                error_message = $9,
                started_at = $10,
                completed_at = $11,
                updated_at = $12
            WHERE id = $1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(record.id)
        .bind(record.status)
        .bind(counter("total_cycles", record.total_cycles)?)
        .bind(counter("successful_cycles", record.successful_cycles)?)
        .bind(counter("failed_cycles", record.failed_cycles)?)
        .bind(duration)
        .bind(record.bot_specific_results.as_ref().map(Json))
        .bind(Json(&record.errors))
        .bind(&record.error_message)
        .bind(record.started_at)
        .bind(record.completed_at)
        .bind(record.updated_at)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn finish_execution(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        message: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE bot_executions
            SET status = $2, error_message = $3, completed_at = $4, updated_at = $4
            WHERE id = $1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(message)
        .bind(at)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn count_active(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM bot_executions WHERE status IN ('pending', 'running')",
        )
        .fetch_one(&self.db)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn list_active(&self) -> Result<Vec<ExecutionRecord>, StoreError> {
        let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {} FROM bot_executions WHERE status IN ('pending', 'running')",
            EXECUTION_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(ExecutionRecord::try_from).collect()
    }

    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
            r#"
            SELECT {} FROM bot_executions
            WHERE ($1::uuid IS NULL OR id = $1)
              AND ($2::uuid IS NULL OR wallet_id = $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#,
            EXECUTION_COLUMNS
        ))
        .bind(filter.id)
        .bind(filter.wallet_id)
        .bind(i64::from(filter.limit()))
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(ExecutionRecord::try_from).collect()
    }
}

#[async_trait]
impl TransactionStore for PgStore {
    async fn insert_transaction(&self, tx: &DraftTransaction) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO draft_transactions (
                id, from_wallet_id, to_wallet_id, to_address, amount, token,
                base_fee, priority_fee, status, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(tx.id)
        .bind(tx.from_wallet_id)
        .bind(tx.destination.wallet_id())
        .bind(tx.destination.address())
        .bind(signed("amount", tx.amount)?)
        .bind(Json(&tx.token))
        .bind(signed("base_fee", tx.fee.base_fee)?)
        .bind(signed("priority_fee", tx.fee.priority_fee)?)
        .bind(tx.status)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<DraftTransaction>, StoreError> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM draft_transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        row.map(DraftTransaction::try_from).transpose()
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let submitted_at = (to == TransactionStatus::Pending).then_some(at);

        let result = sqlx::query(
            r#"
            UPDATE draft_transactions
            SET status = $3, updated_at = $4, submitted_at = COALESCE($5, submitted_at)
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(at)
        .bind(submitted_at)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_transaction(&self, tx: &DraftTransaction) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE draft_transactions SET
                status = $2,
                signature = $3,
                error_message = $4,
                base_fee = $5,
                priority_fee = $6,
                updated_at = $7,
                submitted_at = $8,
                completed_at = $9
            WHERE id = $1
            "#,
        )
        .bind(tx.id)
        .bind(tx.status)
        .bind(&tx.signature)
        .bind(&tx.error_message)
        .bind(signed("base_fee", tx.fee.base_fee)?)
        .bind(signed("priority_fee", tx.fee.priority_fee)?)
        .bind(tx.updated_at)
        .bind(tx.submitted_at)
        .bind(tx.completed_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<DraftTransaction>, StoreError> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            SELECT {} FROM draft_transactions
            WHERE ($1::uuid IS NULL OR from_wallet_id = $1 OR to_wallet_id = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(filter.wallet_id)
        .bind(i64::from(filter.limit()))
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(DraftTransaction::try_from).collect()
    }
}

#[async_trait]
impl WalletDirectory for PgStore {
    async fn get_wallet(&self, id: Uuid) -> Result<Option<Wallet>, StoreError> {
        let row = sqlx::query_as::<_, WalletRow>(
            "SELECT id, label, pubkey, is_active, last_balance, balance_updated_at \
             FROM wallets WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        row.map(Wallet::try_from).transpose()
    }

    async fn record_balance(&self, id: Uuid, lamports: u64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE wallets SET last_balance = $2, balance_updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(signed("last_balance", lamports)?)
        .execute(&self.db)
        .await?;

        Ok(())
    }
}
