use chain_gateway::FeeEstimate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::error::CycleError;

pub use chain_gateway::TransferAsset as TokenType;

/// Registered bot strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "bot_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BotType {
    Volume,
    Accumulator,
}

impl fmt::Display for BotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotType::Volume => write!(f, "volume"),
            BotType::Accumulator => write!(f, "accumulator"),
        }
    }
}

/// Execution lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "execution_status", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Counts against the admission limit
    pub fn is_active(&self) -> bool {
        matches!(self, ExecutionStatus::Pending | ExecutionStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// How many cycles to run and how long to pause between them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub repeat_count: u32,
    #[serde(default)]
    pub interval_seconds: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            repeat_count: 1,
            interval_seconds: 0,
        }
    }
}

/// Durable record of one bot run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub bot_type: BotType,
    pub params: Value,
    pub wallet_id: Uuid,
    pub request_id: Option<String>,
    pub config: ExecutionConfig,
    pub status: ExecutionStatus,
    pub total_cycles: u32,
    pub successful_cycles: u32,
    pub failed_cycles: u32,
    pub execution_duration_ms: Option<u64>,
    pub bot_specific_results: Option<Value>,
    pub errors: Vec<CycleError>,
    /// Run-level failure, distinct from per-cycle errors
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn new_pending(
        bot_type: BotType,
        params: Value,
        wallet_id: Uuid,
        config: ExecutionConfig,
        request_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            bot_type,
            params,
            wallet_id,
            request_id,
            config,
            status: ExecutionStatus::Pending,
            total_cycles: 0,
            successful_cycles: 0,
            failed_cycles: 0,
            execution_duration_ms: None,
            bot_specific_results: None,
            errors: Vec::new(),
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    pub fn mark_running(&mut self) {
        let now = Utc::now();
        self.status = ExecutionStatus::Running;
        self.started_at = Some(now);
        self.updated_at = now;
    }

    /// Terminal state without a result, counters stay as they are
    pub fn mark_terminal(&mut self, status: ExecutionStatus, message: Option<String>) {
        let now = Utc::now();
        self.status = status;
        self.error_message = message;
        self.completed_at = Some(now);
        self.updated_at = now;
    }
}

/// Where a transfer goes, exactly one of the two
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Destination {
    Wallet { wallet_id: Uuid },
    Address { address: String },
}

impl Destination {
    /// Build from the two optional request fields
    pub fn from_parts(wallet_id: Option<Uuid>, address: Option<String>) -> Option<Self> {
        match (wallet_id, address) {
            (Some(wallet_id), None) => Some(Destination::Wallet { wallet_id }),
            (None, Some(address)) => Some(Destination::Address { address }),
            _ => None,
        }
    }

    pub fn wallet_id(&self) -> Option<Uuid> {
        match self {
            Destination::Wallet { wallet_id } => Some(*wallet_id),
            Destination::Address { .. } => None,
        }
    }

    pub fn address(&self) -> Option<&str> {
        match self {
            Destination::Wallet { .. } => None,
            Destination::Address { address } => Some(address),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "transaction_status", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Draft,
    Pending,
    Confirmed,
    Failed,
    Cancelled,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::Draft => "DRAFT",
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Confirmed => "CONFIRMED",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// A validated transfer intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftTransaction {
    pub id: Uuid,
    pub from_wallet_id: Uuid,
    pub destination: Destination,
    /// Amount in base units of `token`
    pub amount: u64,
    pub token: TokenType,
    pub fee: FeeEstimate,
    pub status: TransactionStatus,
    pub signature: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DraftTransaction {
    pub fn new_draft(
        from_wallet_id: Uuid,
        destination: Destination,
        amount: u64,
        token: TokenType,
        fee: FeeEstimate,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            from_wallet_id,
            destination,
            amount,
            token,
            fee,
            status: TransactionStatus::Draft,
            signature: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            submitted_at: None,
            completed_at: None,
        }
    }

    pub fn confirm(&mut self, signature: String) {
        let now = Utc::now();
        self.status = TransactionStatus::Confirmed;
        self.signature = Some(signature);
        self.error_message = None;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    pub fn fail(&mut self, message: String) {
        let now = Utc::now();
        self.status = TransactionStatus::Failed;
        self.error_message = Some(message);
        self.completed_at = Some(now);
        self.updated_at = now;
    }
}

/// Wallet known to the control plane, keys are held elsewhere
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: Uuid,
    pub label: String,
    pub pubkey: String,
    pub is_active: bool,
    pub last_balance: Option<u64>,
    pub balance_updated_at: Option<DateTime<Utc>>,
}

impl Wallet {
    pub fn new(label: &str, pubkey: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.to_string(),
            pubkey: pubkey.to_string(),
            is_active: true,
            last_balance: None,
            balance_updated_at: None,
        }
    }
}

pub const DEFAULT_LIST_LIMIT: u32 = 50;
pub const MAX_LIST_LIMIT: u32 = 500;

fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

/// Execution listing: by id, by wallet or most recent
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionFilter {
    pub id: Option<Uuid>,
    pub wallet_id: Option<Uuid>,
    pub limit: Option<u32>,
}

impl ExecutionFilter {
    pub fn limit(&self) -> u32 {
        clamp_limit(self.limit)
    }

    pub fn matches(&self, record: &ExecutionRecord) -> bool {
        self.id.map_or(true, |id| record.id == id)
            && self.wallet_id.map_or(true, |w| record.wallet_id == w)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionFilter {
    pub wallet_id: Option<Uuid>,
    pub limit: Option<u32>,
}

impl TransactionFilter {
    pub fn limit(&self) -> u32 {
        clamp_limit(self.limit)
    }

    pub fn matches(&self, tx: &DraftTransaction) -> bool {
        self.wallet_id.map_or(true, |w| {
            tx.from_wallet_id == w || tx.destination.wallet_id() == Some(w)
        })
    }
}
