//! Engine error taxonomy

use chain_gateway::GatewayError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad bot params or transaction inputs, raised before any work starts
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Maximum concurrent bots reached (limit {limit})")]
    AdmissionRejected { limit: u64 },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("State conflict: {0}")]
    StateConflict(String),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: u64, available: u64 },

    #[error(transparent)]
    Rpc(#[from] GatewayError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// One failed cycle, kept in the execution record's error list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleError {
    pub cycle: u32,
    pub message: String,
}

impl CycleError {
    pub fn new(cycle: u32, message: impl Into<String>) -> Self {
        Self {
            cycle,
            message: message.into(),
        }
    }
}
