use thiserror::Error;

/// Errors surfaced by any gateway implementation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    /// Transport-level errors (network, connection)
    #[error("Transport error calling {method}: {message}")]
    Transport { method: String, message: String },

    #[error("Timeout after {timeout_ms}ms calling {method}")]
    Timeout { method: String, timeout_ms: u64 },

    /// Error object returned by the RPC node (or HTTP status when no body)
    #[error("RPC error from {method} (code {code}): {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("Transaction {signature} failed: {reason}")]
    TransactionFailed { signature: String, reason: String },

    #[error("Transaction {signature} not confirmed within {timeout_secs}s")]
    NotConfirmed { signature: String, timeout_secs: u64 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl GatewayError {
    /// Check if this error is worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Transport { .. } => true,
            GatewayError::Timeout { .. } => true,
            // 429, 5xx and the node's server-side JSON-RPC range
            GatewayError::Rpc { code, .. } => {
                *code == 429 || (500..600).contains(code) || (-32099..=-32000).contains(code)
            }
            GatewayError::InsufficientFunds { .. } => false,
            GatewayError::TransactionFailed { .. } => false,
            GatewayError::NotConfirmed { .. } => false,
            GatewayError::InvalidInput(_) => false,
        }
    }

    pub fn transport(method: &str, message: impl Into<String>) -> Self {
        GatewayError::Transport {
            method: method.to_string(),
            message: message.into(),
        }
    }
}
