//! Error types for the spy relayer

use thiserror::Error;

/// Main error type for the relayer
#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: u16, message: String },

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    #[error("Invalid VAA: {0}")]
    InvalidVaa(String),

    #[error("Payload parsing error: {0}")]
    PayloadParsing(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Chain {chain_id} not supported")]
    UnsupportedChain { chain_id: u16 },

    #[error("Operation not supported: {0}")]
    UnsupportedOperation(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayerError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayerError::Redis(_)
                | RelayerError::Store(_)
                | RelayerError::ChainConnection { .. }
                | RelayerError::Transaction(_)
                | RelayerError::GasEstimation(_)
                | RelayerError::Timeout { .. }
        )
    }

    /// Errors that can never succeed on a later attempt
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RelayerError::InvalidVaa(_)
                | RelayerError::PayloadParsing(_)
                | RelayerError::UnsupportedChain { .. }
                | RelayerError::UnsupportedOperation(_)
        )
    }
}

/// Result type for relayer operations
pub type RelayerResult<T> = Result<T, RelayerError>;
