//! Error definitions for the relayer core.
//!
//! Errors are grouped by subsystem and rolled up into [`AppError`].
//! The resilient RPC caller uses [`AppError::is_transient`] to decide
//! whether a failed chain or rail call may be retried.

use thiserror::Error;

/// Top-level application error
#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("rail error: {0}")]
    Rail(#[from] RailError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl AppError {
    /// Whether the error is a transient infrastructure failure that may
    /// succeed on retry. Input errors and settlement rejections are final.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Chain(e) => matches!(
                e,
                ChainError::Network(_)
                    | ChainError::Timeout(_)
                    | ChainError::RateLimited(_)
                    | ChainError::Rpc { .. }
            ),
            Self::Rail(e) => matches!(e, RailError::Network(_) | RailError::RateLimited(_)),
            _ => false,
        }
    }
}

/// Errors from the persisted mirror store
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("record not found: {0}")]
    NotFound(String),
}

/// Errors from chain-node RPC calls
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    #[error("event decode failed: {0}")]
    EventDecode(String),
}

/// Errors from the settlement rail and destination-chain minting
#[derive(Debug, Error)]
pub enum RailError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("intent rejected by rail: {0}")]
    Rejected(String),

    #[error("no minter configured for chain {0}")]
    UnsupportedChain(i64),

    #[error("destination mint failed: {0}")]
    Mint(String),
}

/// Input and state-machine validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid {field}: {message}")]
    InvalidField { field: String, message: String },

    #[error("request {request_id} is in status {status}, expected approved or executing")]
    InvalidStatus { request_id: i64, status: String },
}

/// Configuration errors raised during startup wiring
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing configuration: {0}")]
    Missing(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
