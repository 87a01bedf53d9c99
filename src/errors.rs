//! Error types for the grid core.

use thiserror::Error;

/// Errors surfaced by the grid core and its chain boundary.
#[derive(Error, Debug, Clone)]
pub enum BotError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Amount {value} out of chain range at precision {precision}")]
    AmountOutOfRange { value: f64, precision: u32 },

    #[error("Grid undersized: {0}")]
    UndersizedGrid(String),

    #[error("Chain error: {0}")]
    ChainTransient(String),

    #[error("Not found on chain: {0}")]
    ChainNotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    #[error("Channel closed: {0}")]
    Channel(String),

    #[error("Invalid state for operation: {0}")]
    InvalidState(String),
}

impl From<serde_json::Error> for BotError {
    fn from(err: serde_json::Error) -> Self {
        BotError::Persistence(err.to_string())
    }
}

impl From<std::io::Error> for BotError {
    fn from(err: std::io::Error) -> Self {
        BotError::Persistence(err.to_string())
    }
}

/// Result type for grid operations.
pub type BotResult<T> = std::result::Result<T, BotError>;
