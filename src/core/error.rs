//! Error handling - Crate-level errors; each layer keeps its own enum
//! (`ValidationError`, `RiskError`, `StrategyError`, `ExecutionError`).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Engine setup error
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors (caller misuse, never retried)
    #[error("Configuration error: {0}")]
    Config(String),
}
