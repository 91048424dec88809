//! Core traits - Seams for broker adapters and account state

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

use crate::core::types::{BrokerOrder, ExecutionReport, Symbol};

/// Failure reported by (or at) the broker boundary
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BrokerError {
    /// Broker refused the order
    #[error("broker rejected order: {0}")]
    Rejected(String),

    /// No response within the configured timeout
    #[error("broker did not respond within {0:?}")]
    Timeout(Duration),

    /// Connectivity or adapter-internal failure
    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

/// Broker trait - the execution callback boundary.
///
/// Adapters (paper, real brokerage) implement this; the engine only ever
/// sees normalized orders and reports.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Adapter name (e.g., "paper")
    fn name(&self) -> &str;

    /// Place a validated order
    async fn place_order(&self, order: &BrokerOrder) -> Result<ExecutionReport, BrokerError>;
}

/// Account state snapshot used by the risk gate.
///
/// Owned by the caller/broker layer; the engine reads it but never stores it.
pub trait AccountSnapshot: Send + Sync {
    /// Signed position currently held in `symbol`
    fn current_position(&self, symbol: &Symbol) -> Decimal;

    /// Realized + unrealized P&L for the current trading day
    fn daily_pnl(&self) -> Decimal;

    /// Price a market order in `symbol` is expected to fill at, if known
    fn reference_price(&self, symbol: &Symbol) -> Option<Decimal>;
}
