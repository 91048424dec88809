//! Execution layer - validate-then-dispatch order pipeline

pub mod executor;

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

use crate::core::BrokerError;
use crate::risk::RiskError;
use crate::strategies::{StrategyError, StrategyStatus};
use crate::validation::ValidationError;

pub use executor::OrderExecutor;

/// Why an order did not complete.
///
/// `Validation`, `Risk` and the strategy variants are raised before the
/// broker is contacted; `Broker` only ever follows a successful validation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("order rejected: {0}")]
    Validation(#[from] ValidationError),

    #[error("risk limit hit: {0}")]
    Risk(#[from] RiskError),

    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error("strategy {strategy_id} is {status}, not dispatching")]
    StrategyInactive {
        strategy_id: String,
        status: StrategyStatus,
    },

    #[error("execution failed: {0}")]
    Broker(#[from] BrokerError),
}

impl ExecutionError {
    pub fn is_validation(&self) -> bool {
        matches!(self, ExecutionError::Validation(_))
    }

    /// True when the order passed every engine check and the broker failed.
    pub fn is_broker(&self) -> bool {
        matches!(self, ExecutionError::Broker(_))
    }
}

/// Per-order lifecycle: `Pending → Validated → Dispatched → Completed`,
/// or `Pending → Rejected`. `Failed` is a broker failure after dispatch.
/// Every order enters as `Pending` and leaves through exactly one terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderState {
    Pending,
    Validated,
    Rejected,
    Dispatched,
    Completed,
    Failed,
}

impl OrderState {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderState::Rejected | OrderState::Completed | OrderState::Failed)
    }
}

/// Snapshot of executor counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionStats {
    pub received: u64,
    pub validated: u64,
    pub rejected: u64,
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Default)]
pub(crate) struct StateCounters {
    received: AtomicU64,
    validated: AtomicU64,
    rejected: AtomicU64,
    dispatched: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl StateCounters {
    pub(crate) fn record(&self, state: OrderState) {
        let counter = match state {
            OrderState::Pending => &self.received,
            OrderState::Validated => &self.validated,
            OrderState::Rejected => &self.rejected,
            OrderState::Dispatched => &self.dispatched,
            OrderState::Completed => &self.completed,
            OrderState::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ExecutionStats {
        ExecutionStats {
            received: self.received.load(Ordering::Relaxed),
            validated: self.validated.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
