//! Quanta Engine - Core Library
//! Order validation, risk gating, strategy registry and broker execution

// Public modules
pub mod core;
pub mod exchanges;
pub mod execution;
pub mod risk;
pub mod strategies;
pub mod validation;

// Re-exports
pub use crate::core::{Config, Error, Result};
pub use execution::{ExecutionError, OrderExecutor};
pub use risk::RiskValidator;
pub use strategies::{StrategyManager, StrategyStatus};
pub use validation::{OrderValidator, ValidationError, ValidationRule};
