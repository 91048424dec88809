//! Risk Gate — portfolio-level hard limits checked before dispatch.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::core::Order;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RiskError {
    #[error("position {current} + order {delta} exceeds max position {max}")]
    PositionLimit {
        current: Decimal,
        delta: Decimal,
        max: Decimal,
    },

    #[error("daily pnl {pnl} is at or below loss floor {floor}")]
    DailyLossLimit { pnl: Decimal, floor: Decimal },

    #[error("order value {value} exceeds max {max}")]
    OrderValueLimit { value: Decimal, max: Decimal },
}

/// Risk limits. `max_daily_loss` is a magnitude; the trading floor is its
/// negation, whichever sign the caller passes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_position_size: Decimal,
    pub max_daily_loss: Decimal,
    pub max_order_value: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_size: Decimal::from(1_000),
            max_daily_loss: Decimal::from(5_000),
            max_order_value: Decimal::from(10_000),
        }
    }
}

/// Stateless risk predicate. Position and P&L are supplied by the caller on
/// every check; nothing is remembered between calls.
#[derive(Debug, Clone)]
pub struct RiskValidator {
    limits: RiskLimits,
}

impl RiskValidator {
    pub fn new(max_position_size: Decimal, max_daily_loss: Decimal, max_order_value: Decimal) -> Self {
        Self::from_limits(RiskLimits {
            max_position_size,
            max_daily_loss,
            max_order_value,
        })
    }

    pub fn from_limits(limits: RiskLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Check all gates, returning the first one that fails.
    pub fn check_order(
        &self,
        order: &Order,
        current_position: Decimal,
        daily_pnl: Decimal,
    ) -> Result<(), RiskError> {
        self.check_order_at(order, order.price, current_position, daily_pnl)
    }

    /// Same as [`check_order`](Self::check_order), valuing the order at
    /// `price` instead of its own price field.
    pub fn check_order_at(
        &self,
        order: &Order,
        price: Decimal,
        current_position: Decimal,
        daily_pnl: Decimal,
    ) -> Result<(), RiskError> {
        // 1. Position limit
        let delta = order.signed_quantity();
        let projected = current_position + delta;
        if projected.abs() > self.limits.max_position_size {
            return Err(RiskError::PositionLimit {
                current: current_position,
                delta,
                max: self.limits.max_position_size,
            });
        }

        // 2. Daily loss floor
        let floor = -self.limits.max_daily_loss.abs();
        if daily_pnl <= floor {
            return Err(RiskError::DailyLossLimit { pnl: daily_pnl, floor });
        }

        // 3. Order value (overflow counts as too large)
        let value = order.notional_at(price).unwrap_or(Decimal::MAX);
        if value > self.limits.max_order_value {
            return Err(RiskError::OrderValueLimit {
                value,
                max: self.limits.max_order_value,
            });
        }

        Ok(())
    }

    /// Boolean form of [`check_order`](Self::check_order).
    pub fn validate_order(&self, order: &Order, current_position: Decimal, daily_pnl: Decimal) -> bool {
        match self.check_order(order, current_position, daily_pnl) {
            Ok(()) => true,
            Err(e) => {
                warn!(order_id = %order.id, symbol = %order.symbol, "risk check failed: {}", e);
                false
            }
        }
    }
}

impl Default for RiskValidator {
    fn default() -> Self {
        Self::from_limits(RiskLimits::default())
    }
}
