//! Order validation - Symbol, per-order-type range and staleness checks

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::core::{Error, Order, OrderType, Result, Symbol};

/// Orders older than this are rejected as stale.
pub const DEFAULT_MAX_ORDER_AGE: Duration = Duration::from_secs(60);

/// Reason an order failed validation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("unknown symbol {0}")]
    UnknownSymbol(Symbol),

    #[error("no validation rule for order type {0}")]
    UnsupportedOrderType(OrderType),

    #[error("quantity {quantity} outside [{min}, {max}]")]
    QuantityOutOfRange {
        quantity: Decimal,
        min: Decimal,
        max: Decimal,
    },

    #[error("price {price} outside [{min}, {max}]")]
    PriceOutOfRange {
        price: Decimal,
        min: Decimal,
        max: Decimal,
    },

    #[error("order is {age:?} old, limit is {max_age:?}")]
    StaleOrder { age: Duration, max_age: Duration },
}

/// Admissible numeric range for one order type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationRule {
    pub min_quantity: Decimal,
    pub max_quantity: Decimal,
    pub min_price: Decimal,
    pub max_price: Decimal,
}

impl ValidationRule {
    pub fn new(
        min_quantity: Decimal,
        max_quantity: Decimal,
        min_price: Decimal,
        max_price: Decimal,
    ) -> Self {
        Self {
            min_quantity,
            max_quantity,
            min_price,
            max_price,
        }
    }

    /// Rule with no upper price bound.
    pub fn with_unbounded_price(
        min_quantity: Decimal,
        max_quantity: Decimal,
        min_price: Decimal,
    ) -> Self {
        Self::new(min_quantity, max_quantity, min_price, Decimal::MAX)
    }

    fn check_quantity(&self, quantity: Decimal) -> std::result::Result<(), ValidationError> {
        if quantity <= Decimal::ZERO || quantity < self.min_quantity || quantity > self.max_quantity {
            return Err(ValidationError::QuantityOutOfRange {
                quantity,
                min: self.min_quantity,
                max: self.max_quantity,
            });
        }
        Ok(())
    }

    fn check_price(&self, price: Decimal) -> std::result::Result<(), ValidationError> {
        if price <= Decimal::ZERO || price < self.min_price || price > self.max_price {
            return Err(ValidationError::PriceOutOfRange {
                price,
                min: self.min_price,
                max: self.max_price,
            });
        }
        Ok(())
    }
}

/// Rule engine for inbound orders.
///
/// Configured once at startup through [`add_symbol`](Self::add_symbol) and
/// [`set_rule`](Self::set_rule), then shared read-only: validation takes
/// `&self` and keeps no per-call state.
#[derive(Debug, Clone)]
pub struct OrderValidator {
    symbols: HashSet<Symbol>,
    rules: HashMap<OrderType, ValidationRule>,
    max_age: Duration,
}

impl OrderValidator {
    pub fn new() -> Self {
        Self {
            symbols: HashSet::new(),
            rules: HashMap::new(),
            max_age: DEFAULT_MAX_ORDER_AGE,
        }
    }

    /// Override the staleness threshold.
    pub fn with_staleness(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Register a tradeable symbol.
    pub fn add_symbol(&mut self, symbol: impl Into<Symbol>) -> Result<()> {
        let symbol = symbol.into();
        if symbol.is_empty() {
            return Err(Error::Config("symbol must not be empty".into()));
        }
        debug!(%symbol, "registered symbol");
        self.symbols.insert(symbol);
        Ok(())
    }

    /// Register (or replace) the rule for an order type.
    pub fn set_rule(&mut self, order_type: OrderType, rule: ValidationRule) -> Result<()> {
        if rule.min_quantity > rule.max_quantity {
            return Err(Error::Config(format!(
                "{order_type} rule: min_quantity {} exceeds max_quantity {}",
                rule.min_quantity, rule.max_quantity
            )));
        }
        if rule.min_price > rule.max_price {
            return Err(Error::Config(format!(
                "{order_type} rule: min_price {} exceeds max_price {}",
                rule.min_price, rule.max_price
            )));
        }
        debug!(%order_type, ?rule, "registered validation rule");
        self.rules.insert(order_type, rule);
        Ok(())
    }

    pub fn has_symbol(&self, symbol: &Symbol) -> bool {
        self.symbols.contains(symbol)
    }

    /// Registered symbols, sorted.
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<_> = self.symbols.iter().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn rule(&self, order_type: OrderType) -> Option<&ValidationRule> {
        self.rules.get(&order_type)
    }

    /// Validate against the current wall clock.
    pub fn validate(&self, order: &Order) -> std::result::Result<(), ValidationError> {
        self.validate_at(order, Utc::now())
    }

    /// Validate as of `now`. Checks run in a fixed order and the first
    /// failure wins: symbol, rule, quantity, price, staleness.
    pub fn validate_at(
        &self,
        order: &Order,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), ValidationError> {
        let result = self.check(order, now);
        if let Err(reason) = &result {
            debug!(order_id = %order.id, %reason, "order rejected");
        }
        result
    }

    fn check(&self, order: &Order, now: DateTime<Utc>) -> std::result::Result<(), ValidationError> {
        if !self.symbols.contains(&order.symbol) {
            return Err(ValidationError::UnknownSymbol(order.symbol.clone()));
        }

        let rule = self
            .rules
            .get(&order.order_type)
            .ok_or(ValidationError::UnsupportedOrderType(order.order_type))?;

        rule.check_quantity(order.quantity)?;

        // Market orders fill at whatever the book offers
        if order.order_type.is_priced() {
            rule.check_price(order.price)?;
        }

        // Future timestamps count as fresh
        let age = (now - order.timestamp).to_std().unwrap_or(Duration::ZERO);
        if age > self.max_age {
            return Err(ValidationError::StaleOrder {
                age,
                max_age: self.max_age,
            });
        }

        Ok(())
    }

    /// Validate every order independently. Returns `(index, reason)` for
    /// each rejected order, in input order; empty means all passed.
    pub fn validate_multiple(&self, orders: &[Order]) -> Vec<(usize, ValidationError)> {
        let now = Utc::now();
        let errors: Vec<_> = orders
            .iter()
            .enumerate()
            .filter_map(|(index, order)| {
                self.validate_at(order, now)
                    .err()
                    .map(|reason| (index, reason))
            })
            .collect();

        debug!(
            total = orders.len(),
            rejected = errors.len(),
            "batch validation finished"
        );
        errors
    }
}

impl Default for OrderValidator {
    fn default() -> Self {
        Self::new()
    }
}
