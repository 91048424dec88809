//! Paper broker - fills everything in-process, no network

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::core::{
    AccountSnapshot, Broker, BrokerError, BrokerOrder, ExecutionReport, OrderStatus, Symbol,
};

#[derive(Default)]
struct Book {
    reference_prices: HashMap<Symbol, Decimal>,
    positions: HashMap<Symbol, Decimal>,
    daily_pnl: Decimal,
}

/// Paper broker adapter.
///
/// Priced orders fill completely at their own price; market orders fill at
/// the symbol's reference price and are rejected when none is set. Fills
/// update the tracked positions, which makes the broker usable as the
/// [`AccountSnapshot`] for the risk gate.
pub struct PaperBroker {
    name: String,
    latency: Option<Duration>,
    book: RwLock<Book>,
}

impl PaperBroker {
    pub fn new() -> Self {
        Self {
            name: "paper".to_string(),
            latency: None,
            book: RwLock::new(Book::default()),
        }
    }

    /// Simulate a round-trip delay on every order.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn set_reference_price(&self, symbol: impl Into<Symbol>, price: Decimal) {
        self.book.write().reference_prices.insert(symbol.into(), price);
    }

    pub fn set_daily_pnl(&self, pnl: Decimal) {
        self.book.write().daily_pnl = pnl;
    }

    pub fn positions(&self) -> HashMap<Symbol, Decimal> {
        self.book.read().positions.clone()
    }
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for PaperBroker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn place_order(&self, order: &BrokerOrder) -> Result<ExecutionReport, BrokerError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut book = self.book.write();
        let fill_price = match order.price {
            Some(price) => price,
            None => book
                .reference_prices
                .get(&order.symbol)
                .copied()
                .ok_or_else(|| {
                    BrokerError::Rejected(format!("no reference price for {}", order.symbol))
                })?,
        };

        let position = book.positions.entry(order.symbol.clone()).or_insert(Decimal::ZERO);
        *position += order.side.signed(order.quantity);
        if position.is_zero() {
            book.positions.remove(&order.symbol);
        }

        let order_id = format!("paper_{}", Uuid::new_v4());
        debug!(%order_id, symbol = %order.symbol, %fill_price, "paper fill");
        Ok(ExecutionReport {
            order_id,
            status: OrderStatus::Filled,
            filled: order.quantity,
            remaining: Decimal::ZERO,
            avg_fill_price: Some(fill_price),
        })
    }
}

impl AccountSnapshot for PaperBroker {
    fn current_position(&self, symbol: &Symbol) -> Decimal {
        self.book
            .read()
            .positions
            .get(symbol)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    fn daily_pnl(&self) -> Decimal {
        self.book.read().daily_pnl
    }

    fn reference_price(&self, symbol: &Symbol) -> Option<Decimal> {
        self.book.read().reference_prices.get(symbol).copied()
    }
}
