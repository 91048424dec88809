//! Order executor - validates, gates and dispatches orders to a broker

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ExecutionError, ExecutionStats, OrderState, StateCounters};
use crate::core::{
    AccountSnapshot, Broker, BrokerError, BrokerOrder, ExecutionReport, Order, Symbol,
};
use crate::risk::RiskValidator;
use crate::strategies::{StrategyError, StrategyManager};
use crate::validation::OrderValidator;

pub type ExecutionResult = Result<ExecutionReport, ExecutionError>;

/// Default bound on concurrent broker calls within one batch.
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

struct RiskGate {
    validator: RiskValidator,
    account: Arc<dyn AccountSnapshot>,
}

/// Order executor.
///
/// Every order is validated (and risk-checked, when a gate is configured)
/// before the broker sees it; a rejected order never reaches the broker.
/// Broker failures are reported as [`ExecutionError::Broker`] and are never
/// retried here.
///
/// Batches isolate failures per item: one result per input order, in input
/// order, whatever order the broker calls complete in.
pub struct OrderExecutor {
    validator: Arc<OrderValidator>,
    broker: Arc<dyn Broker>,
    risk: Option<RiskGate>,
    queue: Mutex<Vec<Order>>,
    broker_timeout: Option<Duration>,
    max_concurrency: usize,
    counters: StateCounters,
}

impl OrderExecutor {
    pub fn new(validator: Arc<OrderValidator>, broker: Arc<dyn Broker>) -> Self {
        Self {
            validator,
            broker,
            risk: None,
            queue: Mutex::new(Vec::new()),
            broker_timeout: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            counters: StateCounters::default(),
        }
    }

    /// Gate orders on risk limits, reading position and P&L from `account`.
    pub fn with_risk(mut self, validator: RiskValidator, account: Arc<dyn AccountSnapshot>) -> Self {
        self.risk = Some(RiskGate { validator, account });
        self
    }

    /// Fail broker calls that take longer than `timeout`.
    pub fn with_broker_timeout(mut self, timeout: Duration) -> Self {
        self.broker_timeout = Some(timeout);
        self
    }

    /// Bound concurrent broker calls in batch execution (minimum 1).
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit.max(1);
        self
    }

    pub fn broker_name(&self) -> &str {
        self.broker.name()
    }

    pub fn stats(&self) -> ExecutionStats {
        self.counters.snapshot()
    }

    /// Validate and execute one order.
    pub async fn execute(&self, order: &Order) -> ExecutionResult {
        self.admit(order, Decimal::ZERO)?;
        self.dispatch(order).await
    }

    /// Execute on behalf of a registered strategy. The strategy must exist
    /// in `manager` and be `Active` at call time.
    pub async fn execute_for_strategy(
        &self,
        manager: &StrategyManager,
        strategy_id: &str,
        order: &Order,
    ) -> ExecutionResult {
        let strategy = match manager.get_strategy(strategy_id) {
            Some(strategy) => strategy,
            None => {
                self.refuse(order);
                return Err(StrategyError::UnknownStrategy(strategy_id.to_string()).into());
            }
        };
        if !strategy.is_active() {
            self.refuse(order);
            return Err(ExecutionError::StrategyInactive {
                strategy_id: strategy.id,
                status: strategy.status,
            });
        }

        debug!(
            order_id = %order.id,
            strategy_id = %strategy.id,
            user_id = %strategy.user_id,
            broker_api = %strategy.broker_api(),
            "executing strategy order"
        );
        self.execute(order).await
    }

    /// Execute a batch. All orders are validated up front, valid ones are
    /// dispatched concurrently, and results come back in input order.
    ///
    /// The risk gate sees each order on top of the orders admitted before it
    /// in the same batch, so a batch cannot walk a position past its limit.
    pub async fn execute_multiple(&self, orders: &[Order]) -> Vec<ExecutionResult> {
        let mut in_batch: HashMap<Symbol, Decimal> = HashMap::new();
        let admitted: Vec<Result<&Order, ExecutionError>> = orders
            .iter()
            .map(|order| {
                let pending = in_batch.get(&order.symbol).copied().unwrap_or(Decimal::ZERO);
                let admitted = self.admit(order, pending);
                if admitted.is_ok() {
                    *in_batch.entry(order.symbol.clone()).or_insert(Decimal::ZERO) +=
                        order.signed_quantity();
                }
                admitted.map(|()| order)
            })
            .collect();

        let dispatches: Vec<_> = admitted
            .into_iter()
            .map(|admitted| async move {
                match admitted {
                    Ok(order) => self.dispatch(order).await,
                    Err(e) => Err(e),
                }
            })
            .collect();

        stream::iter(dispatches)
            .buffered(self.max_concurrency)
            .collect()
            .await
    }

    /// Append to the queue without validating. Returns the queue depth.
    pub fn queue_order(&self, order: Order) -> usize {
        let mut queue = self.queue.lock();
        debug!(order_id = %order.id, "order queued");
        queue.push(order);
        queue.len()
    }

    pub fn queued_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Take everything queued so far and execute it as one batch. Orders
    /// queued after the take wait for the next drain.
    pub async fn execute_queued(&self) -> Vec<ExecutionResult> {
        let batch = std::mem::take(&mut *self.queue.lock());
        if batch.is_empty() {
            return Vec::new();
        }

        info!(count = batch.len(), "draining order queue");
        self.execute_multiple(&batch).await
    }

    /// `in_batch` is the signed quantity already admitted for this symbol
    /// in the current batch and not yet reflected by the account.
    fn admit(&self, order: &Order, in_batch: Decimal) -> Result<(), ExecutionError> {
        self.transition(order, OrderState::Pending);
        if let Err(reason) = self.validator.validate(order) {
            self.transition(order, OrderState::Rejected);
            return Err(reason.into());
        }

        if let Some(gate) = &self.risk {
            let position = gate.account.current_position(&order.symbol) + in_batch;
            let daily_pnl = gate.account.daily_pnl();
            // market orders are valued at the account's reference price
            let price = if order.order_type.is_priced() {
                order.price
            } else {
                gate.account.reference_price(&order.symbol).unwrap_or(order.price)
            };
            if let Err(reason) = gate.validator.check_order_at(order, price, position, daily_pnl) {
                warn!(order_id = %order.id, %reason, "order blocked by risk gate");
                self.transition(order, OrderState::Rejected);
                return Err(reason.into());
            }
        }

        self.transition(order, OrderState::Validated);
        Ok(())
    }

    async fn dispatch(&self, order: &Order) -> ExecutionResult {
        let request = BrokerOrder::from(order);
        self.transition(order, OrderState::Dispatched);

        let outcome = match self.broker_timeout {
            Some(limit) => tokio::time::timeout(limit, self.broker.place_order(&request))
                .await
                .unwrap_or(Err(BrokerError::Timeout(limit))),
            None => self.broker.place_order(&request).await,
        };

        match outcome {
            Ok(report) => {
                info!(
                    order_id = %order.id,
                    broker_order_id = %report.order_id,
                    status = ?report.status,
                    filled = %report.filled,
                    "order executed"
                );
                self.transition(order, OrderState::Completed);
                Ok(report)
            }
            Err(e) => {
                warn!(order_id = %order.id, broker = %self.broker.name(), "broker failure: {}", e);
                self.transition(order, OrderState::Failed);
                Err(e.into())
            }
        }
    }

    /// Refused before admission (unknown or inactive strategy).
    fn refuse(&self, order: &Order) {
        self.transition(order, OrderState::Pending);
        self.transition(order, OrderState::Rejected);
    }

    fn transition(&self, order: &Order, state: OrderState) {
        debug!(order_id = %order.id, ?state, terminal = state.is_terminal(), "order state");
        self.counters.record(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OrderStatus, OrderType, Side, Symbol};
    use crate::risk::RiskError;
    use crate::strategies::StrategyStatus;
    use crate::validation::{ValidationError, ValidationRule};
    use async_trait::async_trait;
    use chrono::{TimeDelta, Utc};
    use rust_decimal::Decimal;
    use rust_decimal::prelude::ToPrimitive;
    use rust_decimal_macros::dec;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fills everything; sleeps `quantity` ms so larger orders finish later.
    #[derive(Default)]
    struct StubBroker {
        calls: AtomicUsize,
        delay_by_quantity: bool,
        reject_symbol: Option<Symbol>,
    }

    #[async_trait]
    impl Broker for StubBroker {
        fn name(&self) -> &str {
            "stub"
        }

        async fn place_order(&self, order: &BrokerOrder) -> Result<ExecutionReport, BrokerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_by_quantity {
                let millis = order.quantity.to_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(millis)).await;
            }
            if self.reject_symbol.as_ref() == Some(&order.symbol) {
                return Err(BrokerError::Rejected("symbol halted".into()));
            }
            Ok(ExecutionReport {
                order_id: order.client_order_id.to_string(),
                status: OrderStatus::Filled,
                filled: order.quantity,
                remaining: Decimal::ZERO,
                avg_fill_price: order.price,
            })
        }
    }

    struct HangingBroker;

    #[async_trait]
    impl Broker for HangingBroker {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn place_order(&self, _order: &BrokerOrder) -> Result<ExecutionReport, BrokerError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(BrokerError::Unavailable("unreachable".into()))
        }
    }

    struct FixedAccount {
        position: Decimal,
        pnl: Decimal,
        reference: Option<Decimal>,
    }

    impl AccountSnapshot for FixedAccount {
        fn current_position(&self, _symbol: &Symbol) -> Decimal {
            self.position
        }

        fn daily_pnl(&self) -> Decimal {
            self.pnl
        }

        fn reference_price(&self, _symbol: &Symbol) -> Option<Decimal> {
            self.reference
        }
    }

    fn flat_account(reference: Option<Decimal>) -> Arc<FixedAccount> {
        Arc::new(FixedAccount {
            position: dec!(0),
            pnl: dec!(0),
            reference,
        })
    }

    fn validator() -> Arc<OrderValidator> {
        let mut validator = OrderValidator::new();
        validator.add_symbol("AAPL").unwrap();
        validator.add_symbol("GOOGL").unwrap();
        validator
            .set_rule(
                OrderType::Market,
                ValidationRule::with_unbounded_price(dec!(1), dec!(1000), dec!(0)),
            )
            .unwrap();
        validator
            .set_rule(
                OrderType::Limit,
                ValidationRule::new(dec!(1), dec!(1000), dec!(0.01), dec!(10000)),
            )
            .unwrap();
        Arc::new(validator)
    }

    fn executor(broker: Arc<StubBroker>) -> OrderExecutor {
        OrderExecutor::new(validator(), broker)
    }

    #[tokio::test]
    async fn test_execute_valid_order() {
        let broker = Arc::new(StubBroker::default());
        let executor = executor(broker.clone());
        let order = Order::limit("AAPL", dec!(100), dec!(150));

        let report = executor.execute(&order).await.unwrap();
        assert_eq!(report.status, OrderStatus::Filled);
        assert_eq!(report.filled, dec!(100));
        assert_eq!(report.remaining, dec!(0));
        assert_eq!(report.avg_fill_price, Some(dec!(150)));
        assert_eq!(report.order_id, order.id.to_string());
        assert_eq!(broker.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_order_never_reaches_broker() {
        let broker = Arc::new(StubBroker::default());
        let executor = executor(broker.clone());

        let unknown = Order::market("TSLA", dec!(10));
        let stale = Order::limit("AAPL", dec!(10), dec!(150))
            .with_timestamp(Utc::now() - TimeDelta::minutes(2));
        let unsupported = Order::new("AAPL", dec!(10), OrderType::Stop, dec!(150), Utc::now());

        for order in [unknown, stale, unsupported] {
            let err = executor.execute(&order).await.unwrap_err();
            assert!(err.is_validation(), "{err}");
        }
        assert_eq!(broker.calls.load(Ordering::SeqCst), 0);
        assert_eq!(executor.stats().rejected, 3);
        assert_eq!(executor.stats().dispatched, 0);
    }

    #[tokio::test]
    async fn test_broker_failure_is_not_validation_failure() {
        let broker = Arc::new(StubBroker {
            reject_symbol: Some(Symbol::new("GOOGL")),
            ..Default::default()
        });
        let executor = executor(broker.clone());

        let err = executor
            .execute(&Order::market("GOOGL", dec!(5)))
            .await
            .unwrap_err();
        assert_eq!(err, ExecutionError::Broker(BrokerError::Rejected("symbol halted".into())));
        assert!(!err.is_validation());

        // no silent retry
        assert_eq!(broker.calls.load(Ordering::SeqCst), 1);
        let stats = executor.stats();
        assert_eq!((stats.validated, stats.dispatched, stats.failed), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_broker_timeout() {
        let executor = OrderExecutor::new(validator(), Arc::new(HangingBroker))
            .with_broker_timeout(Duration::from_millis(20));

        let err = executor
            .execute(&Order::market("AAPL", dec!(5)))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ExecutionError::Broker(BrokerError::Timeout(Duration::from_millis(20)))
        );
        assert_eq!(executor.broker_name(), "hanging");
    }

    #[tokio::test]
    async fn test_execute_multiple_isolates_failures_in_order() {
        let broker = Arc::new(StubBroker {
            delay_by_quantity: true,
            ..Default::default()
        });
        let executor = executor(broker.clone());

        // later orders finish first
        let orders = vec![
            Order::limit("AAPL", dec!(40), dec!(150)),
            Order::market("INVALID", dec!(10)),
            Order::limit("GOOGL", dec!(20), dec!(2500)),
            Order::limit("AAPL", dec!(2000), dec!(150)),
            Order::market("AAPL", dec!(1)),
        ];

        let results = executor.execute_multiple(&orders).await;
        assert_eq!(results.len(), orders.len());

        for index in [0, 2, 4] {
            let report = results[index].as_ref().unwrap();
            assert_eq!(report.order_id, orders[index].id.to_string());
        }
        assert!(matches!(
            results[1],
            Err(ExecutionError::Validation(ValidationError::UnknownSymbol(_)))
        ));
        assert!(matches!(
            results[3],
            Err(ExecutionError::Validation(ValidationError::QuantityOutOfRange { .. }))
        ));
        assert_eq!(broker.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_execute_multiple_empty() {
        let executor = executor(Arc::new(StubBroker::default()));
        assert!(executor.execute_multiple(&[]).await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrency_limit_keeps_order() {
        let broker = Arc::new(StubBroker {
            delay_by_quantity: true,
            ..Default::default()
        });
        let executor = executor(broker).with_max_concurrency(2);
        let orders: Vec<_> = [30, 5, 20, 1, 10]
            .into_iter()
            .map(|q| Order::market("AAPL", Decimal::from(q)))
            .collect();

        let filled: Vec<_> = executor
            .execute_multiple(&orders)
            .await
            .into_iter()
            .map(|r| r.unwrap().filled)
            .collect();
        assert_eq!(filled, vec![dec!(30), dec!(5), dec!(20), dec!(1), dec!(10)]);
    }

    #[tokio::test]
    async fn test_risk_gate_blocks_before_dispatch() {
        let broker = Arc::new(StubBroker::default());
        let account = Arc::new(FixedAccount {
            position: dec!(500),
            pnl: dec!(-1000),
            reference: None,
        });
        let executor = executor(broker.clone()).with_risk(
            RiskValidator::new(dec!(1000), dec!(5000), dec!(10000)),
            account,
        );

        let too_large = Order::limit("AAPL", dec!(100), dec!(150));
        assert!(matches!(
            executor.execute(&too_large).await,
            Err(ExecutionError::Risk(RiskError::OrderValueLimit { .. }))
        ));
        assert_eq!(broker.calls.load(Ordering::SeqCst), 0);

        let small = Order::limit("AAPL", dec!(1), dec!(150));
        assert!(executor.execute(&small).await.is_ok());

        let reducing = Order::limit("AAPL", dec!(60), dec!(150)).with_side(Side::Sell);
        assert!(executor.execute(&reducing).await.is_ok());
        assert_eq!(broker.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_batch_accumulates_position_for_risk() {
        let broker = Arc::new(StubBroker::default());
        let executor = executor(broker.clone()).with_risk(
            RiskValidator::new(dec!(1000), dec!(5000), dec!(10000)),
            flat_account(None),
        );
        let lots: Vec<_> = (0..5).map(|_| Order::market("AAPL", dec!(300))).collect();

        let results = executor.execute_multiple(&lots).await;
        assert!(results[..3].iter().all(|r| r.is_ok()));
        // 900 admitted, another 300 would make 1200
        for result in &results[3..] {
            assert_eq!(
                result,
                &Err(ExecutionError::Risk(RiskError::PositionLimit {
                    current: dec!(900),
                    delta: dec!(300),
                    max: dec!(1000),
                }))
            );
        }
        assert_eq!(broker.calls.load(Ordering::SeqCst), 3);

        // other symbols and reducing orders have their own running total
        let mixed = vec![
            Order::market("AAPL", dec!(900)),
            Order::market("GOOGL", dec!(900)),
            Order::market("AAPL", dec!(500)).with_side(Side::Sell),
            Order::market("AAPL", dec!(500)),
        ];
        assert!(executor.execute_multiple(&mixed).await.iter().all(|r| r.is_ok()));

        // queued drains go through the same accounting
        for order in &lots {
            executor.queue_order(order.clone());
        }
        let drained = executor.execute_queued().await;
        assert_eq!(drained.iter().filter(|r| r.is_ok()).count(), 3);
        assert!(matches!(
            drained[3],
            Err(ExecutionError::Risk(RiskError::PositionLimit { .. }))
        ));
    }

    #[tokio::test]
    async fn test_market_order_valued_at_reference_price() {
        let broker = Arc::new(StubBroker::default());
        let executor = executor(broker.clone()).with_risk(
            RiskValidator::new(dec!(1000), dec!(5000), dec!(10000)),
            flat_account(Some(dec!(150))),
        );

        assert_eq!(
            executor.execute(&Order::market("AAPL", dec!(1000))).await,
            Err(ExecutionError::Risk(RiskError::OrderValueLimit {
                value: dec!(150000),
                max: dec!(10000),
            }))
        );
        assert!(executor.execute(&Order::market("AAPL", dec!(10))).await.is_ok());
        assert_eq!(broker.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stats_account_for_every_order() {
        let broker = Arc::new(StubBroker::default());
        let executor = executor(broker);
        let manager = StrategyManager::new();

        executor.execute(&Order::market("AAPL", dec!(1))).await.unwrap();
        executor.execute(&Order::market("NOPE", dec!(1))).await.unwrap_err();
        executor
            .execute_for_strategy(&manager, "ghost", &Order::market("AAPL", dec!(1)))
            .await
            .unwrap_err();

        let stats = executor.stats();
        assert_eq!(stats.received, 3);
        assert_eq!(stats.received, stats.validated + stats.rejected);
        assert_eq!(stats.completed + stats.failed, stats.dispatched);
    }

    #[tokio::test]
    async fn test_queue_drains_fifo_and_empties() {
        let broker = Arc::new(StubBroker::default());
        let executor = executor(broker.clone());
        let orders: Vec<_> = (1..=3)
            .map(|q| Order::market("AAPL", Decimal::from(q)))
            .collect();

        for (i, order) in orders.iter().enumerate() {
            assert_eq!(executor.queue_order(order.clone()), i + 1);
        }
        // queueing does not validate or dispatch
        executor.queue_order(Order::market("NOPE", dec!(1)));
        assert_eq!(executor.queued_len(), 4);
        assert_eq!(broker.calls.load(Ordering::SeqCst), 0);

        let results = executor.execute_queued().await;
        assert_eq!(results.len(), 4);
        for (result, order) in results.iter().zip(&orders) {
            assert_eq!(result.as_ref().unwrap().order_id, order.id.to_string());
        }
        assert!(results[3].as_ref().unwrap_err().is_validation());

        assert_eq!(executor.queued_len(), 0);
        assert!(executor.execute_queued().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_queue_and_drain() {
        let broker = Arc::new(StubBroker::default());
        let executor = Arc::new(executor(broker.clone()));
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 100;

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|_| {
                let executor = executor.clone();
                tokio::spawn(async move {
                    for _ in 0..PER_PRODUCER {
                        executor.queue_order(Order::market("AAPL", dec!(1)));
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        let mut seen = HashSet::new();
        let mut drained = 0;
        loop {
            let done = producers.iter().all(|p| p.is_finished());
            for result in executor.execute_queued().await {
                drained += 1;
                assert!(seen.insert(result.unwrap().order_id), "order drained twice");
            }
            if done && executor.queued_len() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }

        for producer in producers {
            producer.await.unwrap();
        }
        assert_eq!(drained, PRODUCERS * PER_PRODUCER);
        assert_eq!(broker.calls.load(Ordering::SeqCst), PRODUCERS * PER_PRODUCER);
    }

    #[tokio::test]
    async fn test_execute_for_strategy() {
        let broker = Arc::new(StubBroker::default());
        let executor = executor(broker.clone());
        let manager = StrategyManager::new();
        manager.add_user("user1", "User One", "paper").unwrap();
        manager
            .add_strategy("s1", "Momentum", "user1", serde_json::json!({}))
            .unwrap();

        let order = Order::market("AAPL", dec!(10));
        assert!(executor.execute_for_strategy(&manager, "s1", &order).await.is_ok());

        manager.update_strategy_status("s1", StrategyStatus::Paused).unwrap();
        assert_eq!(
            executor.execute_for_strategy(&manager, "s1", &order).await,
            Err(ExecutionError::StrategyInactive {
                strategy_id: "s1".into(),
                status: StrategyStatus::Paused,
            })
        );
        assert!(matches!(
            executor.execute_for_strategy(&manager, "ghost", &order).await,
            Err(ExecutionError::Strategy(_))
        ));
        assert_eq!(broker.calls.load(Ordering::SeqCst), 1);
    }
}
