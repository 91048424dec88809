use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

use quanta_engine::core::{Broker, Config, Order, Side};
use quanta_engine::exchanges::PaperBroker;
use quanta_engine::{OrderExecutor, StrategyManager, StrategyStatus};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Config: first argument, else ./config.toml, else defaults
    let arg = std::env::args().nth(1).map(PathBuf::from);
    let loaded = Config::load_or_default(arg.as_deref(), Path::new("config.toml"));
    let log_level = match &loaded {
        Ok((config, _)) => config.app.log_level.clone(),
        Err(_) => "info".to_string(),
    };

    // 2. Logger
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},quanta_engine=debug", log_level)));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true)
        .init();

    let config = match loaded {
        Ok((config, Some(path))) => {
            tracing::info!("📋 Loaded config from {}", path.display());
            config
        }
        Ok((config, None)) => {
            tracing::warn!("⚠️ No config.toml found, using built-in defaults");
            config
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!("🦀 Quanta Engine starting in {:?} mode", config.app.mode);

    // 3. Components
    let validator = Arc::new(config.build_validator()?);
    let broker = Arc::new(PaperBroker::new().with_latency(Duration::from_millis(50)));
    broker.set_reference_price("AAPL", Decimal::from(150));
    broker.set_reference_price("GOOGL", Decimal::from(2_500));

    let mut executor = OrderExecutor::new(validator, broker.clone())
        .with_risk(config.build_risk_validator(), broker.clone())
        .with_max_concurrency(config.execution.max_concurrent_dispatch);
    if let Some(timeout) = config.execution.broker_timeout() {
        executor = executor.with_broker_timeout(timeout);
    }

    let strategies = StrategyManager::new();
    strategies.add_user("user1", "User One", broker.name())?;
    strategies.add_strategy("strat1", "Moving Average Crossover", "user1", serde_json::json!({"fast": 10, "slow": 50}))?;
    strategies.add_strategy("strat2", "RSI Reversal", "user1", serde_json::json!({"period": 14}))?;
    strategies.update_strategy_status("strat2", StrategyStatus::Paused)?;
    for strategy in strategies.list_active_strategies() {
        tracing::info!("Active strategy: {} (user: {})", strategy.name, strategy.user_id);
    }

    // 4. Single order attributed to a strategy
    let order = Order::limit("AAPL", Decimal::from(10), Decimal::from(150));
    match executor.execute_for_strategy(&strategies, "strat1", &order).await {
        Ok(report) => tracing::info!("✅ {} -> {:?}", order, report),
        Err(e) => tracing::warn!("❌ {}: {}", order, e),
    }

    // 5. Queue a mixed batch and drain it
    executor.queue_order(Order::market("AAPL", Decimal::from(20)));
    executor.queue_order(Order::limit("GOOGL", Decimal::from(2), Decimal::from(2_400)));
    executor.queue_order(Order::market("INVALID", Decimal::from(5)));
    executor.queue_order(Order::market("AAPL", Decimal::from(5)).with_side(Side::Sell));

    for (index, result) in executor.execute_queued().await.into_iter().enumerate() {
        match result {
            Ok(report) => tracing::info!("✅ queued #{}: {} filled @ {:?}", index, report.filled, report.avg_fill_price),
            Err(e) => tracing::warn!("❌ queued #{}: {}", index, e),
        }
    }

    tracing::info!("📊 {:?}", executor.stats());
    tracing::info!("📦 positions: {:?}", broker.positions());
    tracing::info!("🛑 Shutting down...");
    Ok(())
}
