//! Configuration - Type-safe, validated config loaded from TOML

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::{Error, OrderType, Result};
use crate::risk::{RiskLimits, RiskValidator};
use crate::validation::{OrderValidator, ValidationRule};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application settings
    pub app: AppConfig,

    /// Order validation rules
    pub validation: ValidationConfig,

    /// Risk limits
    pub risk: RiskLimits,

    /// Execution pipeline settings
    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Run mode: paper or live
    pub mode: RunMode,

    /// Log filter used when RUST_LOG is unset
    pub log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Paper,
    Live,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Maximum order age in seconds
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: u64,

    /// Tradeable symbols
    pub symbols: Vec<String>,

    /// One rule per supported order type
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub order_type: OrderType,
    pub min_quantity: Decimal,
    pub max_quantity: Decimal,
    #[serde(default)]
    pub min_price: Decimal,
    /// Absent means no upper bound
    #[serde(default)]
    pub max_price: Option<Decimal>,
}

impl RuleConfig {
    fn to_rule(&self) -> ValidationRule {
        ValidationRule::new(
            self.min_quantity,
            self.max_quantity,
            self.min_price,
            self.max_price.unwrap_or(Decimal::MAX),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Concurrent broker calls per batch
    #[serde(default = "default_max_concurrency")]
    pub max_concurrent_dispatch: usize,

    /// Broker round-trip timeout in milliseconds (none = wait forever)
    #[serde(default)]
    pub broker_timeout_ms: Option<u64>,
}

impl ExecutionConfig {
    pub fn broker_timeout(&self) -> Option<Duration> {
        self.broker_timeout_ms.map(Duration::from_millis)
    }
}

fn default_staleness_secs() -> u64 {
    60
}

fn default_max_concurrency() -> usize {
    16
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_dispatch: default_max_concurrency(),
            broker_timeout_ms: Some(5_000),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app: AppConfig {
                mode: RunMode::Paper,
                log_level: "info".to_string(),
            },
            validation: ValidationConfig {
                staleness_secs: default_staleness_secs(),
                symbols: vec!["AAPL".to_string(), "GOOGL".to_string()],
                rules: vec![
                    RuleConfig {
                        order_type: OrderType::Market,
                        min_quantity: Decimal::ONE,
                        max_quantity: Decimal::from(1_000),
                        min_price: Decimal::ZERO,
                        max_price: None,
                    },
                    RuleConfig {
                        order_type: OrderType::Limit,
                        min_quantity: Decimal::ONE,
                        max_quantity: Decimal::from(1_000),
                        min_price: Decimal::new(1, 2),
                        max_price: Some(Decimal::from(10_000)),
                    },
                ],
            },
            risk: RiskLimits::default(),
            execution: ExecutionConfig::default(),
        }
    }
}

impl Config {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::parse(&content)
    }

    /// Load `path` when given, else `fallback` when it exists, else the
    /// built-in defaults. Returns the file that was read, if any. A file
    /// that was chosen but fails to load is an error, never a fallback.
    pub fn load_or_default(path: Option<&Path>, fallback: &Path) -> Result<(Self, Option<PathBuf>)> {
        let chosen = match path {
            Some(path) => path,
            None if fallback.exists() => fallback,
            None => return Ok((Self::default(), None)),
        };
        Ok((Self::load(chosen)?, Some(chosen.to_path_buf())))
    }

    /// Parse TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Build an order validator through `add_symbol` / `set_rule`.
    pub fn build_validator(&self) -> Result<OrderValidator> {
        let mut validator = OrderValidator::new()
            .with_staleness(Duration::from_secs(self.validation.staleness_secs));

        for symbol in &self.validation.symbols {
            validator.add_symbol(symbol.as_str())?;
        }
        for rule in &self.validation.rules {
            validator.set_rule(rule.order_type, rule.to_rule())?;
        }
        Ok(validator)
    }

    pub fn build_risk_validator(&self) -> RiskValidator {
        RiskValidator::from_limits(self.risk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Symbol;
    use rust_decimal_macros::dec;

    const SAMPLE: &str = r#"
        [app]
        mode = "paper"
        log_level = "debug"

        [validation]
        staleness_secs = 30
        symbols = ["aapl", "GOOGL"]

        [[validation.rules]]
        order_type = "market"
        min_quantity = 1
        max_quantity = 500

        [[validation.rules]]
        order_type = "stop_limit"
        min_quantity = 1
        max_quantity = 100
        min_price = 0.5
        max_price = 900

        [risk]
        max_position_size = 1000
        max_daily_loss = 5000
        max_order_value = 10000
    "#;

    #[test]
    fn test_parse_and_build() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.app.mode, RunMode::Paper);
        assert_eq!(config.execution.max_concurrent_dispatch, 16);

        let validator = config.build_validator().unwrap();
        assert_eq!(validator.max_age(), Duration::from_secs(30));
        assert!(validator.has_symbol(&Symbol::new("AAPL")));
        assert_eq!(
            validator.rule(OrderType::Market).map(|r| r.max_price),
            Some(Decimal::MAX)
        );
        assert_eq!(
            validator.rule(OrderType::StopLimit),
            Some(&ValidationRule::new(dec!(1), dec!(100), dec!(0.5), dec!(900)))
        );
        assert!(validator.rule(OrderType::Limit).is_none());

        let risk = config.build_risk_validator();
        assert_eq!(risk.limits().max_order_value, dec!(10000));
    }

    #[test]
    fn test_inverted_rule_is_config_error() {
        let mut config = Config::default();
        config.validation.rules[0].min_quantity = dec!(5000);
        assert!(matches!(config.build_validator(), Err(Error::Config(_))));
    }

    #[test]
    fn test_malformed_config() {
        assert!(matches!(Config::parse("[app]\nmode = 3"), Err(Error::Config(_))));
        assert!(matches!(
            Config::load("/nonexistent/quanta.toml"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_load_or_default() {
        let sample = Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml"));
        let missing = Path::new("/nonexistent/quanta.toml");

        let (_, source) = Config::load_or_default(None, missing).unwrap();
        assert_eq!(source, None);

        let (config, source) = Config::load_or_default(None, sample).unwrap();
        assert_eq!(source.as_deref(), Some(sample));
        assert_eq!(config.execution.max_concurrent_dispatch, 16);

        // an explicit path never falls back to defaults
        assert!(matches!(
            Config::load_or_default(Some(missing), sample),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_malformed_file_is_not_replaced_by_defaults() {
        let path = std::env::temp_dir().join(format!("quanta-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "[risk]\nmax_order_value = \"lots\"").unwrap();

        let explicit = Config::load_or_default(Some(&path), Path::new("/nonexistent"));
        let fallback = Config::load_or_default(None, &path);
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(explicit, Err(Error::Config(_))));
        assert!(matches!(fallback, Err(Error::Config(_))));
    }

    #[test]
    fn test_default_builds() {
        let config = Config::default();
        let validator = config.build_validator().unwrap();
        assert_eq!(validator.symbols().len(), 2);
        assert_eq!(config.execution.broker_timeout(), Some(Duration::from_millis(5_000)));
    }
}
