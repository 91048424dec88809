//! Strategies - Users, strategy metadata and the shared registry

pub mod manager;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use manager::StrategyManager;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StrategyError {
    #[error("user {0} already registered")]
    DuplicateUser(String),

    #[error("user {0} is not registered")]
    UnknownUser(String),

    #[error("strategy {0} already registered")]
    DuplicateStrategy(String),

    #[error("strategy {0} not found")]
    UnknownStrategy(String),
}

/// Account owner. `broker_api` names the broker adapter orders are routed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub broker_api: String,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>, broker_api: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            broker_api: broker_api.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyStatus {
    Active,
    Paused,
    Stopped,
}

impl std::fmt::Display for StrategyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyStatus::Active => write!(f, "active"),
            StrategyStatus::Paused => write!(f, "paused"),
            StrategyStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Registered strategy with a snapshot of its owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: String,
    pub name: String,
    pub user_id: String,
    pub status: StrategyStatus,
    pub owner: User,
    /// Opaque strategy parameters
    pub params: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Strategy {
    pub fn is_active(&self) -> bool {
        self.status == StrategyStatus::Active
    }

    /// Broker adapter the owning user trades through
    pub fn broker_api(&self) -> &str {
        &self.owner.broker_api
    }
}
