//! Strategy manager - thread-safe registry of users and their strategies

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::info;

use super::{Strategy, StrategyError, StrategyStatus, User};

type Result<T> = std::result::Result<T, StrategyError>;

#[derive(Default)]
struct Registry {
    users: HashMap<String, User>,
    // ordered so listings are stable
    strategies: BTreeMap<String, Strategy>,
}

/// Registry of users and strategies.
///
/// Both maps sit behind one lock, so a listing never sees half of a
/// registration. Every accessor hands out clones.
#[derive(Default)]
pub struct StrategyManager {
    registry: RwLock<Registry>,
}

impl StrategyManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        broker_api: impl Into<String>,
    ) -> Result<User> {
        let user = User::new(id, name, broker_api);
        let mut registry = self.registry.write();
        if registry.users.contains_key(&user.id) {
            return Err(StrategyError::DuplicateUser(user.id));
        }

        info!(user_id = %user.id, broker_api = %user.broker_api, "user registered");
        registry.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    /// Register a strategy for an existing user. New strategies start `Active`.
    pub fn add_strategy(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        user_id: impl Into<String>,
        params: serde_json::Value,
    ) -> Result<Strategy> {
        let (id, user_id) = (id.into(), user_id.into());
        let mut registry = self.registry.write();

        let owner = registry
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| StrategyError::UnknownUser(user_id.clone()))?;
        if registry.strategies.contains_key(&id) {
            return Err(StrategyError::DuplicateStrategy(id));
        }

        let now = Utc::now();
        let strategy = Strategy {
            id: id.clone(),
            name: name.into(),
            user_id,
            status: StrategyStatus::Active,
            owner,
            params,
            created_at: now,
            updated_at: now,
        };

        info!(strategy_id = %id, user_id = %strategy.user_id, "strategy registered");
        registry.strategies.insert(id, strategy.clone());
        Ok(strategy)
    }

    pub fn update_strategy_status(&self, id: &str, status: StrategyStatus) -> Result<()> {
        let mut registry = self.registry.write();
        let strategy = registry
            .strategies
            .get_mut(id)
            .ok_or_else(|| StrategyError::UnknownStrategy(id.to_string()))?;

        if strategy.status != status {
            info!(strategy_id = %id, from = %strategy.status, to = %status, "strategy status changed");
        }
        strategy.status = status;
        strategy.updated_at = Utc::now();
        Ok(())
    }

    /// Strategies currently `Active`, ordered by id.
    pub fn list_active_strategies(&self) -> Vec<Strategy> {
        self.registry
            .read()
            .strategies
            .values()
            .filter(|s| s.is_active())
            .cloned()
            .collect()
    }

    /// All strategies, ordered by id.
    pub fn list_strategies(&self) -> Vec<Strategy> {
        self.registry.read().strategies.values().cloned().collect()
    }

    pub fn strategies_for_user(&self, user_id: &str) -> Vec<Strategy> {
        self.registry
            .read()
            .strategies
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn get_strategy(&self, id: &str) -> Option<Strategy> {
        self.registry.read().strategies.get(id).cloned()
    }

    pub fn get_user(&self, id: &str) -> Option<User> {
        self.registry.read().users.get(id).cloned()
    }
}
