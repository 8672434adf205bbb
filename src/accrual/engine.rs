use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bigdecimal::{BigDecimal, Signed};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::order_number::OrderNumber;
use crate::points::{Points, SCALE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RewardType {
    #[serde(rename = "%", alias = "percent")]
    Percent,
    #[serde(rename = "pt", alias = "points")]
    Points,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardRule {
    #[serde(rename = "match")]
    pub pattern: String,
    pub reward: BigDecimal,
    pub reward_type: RewardType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goods {
    pub description: String,
    pub price: Points,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccrualStatus {
    Registered,
    Processing,
    Processed,
    Invalid,
}

impl fmt::Display for AccrualStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Registered => "REGISTERED",
            Self::Processing => "PROCESSING",
            Self::Processed => "PROCESSED",
            Self::Invalid => "INVALID",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccrualRecord {
    pub order: OrderNumber,
    pub status: AccrualStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Points>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("reward rule for {0:?} is already registered")]
    DuplicateRule(String),
    #[error("order {0} is already registered")]
    DuplicateOrder(OrderNumber),
    #[error("invalid reward rule: {0}")]
    InvalidRule(&'static str),
    #[error("accrual is too large to be credited")]
    AccrualOverflow,
}

/// Sums the reward for every line item. The first rule (in registration order) whose
/// pattern occurs in the description decides the line's contribution.
pub fn compute_accrual(rules: &[RewardRule], goods: &[Goods]) -> Result<Points, EngineError> {
    goods.iter().try_fold(Points::ZERO, |total, item| {
        let line = match rules.iter().find(|rule| item.description.contains(rule.pattern.as_str())) {
            Some(rule) => line_reward(rule, item.price)?,
            None => Points::ZERO,
        };
        total.checked_add(line).ok_or(EngineError::AccrualOverflow)
    })
}

fn line_reward(rule: &RewardRule, price: Points) -> Result<Points, EngineError> {
    let reward = match rule.reward_type {
        RewardType::Percent => Points::round_minor(&(BigDecimal::from(price.minor()) * &rule.reward / BigDecimal::from(SCALE))),
        RewardType::Points => Points::from_decimal(&rule.reward).ok(),
    };
    reward.ok_or(EngineError::AccrualOverflow)
}

#[derive(Default)]
struct Catalog {
    rules: Vec<RewardRule>,
    orders: HashMap<OrderNumber, AccrualRecord>,
}

/// Reward rule catalog plus the registry of orders whose accrual has been computed.
#[derive(Clone, Default)]
pub struct RewardEngine {
    inner: Arc<Mutex<Catalog>>,
}

impl RewardEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_rule(&self, rule: RewardRule) -> Result<(), EngineError> {
        if rule.pattern.is_empty() {
            return Err(EngineError::InvalidRule("match must not be empty"));
        }
        if rule.reward.is_negative() {
            return Err(EngineError::InvalidRule("reward must not be negative"));
        }
        if rule.reward_type == RewardType::Points && Points::from_decimal(&rule.reward).is_err() {
            return Err(EngineError::InvalidRule("reward is out of range"));
        }

        let mut catalog = self.inner.lock();
        if catalog.rules.iter().any(|r| r.pattern == rule.pattern) {
            return Err(EngineError::DuplicateRule(rule.pattern));
        }
        info!(pattern = %rule.pattern, reward = %rule.reward, reward_type = ?rule.reward_type, "reward rule registered");
        catalog.rules.push(rule);
        Ok(())
    }

    /// Matches the goods against the current catalog right away. An order without any
    /// goods cannot earn anything and resolves as invalid. An order whose accrual would
    /// not fit the ledger is rejected and left unregistered.
    pub fn register_order(&self, order: OrderNumber, goods: &[Goods]) -> Result<AccrualRecord, EngineError> {
        let mut catalog = self.inner.lock();
        if catalog.orders.contains_key(&order) {
            return Err(EngineError::DuplicateOrder(order));
        }
        let record = if goods.is_empty() {
            AccrualRecord {
                order,
                status: AccrualStatus::Invalid,
                accrual: None,
            }
        } else {
            AccrualRecord {
                order,
                status: AccrualStatus::Processed,
                accrual: Some(compute_accrual(&catalog.rules, goods)?),
            }
        };
        info!(%order, status = %record.status, "order registered for accrual");
        catalog.orders.insert(order, record.clone());
        Ok(record)
    }

    /// `None` means the order was never registered.
    pub fn query(&self, order: OrderNumber) -> Option<AccrualRecord> {
        self.inner.lock().orders.get(&order).cloned()
    }
}
