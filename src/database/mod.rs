//! Order and balance ledger.
//!
//! [`Ledger`] is the only way the poller and the submission boundaries touch stored
//! state. Every method is one transaction: a credit lands together with the order's
//! terminal status, and a withdrawal checks funds, records the withdrawal row and bumps
//! the withdrawn total without anyone else observing the balance in between.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::order_number::OrderNumber;
use crate::points::Points;

pub mod connect;
pub mod memory;
pub mod models;
pub mod mutations;
pub mod postgres;
pub mod queries;

pub use memory::MemoryLedger;
pub use postgres::PgLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Registered,
    Processing,
    Processed,
    Invalid,
    /// Marks a row that records a withdrawal rather than a purchase.
    Withdrawn,
}

impl OrderStatus {
    pub const PENDING: [OrderStatus; 2] = [OrderStatus::Registered, OrderStatus::Processing];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Registered => "REGISTERED",
            Self::Processing => "PROCESSING",
            Self::Processed => "PROCESSED",
            Self::Invalid => "INVALID",
            Self::Withdrawn => "WITHDRAWN",
        }
    }

    pub fn parse(s: &str) -> Result<Self, LedgerError> {
        match s {
            "REGISTERED" => Ok(Self::Registered),
            "PROCESSING" => Ok(Self::Processing),
            "PROCESSED" => Ok(Self::Processed),
            "INVALID" => Ok(Self::Invalid),
            "WITHDRAWN" => Ok(Self::Withdrawn),
            other => Err(LedgerError::CorruptStatus(other.to_string())),
        }
    }

    pub fn is_pending(self) -> bool {
        Self::PENDING.contains(&self)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    pub number: OrderNumber,
    #[serde(skip)]
    pub owner: String,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Points>,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Withdrawal {
    pub order: OrderNumber,
    pub sum: Points,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Balance {
    pub accrued: Points,
    pub withdrawn: Points,
}

impl Balance {
    pub fn available(&self) -> Points {
        self.accrued - self.withdrawn
    }
}

/// Terminal outcome reported by the accrual service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Processed(Points),
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Applied,
    /// The order had already left the pending states; nothing was written.
    AlreadySettled(OrderStatus),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("order {order} already exists")]
    OrderExists { order: OrderNumber, owned_by_caller: bool },
    #[error("insufficient funds: {available} available, {requested} requested")]
    InsufficientFunds { available: Points, requested: Points },
    #[error("order {0} not found")]
    OrderNotFound(OrderNumber),
    #[error("unexpected order status {0:?} in storage")]
    CorruptStatus(String),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("database pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
}

pub trait Ledger: Send + Sync + 'static {
    /// Inserts a `REGISTERED` order. Fails with [`LedgerError::OrderExists`] when the
    /// number is already taken by any order or withdrawal.
    fn submit_order(&self, owner: &str, number: OrderNumber) -> Result<(), LedgerError>;

    /// Orders still waiting for the accrual service, in number order, starting after
    /// `after`. Callers page through the whole set by passing the last number they got.
    fn pending_orders(&self, after: Option<OrderNumber>, limit: usize) -> Result<Vec<OrderNumber>, LedgerError>;

    /// `REGISTERED` -> `PROCESSING`; any other state is left alone.
    fn mark_processing(&self, number: OrderNumber) -> Result<(), LedgerError>;

    /// Moves a pending order to its terminal state, crediting the owner on
    /// [`Resolution::Processed`]. Settling an order twice is a no-op.
    fn settle(&self, number: OrderNumber, resolution: Resolution) -> Result<Settlement, LedgerError>;

    fn withdraw(&self, owner: &str, number: OrderNumber, sum: Points) -> Result<(), LedgerError>;

    /// Snapshot read; `None` if the owner has no balance yet.
    fn balance(&self, owner: &str) -> Result<Option<Balance>, LedgerError>;

    fn orders(&self, owner: &str) -> Result<Vec<Order>, LedgerError>;

    fn withdrawals(&self, owner: &str) -> Result<Vec<Withdrawal>, LedgerError>;
}
