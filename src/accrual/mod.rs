//! The accrual side: reward rules, the orders they are matched against, and the
//! client the loyalty backend uses to ask about them.

pub mod client;
pub mod engine;
pub mod limiter;
pub mod routes;

pub use client::{AccrualClient, AccrualReply, ClientError, EngineClient, HttpAccrualClient};
pub use engine::{AccrualRecord, AccrualStatus, EngineError, Goods, RewardEngine, RewardRule, RewardType};
pub use limiter::OrderRateLimiter;
