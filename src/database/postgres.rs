use crate::database::connect::PgPool;
use crate::database::{mutations, queries, Balance, Ledger, LedgerError, Order, Resolution, Settlement, Withdrawal};
use crate::order_number::OrderNumber;
use crate::points::Points;

/// Ledger stored in postgres. Each call checks out its own pooled connection.
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl Ledger for PgLedger {
    fn submit_order(&self, owner: &str, number: OrderNumber) -> Result<(), LedgerError> {
        let mut conn = self.pool.get()?;
        mutations::submit_order(&mut conn, owner, number)
    }

    fn pending_orders(&self, after: Option<OrderNumber>, limit: usize) -> Result<Vec<OrderNumber>, LedgerError> {
        let mut conn = self.pool.get()?;
        queries::pending_orders(&mut conn, after, limit)
    }

    fn mark_processing(&self, number: OrderNumber) -> Result<(), LedgerError> {
        let mut conn = self.pool.get()?;
        mutations::mark_processing(&mut conn, number)
    }

    fn settle(&self, number: OrderNumber, resolution: Resolution) -> Result<Settlement, LedgerError> {
        let mut conn = self.pool.get()?;
        mutations::settle_order(&mut conn, number, resolution)
    }

    fn withdraw(&self, owner: &str, number: OrderNumber, sum: Points) -> Result<(), LedgerError> {
        let mut conn = self.pool.get()?;
        mutations::withdraw(&mut conn, owner, number, sum)
    }

    fn balance(&self, owner: &str) -> Result<Option<Balance>, LedgerError> {
        let mut conn = self.pool.get()?;
        queries::load_balance(&mut conn, owner)
    }

    fn orders(&self, owner: &str) -> Result<Vec<Order>, LedgerError> {
        let mut conn = self.pool.get()?;
        queries::load_orders(&mut conn, owner)
    }

    fn withdrawals(&self, owner: &str) -> Result<Vec<Withdrawal>, LedgerError> {
        let mut conn = self.pool.get()?;
        queries::load_withdrawals(&mut conn, owner)
    }
}
