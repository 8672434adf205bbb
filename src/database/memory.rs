use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;

use crate::database::{Balance, Ledger, LedgerError, Order, OrderStatus, Resolution, Settlement, Withdrawal};
use crate::order_number::OrderNumber;
use crate::points::Points;

#[derive(Default)]
struct State {
    orders: HashMap<OrderNumber, Order>,
    balances: HashMap<String, Balance>,
}

impl State {
    fn check_unused(&self, owner: &str, number: OrderNumber) -> Result<(), LedgerError> {
        match self.orders.get(&number) {
            Some(existing) => Err(LedgerError::OrderExists {
                order: number,
                owned_by_caller: existing.owner == owner,
            }),
            None => Ok(()),
        }
    }

    fn owned_by<'a>(&'a self, owner: &'a str) -> impl Iterator<Item = &'a Order> + 'a {
        self.orders.values().filter(move |o| o.owner == owner)
    }
}

/// Ledger held in process memory. One lock guards everything, so every operation is
/// trivially serializable.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<State>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored row for `number`, withdrawals included.
    pub fn order(&self, number: OrderNumber) -> Option<Order> {
        self.state.lock().orders.get(&number).cloned()
    }
}

impl Ledger for MemoryLedger {
    fn submit_order(&self, owner: &str, number: OrderNumber) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        state.check_unused(owner, number)?;
        state.balances.entry(owner.to_string()).or_default();
        state.orders.insert(
            number,
            Order {
                number,
                owner: owner.to_string(),
                status: OrderStatus::Registered,
                accrual: None,
                uploaded_at: Utc::now(),
            },
        );
        Ok(())
    }

    fn pending_orders(&self, after: Option<OrderNumber>, limit: usize) -> Result<Vec<OrderNumber>, LedgerError> {
        let state = self.state.lock();
        let mut pending: Vec<OrderNumber> = state
            .orders
            .values()
            .filter(|o| o.status.is_pending() && after.map_or(true, |after| o.number > after))
            .map(|o| o.number)
            .collect();
        pending.sort();
        pending.truncate(limit);
        Ok(pending)
    }

    fn mark_processing(&self, number: OrderNumber) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        let order = state.orders.get_mut(&number).ok_or(LedgerError::OrderNotFound(number))?;
        if order.status == OrderStatus::Registered {
            order.status = OrderStatus::Processing;
        }
        Ok(())
    }

    fn settle(&self, number: OrderNumber, resolution: Resolution) -> Result<Settlement, LedgerError> {
        let mut state = self.state.lock();
        let order = state.orders.get_mut(&number).ok_or(LedgerError::OrderNotFound(number))?;
        if !order.status.is_pending() {
            return Ok(Settlement::AlreadySettled(order.status));
        }
        let credit = match resolution {
            Resolution::Processed(accrual) => {
                order.status = OrderStatus::Processed;
                order.accrual = Some(accrual);
                Some((order.owner.clone(), accrual))
            }
            Resolution::Invalid => {
                order.status = OrderStatus::Invalid;
                None
            }
        };
        if let Some((owner, accrual)) = credit {
            let balance = state.balances.entry(owner).or_default();
            balance.accrued = balance.accrued + accrual;
        }
        Ok(Settlement::Applied)
    }

    fn withdraw(&self, owner: &str, number: OrderNumber, sum: Points) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        let available = state.balances.get(owner).copied().unwrap_or_default().available();
        if available < sum {
            return Err(LedgerError::InsufficientFunds {
                available,
                requested: sum,
            });
        }
        state.check_unused(owner, number)?;
        state.orders.insert(
            number,
            Order {
                number,
                owner: owner.to_string(),
                status: OrderStatus::Withdrawn,
                accrual: Some(sum),
                uploaded_at: Utc::now(),
            },
        );
        let balance = state.balances.entry(owner.to_string()).or_default();
        balance.withdrawn = balance.withdrawn + sum;
        Ok(())
    }

    fn balance(&self, owner: &str) -> Result<Option<Balance>, LedgerError> {
        Ok(self.state.lock().balances.get(owner).copied())
    }

    fn orders(&self, owner: &str) -> Result<Vec<Order>, LedgerError> {
        let state = self.state.lock();
        let mut orders: Vec<Order> = state
            .owned_by(owner)
            .filter(|o| o.status != OrderStatus::Withdrawn)
            .cloned()
            .collect();
        orders.sort_by_key(|o| (o.uploaded_at, o.number));
        Ok(orders)
    }

    fn withdrawals(&self, owner: &str) -> Result<Vec<Withdrawal>, LedgerError> {
        let state = self.state.lock();
        let mut withdrawals: Vec<Withdrawal> = state
            .owned_by(owner)
            .filter(|o| o.status == OrderStatus::Withdrawn)
            .map(|o| Withdrawal {
                order: o.number,
                sum: o.accrual.unwrap_or_default(),
                processed_at: o.uploaded_at,
            })
            .collect();
        withdrawals.sort_by_key(|w| (w.processed_at, w.order));
        Ok(withdrawals)
    }
}
