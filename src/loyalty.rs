//! Submission boundaries: every order number a user hands us is validated here before the
//! ledger sees it.

use thiserror::Error;

use crate::database::{Ledger, LedgerError};
use crate::order_number::{OrderNumber, OrderNumberError};
use crate::points::Points;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Accepted(OrderNumber),
    /// The same user already submitted this number.
    AlreadySubmitted(OrderNumber),
}

#[derive(Debug, Error)]
pub enum LoyaltyError {
    #[error(transparent)]
    OrderNumber(#[from] OrderNumberError),
    #[error("withdrawal sum must be positive, got {0}")]
    NonPositiveSum(Points),
    #[error("order {0} was submitted by another user")]
    OwnedByOther(OrderNumber),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub fn submit_order(ledger: &dyn Ledger, owner: &str, raw: &str) -> Result<Submission, LoyaltyError> {
    let number = OrderNumber::parse(raw)?;
    match ledger.submit_order(owner, number) {
        Ok(()) => Ok(Submission::Accepted(number)),
        Err(LedgerError::OrderExists { owned_by_caller: true, .. }) => Ok(Submission::AlreadySubmitted(number)),
        Err(LedgerError::OrderExists { order, .. }) => Err(LoyaltyError::OwnedByOther(order)),
        Err(e) => Err(e.into()),
    }
}

pub fn withdraw(ledger: &dyn Ledger, owner: &str, raw: &str, sum: Points) -> Result<OrderNumber, LoyaltyError> {
    let number = OrderNumber::parse(raw)?;
    if !sum.is_positive() {
        return Err(LoyaltyError::NonPositiveSum(sum));
    }
    ledger.withdraw(owner, number, sum)?;
    Ok(number)
}
