use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::database::{self, LedgerError, OrderStatus};
use crate::order_number::OrderNumber;
use crate::points::Points;

#[derive(Queryable)]
pub struct Balance {
    pub login: String,
    pub accrued: i64,
    pub withdrawn: i64,
}

impl From<Balance> for database::Balance {
    fn from(row: Balance) -> Self {
        database::Balance {
            accrued: Points::from_minor(row.accrued),
            withdrawn: Points::from_minor(row.withdrawn),
        }
    }
}

#[derive(Queryable)]
pub struct Order {
    pub number: i64,
    pub login: String,
    pub status: String,
    pub amount: i64,
    pub uploaded_at: NaiveDateTime,
    pub processed_at: Option<NaiveDateTime>,
}

impl Order {
    pub fn status(&self) -> Result<OrderStatus, LedgerError> {
        OrderStatus::parse(&self.status)
    }
}

impl TryFrom<Order> for database::Order {
    type Error = LedgerError;

    fn try_from(row: Order) -> Result<Self, Self::Error> {
        let status = row.status()?;
        Ok(database::Order {
            number: OrderNumber::from_stored(row.number),
            status,
            // only processed orders carry an accrual
            accrual: (status == OrderStatus::Processed).then(|| Points::from_minor(row.amount)),
            uploaded_at: row.uploaded_at.and_utc(),
            owner: row.login,
        })
    }
}

impl From<Order> for database::Withdrawal {
    fn from(row: Order) -> Self {
        database::Withdrawal {
            order: OrderNumber::from_stored(row.number),
            sum: Points::from_minor(row.amount),
            processed_at: row.processed_at.unwrap_or(row.uploaded_at).and_utc(),
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct NewOrder<'a> {
    pub number: i64,
    pub login: &'a str,
    pub status: &'a str,
    pub amount: i64,
    pub uploaded_at: NaiveDateTime,
    pub processed_at: Option<NaiveDateTime>,
}
