use chrono::Utc;
use diesel::result::Error;
use diesel::{Connection, ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, RunQueryDsl};

use crate::database::models::NewOrder;
use crate::database::{self, models, LedgerError, OrderStatus, Resolution, Settlement};
use crate::order_number::OrderNumber;
use crate::points::Points;

// creates new balance table record, on conflict does nothing
pub fn init_user_balance(conn: &mut PgConnection, req_login: &str) -> Result<bool, Error> {
    use crate::schema::balance::dsl::*;
    diesel::insert_into(balance)
        .values((login.eq(req_login), accrued.eq(0i64), withdrawn.eq(0i64)))
        .on_conflict(login)
        .do_nothing()
        .execute(conn)
        .map(|res| res > 0)
}

// builds the conflict error for a number that is already taken
fn existing_order(conn: &mut PgConnection, req_login: &str, req_number: OrderNumber) -> Result<LedgerError, Error> {
    use crate::schema::orders::dsl::*;
    let owner = orders
        .filter(number.eq(req_number.get()))
        .select(login)
        .first::<String>(conn)?;
    Ok(LedgerError::OrderExists {
        order: req_number,
        owned_by_caller: owner == req_login,
    })
}

// inserts the order row unless the number is taken; returns false on conflict
fn insert_order(
    conn: &mut PgConnection,
    req_login: &str,
    req_number: OrderNumber,
    req_status: OrderStatus,
    req_amount: Points,
) -> Result<bool, Error> {
    use crate::schema::orders::dsl::*;
    let now = Utc::now().naive_utc();
    let new_order = NewOrder {
        number: req_number.get(),
        login: req_login,
        status: req_status.as_str(),
        amount: req_amount.minor(),
        uploaded_at: now,
        processed_at: (req_status == OrderStatus::Withdrawn).then_some(now),
    };
    diesel::insert_into(orders)
        .values(&new_order)
        .on_conflict(number)
        .do_nothing()
        .execute(conn)
        .map(|res| res > 0)
}

pub fn submit_order(conn: &mut PgConnection, req_login: &str, req_number: OrderNumber) -> Result<(), LedgerError> {
    init_user_balance(conn, req_login)?;

    conn.transaction::<_, LedgerError, _>(|conn| {
        if !insert_order(conn, req_login, req_number, OrderStatus::Registered, Points::ZERO)? {
            return Err(existing_order(conn, req_login, req_number)?);
        }
        Ok(())
    })
}

pub fn mark_processing(conn: &mut PgConnection, req_number: OrderNumber) -> Result<(), LedgerError> {
    use crate::schema::orders::dsl::*;
    let updated = diesel::update(
        orders
            .filter(number.eq(req_number.get()))
            .filter(status.eq(OrderStatus::Registered.as_str())),
    )
    .set(status.eq(OrderStatus::Processing.as_str()))
    .execute(conn)?;
    if updated == 0 {
        let found = orders
            .filter(number.eq(req_number.get()))
            .count()
            .get_result::<i64>(conn)?;
        if found == 0 {
            return Err(LedgerError::OrderNotFound(req_number));
        }
    }
    Ok(())
}

// applies a terminal accrual result; the order row lock makes repeated settles no-ops
pub fn settle_order(
    conn: &mut PgConnection,
    req_number: OrderNumber,
    resolution: Resolution,
) -> Result<Settlement, LedgerError> {
    conn.transaction::<_, LedgerError, _>(|conn| {
        // load order record and lock for update
        let order = {
            use crate::schema::orders::dsl::*;
            orders
                .filter(number.eq(req_number.get()))
                .for_update()
                .first::<models::Order>(conn)
                .optional()?
        };
        let order = order.ok_or(LedgerError::OrderNotFound(req_number))?;
        let current = order.status()?;
        if !current.is_pending() {
            return Ok(Settlement::AlreadySettled(current));
        }

        let (new_status, credit) = match resolution {
            Resolution::Processed(accrual) => (OrderStatus::Processed, accrual),
            Resolution::Invalid => (OrderStatus::Invalid, Points::ZERO),
        };
        {
            use crate::schema::orders::dsl::*;
            diesel::update(orders.filter(number.eq(req_number.get())))
                .set((
                    status.eq(new_status.as_str()),
                    amount.eq(credit.minor()),
                    processed_at.eq(Utc::now().naive_utc()),
                ))
                .execute(conn)?;
        }
        if new_status == OrderStatus::Processed {
            use crate::schema::balance::dsl::*;
            diesel::update(balance.filter(login.eq(&order.login)))
                .set(accrued.eq(accrued + credit.minor()))
                .execute(conn)?;
        }
        Ok(Settlement::Applied)
    })
}

pub fn withdraw(
    conn: &mut PgConnection,
    req_login: &str,
    req_number: OrderNumber,
    req_sum: Points,
) -> Result<(), LedgerError> {
    init_user_balance(conn, req_login)?;

    // wrap in transaction
    conn.transaction::<_, LedgerError, _>(|conn| {
        // load user balance record and lock for update
        let user_balance = {
            use crate::schema::balance::dsl::*;
            balance
                .filter(login.eq(req_login))
                .for_update()
                .first::<models::Balance>(conn)?
        };
        let available = database::Balance::from(user_balance).available();
        if available < req_sum {
            return Err(LedgerError::InsufficientFunds {
                available,
                requested: req_sum,
            });
        }

        if !insert_order(conn, req_login, req_number, OrderStatus::Withdrawn, req_sum)? {
            return Err(existing_order(conn, req_login, req_number)?);
        }

        {
            use crate::schema::balance::dsl::*;
            diesel::update(balance.filter(login.eq(req_login)))
                .set(withdrawn.eq(withdrawn + req_sum.minor()))
                .execute(conn)?;
        }
        Ok(())
    })
}
