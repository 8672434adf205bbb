use diesel::{ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, RunQueryDsl};

use crate::database::{self, models, LedgerError, OrderStatus};
use crate::order_number::OrderNumber;

pub fn load_balance(conn: &mut PgConnection, req_login: &str) -> Result<Option<database::Balance>, LedgerError> {
    use crate::schema::balance::dsl::*;
    let user_balance = balance
        .filter(login.eq(req_login))
        .first::<models::Balance>(conn)
        .optional()?;
    Ok(user_balance.map(Into::into))
}

pub fn pending_orders(
    conn: &mut PgConnection,
    after: Option<OrderNumber>,
    limit: usize,
) -> Result<Vec<OrderNumber>, LedgerError> {
    use crate::schema::orders::dsl::*;
    let pending: Vec<&str> = OrderStatus::PENDING.iter().map(|s| s.as_str()).collect();
    let numbers = orders
        .filter(status.eq_any(pending))
        .filter(number.gt(after.map_or(0, OrderNumber::get)))
        .order(number.asc())
        .limit(i64::try_from(limit).unwrap_or(i64::MAX))
        .select(number)
        .load::<i64>(conn)?;
    Ok(numbers.into_iter().map(OrderNumber::from_stored).collect())
}

// purchase orders only, oldest first
pub fn load_orders(conn: &mut PgConnection, req_login: &str) -> Result<Vec<database::Order>, LedgerError> {
    use crate::schema::orders::dsl::*;
    orders
        .filter(login.eq(req_login))
        .filter(status.ne(OrderStatus::Withdrawn.as_str()))
        .order((uploaded_at.asc(), number.asc()))
        .load::<models::Order>(conn)?
        .into_iter()
        .map(TryInto::try_into)
        .collect()
}

pub fn load_withdrawals(conn: &mut PgConnection, req_login: &str) -> Result<Vec<database::Withdrawal>, LedgerError> {
    use crate::schema::orders::dsl::*;
    let rows = orders
        .filter(login.eq(req_login))
        .filter(status.eq(OrderStatus::Withdrawn.as_str()))
        .order((uploaded_at.asc(), number.asc()))
        .load::<models::Order>(conn)?;
    Ok(rows.into_iter().map(Into::into).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::connect::{create_db_connection_pool, run_migrations};
    use crate::database::{mutations, Resolution};
    use crate::points::Points;
    use diesel::Connection;

    #[test]
    #[ignore = "needs a postgres database in DATABASE_URI"]
    fn test_load_orders_and_withdrawals() {
        dotenvy::dotenv().ok();
        let pool = create_db_connection_pool(&std::env::var("DATABASE_URI").unwrap()).unwrap();
        run_migrations(&pool).unwrap();
        let user = "test_load_orders";
        let purchase = OrderNumber::parse("9278923470").unwrap();
        let withdrawal = OrderNumber::parse("2377225624").unwrap();

        pool.get().unwrap().test_transaction::<_, LedgerError, _>(|conn| {
            mutations::submit_order(conn, user, purchase)?;
            assert!(pending_orders(conn, None, 100)?.contains(&purchase));
            assert!(!pending_orders(conn, Some(purchase), 100)?.contains(&purchase));

            mutations::settle_order(conn, purchase, Resolution::Processed(Points::whole(729)))?;
            mutations::withdraw(conn, user, withdrawal, Points::whole(29))?;

            let user_orders = load_orders(conn, user)?;
            assert_eq!(user_orders.len(), 1);
            assert_eq!(user_orders[0].status, OrderStatus::Processed);
            assert_eq!(user_orders[0].accrual, Some(Points::whole(729)));

            let user_withdrawals = load_withdrawals(conn, user)?;
            assert_eq!(user_withdrawals.len(), 1);
            assert_eq!(user_withdrawals[0].order, withdrawal);
            assert_eq!(user_withdrawals[0].sum, Points::whole(29));

            assert!(!pending_orders(conn, None, 100)?.contains(&purchase));
            assert_eq!(
                load_balance(conn, user)?.map(|b| b.available()),
                Some(Points::whole(700))
            );
            Ok(())
        });
    }
}
