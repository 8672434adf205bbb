use actix_web::HttpResponse;
use serde::{Deserialize, Serialize};

use crate::database::Balance;
use crate::points::Points;

#[derive(Debug, Serialize)]
pub struct BalanceData {
    pub current: Points,
    pub withdrawn: Points,
}

impl From<Balance> for BalanceData {
    fn from(balance: Balance) -> Self {
        Self {
            current: balance.available(),
            withdrawn: balance.withdrawn,
        }
    }
}

/// Order number stays a raw string so a bad one can be told apart from a bad body.
#[derive(Debug, Deserialize)]
pub struct WithdrawInput {
    pub order: String,
    pub sum: Points,
}

pub fn balance_http_response(balance: Option<Balance>) -> HttpResponse {
    HttpResponse::Ok().json(BalanceData::from(balance.unwrap_or_default()))
}

// empty lists answer 204 with no body
pub fn list_http_response<T: Serialize>(items: Vec<T>) -> HttpResponse {
    if items.is_empty() {
        HttpResponse::NoContent().finish()
    } else {
        HttpResponse::Ok().json(items)
    }
}
