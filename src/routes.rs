use std::future::{ready, Ready};
use std::sync::Arc;

use actix_request_identifier::RequestId;
use actix_web::dev::Payload;
use actix_web::error::BlockingError;
use actix_web::http::header::ContentType;
use actix_web::http::StatusCode;
use actix_web::{get, post, web, FromRequest, HttpRequest, HttpResponse, ResponseError};
use thiserror::Error;
use tracing::{error, info, instrument};

use crate::database::{Ledger, LedgerError};
use crate::loyalty::{self, LoyaltyError, Submission};
use crate::order_number::OrderNumberError;
use crate::responses;

/// Header the session layer in front of us uses to pass the authenticated login.
pub const USER_LOGIN_HEADER: &str = "X-User-Login";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing {USER_LOGIN_HEADER} header")]
    Unauthorized,
    #[error(transparent)]
    Loyalty(#[from] LoyaltyError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("blocking task failed: {0}")]
    Blocking(#[from] BlockingError),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Loyalty(LoyaltyError::OrderNumber(OrderNumberError::Malformed(_))) => StatusCode::BAD_REQUEST,
            Self::Loyalty(LoyaltyError::OrderNumber(OrderNumberError::Checksum(_))) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::Loyalty(LoyaltyError::NonPositiveSum(_)) => StatusCode::BAD_REQUEST,
            Self::Loyalty(LoyaltyError::OwnedByOther(_)) => StatusCode::CONFLICT,
            Self::Loyalty(LoyaltyError::Ledger(e)) | Self::Ledger(e) => match e {
                LedgerError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
                LedgerError::OrderExists { .. } => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Blocking(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let body = if status.is_server_error() {
            error!(error = %self, "request failed");
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        HttpResponse::build(status)
            .content_type(ContentType::plaintext())
            .body(body)
    }
}

/// Login of the user making the request.
#[derive(Debug, Clone)]
pub struct Owner(String);

impl Owner {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromRequest for Owner {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let login = req
            .headers()
            .get(USER_LOGIN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|login| !login.is_empty());
        ready(login.map(|login| Owner(login.to_string())).ok_or(ApiError::Unauthorized))
    }
}

// runs a ledger call on the blocking pool
async fn with_ledger<T, E, F>(ledger: &web::Data<dyn Ledger>, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    E: Into<ApiError> + Send + 'static,
    F: FnOnce(&dyn Ledger) -> Result<T, E> + Send + 'static,
{
    let ledger: Arc<dyn Ledger> = ledger.clone().into_inner();
    web::block(move || f(ledger.as_ref())).await?.map_err(Into::into)
}

#[post("/api/user/orders")]
#[instrument(skip(ledger, body), fields(request_id = request_id.as_str(), owner = owner.as_str()))]
pub async fn submit_order_handler(
    ledger: web::Data<dyn Ledger>,
    request_id: RequestId,
    owner: Owner,
    body: String,
) -> Result<HttpResponse, ApiError> {
    let login = owner.as_str().to_string();
    let submission = with_ledger(&ledger, move |ledger| loyalty::submit_order(ledger, &login, &body)).await?;
    Ok(match submission {
        Submission::Accepted(order) => {
            info!(%order, "order accepted");
            HttpResponse::Accepted().finish()
        }
        Submission::AlreadySubmitted(_) => HttpResponse::Ok().finish(),
    })
}

#[get("/api/user/orders")]
#[instrument(skip(ledger), fields(request_id = request_id.as_str(), owner = owner.as_str()))]
pub async fn orders_handler(
    ledger: web::Data<dyn Ledger>,
    request_id: RequestId,
    owner: Owner,
) -> Result<HttpResponse, ApiError> {
    let orders = with_ledger(&ledger, move |ledger| ledger.orders(owner.as_str())).await?;
    Ok(responses::list_http_response(orders))
}

#[get("/api/user/balance")]
#[instrument(skip(ledger), fields(request_id = request_id.as_str(), owner = owner.as_str()))]
pub async fn balance_handler(
    ledger: web::Data<dyn Ledger>,
    request_id: RequestId,
    owner: Owner,
) -> Result<HttpResponse, ApiError> {
    let balance = with_ledger(&ledger, move |ledger| ledger.balance(owner.as_str())).await?;
    Ok(responses::balance_http_response(balance))
}

#[post("/api/user/balance/withdraw")]
#[instrument(skip(ledger, input), fields(request_id = request_id.as_str(), owner = owner.as_str()))]
pub async fn withdraw_handler(
    ledger: web::Data<dyn Ledger>,
    request_id: RequestId,
    owner: Owner,
    input: web::Json<responses::WithdrawInput>,
) -> Result<HttpResponse, ApiError> {
    let input = input.into_inner();
    let order = with_ledger(&ledger, move |ledger| {
        loyalty::withdraw(ledger, owner.as_str(), &input.order, input.sum)
    })
    .await?;
    info!(%order, "withdrawal recorded");
    Ok(HttpResponse::Ok().finish())
}

#[get("/api/user/withdrawals")]
#[instrument(skip(ledger), fields(request_id = request_id.as_str(), owner = owner.as_str()))]
pub async fn withdrawals_handler(
    ledger: web::Data<dyn Ledger>,
    request_id: RequestId,
    owner: Owner,
) -> Result<HttpResponse, ApiError> {
    let withdrawals = with_ledger(&ledger, move |ledger| ledger.withdrawals(owner.as_str())).await?;
    Ok(responses::list_http_response(withdrawals))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(submit_order_handler)
        .service(orders_handler)
        .service(balance_handler)
        .service(withdraw_handler)
        .service(withdrawals_handler);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{MemoryLedger, Resolution};
    use crate::order_number::OrderNumber;
    use crate::points::Points;
    use actix_request_identifier::RequestIdentifier;
    use actix_web::{test, App};

    macro_rules! app {
        ($ledger:expr) => {{
            let ledger: Arc<dyn Ledger> = $ledger;
            test::init_service(
                App::new()
                    .wrap(RequestIdentifier::with_uuid())
                    .app_data(web::Data::from(ledger))
                    .configure(configure),
            )
            .await
        }};
    }

    fn submit(login: &str, number: &str) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/api/user/orders")
            .insert_header((USER_LOGIN_HEADER, login))
            .insert_header(ContentType::plaintext())
            .set_payload(number.to_string())
    }

    fn withdraw(login: &str, body: serde_json::Value) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/api/user/balance/withdraw")
            .insert_header((USER_LOGIN_HEADER, login))
            .set_json(body)
    }

    #[actix_web::test]
    async fn test_submit_order_statuses() {
        let app = app!(Arc::new(MemoryLedger::new()));

        let cases = [
            ("alice", "12345678903", StatusCode::ACCEPTED),
            ("alice", "12345678903", StatusCode::OK),
            ("bob", "12345678903", StatusCode::CONFLICT),
            ("alice", "1234567890a", StatusCode::BAD_REQUEST),
            ("alice", "12345678904", StatusCode::UNPROCESSABLE_ENTITY),
        ];
        for (login, number, expected) in cases {
            let resp = test::call_service(&app, submit(login, number).to_request()).await;
            assert_eq!(resp.status(), expected, "{login} {number}");
        }
    }

    #[actix_web::test]
    async fn test_missing_login_is_unauthorized() {
        let app = app!(Arc::new(MemoryLedger::new()));

        let req = test::TestRequest::get().uri("/api/user/balance").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get()
            .uri("/api/user/orders")
            .insert_header((USER_LOGIN_HEADER, "  "))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_orders_and_balance() {
        let ledger = Arc::new(MemoryLedger::new());
        let app = app!(ledger.clone());

        let req = test::TestRequest::get()
            .uri("/api/user/orders")
            .insert_header((USER_LOGIN_HEADER, "alice"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);

        test::call_service(&app, submit("alice", "9278923470").to_request()).await;
        ledger
            .settle(OrderNumber::parse("9278923470").unwrap(), Resolution::Processed(Points::from_minor(72998)))
            .unwrap();
        test::call_service(&app, submit("alice", "12345678903").to_request()).await;

        let req = test::TestRequest::get()
            .uri("/api/user/orders")
            .insert_header((USER_LOGIN_HEADER, "alice"))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let orders = body.as_array().unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0]["number"], "9278923470");
        assert_eq!(orders[0]["status"], "PROCESSED");
        assert_eq!(orders[0]["accrual"], 729.98);
        assert_eq!(orders[1]["number"], "12345678903");
        assert_eq!(orders[1]["status"], "REGISTERED");
        assert!(orders[1].get("accrual").is_none());

        let req = test::TestRequest::get()
            .uri("/api/user/balance")
            .insert_header((USER_LOGIN_HEADER, "alice"))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body, serde_json::json!({"current": 729.98, "withdrawn": 0}));

        let req = test::TestRequest::get()
            .uri("/api/user/balance")
            .insert_header((USER_LOGIN_HEADER, "nobody"))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body, serde_json::json!({"current": 0, "withdrawn": 0}));
    }

    #[actix_web::test]
    async fn test_withdraw_statuses() {
        let ledger = Arc::new(MemoryLedger::new());
        let app = app!(ledger.clone());
        test::call_service(&app, submit("alice", "9278923470").to_request()).await;
        ledger
            .settle(OrderNumber::parse("9278923470").unwrap(), Resolution::Processed(Points::whole(100)))
            .unwrap();

        let cases = [
            (serde_json::json!({"order": "2377225624", "sum": 101}), StatusCode::PAYMENT_REQUIRED),
            (serde_json::json!({"order": "2377225625", "sum": 10}), StatusCode::UNPROCESSABLE_ENTITY),
            (serde_json::json!({"order": "abc", "sum": 10}), StatusCode::BAD_REQUEST),
            (serde_json::json!({"order": "2377225624", "sum": 0}), StatusCode::BAD_REQUEST),
            (serde_json::json!({"order": "2377225624", "sum": -5}), StatusCode::BAD_REQUEST),
            (serde_json::json!({"order": "2377225624", "sum": 60}), StatusCode::OK),
            (serde_json::json!({"order": "2377225624", "sum": 10}), StatusCode::CONFLICT),
            (serde_json::json!({"order": "9278923470", "sum": 10}), StatusCode::CONFLICT),
            (serde_json::json!({"order": "12345678903", "sum": 40.01}), StatusCode::PAYMENT_REQUIRED),
        ];
        for (body, expected) in cases {
            let resp = test::call_service(&app, withdraw("alice", body.clone()).to_request()).await;
            assert_eq!(resp.status(), expected, "{body}");
        }

        let req = test::TestRequest::get()
            .uri("/api/user/withdrawals")
            .insert_header((USER_LOGIN_HEADER, "alice"))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let withdrawals = body.as_array().unwrap();
        assert_eq!(withdrawals.len(), 1);
        assert_eq!(withdrawals[0]["order"], "2377225624");
        assert_eq!(withdrawals[0]["sum"], 60);
        assert!(withdrawals[0]["processed_at"].is_string());

        let req = test::TestRequest::get()
            .uri("/api/user/withdrawals")
            .insert_header((USER_LOGIN_HEADER, "bob"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);
    }
}
