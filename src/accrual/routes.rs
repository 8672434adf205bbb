use std::time::Duration;

use actix_request_identifier::RequestId;
use actix_web::http::header::{self, ContentType};
use actix_web::http::StatusCode;
use actix_web::{get, post, web, HttpResponse, ResponseError};
use serde::Deserialize;
use thiserror::Error;
use tracing::{instrument, warn};

use crate::accrual::engine::{EngineError, Goods, RewardEngine, RewardRule};
use crate::accrual::limiter::OrderRateLimiter;
use crate::order_number::{OrderNumber, OrderNumberError};

#[derive(Clone)]
pub struct AccrualState {
    pub engine: RewardEngine,
    pub limiter: OrderRateLimiter,
}

#[derive(Debug, Error)]
pub enum AccrualApiError {
    #[error(transparent)]
    OrderNumber(#[from] OrderNumberError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("rate limit of {limit} orders per {period:?} exceeded")]
    RateLimited {
        limit: usize,
        period: Duration,
        retry_after: Duration,
    },
}

impl ResponseError for AccrualApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::OrderNumber(OrderNumberError::Malformed(_)) => StatusCode::BAD_REQUEST,
            Self::OrderNumber(OrderNumberError::Checksum(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Engine(EngineError::InvalidRule(_) | EngineError::AccrualOverflow) => StatusCode::BAD_REQUEST,
            Self::Engine(_) => StatusCode::CONFLICT,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut response = HttpResponse::build(self.status_code());
        if let Self::RateLimited { retry_after, .. } = self {
            // round up so the caller never comes back early
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            response.insert_header((header::RETRY_AFTER, secs.to_string()));
        }
        response.content_type(ContentType::plaintext()).body(self.to_string())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Text(String),
    Number(u64),
}

impl RawNumber {
    fn parse(&self) -> Result<OrderNumber, OrderNumberError> {
        match self {
            Self::Text(text) => OrderNumber::parse(text),
            Self::Number(number) => OrderNumber::parse(&number.to_string()),
        }
    }
}

#[derive(Deserialize)]
pub struct OrderRegistration {
    order: RawNumber,
    #[serde(default)]
    goods: Vec<Goods>,
}

fn admit(state: &AccrualState, order: OrderNumber) -> Result<(), AccrualApiError> {
    state.limiter.check(order).map_err(|retry_after| {
        warn!(%order, ?retry_after, "rate limit exceeded");
        AccrualApiError::RateLimited {
            limit: state.limiter.limit(),
            period: state.limiter.period(),
            retry_after,
        }
    })
}

#[post("/api/goods")]
#[instrument(skip(state, rule), fields(request_id = request_id.as_str()))]
pub async fn register_rule_handler(
    state: web::Data<AccrualState>,
    request_id: RequestId,
    rule: web::Json<RewardRule>,
) -> Result<HttpResponse, AccrualApiError> {
    state.engine.register_rule(rule.into_inner())?;
    Ok(HttpResponse::Accepted().finish())
}

#[post("/api/orders")]
#[instrument(skip(state, registration), fields(request_id = request_id.as_str()))]
pub async fn register_order_handler(
    state: web::Data<AccrualState>,
    request_id: RequestId,
    registration: web::Json<OrderRegistration>,
) -> Result<HttpResponse, AccrualApiError> {
    let order = registration.order.parse()?;
    admit(&state, order)?;
    state.engine.register_order(order, &registration.goods)?;
    Ok(HttpResponse::Accepted().finish())
}

#[get("/api/orders/{number}")]
#[instrument(skip(state), fields(request_id = request_id.as_str()))]
pub async fn order_handler(
    state: web::Data<AccrualState>,
    request_id: RequestId,
    number: web::Path<String>,
) -> Result<HttpResponse, AccrualApiError> {
    let order = OrderNumber::parse(&number)?;
    admit(&state, order)?;
    Ok(match state.engine.query(order) {
        Some(record) => HttpResponse::Ok().json(record),
        None => HttpResponse::NoContent().finish(),
    })
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(register_rule_handler)
        .service(register_order_handler)
        .service(order_handler);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use actix_request_identifier::RequestIdentifier;
    use actix_web::{test, App};
    use std::sync::Arc;

    fn state(limit: usize) -> AccrualState {
        AccrualState {
            engine: RewardEngine::new(),
            limiter: OrderRateLimiter::new(limit, Duration::from_secs(60), Arc::new(ManualClock::new())),
        }
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .wrap(RequestIdentifier::with_uuid())
                    .app_data(web::Data::new($state))
                    .configure(configure),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_register_and_query() {
        let app = app!(state(10));

        let req = test::TestRequest::post()
            .uri("/api/goods")
            .set_json(serde_json::json!({"match": "Bork", "reward": 10, "reward_type": "%"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::ACCEPTED);

        let req = test::TestRequest::post()
            .uri("/api/orders")
            .set_json(serde_json::json!({
                "order": "9278923470",
                "goods": [{"description": "Bork kettle", "price": 100}]
            }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::ACCEPTED);

        let req = test::TestRequest::get().uri("/api/orders/9278923470").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(
            body,
            serde_json::json!({"order": "9278923470", "status": "PROCESSED", "accrual": 10})
        );
    }

    #[actix_web::test]
    async fn test_conflicts() {
        let app = app!(state(10));

        for expected in [StatusCode::ACCEPTED, StatusCode::CONFLICT] {
            let req = test::TestRequest::post()
                .uri("/api/goods")
                .set_json(serde_json::json!({"match": "Bork", "reward": 10, "reward_type": "pt"}))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), expected);
        }
        for expected in [StatusCode::ACCEPTED, StatusCode::CONFLICT] {
            let req = test::TestRequest::post()
                .uri("/api/orders")
                .set_json(serde_json::json!({"order": 9278923470u64, "goods": [{"description": "x", "price": 1}]}))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), expected);
        }
    }

    #[actix_web::test]
    async fn test_oversized_accrual_is_rejected() {
        let app = app!(state(10));

        let req = test::TestRequest::post()
            .uri("/api/goods")
            .set_json(serde_json::json!({"match": "X", "reward": 50000000000000000u64, "reward_type": "pt"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::ACCEPTED);

        let req = test::TestRequest::post()
            .uri("/api/orders")
            .set_json(serde_json::json!({
                "order": "9278923470",
                "goods": [{"description": "X1", "price": 1}, {"description": "X2", "price": 1}]
            }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get().uri("/api/orders/9278923470").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);
    }

    #[actix_web::test]
    async fn test_order_number_validation() {
        let app = app!(state(10));

        let cases = [
            ("/api/orders/ssss", StatusCode::BAD_REQUEST),
            ("/api/orders/123", StatusCode::UNPROCESSABLE_ENTITY),
            ("/api/orders/9278923470", StatusCode::NO_CONTENT),
        ];
        for (uri, expected) in cases {
            let req = test::TestRequest::get().uri(uri).to_request();
            assert_eq!(test::call_service(&app, req).await.status(), expected, "{uri}");
        }

        let req = test::TestRequest::post()
            .uri("/api/orders")
            .set_json(serde_json::json!({"order": "1", "goods": []}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[actix_web::test]
    async fn test_rate_limited() {
        let app = app!(state(1));

        let req = test::TestRequest::get().uri("/api/orders/9278923470").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);

        let req = test::TestRequest::get().uri("/api/orders/2377225624").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers().get(header::RETRY_AFTER).unwrap(), "60");
    }
}
