use std::sync::Arc;

use actix_request_identifier::{IdReuse, RequestIdentifier};
use actix_web::web::Data;
use anyhow::Context;
use tracing::info;
use tracing_actix_web::TracingLogger;

use gophermart::accrual::routes::{self, AccrualState};
use gophermart::accrual::{OrderRateLimiter, RewardEngine};
use gophermart::clock::TokioClock;
use gophermart::config::AccrualSettings;
use gophermart::telemetry;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init("accrual", tracing::Level::INFO)?;

    let settings = AccrualSettings::from_env()?;
    let state = AccrualState {
        engine: RewardEngine::new(),
        limiter: OrderRateLimiter::new(settings.rate_limit, settings.rate_window, Arc::new(TokioClock)),
    };

    info!(
        address = %settings.run_address,
        rate_limit = settings.rate_limit,
        rate_window = ?settings.rate_window,
        "starting accrual service"
    );
    actix_web::HttpServer::new(move || {
        actix_web::App::new()
            .wrap(TracingLogger::default())
            .wrap(RequestIdentifier::with_uuid().use_incoming_id(IdReuse::UseIncoming))
            .app_data(Data::new(state.clone()))
            .configure(routes::configure)
    })
    .bind(&settings.run_address)
    .with_context(|| format!("failed to bind {}", settings.run_address))?
    .run()
    .await?;
    Ok(())
}
