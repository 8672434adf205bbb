use std::sync::Arc;
use std::time::Duration;

use actix_request_identifier::{IdReuse, RequestIdentifier};
use actix_web::web::Data;
use anyhow::Context;
use tokio::sync::watch;
use tracing::info;
use tracing_actix_web::TracingLogger;

use gophermart::accrual::{AccrualClient, HttpAccrualClient};
use gophermart::clock::TokioClock;
use gophermart::config::Settings;
use gophermart::database::connect::{create_db_connection_pool, run_migrations};
use gophermart::database::{Ledger, PgLedger};
use gophermart::poller::Poller;
use gophermart::{routes, telemetry};

const ACCRUAL_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init("gophermart", tracing::Level::INFO)?;

    let settings = Settings::from_env()?;

    let pool = create_db_connection_pool(&settings.database_uri).context("failed to connect to database")?;
    run_migrations(&pool)?;
    let ledger: Arc<dyn Ledger> = Arc::new(PgLedger::new(pool));

    let client: Arc<dyn AccrualClient> = Arc::new(HttpAccrualClient::new(
        &settings.accrual_address,
        ACCRUAL_REQUEST_TIMEOUT,
    )?);
    let poller = Poller::new(settings.poller_config(), ledger.clone(), client, Arc::new(TokioClock));
    let (shutdown, shutdown_rx) = watch::channel(false);
    let poller = tokio::spawn(poller.run(shutdown_rx));

    info!(address = %settings.run_address, "starting gophermart");
    let server = actix_web::HttpServer::new(move || {
        actix_web::App::new()
            .wrap(TracingLogger::default())
            .wrap(RequestIdentifier::with_uuid().use_incoming_id(IdReuse::UseIncoming))
            .app_data(Data::from(ledger.clone()))
            .configure(routes::configure)
    });
    let served = server
        .bind(&settings.run_address)
        .with_context(|| format!("failed to bind {}", settings.run_address))?
        .run()
        .await;

    // let in-flight accrual work finish before exiting
    shutdown.send_replace(true);
    poller.await?;
    served?;
    Ok(())
}
