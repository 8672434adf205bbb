pub mod accrual;
pub mod clock;
pub mod config;
pub mod database;
pub mod loyalty;
pub mod order_number;
pub mod points;
pub mod poller;
pub mod responses;
pub mod routes;
pub mod schema;
pub mod telemetry;
