mod accrual;
mod api;
mod auth;
mod boss;
mod boss_api;
mod config;
mod db;
mod error;
mod ledger;
mod mailer;
mod models;
mod notify;
mod portal;
mod roi;
mod scheduler;

use std::sync::{Arc, Mutex};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // RUST_LOG overrides; info by default
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stdout)
        .with_target(false)
        .init();

    info!("yieldbook starting...");

    let cfg = Arc::new(config::load()?);

    // Run DB migrations and seed once at startup
    {
        let conn = db::connect(&cfg.db_path)?;
        db::run_migrations(&conn)?;
        db::seed(&conn, &cfg)?;
    }

    // Shared DB connection
    let shared_conn = Arc::new(Mutex::new(db::connect(&cfg.db_path)?));

    let api_handle = tokio::spawn(api::serve(Arc::clone(&cfg), Arc::clone(&shared_conn)));
    let scheduler_handle = tokio::spawn(scheduler::run(Arc::clone(&cfg), Arc::clone(&shared_conn)));
    let mailer_handle = tokio::spawn(mailer::run(Arc::clone(&cfg), Arc::clone(&shared_conn)));

    // Graceful shutdown
    tokio::select! {
        res = api_handle => match res {
            Ok(Ok(_)) => info!("API exited cleanly"),
            Ok(Err(e)) => error!("API error: {:?}", e),
            Err(e) => error!("API task panicked: {:?}", e),
        },
        res = scheduler_handle => match res {
            Ok(Ok(_)) => info!("Scheduler exited cleanly"),
            Ok(Err(e)) => error!("Scheduler error: {:?}", e),
            Err(e) => error!("Scheduler task panicked: {:?}", e),
        },
        res = mailer_handle => match res {
            Ok(Ok(_)) => info!("Mailer exited cleanly"),
            Ok(Err(e)) => error!("Mailer error: {:?}", e),
            Err(e) => error!("Mailer task panicked: {:?}", e),
        },
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received, stopping...");
        }
    }

    info!("yieldbook stopped.");
    Ok(())
}
