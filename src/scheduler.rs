use chrono::{DateTime, Datelike, Utc, Weekday};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use tokio::{
    task,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{accrual, auth, config::Config, mailer};

fn is_business_day(now: DateTime<Utc>) -> bool {
    !matches!(now.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Whether the accrual jobs should run at `now`.
pub fn should_run(cfg: &Config, now: DateTime<Utc>) -> bool {
    !cfg.job_weekdays_only || is_business_day(now)
}

/// One pass: pay due ROI, then close matured investments.
pub fn tick(conn: &mut Connection, now: DateTime<Utc>) {
    match accrual::pay_due_roi(conn, now) {
        Ok(report) => debug!("ROI pass: {:?}", report),
        Err(e) => error!("ROI pass failed: {:?}", e),
    }
    match accrual::expire_matured(conn, now) {
        Ok(report) => debug!("Expiry pass: {:?}", report),
        Err(e) => error!("Expiry pass failed: {:?}", e),
    }
}

/// Clear out expired sessions and links, and mail past its retention.
pub fn housekeeping(conn: &Connection, cfg: &Config, now: DateTime<Utc>) {
    match auth::purge_expired(conn, now) {
        Ok(0) => {}
        Ok(n) => info!("Purged {} expired sessions and links", n),
        Err(e) => error!("Session purge failed: {:?}", e),
    }
    let cutoff = now - chrono::Duration::days(cfg.outbox_retention_days);
    match mailer::purge(conn, cfg.mail_max_attempts, cutoff) {
        Ok(0) => {}
        Ok(n) => info!("Purged {} outbox messages", n),
        Err(e) => error!("Outbox purge failed: {:?}", e),
    }
}

pub async fn run(cfg: Arc<Config>, conn: Arc<Mutex<Connection>>) -> eyre::Result<()> {
    let mut ticker = interval(Duration::from_secs(cfg.job_interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "Scheduler started: every {}s, weekdays only = {}",
        cfg.job_interval_secs, cfg.job_weekdays_only
    );

    loop {
        ticker.tick().await;

        let now = Utc::now();
        let accrue = should_run(&cfg, now);
        if !accrue {
            debug!("Weekend, skipping accrual jobs");
        }

        let conn = Arc::clone(&conn);
        let cfg = Arc::clone(&cfg);
        let joined = task::spawn_blocking(move || -> eyre::Result<()> {
            let mut db = conn.lock().map_err(|_| eyre::eyre!("database mutex poisoned"))?;
            housekeeping(&db, &cfg, now);
            if accrue {
                tick(&mut db, now);
            }
            Ok(())
        })
        .await;

        match joined {
            Ok(Ok(())) => {}
            // a poisoned lock never recovers, stop the loop
            Ok(Err(e)) => return Err(e),
            Err(e) => warn!("Accrual task panicked: {:?}", e),
        }
    }
}
