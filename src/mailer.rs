// Outbox relay: drains queued notification emails to an HTTP mail relay.
use chrono::{DateTime, Utc};
use eyre::{eyre, Result};
use reqwest::Client;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::{
    task,
    time::{sleep, Duration},
};
use tracing::{info, warn};

use crate::config::Config;
use crate::db::ts;

const BATCH: i64 = 50;

#[derive(Debug, Clone, Serialize)]
pub struct Outbound {
    #[serde(skip)]
    pub id: i64,
    pub to: String,
    pub subject: String,
    pub body: String,
}

pub fn pending(conn: &Connection, max_attempts: i64) -> rusqlite::Result<Vec<Outbound>> {
    let mut stmt = conn.prepare(
        "SELECT id, recipient, subject, body FROM outbox
         WHERE sent_at IS NULL AND attempts < ?1
         ORDER BY id LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![max_attempts, BATCH], |r| {
        Ok(Outbound {
            id: r.get(0)?,
            to: r.get(1)?,
            subject: r.get(2)?,
            body: r.get(3)?,
        })
    })?;
    rows.collect()
}

pub fn mark_sent(conn: &Connection, id: i64, now: DateTime<Utc>) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE outbox SET sent_at = ?2, attempts = attempts + 1, last_error = NULL WHERE id = ?1",
        params![id, ts(now)],
    )?;
    Ok(())
}

pub fn mark_failed(conn: &Connection, id: i64, err: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE outbox SET attempts = attempts + 1, last_error = ?2 WHERE id = ?1",
        params![id, err],
    )?;
    Ok(())
}

/// Delete delivered mail older than `cutoff`, along with undeliverable mail
/// that was queued before it.
pub fn purge(conn: &Connection, max_attempts: i64, cutoff: DateTime<Utc>) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM outbox
         WHERE (sent_at IS NOT NULL AND sent_at < ?2)
            OR (sent_at IS NULL AND attempts >= ?1 AND created_at < ?2)",
        params![max_attempts, ts(cutoff)],
    )
}

/// Without a relay configured, messages are written to the log and
/// considered delivered.
pub fn flush_to_log(conn: &Connection, max_attempts: i64, now: DateTime<Utc>) -> rusqlite::Result<usize> {
    let batch = pending(conn, max_attempts)?;
    for mail in &batch {
        info!("Mail to {}: {}\n{}", mail.to, mail.subject, mail.body);
        mark_sent(conn, mail.id, now)?;
    }
    Ok(batch.len())
}

async fn deliver(client: &Client, url: &str, mail: &Outbound) -> Result<()> {
    let resp = client.post(url).json(mail).send().await?;
    if !resp.status().is_success() {
        return Err(eyre!("relay returned HTTP {}", resp.status()));
    }
    Ok(())
}

async fn with_db<F, T>(conn: &Arc<Mutex<Connection>>, f: F) -> Result<T>
where
    F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let conn = Arc::clone(conn);
    task::spawn_blocking(move || -> Result<T> {
        let db = conn.lock().map_err(|_| eyre!("database mutex poisoned"))?;
        Ok(f(&*db)?)
    })
    .await?
}

pub async fn run(cfg: Arc<Config>, conn: Arc<Mutex<Connection>>) -> Result<()> {
    let pause = Duration::from_secs(cfg.mail_interval_secs);
    let max_attempts = cfg.mail_max_attempts;

    let Some(url) = cfg.mail_relay_url.clone() else {
        info!("No mail relay configured, outbox messages go to the log");
        loop {
            let sent = with_db(&conn, move |db| flush_to_log(db, max_attempts, Utc::now())).await?;
            if sent > 0 {
                info!("Logged {} outbox messages", sent);
            }
            sleep(pause).await;
        }
    };

    let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
    info!("Mailer relaying to {}", url);

    loop {
        let batch = with_db(&conn, move |db| pending(db, max_attempts)).await?;

        let mut sent = 0;
        for mail in batch {
            let id = mail.id;
            match deliver(&client, &url, &mail).await {
                Ok(()) => {
                    with_db(&conn, move |db| mark_sent(db, id, Utc::now())).await?;
                    sent += 1;
                }
                Err(e) => {
                    warn!("Delivery of outbox message {} to {} failed: {:?}", id, mail.to, e);
                    let msg = e.to_string();
                    with_db(&conn, move |db| mark_failed(db, id, &msg)).await?;
                }
            }
        }
        if sent > 0 {
            info!("Relayed {} outbox messages", sent);
        }

        sleep(pause).await;
    }
}
