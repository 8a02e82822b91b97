use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info};

use crate::db::{self, ts};
use crate::error::Result;
use crate::ledger::{insert_tx, NewTx};
use crate::models::{SubscriptionStatus, TxStatus, TxType};
use crate::notify;
use crate::roi;

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct AccrualReport {
    pub paid: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total: Decimal,
}

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct ExpiryReport {
    pub expired: usize,
    pub corrected: usize,
    pub failed: usize,
    pub total_correction: Decimal,
}

fn ids(conn: &Connection, sql: &str, now: DateTime<Utc>) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([ts(now)], |r| r.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<i64>>>()?)
}

/// Credit one payout to every active subscription whose payout is due.
pub fn pay_due_roi(conn: &mut Connection, now: DateTime<Utc>) -> Result<AccrualReport> {
    let due = ids(
        conn,
        "SELECT id FROM subscriptions WHERE status = 'Active' AND next_payout <= ?1 ORDER BY id",
        now,
    )?;

    let mut report = AccrualReport::default();
    for id in due {
        match pay_one(conn, id, now) {
            Ok(Some(amount)) => {
                report.paid += 1;
                report.total = report.total.saturating_add(amount);
            }
            Ok(None) => report.skipped += 1,
            Err(e) => {
                report.failed += 1;
                error!("ROI payout failed for investment {}: {:?}", id, e);
            }
        }
    }

    if report.paid + report.failed > 0 {
        info!(
            "ROI run: {} paid ({}), {} skipped, {} failed",
            report.paid, report.total, report.skipped, report.failed
        );
    }
    Ok(report)
}

/// Returns the amount credited; `None` when nothing was owed.
fn pay_one(conn: &mut Connection, id: i64, now: DateTime<Utc>) -> Result<Option<Decimal>> {
    let tx = conn.transaction()?;
    let sub = db::get_subscription(&tx, id)?;
    if sub.status != SubscriptionStatus::Active || sub.next_payout > now {
        return Ok(None);
    }

    // never pay past the expected total
    let remaining = (sub.expected_roi - sub.amount_earned).max(Decimal::ZERO);
    let interest = sub.earning.min(remaining);
    let next = roi::next_payout(now);

    if interest.is_zero() {
        tx.execute(
            "UPDATE subscriptions SET next_payout = ?2 WHERE id = ?1",
            params![id, ts(next)],
        )?;
        tx.commit()?;
        return Ok(None);
    }

    let mut account = db::get_account(&tx, sub.client_id)?;
    account.roi_balance = roi::add(account.roi_balance, interest)?;
    account.total_roi_received = roi::add(account.total_roi_received, interest)?;
    db::save_balances(&tx, &account)?;

    let earned = roi::add(sub.amount_earned, interest)?;
    tx.execute(
        "UPDATE subscriptions SET amount_earned = ?2, next_payout = ?3 WHERE id = ?1",
        params![id, earned.to_string(), ts(next)],
    )?;

    let mut entry = NewTx::new(sub.client_id, TxType::Roi, TxStatus::Successful, interest);
    entry.plan_id = Some(sub.plan_id);
    let record = insert_tx(&tx, &entry, now)?;

    let client = db::get_client(&tx, sub.client_id)?;
    let company = db::company(&tx)?;
    notify::queue(
        &tx,
        &notify::roi_success(
            &client.email,
            client.display_name(),
            &sub.plan_name,
            interest,
            account.roi_balance,
            &record.trx_id,
            now,
            &company,
        ),
        now,
    )?;
    tx.commit()?;

    info!(
        "Paid {} ROI on investment {} (client {}), next payout {}",
        interest, id, sub.client_id, next
    );
    Ok(Some(interest))
}

/// Close every subscription past its expiry date, topping up any shortfall
/// so the client receives exactly the expected total.
pub fn expire_matured(conn: &mut Connection, now: DateTime<Utc>) -> Result<ExpiryReport> {
    let matured = ids(
        conn,
        "SELECT id FROM subscriptions
         WHERE status = 'Active' AND expired = 0 AND expiry_date <= ?1 ORDER BY id",
        now,
    )?;

    let mut report = ExpiryReport::default();
    for id in matured {
        match expire_one(conn, id, now) {
            Ok(correction) => {
                report.expired += 1;
                if !correction.is_zero() {
                    report.corrected += 1;
                    report.total_correction = report.total_correction.saturating_add(correction);
                }
            }
            Err(e) => {
                report.failed += 1;
                error!("Expiry failed for investment {}: {:?}", id, e);
            }
        }
    }

    if report.expired + report.failed > 0 {
        info!(
            "Expiry run: {} expired, {} corrected ({}), {} failed",
            report.expired, report.corrected, report.total_correction, report.failed
        );
    }
    Ok(report)
}

fn expire_one(conn: &mut Connection, id: i64, now: DateTime<Utc>) -> Result<Decimal> {
    let tx = conn.transaction()?;
    let sub = db::get_subscription(&tx, id)?;
    let shortfall = (sub.expected_roi - sub.amount_earned).max(Decimal::ZERO);

    if !shortfall.is_zero() {
        let mut account = db::get_account(&tx, sub.client_id)?;
        account.roi_balance = roi::add(account.roi_balance, shortfall)?;
        account.total_roi_received = roi::add(account.total_roi_received, shortfall)?;
        db::save_balances(&tx, &account)?;

        let mut entry = NewTx::new(sub.client_id, TxType::Roi, TxStatus::Successful, shortfall);
        entry.plan_id = Some(sub.plan_id);
        entry.description = Some("Expiry correction");
        insert_tx(&tx, &entry, now)?;
        info!("Correcting ROI for investment {}: missing {}", id, shortfall);
    }

    let earned = roi::add(sub.amount_earned, shortfall)?;
    tx.execute(
        "UPDATE subscriptions SET amount_earned = ?2, status = ?3, expired = 1 WHERE id = ?1",
        params![id, earned.to_string(), SubscriptionStatus::Expired],
    )?;

    let client = db::get_client(&tx, sub.client_id)?;
    let company = db::company(&tx)?;
    notify::queue(
        &tx,
        &notify::investment_expired(
            &company.forwarding_email,
            &client.email,
            sub.amount_invested,
            earned,
            shortfall,
        ),
        now,
    )?;
    tx.commit()?;
    Ok(shortfall)
}
