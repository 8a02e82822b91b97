// Read models and small workflows behind the client dashboard.
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::{self, ts};
use crate::error::{AppError, Result};
use crate::models::{
    Account, AdminWallet, Client, Kyc, KycInput, Page, Plan, Subscription, Transaction, TxType,
    Verification,
};
use crate::notify;
use crate::roi;

pub const PER_PAGE: usize = 10;
const RECENT: usize = 5;

#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub client: Client,
    pub account: Account,
    pub recent_transactions: Vec<Transaction>,
}

pub fn dashboard(conn: &Connection, client: &Client) -> Result<Dashboard> {
    let account = db::get_account(conn, client.id)?;
    let mut recent = transactions(conn, client.id)?;
    recent.truncate(RECENT);
    Ok(Dashboard {
        client: client.clone(),
        account,
        recent_transactions: recent,
    })
}

/// All of a client's transactions, newest first.
pub fn transactions(conn: &Connection, client_id: i64) -> Result<Vec<Transaction>> {
    let sql = format!("{} WHERE client_id = ?1 ORDER BY date DESC, id DESC", db::TX_SELECT);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([client_id], db::tx_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn transaction_history(
    conn: &Connection,
    client_id: i64,
    page: Option<&str>,
) -> Result<Page<Transaction>> {
    Ok(Page::paginate(transactions(conn, client_id)?, page, PER_PAGE))
}

fn matches_query(t: &Transaction, q: &str) -> bool {
    let lower = q.to_lowercase();
    let by_number = q.parse::<i64>().is_ok_and(|n| n == t.id);
    let by_type = q
        .parse::<TxType>()
        .is_ok_and(|kind| kind == t.transaction_type)
        || t.transaction_type.label().eq_ignore_ascii_case(q);

    by_number
        || by_type
        || t.amount.to_string().contains(q)
        || ts(t.date).contains(q)
        || t.status.as_str().contains(&lower)
        || t.trx_id == q
}

/// Filter a client's transactions. An empty query returns everything.
pub fn search_transactions(conn: &Connection, client_id: i64, q: &str) -> Result<Vec<Transaction>> {
    let q = q.trim();
    let all = transactions(conn, client_id)?;
    if q.is_empty() {
        return Ok(all);
    }
    Ok(all.into_iter().filter(|t| matches_query(t, q)).collect())
}

pub fn subscriptions(conn: &Connection, client_id: i64) -> Result<Vec<Subscription>> {
    let sql = format!(
        "{} WHERE s.client_id = ?1 ORDER BY s.date_started DESC, s.id DESC",
        db::SUBSCRIPTION_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([client_id], db::subscription_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn investment_log(
    conn: &Connection,
    client_id: i64,
    page: Option<&str>,
) -> Result<Page<Subscription>> {
    Ok(Page::paginate(subscriptions(conn, client_id)?, page, PER_PAGE))
}

#[derive(Debug, Serialize)]
pub struct Holding {
    #[serde(flatten)]
    pub subscription: Subscription,
    pub progress: Decimal,
}

#[derive(Debug, Serialize)]
pub struct Portfolio {
    pub holdings: Vec<Holding>,
    pub total_invested: Decimal,
    pub total_earned: Decimal,
    pub plan_count: usize,
}

/// Percentage of the expected total already earned, capped at 100.
pub fn progress(earned: Decimal, expected: Decimal) -> Decimal {
    if expected.is_zero() {
        return Decimal::ZERO;
    }
    (earned / expected * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        .min(Decimal::ONE_HUNDRED)
}

pub fn portfolio(conn: &Connection, client_id: i64) -> Result<Portfolio> {
    let active: Vec<Subscription> = subscriptions(conn, client_id)?
        .into_iter()
        .filter(|s| !s.expired)
        .collect();

    let total_invested = active
        .iter()
        .try_fold(Decimal::ZERO, |acc, s| roi::add(acc, s.amount_invested))?;
    let total_earned = active
        .iter()
        .try_fold(Decimal::ZERO, |acc, s| roi::add(acc, s.amount_earned))?;
    let plan_count = active.len();
    let holdings = active
        .into_iter()
        .map(|s| Holding {
            progress: progress(s.amount_earned, s.expected_roi),
            subscription: s,
        })
        .collect();

    Ok(Portfolio {
        holdings,
        total_invested,
        total_earned,
        plan_count,
    })
}

// ---------- catalogue ----------

pub fn active_plans(conn: &Connection) -> Result<Vec<Plan>> {
    let sql = format!("{} WHERE is_active = 1 ORDER BY min_amount, id", db::PLAN_SELECT);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], db::plan_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Closed plans are hidden from clients.
pub fn plan_detail(conn: &Connection, plan_id: i64) -> Result<Plan> {
    let plan = db::get_plan(conn, plan_id)?;
    if !plan.is_active {
        return Err(AppError::not_found("Plan"));
    }
    Ok(plan)
}

pub fn wallets(conn: &Connection) -> Result<Vec<AdminWallet>> {
    db::list_wallets(conn)
}

#[derive(Debug, Serialize)]
pub struct PlanPreview {
    pub plan: Plan,
    pub amount: Decimal,
    pub expected_roi: Decimal,
    pub earning: Decimal,
    pub expected_days: i64,
    pub next_payout: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
}

/// What investing `amount` in a plan today would return.
pub fn plan_preview(
    conn: &Connection,
    plan_id: i64,
    amount: Decimal,
    now: DateTime<Utc>,
) -> Result<PlanPreview> {
    if amount <= Decimal::ZERO {
        return Err(AppError::invalid("Amount must be greater than zero"));
    }
    roi::check_amount(amount)?;
    let plan = db::get_plan(conn, plan_id)?;
    roi::check_terms(plan.daily_rate, plan.period_in_days)?;
    Ok(PlanPreview {
        amount,
        expected_roi: roi::expected_roi(amount, plan.daily_rate, plan.period_in_days)?,
        earning: roi::earning(amount, plan.daily_rate)?,
        expected_days: roi::expected_days(amount, plan.daily_rate, plan.period_in_days)?,
        next_payout: roi::next_payout(now),
        expiry_date: roi::add_business_days(now, plan.period_in_days),
        plan,
    })
}

// ---------- profile ----------

#[derive(Debug, Serialize)]
pub struct Profile {
    pub client: Client,
    pub account: Account,
    pub kyc: Vec<Kyc>,
}

pub fn profile(conn: &Connection, client: &Client) -> Result<Profile> {
    Ok(Profile {
        client: client.clone(),
        account: db::get_account(conn, client.id)?,
        kyc: kyc_records(conn, client.id)?,
    })
}

pub fn kyc_records(conn: &Connection, client_id: i64) -> Result<Vec<Kyc>> {
    let sql = format!("{} WHERE client_id = ?1 ORDER BY created DESC, id DESC", db::KYC_SELECT);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([client_id], db::kyc_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn required(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::invalid(format!("{field} is required")));
    }
    Ok(())
}

pub fn submit_kyc(
    conn: &mut Connection,
    client: &Client,
    input: &KycInput,
    now: DateTime<Utc>,
) -> Result<Kyc> {
    if client.verification_status == Verification::Verified {
        return Err(AppError::Conflict("Your account is already verified".into()));
    }
    required("First name", &input.first_name)?;
    required("Last name", &input.last_name)?;
    required("Date of birth", &input.dob)?;
    required("Postcode", &input.postcode)?;
    required("Address", &input.address)?;
    required("State", &input.state)?;

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO kyc (client_id, first_name, last_name, dob, gender, postcode, address, state,
                          document_type, id_front_view, id_back_view, created)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            client.id,
            input.first_name.trim(),
            input.last_name.trim(),
            input.dob.trim(),
            input.gender,
            input.postcode.trim(),
            input.address.trim(),
            input.state.trim(),
            input.document_type,
            input.id_front_view,
            input.id_back_view,
            ts(now),
        ],
    )?;
    let id = tx.last_insert_rowid();
    tx.execute(
        "UPDATE clients SET verification_status = ?2 WHERE id = ?1",
        params![client.id, Verification::UnderReview],
    )?;

    let company = db::company(&tx)?;
    notify::queue(
        &tx,
        &notify::kyc_submitted(&company.forwarding_email, &client.email),
        now,
    )?;
    let sql = format!("{} WHERE id = ?1", db::KYC_SELECT);
    let record = tx.query_row(&sql, [id], db::kyc_from_row)?;
    tx.commit()?;

    info!("Client {} submitted KYC {}", client.id, id);
    Ok(record)
}

#[derive(Debug, Deserialize)]
pub struct SupportMessage {
    pub subject: String,
    pub message: String,
}

pub fn contact_support(
    conn: &Connection,
    client: &Client,
    msg: &SupportMessage,
    now: DateTime<Utc>,
) -> Result<()> {
    required("Subject", &msg.subject)?;
    required("Message", &msg.message)?;
    let company = db::company(conn)?;
    notify::queue(
        conn,
        &notify::support(&company.forwarding_email, &client.email, &msg.subject, &msg.message),
        now,
    )
}
