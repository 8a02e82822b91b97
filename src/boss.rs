// Staff back office: client management, KYC review, catalogue upkeep.
// Deposit/withdrawal confirmation lives in `ledger`.
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::{self, ts};
use crate::error::{AppError, Result};
use crate::models::{
    Account, AdminWallet, Client, CompanyProfile, Kyc, Page, Plan, PlanInput, Subscription,
    Transaction, Verification,
};
use crate::notify;
use crate::portal;
use crate::roi;

const CLIENTS_PER_PAGE: usize = 10;
const TRANSACTIONS_PER_PAGE: usize = 5;
const RECENT: i64 = 5;

/// Turn a UNIQUE violation into a `Conflict` with `msg`.
fn unique(e: rusqlite::Error, msg: &str) -> AppError {
    if let rusqlite::Error::SqliteFailure(err, _) = &e {
        if err.code == ErrorCode::ConstraintViolation {
            return AppError::Conflict(msg.to_string());
        }
    }
    AppError::Db(e)
}

fn contains(hay: Option<&str>, needle: &str) -> bool {
    hay.is_some_and(|h| h.to_lowercase().contains(needle))
}

// ---------- dashboard ----------

#[derive(Debug, Serialize)]
pub struct StaffDashboard {
    pub total_clients: i64,
    pub pending_withdrawals: i64,
    pub pending_deposits: i64,
    pub kyc_verified: i64,
    pub kyc_under_review: i64,
    pub kyc_unverified: i64,
    pub recent_withdrawals: Vec<Transaction>,
    pub recent_deposits: Vec<Transaction>,
    pub recent_clients: Vec<Client>,
}

fn count(conn: &Connection, sql: &str, arg: &str) -> Result<i64> {
    Ok(conn.query_row(sql, [arg], |r| r.get(0))?)
}

fn recent_of_type(conn: &Connection, kind: &str) -> Result<Vec<Transaction>> {
    let sql = format!(
        "{} WHERE transaction_type = ?1 ORDER BY date DESC, id DESC LIMIT ?2",
        db::TX_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![kind, RECENT], db::tx_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn dashboard(conn: &Connection) -> Result<StaffDashboard> {
    let pending = "SELECT COUNT(*) FROM transactions WHERE status = 'pending' AND transaction_type = ?1";
    let by_status = "SELECT COUNT(*) FROM clients WHERE verification_status = ?1";

    let mut recent_clients = all_clients(conn)?;
    recent_clients.truncate(RECENT as usize);

    Ok(StaffDashboard {
        total_clients: conn.query_row("SELECT COUNT(*) FROM clients", [], |r| r.get(0))?,
        pending_withdrawals: count(conn, pending, "WITHDRAWAL")?,
        pending_deposits: count(conn, pending, "DEPOSIT")?,
        kyc_verified: count(conn, by_status, Verification::Verified.as_str())?,
        kyc_under_review: count(conn, by_status, Verification::UnderReview.as_str())?,
        kyc_unverified: count(conn, by_status, Verification::Unverified.as_str())?,
        recent_withdrawals: recent_of_type(conn, "WITHDRAWAL")?,
        recent_deposits: recent_of_type(conn, "DEPOSIT")?,
        recent_clients,
    })
}

// ---------- clients ----------

fn all_clients(conn: &Connection) -> Result<Vec<Client>> {
    let sql = format!("{} ORDER BY c.date_joined DESC, c.id DESC", db::CLIENT_SELECT);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], db::client_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Newest first, filtered on first name, email or country.
pub fn clients(conn: &Connection, q: &str, page: Option<&str>) -> Result<Page<Client>> {
    let needle = q.trim().to_lowercase();
    let mut all = all_clients(conn)?;
    if !needle.is_empty() {
        all.retain(|c| {
            contains(c.first_name.as_deref(), &needle)
                || c.email.to_lowercase().contains(&needle)
                || contains(c.country.as_deref(), &needle)
        });
    }
    Ok(Page::paginate(all, page, CLIENTS_PER_PAGE))
}

#[derive(Debug, Serialize)]
pub struct ClientDetail {
    pub client: Client,
    pub account: Account,
}

pub fn client_detail(conn: &Connection, client_id: i64) -> Result<ClientDetail> {
    Ok(ClientDetail {
        client: db::get_client(conn, client_id)?,
        account: db::get_account(conn, client_id)?,
    })
}

#[derive(Debug, Deserialize)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Option<String>,
    pub dob: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub zip: Option<String>,
    pub phone_number: Option<String>,
    pub verification_status: Verification,
}

pub fn update_client_profile(
    conn: &mut Connection,
    client_id: i64,
    upd: &ProfileUpdate,
    now: DateTime<Utc>,
) -> Result<Client> {
    let tx = conn.transaction()?;
    let before = db::get_client(&tx, client_id)?;
    let phone = upd
        .phone_number
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());

    tx.execute(
        "UPDATE clients SET first_name = ?2, last_name = ?3, gender = ?4, dob = ?5, address = ?6,
                city = ?7, state = ?8, country = ?9, zip = ?10, phone_number = ?11,
                verification_status = ?12
         WHERE id = ?1",
        params![
            client_id,
            upd.first_name,
            upd.last_name,
            upd.gender,
            upd.dob,
            upd.address,
            upd.city,
            upd.state,
            upd.country,
            upd.zip,
            phone,
            upd.verification_status,
        ],
    )
    .map_err(|e| unique(e, "Phone number is already in use"))?;

    if let Some(first) = upd.first_name.as_deref().filter(|n| !n.trim().is_empty()) {
        tx.execute(
            "UPDATE users SET username = ?2, first_name = ?2 WHERE id = ?1",
            params![before.user_id, first.trim()],
        )?;
    }

    let after = db::get_client(&tx, client_id)?;
    if before.verification_status != Verification::Verified
        && after.verification_status == Verification::Verified
    {
        let company = db::company(&tx)?;
        notify::queue(
            &tx,
            &notify::kyc_verified(&after.email, after.display_name(), &company),
            now,
        )?;
    }
    tx.commit()?;

    info!("Staff updated profile of client {}", client_id);
    Ok(after)
}

pub fn set_main_balance(conn: &Connection, client_id: i64, amount: Decimal) -> Result<Account> {
    if amount < Decimal::ZERO {
        return Err(AppError::invalid("Balance cannot be negative"));
    }
    if amount.scale() > 2 {
        return Err(AppError::invalid("Amount can have at most 2 decimal places"));
    }
    roi::check_amount(amount)?;
    let mut account = db::get_account(conn, client_id)?;
    let previous = account.main_balance;
    account.main_balance = amount;
    db::save_balances(conn, &account)?;
    info!(
        "Staff set main balance of client {} from {} to {}",
        client_id, previous, amount
    );
    Ok(account)
}

pub fn client_investments(conn: &Connection, client_id: i64) -> Result<Vec<Subscription>> {
    db::get_client(conn, client_id)?;
    portal::subscriptions(conn, client_id)
}

pub fn client_kyc(conn: &Connection, client_id: i64) -> Result<Vec<Kyc>> {
    db::get_client(conn, client_id)?;
    portal::kyc_records(conn, client_id)
}

fn set_active(conn: &Connection, client_id: i64, active: bool) -> Result<Client> {
    let client = db::get_client(conn, client_id)?;
    conn.execute(
        "UPDATE users SET is_active = ?2 WHERE id = ?1",
        params![client.user_id, active],
    )?;
    if !active {
        conn.execute("DELETE FROM sessions WHERE user_id = ?1", [client.user_id])?;
    }
    info!("Client {} ({}) active = {}", client.id, client.email, active);
    db::get_client(conn, client_id)
}

pub fn activate_client(conn: &Connection, client_id: i64) -> Result<Client> {
    set_active(conn, client_id, true)
}

/// Also ends the client's open sessions.
pub fn deactivate_client(conn: &Connection, client_id: i64) -> Result<Client> {
    set_active(conn, client_id, false)
}

/// Removes the login; the client profile, account and history cascade.
pub fn delete_client(conn: &Connection, client_id: i64) -> Result<Client> {
    let client = db::get_client(conn, client_id)?;
    conn.execute("DELETE FROM users WHERE id = ?1", [client.user_id])?;
    info!("Deleted client {} ({})", client.id, client.email);
    Ok(client)
}

// ---------- KYC ----------

fn get_kyc(conn: &Connection, kyc_id: i64) -> Result<Kyc> {
    let sql = format!("{} WHERE id = ?1", db::KYC_SELECT);
    conn.query_row(&sql, [kyc_id], db::kyc_from_row)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => AppError::not_found("KYC"),
            e => AppError::Db(e),
        })
}

/// Copy the submitted details onto the client and mark it verified. The
/// client is only emailed the first time.
pub fn verify_kyc(conn: &mut Connection, kyc_id: i64, now: DateTime<Utc>) -> Result<Client> {
    let tx = conn.transaction()?;
    let kyc = get_kyc(&tx, kyc_id)?;
    let before = db::get_client(&tx, kyc.client_id)?;

    tx.execute(
        "UPDATE clients SET last_name = ?2, gender = ?3, dob = ?4, address = ?5, state = ?6,
                zip = ?7, verification_status = ?8
         WHERE id = ?1",
        params![
            kyc.client_id,
            kyc.last_name,
            kyc.gender,
            kyc.dob,
            kyc.address,
            kyc.state,
            kyc.postcode,
            Verification::Verified,
        ],
    )?;
    tx.execute(
        "UPDATE clients SET first_name = ?2 WHERE id = ?1 AND (first_name IS NULL OR first_name = '')",
        params![kyc.client_id, kyc.first_name],
    )?;

    let after = db::get_client(&tx, kyc.client_id)?;
    if before.verification_status != Verification::Verified {
        let company = db::company(&tx)?;
        notify::queue(
            &tx,
            &notify::kyc_verified(&after.email, after.display_name(), &company),
            now,
        )?;
        info!("Client {} verified from KYC {}", after.id, kyc_id);
    } else {
        info!("Client {} was already verified", after.id);
    }
    tx.commit()?;
    Ok(after)
}

pub fn delete_kyc(conn: &Connection, kyc_id: i64) -> Result<Kyc> {
    let kyc = get_kyc(conn, kyc_id)?;
    conn.execute("DELETE FROM kyc WHERE id = ?1", [kyc_id])?;
    info!("Deleted KYC {} of client {}", kyc_id, kyc.client_id);
    Ok(kyc)
}

// ---------- transactions ----------

/// A deposit or withdrawal with the owner's contact details.
#[derive(Debug, Serialize)]
pub struct ReviewItem {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub client_email: String,
    pub client_name: Option<String>,
}

fn review_items(conn: &Connection, filter: &str, arg: Option<i64>) -> Result<Vec<ReviewItem>> {
    let sql = format!(
        "SELECT t.id, t.client_id, t.amount, t.fees, t.date, t.trx_id, t.plan_id, t.payment_method,
                t.status, t.receipt, t.wallet_address, t.transaction_type, t.description,
                u.email, c.first_name
         FROM transactions t
         JOIN clients c ON c.id = t.client_id
         JOIN users u ON u.id = c.user_id
         WHERE t.transaction_type IN ('DEPOSIT', 'WITHDRAWAL') {filter}
         ORDER BY t.id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = match arg {
        Some(id) => stmt.query_map([id], review_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?,
        None => stmt.query_map([], review_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?,
    };
    Ok(rows)
}

fn review_from_row(r: &Row) -> rusqlite::Result<ReviewItem> {
    Ok(ReviewItem {
        transaction: db::tx_from_row(r)?,
        client_email: r.get(13)?,
        client_name: r.get(14)?,
    })
}

fn review_matches(item: &ReviewItem, needle: &str) -> bool {
    let t = &item.transaction;
    contains(item.client_name.as_deref(), needle)
        || t.transaction_type.as_str().to_lowercase().contains(needle)
        || t.status.as_str().contains(needle)
        || t.trx_id.to_lowercase().contains(needle)
        || t.amount.to_string().contains(needle)
        || ts(t.date).to_lowercase().contains(needle)
}

pub fn transactions(conn: &Connection, q: &str, page: Option<&str>) -> Result<Page<ReviewItem>> {
    let needle = q.trim().to_lowercase();
    let mut all = review_items(conn, "", None)?;
    if !needle.is_empty() {
        all.retain(|item| review_matches(item, &needle));
    }
    Ok(Page::paginate(all, page, TRANSACTIONS_PER_PAGE))
}

pub fn transaction_detail(conn: &Connection, tx_id: i64) -> Result<ReviewItem> {
    review_items(conn, "AND t.id = ?1", Some(tx_id))?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::not_found("Transaction"))
}

// ---------- wallets ----------

#[derive(Debug, Deserialize)]
pub struct WalletInput {
    pub name: String,
    pub wallet_address: String,
}

fn check_wallet(input: &WalletInput) -> Result<()> {
    if input.name.trim().is_empty() || input.wallet_address.trim().is_empty() {
        return Err(AppError::invalid("Wallet name and address are required"));
    }
    Ok(())
}

pub fn create_wallet(conn: &Connection, input: &WalletInput) -> Result<AdminWallet> {
    check_wallet(input)?;
    conn.execute(
        "INSERT INTO admin_wallets (name, wallet_address) VALUES (?1, ?2)",
        params![input.name.trim(), input.wallet_address.trim()],
    )
    .map_err(|e| unique(e, "A wallet with that name already exists"))?;
    info!("Created wallet {}", input.name.trim());
    db::get_wallet(conn, conn.last_insert_rowid())
}

pub fn update_wallet(conn: &Connection, id: i64, input: &WalletInput) -> Result<AdminWallet> {
    check_wallet(input)?;
    db::get_wallet(conn, id)?;
    conn.execute(
        "UPDATE admin_wallets SET name = ?2, wallet_address = ?3 WHERE id = ?1",
        params![id, input.name.trim(), input.wallet_address.trim()],
    )
    .map_err(|e| unique(e, "A wallet with that name already exists"))?;
    db::get_wallet(conn, id)
}

pub fn delete_wallet(conn: &Connection, id: i64) -> Result<AdminWallet> {
    let wallet = db::get_wallet(conn, id)?;
    conn.execute("DELETE FROM admin_wallets WHERE id = ?1", [id])?;
    info!("Deleted wallet {}", wallet.name);
    Ok(wallet)
}

// ---------- plans ----------

fn check_plan(input: &PlanInput) -> Result<()> {
    if input.name.trim().is_empty() {
        return Err(AppError::invalid("Plan name is required"));
    }
    if input.min_amount <= Decimal::ZERO || input.max_amount < input.min_amount {
        return Err(AppError::invalid(
            "Minimum must be positive and not above the maximum",
        ));
    }
    roi::check_amount(input.max_amount)?;
    roi::check_terms(input.daily_rate, input.period_in_days)
}

pub fn all_plans(conn: &Connection) -> Result<Vec<Plan>> {
    let sql = format!("{} ORDER BY id", db::PLAN_SELECT);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], db::plan_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn create_plan(conn: &Connection, input: &PlanInput) -> Result<Plan> {
    check_plan(input)?;
    conn.execute(
        "INSERT INTO plans (name, category, min_amount, max_amount, daily_rate, period_in_days,
                            is_active, is_promo)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            input.name.trim(),
            input.category,
            input.min_amount.to_string(),
            input.max_amount.to_string(),
            input.daily_rate.to_string(),
            input.period_in_days,
            input.is_active,
            input.is_promo,
        ],
    )
    .map_err(|e| unique(e, "A plan with that name already exists"))?;
    info!("Created plan {}", input.name.trim());
    db::get_plan(conn, conn.last_insert_rowid())
}

/// Existing subscriptions keep the terms they were opened with.
pub fn update_plan(conn: &Connection, id: i64, input: &PlanInput) -> Result<Plan> {
    check_plan(input)?;
    db::get_plan(conn, id)?;
    conn.execute(
        "UPDATE plans SET name = ?2, category = ?3, min_amount = ?4, max_amount = ?5,
                daily_rate = ?6, period_in_days = ?7, is_active = ?8, is_promo = ?9
         WHERE id = ?1",
        params![
            id,
            input.name.trim(),
            input.category,
            input.min_amount.to_string(),
            input.max_amount.to_string(),
            input.daily_rate.to_string(),
            input.period_in_days,
            input.is_active,
            input.is_promo,
        ],
    )
    .map_err(|e| unique(e, "A plan with that name already exists"))?;
    db::get_plan(conn, id)
}

// ---------- company ----------

pub fn update_company(conn: &Connection, profile: &CompanyProfile) -> Result<CompanyProfile> {
    if profile.name.trim().is_empty() || profile.forwarding_email.trim().is_empty() {
        return Err(AppError::invalid("Company name and forwarding email are required"));
    }
    conn.execute(
        "UPDATE company_profile SET name = ?1, domain = ?2, support_email = ?3,
                forwarding_email = ?4, address = ?5, phone = ?6
         WHERE id = 1",
        params![
            profile.name.trim(),
            profile.domain.trim(),
            profile.support_email.trim(),
            profile.forwarding_email.trim(),
            profile.address,
            profile.phone,
        ],
    )?;
    db::company(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::active_client;
    use crate::db::test_conn;
    use crate::ledger::tests::{add_wallet, dec, fund};
    use crate::ledger::{request_withdrawal, WithdrawalRequest};
    use crate::config::Config;
    use crate::models::KycInput;

    fn outbox_count(conn: &Connection, subject: &str) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM outbox WHERE subject = ?1", [subject], |r| r.get(0))
            .unwrap()
    }

    fn profile_update(status: Verification) -> ProfileUpdate {
        ProfileUpdate {
            first_name: Some("Ada".into()),
            last_name: Some("Lovelace".into()),
            gender: None,
            dob: None,
            address: None,
            city: None,
            state: None,
            country: Some("GB".into()),
            zip: None,
            phone_number: Some("+441234".into()),
            verification_status: status,
        }
    }

    #[test]
    fn dashboard_counts_pending_withdrawals() {
        let mut conn = test_conn();
        let cfg = Config::default();
        let id = active_client(&mut conn, "ada", None);
        active_client(&mut conn, "bob", None);
        fund(&mut conn, id, "300");
        crate::ledger::tests::verify(&conn, id);
        let client = db::get_client(&conn, id).unwrap();
        let req = WithdrawalRequest {
            wallet_name: "BTC".into(),
            amount: dec("100"),
            wallet_address: "bc1q".into(),
            description: None,
            pin: None,
        };
        request_withdrawal(&mut conn, &cfg, &client, &req, Utc::now()).unwrap();

        let d = dashboard(&conn).unwrap();
        assert_eq!(d.total_clients, 2);
        assert_eq!(d.pending_withdrawals, 1);
        assert_eq!(d.pending_deposits, 0);
        assert_eq!((d.kyc_verified, d.kyc_unverified), (1, 1));
        assert_eq!(d.recent_deposits.len(), 1);
        assert_eq!(d.recent_clients.len(), 2);
    }

    #[test]
    fn client_search_covers_name_email_and_country() {
        let mut conn = test_conn();
        let ada = active_client(&mut conn, "ada", None);
        active_client(&mut conn, "bob", None);
        update_client_profile(&mut conn, ada, &profile_update(Verification::Unverified), Utc::now())
            .unwrap();

        assert_eq!(clients(&conn, "", None).unwrap().total, 2);
        assert_eq!(clients(&conn, "ADA", None).unwrap().total, 1);
        assert_eq!(clients(&conn, "bob@", None).unwrap().total, 1);
        assert_eq!(clients(&conn, "gb", None).unwrap().items[0].id, ada);
        assert_eq!(clients(&conn, "nobody", None).unwrap().total, 0);
    }

    #[test]
    fn verifying_by_profile_emails_only_on_transition() {
        let mut conn = test_conn();
        let id = active_client(&mut conn, "ada", None);

        let c = update_client_profile(&mut conn, id, &profile_update(Verification::Verified), Utc::now())
            .unwrap();
        assert_eq!(c.verification_status, Verification::Verified);
        assert_eq!(db::get_user(&conn, c.user_id).unwrap().username, "Ada");
        update_client_profile(&mut conn, id, &profile_update(Verification::Verified), Utc::now())
            .unwrap();
        assert_eq!(outbox_count(&conn, "Identity Verified"), 1);

        let bob = active_client(&mut conn, "bob", None);
        let clash = update_client_profile(&mut conn, bob, &profile_update(Verification::Unverified), Utc::now());
        assert!(matches!(clash, Err(AppError::Conflict(_))));
    }

    #[test]
    fn kyc_verify_copies_details_once() {
        let mut conn = test_conn();
        let id = active_client(&mut conn, "ada", None);
        let client = db::get_client(&conn, id).unwrap();
        let input = KycInput {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            dob: "1990-12-10".into(),
            gender: Some("F".into()),
            postcode: "EC1".into(),
            address: "1 Analytical Way".into(),
            state: "London".into(),
            document_type: None,
            id_front_view: None,
            id_back_view: None,
        };
        let kyc = portal::submit_kyc(&mut conn, &client, &input, Utc::now()).unwrap();

        let verified = verify_kyc(&mut conn, kyc.id, Utc::now()).unwrap();
        assert_eq!(verified.verification_status, Verification::Verified);
        assert_eq!(verified.zip.as_deref(), Some("EC1"));
        assert_eq!(verified.last_name.as_deref(), Some("Lovelace"));
        verify_kyc(&mut conn, kyc.id, Utc::now()).unwrap();
        assert_eq!(outbox_count(&conn, "Identity Verified"), 1);

        assert_eq!(client_kyc(&conn, id).unwrap().len(), 1);
        delete_kyc(&conn, kyc.id).unwrap();
        assert!(matches!(delete_kyc(&conn, kyc.id), Err(AppError::NotFound(_))));
    }

    #[test]
    fn staff_transaction_list_hides_internal_rows() {
        let mut conn = test_conn();
        let id = active_client(&mut conn, "ada", None);
        for _ in 0..6 {
            fund(&mut conn, id, "20");
        }
        crate::ledger::insert_tx(
            &conn,
            &crate::ledger::NewTx::new(
                id,
                crate::models::TxType::Roi,
                crate::models::TxStatus::Successful,
                dec("1"),
            ),
            Utc::now(),
        )
        .unwrap();

        let page = transactions(&conn, "", Some("2")).unwrap();
        assert_eq!(page.total, 6);
        assert_eq!(page.num_pages, 2);
        assert_eq!(page.items.len(), 1);
        assert_eq!(transactions(&conn, "deposit", None).unwrap().total, 6);
        assert_eq!(transactions(&conn, "withdrawal", None).unwrap().total, 0);

        let first = &page.items[0];
        let detail = transaction_detail(&conn, first.transaction.id).unwrap();
        assert_eq!(detail.client_email, "ada@example.com");
    }

    #[test]
    fn balance_override_and_activation() {
        let mut conn = test_conn();
        let id = active_client(&mut conn, "ada", None);
        assert!(set_main_balance(&conn, id, dec("-1")).is_err());
        assert!(matches!(
            set_main_balance(&conn, id, Decimal::MAX),
            Err(AppError::Validation(_))
        ));
        assert_eq!(set_main_balance(&conn, id, dec("42.50")).unwrap().main_balance, dec("42.50"));

        assert!(!deactivate_client(&conn, id).unwrap().is_active);
        assert!(activate_client(&conn, id).unwrap().is_active);

        delete_client(&conn, id).unwrap();
        assert!(db::get_client(&conn, id).is_err());
        assert!(db::get_account(&conn, id).is_err());
    }

    #[test]
    fn wallet_and_plan_names_are_unique() {
        let conn = test_conn();
        add_wallet(&conn, "BTC");
        let dup = WalletInput { name: "BTC".into(), wallet_address: "x".into() };
        assert!(matches!(create_wallet(&conn, &dup), Err(AppError::Conflict(_))));
        let eth = create_wallet(&conn, &WalletInput { name: "ETH".into(), wallet_address: "0xabc".into() })
            .unwrap();
        let renamed = update_wallet(&conn, eth.id, &WalletInput { name: "ETH2".into(), wallet_address: "0xdef".into() })
            .unwrap();
        assert_eq!(renamed.name, "ETH2");
        delete_wallet(&conn, eth.id).unwrap();

        let input = PlanInput {
            name: "Gold".into(),
            category: None,
            min_amount: dec("100"),
            max_amount: dec("1000"),
            daily_rate: dec("2"),
            period_in_days: 30,
            is_active: true,
            is_promo: false,
        };
        let plan = create_plan(&conn, &input).unwrap();
        assert!(matches!(create_plan(&conn, &input), Err(AppError::Conflict(_))));

        let closed = PlanInput { is_active: false, ..input.clone() };
        assert!(!update_plan(&conn, plan.id, &closed).unwrap().is_active);
        let broken = PlanInput { max_amount: dec("50"), ..input };
        assert!(matches!(update_plan(&conn, plan.id, &broken), Err(AppError::Validation(_))));
        assert_eq!(all_plans(&conn).unwrap().len(), 1);
    }

    #[test]
    fn plan_terms_are_bounded() {
        let conn = test_conn();
        let input = PlanInput {
            name: "Gold".into(),
            category: None,
            min_amount: dec("100"),
            max_amount: dec("1000"),
            daily_rate: dec("2"),
            period_in_days: 30,
            is_active: true,
            is_promo: false,
        };
        let rejected = [
            PlanInput { daily_rate: dec("-1"), ..input.clone() },
            PlanInput { daily_rate: dec("100.01"), ..input.clone() },
            PlanInput { daily_rate: Decimal::MAX, ..input.clone() },
            PlanInput { period_in_days: 0, ..input.clone() },
            PlanInput { period_in_days: 100_000_000, ..input.clone() },
            PlanInput { max_amount: Decimal::MAX, ..input.clone() },
        ];
        for bad in &rejected {
            assert!(matches!(create_plan(&conn, bad), Err(AppError::Validation(_))));
        }
        assert!(all_plans(&conn).unwrap().is_empty());

        let zero = PlanInput { daily_rate: Decimal::ZERO, ..input };
        assert_eq!(create_plan(&conn, &zero).unwrap().daily_rate, Decimal::ZERO);
    }

    #[test]
    fn company_profile_updates() {
        let conn = test_conn();
        let mut profile = db::company(&conn).unwrap();
        profile.name = "Northwind Capital".into();
        assert_eq!(update_company(&conn, &profile).unwrap().name, "Northwind Capital");
        profile.forwarding_email = " ".into();
        assert!(update_company(&conn, &profile).is_err());
    }
}
