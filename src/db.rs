use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, types::Type, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::info;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{
    Account, AdminWallet, Client, CompanyProfile, Kyc, Plan, Subscription, Transaction, User,
};

const INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
  id            INTEGER PRIMARY KEY AUTOINCREMENT,
  email         TEXT NOT NULL UNIQUE COLLATE NOCASE,
  username      TEXT NOT NULL DEFAULT '',
  first_name    TEXT NOT NULL DEFAULT '',
  last_name     TEXT NOT NULL DEFAULT '',
  password_hash TEXT NOT NULL,
  is_active     INTEGER NOT NULL DEFAULT 0,
  is_client     INTEGER NOT NULL DEFAULT 0,
  is_staff      INTEGER NOT NULL DEFAULT 0,
  date_joined   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS clients (
  id                  INTEGER PRIMARY KEY AUTOINCREMENT,
  user_id             INTEGER NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
  first_name          TEXT,
  last_name           TEXT,
  gender              TEXT,
  dob                 TEXT,
  address             TEXT,
  city                TEXT,
  state               TEXT,
  country             TEXT DEFAULT 'US',
  zip                 TEXT,
  phone_number        TEXT UNIQUE,
  verification_status TEXT NOT NULL DEFAULT 'Unverified',
  referral_code       TEXT NOT NULL UNIQUE,
  recommended_by      INTEGER REFERENCES clients(id) ON DELETE SET NULL,
  date_joined         TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS accounts (
  client_id               INTEGER PRIMARY KEY REFERENCES clients(id) ON DELETE CASCADE,
  main_balance            TEXT NOT NULL DEFAULT '0', -- Decimal stored as string
  book_balance            TEXT NOT NULL DEFAULT '0',
  bonus                   TEXT NOT NULL DEFAULT '0',
  roi_balance             TEXT NOT NULL DEFAULT '0',
  total_amount_investment TEXT NOT NULL DEFAULT '0',
  total_amount_deposited  TEXT NOT NULL DEFAULT '0',
  total_amount_withdrawn  TEXT NOT NULL DEFAULT '0',
  total_expected_roi      TEXT NOT NULL DEFAULT '0',
  total_roi_received      TEXT NOT NULL DEFAULT '0',
  transaction_pin_hash    TEXT,
  first_deposit           INTEGER NOT NULL DEFAULT 0,
  last_deposit_date       TEXT,
  last_withdrawal_date    TEXT
);

CREATE TABLE IF NOT EXISTS plans (
  id             INTEGER PRIMARY KEY AUTOINCREMENT,
  name           TEXT NOT NULL UNIQUE,
  category       TEXT,
  min_amount     TEXT NOT NULL,
  max_amount     TEXT NOT NULL,
  daily_rate     TEXT NOT NULL,
  period_in_days INTEGER NOT NULL,
  is_active      INTEGER NOT NULL DEFAULT 1,
  is_promo       INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS subscriptions (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  client_id       INTEGER NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
  plan_id         INTEGER NOT NULL REFERENCES plans(id),
  trx_id          TEXT NOT NULL,
  amount_invested TEXT NOT NULL,
  amount_earned   TEXT NOT NULL DEFAULT '0',
  expected_roi    TEXT NOT NULL,
  earning         TEXT NOT NULL,
  status          TEXT NOT NULL CHECK (status IN ('Active','Expired')),
  date_started    TEXT NOT NULL,
  expiry_date     TEXT NOT NULL,
  next_payout     TEXT NOT NULL,
  expired         INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_subscriptions_due ON subscriptions(status, next_payout);

CREATE TABLE IF NOT EXISTS transactions (
  id               INTEGER PRIMARY KEY AUTOINCREMENT,
  client_id        INTEGER NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
  amount           TEXT NOT NULL,
  fees             TEXT,
  date             TEXT NOT NULL,
  trx_id           TEXT NOT NULL UNIQUE,
  plan_id          INTEGER REFERENCES plans(id),
  payment_method   TEXT,
  status           TEXT NOT NULL CHECK (status IN ('pending','successful','failed')),
  receipt          TEXT,
  wallet_address   TEXT,
  transaction_type TEXT NOT NULL,
  description      TEXT
);
CREATE INDEX IF NOT EXISTS idx_transactions_client ON transactions(client_id);

CREATE TABLE IF NOT EXISTS admin_wallets (
  id             INTEGER PRIMARY KEY AUTOINCREMENT,
  name           TEXT NOT NULL UNIQUE,
  wallet_address TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS kyc (
  id            INTEGER PRIMARY KEY AUTOINCREMENT,
  client_id     INTEGER NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
  first_name    TEXT NOT NULL,
  last_name     TEXT NOT NULL,
  dob           TEXT NOT NULL,
  gender        TEXT,
  postcode      TEXT NOT NULL,
  address       TEXT NOT NULL,
  state         TEXT NOT NULL,
  document_type TEXT,
  id_front_view TEXT,
  id_back_view  TEXT,
  created       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS company_profile (
  id               INTEGER PRIMARY KEY CHECK (id = 1),
  name             TEXT NOT NULL,
  domain           TEXT NOT NULL,
  support_email    TEXT NOT NULL,
  forwarding_email TEXT NOT NULL,
  address          TEXT,
  phone            TEXT
);

CREATE TABLE IF NOT EXISTS sessions (
  token      TEXT PRIMARY KEY,
  user_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
  created_at TEXT NOT NULL,
  expires_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_tokens (
  token      TEXT PRIMARY KEY,
  user_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
  purpose    TEXT NOT NULL CHECK (purpose IN ('activation','password_reset')),
  expires_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS outbox (
  id         INTEGER PRIMARY KEY AUTOINCREMENT,
  recipient  TEXT NOT NULL,
  subject    TEXT NOT NULL,
  body       TEXT NOT NULL,
  created_at TEXT NOT NULL,
  sent_at    TEXT,
  attempts   INTEGER NOT NULL DEFAULT 0,
  last_error TEXT
);
"#;

/// Connect to SQLite (WAL mode, foreign keys enforced)
pub fn connect(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}

/// Run schema migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(INIT_SQL)?;
    Ok(())
}

// ---------- column encodings ----------

/// Timestamps are stored with second precision so TEXT comparison orders them.
pub fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn conversion_err(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

pub fn get_dec(row: &Row, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw).map_err(|e| conversion_err(idx, e))
}

pub fn get_opt_dec(row: &Row, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| Decimal::from_str(&s).map_err(|e| conversion_err(idx, e)))
        .transpose()
}

pub fn get_ts(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

pub fn get_opt_ts(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_err(idx, e))
    })
    .transpose()
}

// ---------- row mappers ----------

pub const USER_COLS: &str =
    "id, email, username, first_name, last_name, password_hash, is_active, is_client, is_staff, date_joined";

pub fn user_from_row(r: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: r.get(0)?,
        email: r.get(1)?,
        username: r.get(2)?,
        first_name: r.get(3)?,
        last_name: r.get(4)?,
        password_hash: r.get(5)?,
        is_active: r.get(6)?,
        is_client: r.get(7)?,
        is_staff: r.get(8)?,
        date_joined: get_ts(r, 9)?,
    })
}

pub const CLIENT_SELECT: &str = "
    SELECT c.id, c.user_id, u.email, c.first_name, c.last_name, c.gender, c.dob, c.address,
           c.city, c.state, c.country, c.zip, c.phone_number, c.verification_status,
           c.referral_code, c.recommended_by, c.date_joined, u.is_active
    FROM clients c JOIN users u ON u.id = c.user_id";

pub fn client_from_row(r: &Row) -> rusqlite::Result<Client> {
    Ok(Client {
        id: r.get(0)?,
        user_id: r.get(1)?,
        email: r.get(2)?,
        first_name: r.get(3)?,
        last_name: r.get(4)?,
        gender: r.get(5)?,
        dob: r.get(6)?,
        address: r.get(7)?,
        city: r.get(8)?,
        state: r.get(9)?,
        country: r.get(10)?,
        zip: r.get(11)?,
        phone_number: r.get(12)?,
        verification_status: r.get(13)?,
        referral_code: r.get(14)?,
        recommended_by: r.get(15)?,
        date_joined: get_ts(r, 16)?,
        is_active: r.get(17)?,
    })
}

const ACCOUNT_SELECT: &str = "
    SELECT client_id, main_balance, book_balance, bonus, roi_balance, total_amount_investment,
           total_amount_deposited, total_amount_withdrawn, total_expected_roi, total_roi_received,
           transaction_pin_hash, first_deposit, last_deposit_date, last_withdrawal_date
    FROM accounts";

fn account_from_row(r: &Row) -> rusqlite::Result<Account> {
    let pin: Option<String> = r.get(10)?;
    Ok(Account {
        client_id: r.get(0)?,
        main_balance: get_dec(r, 1)?,
        book_balance: get_dec(r, 2)?,
        bonus: get_dec(r, 3)?,
        roi_balance: get_dec(r, 4)?,
        total_amount_investment: get_dec(r, 5)?,
        total_amount_deposited: get_dec(r, 6)?,
        total_amount_withdrawn: get_dec(r, 7)?,
        total_expected_roi: get_dec(r, 8)?,
        total_roi_received: get_dec(r, 9)?,
        has_transaction_pin: pin.is_some(),
        transaction_pin_hash: pin,
        first_deposit: r.get(11)?,
        last_deposit_date: get_opt_ts(r, 12)?,
        last_withdrawal_date: get_opt_ts(r, 13)?,
    })
}

pub const PLAN_SELECT: &str = "
    SELECT id, name, category, min_amount, max_amount, daily_rate, period_in_days, is_active, is_promo
    FROM plans";

pub fn plan_from_row(r: &Row) -> rusqlite::Result<Plan> {
    Ok(Plan {
        id: r.get(0)?,
        name: r.get(1)?,
        category: r.get(2)?,
        min_amount: get_dec(r, 3)?,
        max_amount: get_dec(r, 4)?,
        daily_rate: get_dec(r, 5)?,
        period_in_days: r.get(6)?,
        is_active: r.get(7)?,
        is_promo: r.get(8)?,
    })
}

pub const SUBSCRIPTION_SELECT: &str = "
    SELECT s.id, s.client_id, s.plan_id, p.name, s.trx_id, s.amount_invested, s.amount_earned,
           s.expected_roi, s.earning, s.status, s.date_started, s.expiry_date, s.next_payout, s.expired
    FROM subscriptions s JOIN plans p ON p.id = s.plan_id";

pub fn subscription_from_row(r: &Row) -> rusqlite::Result<Subscription> {
    Ok(Subscription {
        id: r.get(0)?,
        client_id: r.get(1)?,
        plan_id: r.get(2)?,
        plan_name: r.get(3)?,
        trx_id: r.get(4)?,
        amount_invested: get_dec(r, 5)?,
        amount_earned: get_dec(r, 6)?,
        expected_roi: get_dec(r, 7)?,
        earning: get_dec(r, 8)?,
        status: r.get(9)?,
        date_started: get_ts(r, 10)?,
        expiry_date: get_ts(r, 11)?,
        next_payout: get_ts(r, 12)?,
        expired: r.get(13)?,
    })
}

pub const TX_SELECT: &str = "
    SELECT id, client_id, amount, fees, date, trx_id, plan_id, payment_method, status, receipt,
           wallet_address, transaction_type, description
    FROM transactions";

pub fn tx_from_row(r: &Row) -> rusqlite::Result<Transaction> {
    Ok(Transaction {
        id: r.get(0)?,
        client_id: r.get(1)?,
        amount: get_dec(r, 2)?,
        fees: get_opt_dec(r, 3)?,
        date: get_ts(r, 4)?,
        trx_id: r.get(5)?,
        plan_id: r.get(6)?,
        payment_method: r.get(7)?,
        status: r.get(8)?,
        receipt: r.get(9)?,
        wallet_address: r.get(10)?,
        transaction_type: r.get(11)?,
        description: r.get(12)?,
    })
}

pub const KYC_SELECT: &str = "
    SELECT id, client_id, first_name, last_name, dob, gender, postcode, address, state,
           document_type, id_front_view, id_back_view, created
    FROM kyc";

pub fn kyc_from_row(r: &Row) -> rusqlite::Result<Kyc> {
    Ok(Kyc {
        id: r.get(0)?,
        client_id: r.get(1)?,
        first_name: r.get(2)?,
        last_name: r.get(3)?,
        dob: r.get(4)?,
        gender: r.get(5)?,
        postcode: r.get(6)?,
        address: r.get(7)?,
        state: r.get(8)?,
        document_type: r.get(9)?,
        id_front_view: r.get(10)?,
        id_back_view: r.get(11)?,
        created: get_ts(r, 12)?,
    })
}

pub fn wallet_from_row(r: &Row) -> rusqlite::Result<AdminWallet> {
    Ok(AdminWallet {
        id: r.get(0)?,
        name: r.get(1)?,
        wallet_address: r.get(2)?,
    })
}

// ---------- lookups ----------

pub fn find_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    let sql = format!("SELECT {USER_COLS} FROM users WHERE email = ?1 COLLATE NOCASE");
    Ok(conn
        .query_row(&sql, [email.trim()], user_from_row)
        .optional()?)
}

pub fn get_user(conn: &Connection, id: i64) -> Result<User> {
    let sql = format!("SELECT {USER_COLS} FROM users WHERE id = ?1");
    conn.query_row(&sql, [id], user_from_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("User"))
}

pub fn get_client(conn: &Connection, id: i64) -> Result<Client> {
    let sql = format!("{CLIENT_SELECT} WHERE c.id = ?1");
    conn.query_row(&sql, [id], client_from_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("Client"))
}

pub fn find_client_by_user(conn: &Connection, user_id: i64) -> Result<Option<Client>> {
    let sql = format!("{CLIENT_SELECT} WHERE c.user_id = ?1");
    Ok(conn.query_row(&sql, [user_id], client_from_row).optional()?)
}

pub fn get_account(conn: &Connection, client_id: i64) -> Result<Account> {
    let sql = format!("{ACCOUNT_SELECT} WHERE client_id = ?1");
    conn.query_row(&sql, [client_id], account_from_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("Account"))
}

pub fn get_plan(conn: &Connection, id: i64) -> Result<Plan> {
    let sql = format!("{PLAN_SELECT} WHERE id = ?1");
    conn.query_row(&sql, [id], plan_from_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("Plan"))
}

pub fn get_transaction(conn: &Connection, id: i64) -> Result<Transaction> {
    let sql = format!("{TX_SELECT} WHERE id = ?1");
    conn.query_row(&sql, [id], tx_from_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("Transaction"))
}

pub fn get_subscription(conn: &Connection, id: i64) -> Result<Subscription> {
    let sql = format!("{SUBSCRIPTION_SELECT} WHERE s.id = ?1");
    conn.query_row(&sql, [id], subscription_from_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("Investment"))
}

pub fn get_wallet(conn: &Connection, id: i64) -> Result<AdminWallet> {
    conn.query_row(
        "SELECT id, name, wallet_address FROM admin_wallets WHERE id = ?1",
        [id],
        wallet_from_row,
    )
    .optional()?
    .ok_or_else(|| AppError::not_found("Wallet"))
}

pub fn find_wallet_by_name(conn: &Connection, name: &str) -> Result<AdminWallet> {
    conn.query_row(
        "SELECT id, name, wallet_address FROM admin_wallets WHERE name = ?1",
        [name],
        wallet_from_row,
    )
    .optional()?
    .ok_or_else(|| AppError::not_found("Wallet"))
}

pub fn list_wallets(conn: &Connection) -> Result<Vec<AdminWallet>> {
    let mut stmt =
        conn.prepare("SELECT id, name, wallet_address FROM admin_wallets ORDER BY id DESC")?;
    let rows = stmt.query_map([], wallet_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// The company row always exists after `seed`.
pub fn company(conn: &Connection) -> Result<CompanyProfile> {
    conn.query_row(
        "SELECT name, domain, support_email, forwarding_email, address, phone
         FROM company_profile WHERE id = 1",
        [],
        |r| {
            Ok(CompanyProfile {
                name: r.get(0)?,
                domain: r.get(1)?,
                support_email: r.get(2)?,
                forwarding_email: r.get(3)?,
                address: r.get(4)?,
                phone: r.get(5)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| AppError::not_found("Company profile"))
}

// ---------- balance writes ----------

/// Overwrite the money columns of an account.
pub fn save_balances(conn: &Connection, a: &Account) -> Result<()> {
    conn.execute(
        "UPDATE accounts SET
            main_balance = ?2, book_balance = ?3, bonus = ?4, roi_balance = ?5,
            total_amount_investment = ?6, total_amount_deposited = ?7,
            total_amount_withdrawn = ?8, total_expected_roi = ?9, total_roi_received = ?10,
            first_deposit = ?11, last_deposit_date = ?12, last_withdrawal_date = ?13
         WHERE client_id = ?1",
        params![
            a.client_id,
            a.main_balance.to_string(),
            a.book_balance.to_string(),
            a.bonus.to_string(),
            a.roi_balance.to_string(),
            a.total_amount_investment.to_string(),
            a.total_amount_deposited.to_string(),
            a.total_amount_withdrawn.to_string(),
            a.total_expected_roi.to_string(),
            a.total_roi_received.to_string(),
            a.first_deposit,
            a.last_deposit_date.map(ts),
            a.last_withdrawal_date.map(ts),
        ],
    )?;
    Ok(())
}

/// Seed the company profile and the bootstrap staff user from config.
pub fn seed(conn: &Connection, cfg: &Config) -> Result<()> {
    conn.execute(
        "INSERT INTO company_profile (id, name, domain, support_email, forwarding_email)
         VALUES (1, ?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO NOTHING",
        params![
            cfg.company_name,
            cfg.site_domain,
            cfg.support_email,
            cfg.forwarding_email
        ],
    )?;

    if let (Some(email), Some(password)) = (&cfg.admin_email, &cfg.admin_password) {
        if find_user_by_email(conn, email)?.is_none() {
            conn.execute(
                "INSERT INTO users (email, username, password_hash, is_active, is_staff, date_joined)
                 VALUES (?1, 'admin', ?2, 1, 1, ?3)",
                params![email, crate::auth::hash_secret(password), ts(Utc::now())],
            )?;
            info!("Created staff user {}", email);
        }
    }
    Ok(())
}

/// In-memory database with the schema and default company row, for tests.
#[cfg(test)]
pub fn test_conn() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.pragma_update(None, "foreign_keys", "ON").unwrap();
    run_migrations(&conn).unwrap();
    seed(&conn, &Config::default()).unwrap();
    conn
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_sort_as_text() {
        let a = Utc.with_ymd_and_hms(2026, 1, 9, 23, 59, 59).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap();
        assert!(ts(a) < ts(b));
        assert_eq!(ts(b), "2026-01-10T00:00:00Z");
    }

    #[test]
    fn seed_is_idempotent_and_creates_staff() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let cfg = Config {
            admin_email: Some("Boss@Example.com".into()),
            admin_password: Some("s3cret-pass".into()),
            ..Config::default()
        };
        seed(&conn, &cfg).unwrap();
        seed(&conn, &cfg).unwrap();

        let staff = find_user_by_email(&conn, "boss@example.com").unwrap().unwrap();
        assert!(staff.is_staff && staff.is_active);
        assert_eq!(company(&conn).unwrap().name, "My Company");
    }

    #[test]
    fn malformed_decimal_is_a_conversion_error() {
        let conn = test_conn();
        let err = conn
            .query_row("SELECT 'twelve'", [], |r| get_dec(r, 0))
            .unwrap_err();
        assert!(matches!(err, rusqlite::Error::FromSqlConversionFailure(..)));
    }
}
