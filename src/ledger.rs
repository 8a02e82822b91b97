// Balance-mutation workflow. Every operation runs in one SQLite transaction
// covering the ledger row, the account balances, and the outbox.
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::{hash_secret, random_code, verify_secret};
use crate::config::Config;
use crate::db::{self, ts};
use crate::error::{AppError, Result};
use crate::models::{
    Client, CompanyProfile, Subscription, SubscriptionStatus, Transaction, TxStatus, TxType, Verification,
};
use crate::notify::{self, InvestmentNotice};
use crate::roi;

/// Reference shown to clients: 8 random characters plus the client id.
pub fn new_trx_id(client_id: i64) -> String {
    format!("{}{}", random_code(8), client_id)
}

pub struct NewTx<'a> {
    pub client_id: i64,
    pub kind: TxType,
    pub status: TxStatus,
    pub amount: Decimal,
    pub plan_id: Option<i64>,
    pub payment_method: Option<&'a str>,
    pub wallet_address: Option<&'a str>,
    pub receipt: Option<&'a str>,
    pub description: Option<&'a str>,
}

impl<'a> NewTx<'a> {
    pub fn new(client_id: i64, kind: TxType, status: TxStatus, amount: Decimal) -> Self {
        NewTx {
            client_id,
            kind,
            status,
            amount,
            plan_id: None,
            payment_method: None,
            wallet_address: None,
            receipt: None,
            description: None,
        }
    }
}

pub fn insert_tx(conn: &Connection, t: &NewTx, now: DateTime<Utc>) -> Result<Transaction> {
    let trx_id = new_trx_id(t.client_id);
    conn.execute(
        "INSERT INTO transactions (client_id, amount, date, trx_id, plan_id, payment_method,
                                   status, receipt, wallet_address, transaction_type, description)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            t.client_id,
            t.amount.to_string(),
            ts(now),
            trx_id,
            t.plan_id,
            t.payment_method,
            t.status,
            t.receipt,
            t.wallet_address,
            t.kind,
            t.description,
        ],
    )?;
    db::get_transaction(conn, conn.last_insert_rowid())
}

fn positive(amount: Decimal) -> Result<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(AppError::invalid("Amount must be greater than zero"));
    }
    if amount.scale() > 2 {
        return Err(AppError::invalid("Amount can have at most 2 decimal places"));
    }
    roi::check_amount(amount)
}

// ---------- client operations ----------

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub wallet_id: i64,
    pub amount: Decimal,
    pub receipt: Option<String>,
}

pub fn request_deposit(
    conn: &mut Connection,
    cfg: &Config,
    client: &Client,
    req: &DepositRequest,
    now: DateTime<Utc>,
) -> Result<Transaction> {
    let amount = positive(req.amount)?;
    if amount < cfg.min_deposit {
        return Err(AppError::invalid(format!(
            "You need to deposit at least ${:.2}",
            cfg.min_deposit
        )));
    }

    let tx = conn.transaction()?;
    let wallet = db::get_wallet(&tx, req.wallet_id)?;
    let mut new = NewTx::new(client.id, TxType::Deposit, TxStatus::Pending, amount);
    new.payment_method = Some(&wallet.name);
    new.receipt = req.receipt.as_deref();
    let record = insert_tx(&tx, &new, now)?;

    let company = db::company(&tx)?;
    notify::queue(
        &tx,
        &notify::deposit_request(&company.forwarding_email, &client.email, amount, &wallet.name),
        now,
    )?;
    tx.commit()?;

    info!("Deposit {} of {} requested by client {}", record.trx_id, amount, client.id);
    Ok(record)
}

#[derive(Debug, Deserialize)]
pub struct WithdrawalRequest {
    pub wallet_name: String,
    pub amount: Decimal,
    pub wallet_address: String,
    pub description: Option<String>,
    pub pin: Option<String>,
}

pub fn request_withdrawal(
    conn: &mut Connection,
    cfg: &Config,
    client: &Client,
    req: &WithdrawalRequest,
    now: DateTime<Utc>,
) -> Result<Transaction> {
    let amount = positive(req.amount)?;
    let address = req.wallet_address.trim();
    if address.is_empty() {
        return Err(AppError::invalid("Wallet address is required"));
    }

    let tx = conn.transaction()?;
    let wallet = db::find_wallet_by_name(&tx, &req.wallet_name)?;
    let account = db::get_account(&tx, client.id)?;

    if amount < cfg.min_withdrawal {
        return Err(AppError::invalid(format!(
            "You can withdraw at least ${:.2}",
            cfg.min_withdrawal
        )));
    }
    if amount > account.main_balance {
        return Err(AppError::InsufficientFunds {
            balance: account.main_balance,
            requested: amount,
        });
    }
    match client.verification_status {
        Verification::Unverified => return Err(AppError::invalid("Please Verify your Account !")),
        Verification::UnderReview => return Err(AppError::invalid("Your Account is Under Review !")),
        Verification::Verified => {}
    }
    if let Some(hash) = &account.transaction_pin_hash {
        let ok = req.pin.as_deref().is_some_and(|pin| verify_secret(pin, hash));
        if !ok {
            return Err(AppError::invalid("Invalid transaction PIN"));
        }
    }

    let mut new = NewTx::new(client.id, TxType::Withdrawal, TxStatus::Pending, amount);
    new.payment_method = Some(&wallet.name);
    new.wallet_address = Some(address);
    new.description = req.description.as_deref();
    let record = insert_tx(&tx, &new, now)?;

    let company = db::company(&tx)?;
    notify::queue(
        &tx,
        &notify::withdrawal_request(&company.forwarding_email, &client.email, amount, &wallet.name),
        now,
    )?;
    tx.commit()?;

    info!("Withdrawal {} of {} requested by client {}", record.trx_id, amount, client.id);
    Ok(record)
}

#[derive(Debug, Deserialize)]
pub struct InvestRequest {
    pub plan_id: i64,
    pub amount: Decimal,
}

#[derive(Debug, Serialize)]
pub struct Invested {
    pub transaction: Transaction,
    pub subscription: Subscription,
}

pub fn invest(
    conn: &mut Connection,
    client: &Client,
    req: &InvestRequest,
    now: DateTime<Utc>,
) -> Result<Invested> {
    let amount = positive(req.amount)?;

    let tx = conn.transaction()?;
    let plan = db::get_plan(&tx, req.plan_id)?;
    if !plan.is_active {
        return Err(AppError::invalid(format!("{} is not open for investment", plan.name)));
    }
    if amount < plan.min_amount {
        return Err(AppError::invalid(format!(
            "You can invest at least ${:.2}",
            plan.min_amount
        )));
    }
    if amount > plan.max_amount {
        return Err(AppError::invalid(format!(
            "You can invest at most ${:.2}",
            plan.max_amount
        )));
    }

    let mut account = db::get_account(&tx, client.id)?;
    if amount > account.main_balance {
        return Err(AppError::InsufficientFunds {
            balance: account.main_balance,
            requested: amount,
        });
    }

    roi::check_terms(plan.daily_rate, plan.period_in_days)?;
    let expected = roi::expected_roi(amount, plan.daily_rate, plan.period_in_days)?;
    let earning = roi::earning(amount, plan.daily_rate)?;

    account.main_balance -= amount;
    account.total_amount_investment = roi::add(account.total_amount_investment, amount)?;
    account.total_expected_roi = roi::add(account.total_expected_roi, expected)?;
    db::save_balances(&tx, &account)?;

    let mut new = NewTx::new(client.id, TxType::Investment, TxStatus::Successful, amount);
    new.plan_id = Some(plan.id);
    let record = insert_tx(&tx, &new, now)?;

    let expiry = roi::add_business_days(now, plan.period_in_days);
    let next = roi::next_payout(now);
    tx.execute(
        "INSERT INTO subscriptions (client_id, plan_id, trx_id, amount_invested, amount_earned,
                                    expected_roi, earning, status, date_started, expiry_date, next_payout)
         VALUES (?1, ?2, ?3, ?4, '0', ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            client.id,
            plan.id,
            record.trx_id,
            amount.to_string(),
            expected.to_string(),
            earning.to_string(),
            SubscriptionStatus::Active,
            ts(now),
            ts(expiry),
            ts(next),
        ],
    )?;
    let subscription = db::get_subscription(&tx, tx.last_insert_rowid())?;

    let company = db::company(&tx)?;
    let notice = InvestmentNotice {
        name: client.display_name(),
        plan: &plan.name,
        amount,
        expected_roi: expected,
        earning,
        next_payout: next,
        balance: account.main_balance,
        trx_id: &record.trx_id,
        date: now,
    };
    notify::queue(&tx, &notify::investment_success(&client.email, &notice, &company), now)?;
    tx.commit()?;

    info!(
        "Client {} invested {} in {} (expected {}, expires {})",
        client.id, amount, plan.name, expected, expiry
    );
    Ok(Invested {
        transaction: record,
        subscription,
    })
}

/// Move ROI earnings into the main balance.
pub fn withdraw_roi(
    conn: &mut Connection,
    cfg: &Config,
    client: &Client,
    amount: Decimal,
    now: DateTime<Utc>,
) -> Result<Transaction> {
    let amount = positive(amount)?;
    if amount < cfg.min_withdrawal {
        return Err(AppError::invalid(format!(
            "You can withdraw at least ${:.2}",
            cfg.min_withdrawal
        )));
    }

    let tx = conn.transaction()?;
    let mut account = db::get_account(&tx, client.id)?;
    if amount > account.roi_balance {
        return Err(AppError::InsufficientFunds {
            balance: account.roi_balance,
            requested: amount,
        });
    }
    account.roi_balance -= amount;
    account.main_balance = roi::add(account.main_balance, amount)?;
    db::save_balances(&tx, &account)?;

    let mut new = NewTx::new(client.id, TxType::RoiWithdrawal, TxStatus::Successful, amount);
    new.payment_method = Some("ROI");
    let record = insert_tx(&tx, &new, now)?;
    tx.commit()?;

    info!("Client {} moved {} from ROI to main balance", client.id, amount);
    Ok(record)
}

pub fn set_transaction_pin(conn: &Connection, client_id: i64, pin: &str) -> Result<()> {
    if pin.len() != 4 || !pin.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AppError::invalid("Transaction PIN must be exactly 4 digits."));
    }
    let updated = conn.execute(
        "UPDATE accounts SET transaction_pin_hash = ?2 WHERE client_id = ?1",
        params![client_id, hash_secret(pin)],
    )?;
    if updated == 0 {
        return Err(AppError::not_found("Account"));
    }
    Ok(())
}

// ---------- admin review ----------

/// Deposits and withdrawals are the only rows staff review.
fn reviewable(conn: &Connection, tx_id: i64) -> Result<Transaction> {
    let record = db::get_transaction(conn, tx_id)?;
    match record.transaction_type {
        TxType::Deposit | TxType::Withdrawal => Ok(record),
        _ => Err(AppError::not_found("Transaction")),
    }
}

fn require_pending(record: &Transaction) -> Result<()> {
    if record.status != TxStatus::Pending {
        return Err(AppError::InvalidState {
            trx_id: record.trx_id.clone(),
            status: record.status.to_string(),
        });
    }
    Ok(())
}

fn set_status(conn: &Connection, tx_id: i64, status: TxStatus) -> Result<()> {
    conn.execute(
        "UPDATE transactions SET status = ?2 WHERE id = ?1",
        params![tx_id, status],
    )?;
    Ok(())
}

pub fn confirm(
    conn: &mut Connection,
    cfg: &Config,
    tx_id: i64,
    now: DateTime<Utc>,
) -> Result<Transaction> {
    let tx = conn.transaction()?;
    let record = reviewable(&tx, tx_id)?;
    require_pending(&record)?;

    let client = db::get_client(&tx, record.client_id)?;
    let mut account = db::get_account(&tx, client.id)?;
    let company = db::company(&tx)?;

    match record.transaction_type {
        TxType::Deposit => {
            account.main_balance = roi::add(account.main_balance, record.amount)?;
            account.total_amount_deposited =
                roi::add(account.total_amount_deposited, record.amount)?;
            account.last_deposit_date = Some(now);
            let first = !account.first_deposit;
            account.first_deposit = true;
            db::save_balances(&tx, &account)?;

            notify::queue(
                &tx,
                &notify::transaction_success(
                    &client.email,
                    client.display_name(),
                    TxType::Deposit,
                    record.amount,
                    &record.trx_id,
                    account.main_balance,
                    &company,
                ),
                now,
            )?;

            if first {
                if let Some(referrer_id) = client.recommended_by {
                    pay_referral_bonus(&tx, cfg, referrer_id, record.amount, &company, now)?;
                }
            }
        }
        TxType::Withdrawal => {
            if account.main_balance < record.amount {
                return Err(AppError::InsufficientFunds {
                    balance: account.main_balance,
                    requested: record.amount,
                });
            }
            account.main_balance -= record.amount;
            account.total_amount_withdrawn =
                roi::add(account.total_amount_withdrawn, record.amount)?;
            account.last_withdrawal_date = Some(now);
            db::save_balances(&tx, &account)?;

            notify::queue(
                &tx,
                &notify::transaction_success(
                    &client.email,
                    client.display_name(),
                    TxType::Withdrawal,
                    record.amount,
                    &record.trx_id,
                    account.main_balance,
                    &company,
                ),
                now,
            )?;
        }
        _ => return Err(AppError::not_found("Transaction")),
    }

    set_status(&tx, record.id, TxStatus::Successful)?;
    let confirmed = db::get_transaction(&tx, record.id)?;
    tx.commit()?;

    info!(
        "Confirmed {} {} of {} for client {}",
        confirmed.transaction_type, confirmed.trx_id, confirmed.amount, client.id
    );
    Ok(confirmed)
}

fn pay_referral_bonus(
    conn: &Connection,
    cfg: &Config,
    referrer_id: i64,
    deposit: Decimal,
    company: &CompanyProfile,
    now: DateTime<Utc>,
) -> Result<()> {
    let referrer = db::get_client(conn, referrer_id)?;
    let mut account = db::get_account(conn, referrer.id)?;
    let bonus = roi::cents(roi::percent_of(deposit, cfg.referral_bonus_percent)?);
    if bonus.is_zero() {
        return Ok(());
    }
    account.main_balance = roi::add(account.main_balance, bonus)?;
    account.bonus = roi::add(account.bonus, bonus)?;
    db::save_balances(conn, &account)?;

    notify::queue(
        conn,
        &notify::referral_bonus(
            &referrer.email,
            referrer.display_name(),
            bonus,
            account.main_balance,
            company,
        ),
        now,
    )?;
    info!("Referral bonus {} paid to client {}", bonus, referrer.id);
    Ok(())
}

pub fn decline(conn: &mut Connection, tx_id: i64, now: DateTime<Utc>) -> Result<Transaction> {
    let tx = conn.transaction()?;
    let record = reviewable(&tx, tx_id)?;
    require_pending(&record)?;
    set_status(&tx, record.id, TxStatus::Failed)?;

    let client = db::get_client(&tx, record.client_id)?;
    let account = db::get_account(&tx, client.id)?;
    let company = db::company(&tx)?;
    notify::queue(
        &tx,
        &notify::declined(
            &client.email,
            client.display_name(),
            record.transaction_type,
            record.amount,
            account.main_balance,
            &company,
        ),
        now,
    )?;
    let declined = db::get_transaction(&tx, record.id)?;
    tx.commit()?;

    info!("Declined {} {}", declined.transaction_type, declined.trx_id);
    Ok(declined)
}

pub fn delete(conn: &Connection, tx_id: i64) -> Result<Transaction> {
    let record = reviewable(conn, tx_id)?;
    conn.execute("DELETE FROM transactions WHERE id = ?1", [record.id])?;
    info!("Deleted {} {}", record.transaction_type, record.trx_id);
    Ok(record)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::tests::active_client;
    use crate::db::test_conn;

    pub fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    pub fn add_wallet(conn: &Connection, name: &str) -> i64 {
        conn.execute(
            "INSERT INTO admin_wallets (name, wallet_address) VALUES (?1, 'bc1qexample')",
            [name],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    pub fn add_plan(conn: &Connection, name: &str, rate: &str, days: i64) -> i64 {
        conn.execute(
            "INSERT INTO plans (name, min_amount, max_amount, daily_rate, period_in_days)
             VALUES (?1, '100', '5000', ?2, ?3)",
            params![name, rate, days],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    pub fn fund(conn: &mut Connection, client_id: i64, amount: &str) {
        let cfg = Config::default();
        let client = db::get_client(conn, client_id).unwrap();
        let wallet = match db::find_wallet_by_name(conn, "BTC") {
            Ok(w) => w.id,
            Err(_) => add_wallet(conn, "BTC"),
        };
        let req = DepositRequest {
            wallet_id: wallet,
            amount: dec(amount),
            receipt: None,
        };
        let t = request_deposit(conn, &cfg, &client, &req, Utc::now()).unwrap();
        confirm(conn, &cfg, t.id, Utc::now()).unwrap();
    }

    pub fn verify(conn: &Connection, client_id: i64) {
        conn.execute(
            "UPDATE clients SET verification_status = 'Verified' WHERE id = ?1",
            [client_id],
        )
        .unwrap();
    }

    fn outbox_subjects(conn: &Connection) -> Vec<String> {
        let mut stmt = conn.prepare("SELECT subject FROM outbox ORDER BY id").unwrap();
        let rows = stmt.query_map([], |r| r.get(0)).unwrap();
        rows.map(|r| r.unwrap()).collect()
    }

    #[test]
    fn deposit_is_pending_until_confirmed() {
        let mut conn = test_conn();
        let cfg = Config::default();
        let id = active_client(&mut conn, "ada", None);
        let client = db::get_client(&conn, id).unwrap();
        let wallet = add_wallet(&conn, "USDT");

        let too_small = DepositRequest { wallet_id: wallet, amount: dec("9.99"), receipt: None };
        assert!(matches!(
            request_deposit(&mut conn, &cfg, &client, &too_small, Utc::now()),
            Err(AppError::Validation(_))
        ));

        let req = DepositRequest { wallet_id: wallet, amount: dec("250"), receipt: Some("r.png".into()) };
        let t = request_deposit(&mut conn, &cfg, &client, &req, Utc::now()).unwrap();
        assert_eq!(t.status, TxStatus::Pending);
        assert_eq!(t.payment_method.as_deref(), Some("USDT"));
        assert!(t.trx_id.ends_with(&id.to_string()));
        assert_eq!(db::get_account(&conn, id).unwrap().main_balance, Decimal::ZERO);

        let done = confirm(&mut conn, &cfg, t.id, Utc::now()).unwrap();
        assert_eq!(done.status, TxStatus::Successful);
        let account = db::get_account(&conn, id).unwrap();
        assert_eq!(account.main_balance, dec("250"));
        assert_eq!(account.total_amount_deposited, dec("250"));
        assert!(account.first_deposit);

        // a transaction leaves pending only once
        assert!(matches!(
            confirm(&mut conn, &cfg, t.id, Utc::now()),
            Err(AppError::InvalidState { .. })
        ));
        assert!(decline(&mut conn, t.id, Utc::now()).is_err());
        assert_eq!(db::get_account(&conn, id).unwrap().main_balance, dec("250"));

        let subjects = outbox_subjects(&conn);
        assert!(subjects.contains(&"Deposit Request".to_string()));
        assert!(subjects.contains(&"Deposit Successful".to_string()));
    }

    #[test]
    fn referrer_is_paid_once_on_first_deposit() {
        let mut conn = test_conn();
        let ada = active_client(&mut conn, "ada", None);
        let code = db::get_client(&conn, ada).unwrap().referral_code;
        let bob = active_client(&mut conn, "bob", Some(&code));

        fund(&mut conn, bob, "500");
        fund(&mut conn, bob, "500");

        let ada_account = db::get_account(&conn, ada).unwrap();
        assert_eq!(ada_account.main_balance, dec("50.00"));
        assert_eq!(ada_account.bonus, dec("50.00"));
        assert_eq!(db::get_account(&conn, bob).unwrap().main_balance, dec("1000"));
        let bonuses = outbox_subjects(&conn)
            .into_iter()
            .filter(|s| s == "Referral Bonus Earned!")
            .count();
        assert_eq!(bonuses, 1);
    }

    #[test]
    fn withdrawal_needs_verification_and_funds() {
        let mut conn = test_conn();
        let cfg = Config::default();
        let id = active_client(&mut conn, "ada", None);
        fund(&mut conn, id, "300");

        let req = |amount: &str| WithdrawalRequest {
            wallet_name: "BTC".into(),
            amount: dec(amount),
            wallet_address: "bc1qclient".into(),
            description: None,
            pin: None,
        };

        let client = db::get_client(&conn, id).unwrap();
        let err = request_withdrawal(&mut conn, &cfg, &client, &req("100"), Utc::now()).unwrap_err();
        assert_eq!(err.to_string(), "Please Verify your Account !");

        verify(&conn, id);
        let client = db::get_client(&conn, id).unwrap();
        assert!(matches!(
            request_withdrawal(&mut conn, &cfg, &client, &req("40"), Utc::now()),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            request_withdrawal(&mut conn, &cfg, &client, &req("301"), Utc::now()),
            Err(AppError::InsufficientFunds { .. })
        ));

        let t = request_withdrawal(&mut conn, &cfg, &client, &req("120"), Utc::now()).unwrap();
        assert_eq!(t.status, TxStatus::Pending);
        // the hold happens at confirmation, not at request time
        assert_eq!(db::get_account(&conn, id).unwrap().main_balance, dec("300"));

        confirm(&mut conn, &cfg, t.id, Utc::now()).unwrap();
        let account = db::get_account(&conn, id).unwrap();
        assert_eq!(account.main_balance, dec("180"));
        assert_eq!(account.total_amount_withdrawn, dec("120"));
        assert!(account.last_withdrawal_date.is_some());
    }

    #[test]
    fn confirming_a_withdrawal_rechecks_the_balance() {
        let mut conn = test_conn();
        let cfg = Config::default();
        let id = active_client(&mut conn, "ada", None);
        fund(&mut conn, id, "200");
        verify(&conn, id);
        let client = db::get_client(&conn, id).unwrap();

        let req = WithdrawalRequest {
            wallet_name: "BTC".into(),
            amount: dec("150"),
            wallet_address: "bc1qclient".into(),
            description: None,
            pin: None,
        };
        let first = request_withdrawal(&mut conn, &cfg, &client, &req, Utc::now()).unwrap();
        let second = request_withdrawal(&mut conn, &cfg, &client, &req, Utc::now()).unwrap();

        confirm(&mut conn, &cfg, first.id, Utc::now()).unwrap();
        assert!(matches!(
            confirm(&mut conn, &cfg, second.id, Utc::now()),
            Err(AppError::InsufficientFunds { .. })
        ));
        // rolled back: still pending, balance untouched
        assert_eq!(db::get_transaction(&conn, second.id).unwrap().status, TxStatus::Pending);
        assert_eq!(db::get_account(&conn, id).unwrap().main_balance, dec("50"));

        let declined = decline(&mut conn, second.id, Utc::now()).unwrap();
        assert_eq!(declined.status, TxStatus::Failed);
        assert!(outbox_subjects(&conn).contains(&"Withdrawal Declined".to_string()));
    }

    #[test]
    fn transaction_pin_guards_withdrawals_once_set() {
        let mut conn = test_conn();
        let cfg = Config::default();
        let id = active_client(&mut conn, "ada", None);
        fund(&mut conn, id, "200");
        verify(&conn, id);
        let client = db::get_client(&conn, id).unwrap();

        assert!(set_transaction_pin(&conn, id, "12a4").is_err());
        assert!(set_transaction_pin(&conn, id, "12345").is_err());
        set_transaction_pin(&conn, id, "2468").unwrap();
        assert!(db::get_account(&conn, id).unwrap().has_transaction_pin);

        let mut req = WithdrawalRequest {
            wallet_name: "BTC".into(),
            amount: dec("60"),
            wallet_address: "bc1qclient".into(),
            description: Some("rent".into()),
            pin: Some("1111".into()),
        };
        assert!(request_withdrawal(&mut conn, &cfg, &client, &req, Utc::now()).is_err());
        req.pin = Some("2468".into());
        let t = request_withdrawal(&mut conn, &cfg, &client, &req, Utc::now()).unwrap();
        assert_eq!(t.description.as_deref(), Some("rent"));
    }

    #[test]
    fn invest_moves_funds_into_an_active_subscription() {
        let mut conn = test_conn();
        let id = active_client(&mut conn, "ada", None);
        fund(&mut conn, id, "1500");
        let plan = add_plan(&conn, "Gold", "2", 30);
        let client = db::get_client(&conn, id).unwrap();
        // 2026-10-14 is a Wednesday
        let now = "2026-10-14T10:00:00Z".parse::<DateTime<Utc>>().unwrap();

        let below = InvestRequest { plan_id: plan, amount: dec("99") };
        assert!(invest(&mut conn, &client, &below, now).is_err());
        let above = InvestRequest { plan_id: plan, amount: dec("5000.01") };
        assert!(invest(&mut conn, &client, &above, now).is_err());

        let out = invest(&mut conn, &client, &InvestRequest { plan_id: plan, amount: dec("1000") }, now)
            .unwrap();
        let s = out.subscription;
        assert_eq!(s.status, SubscriptionStatus::Active);
        assert_eq!(s.expected_roi, dec("1600.00"));
        assert_eq!(s.earning, dec("20.00"));
        assert_eq!(s.next_payout, roi::next_payout(now));
        assert_eq!(s.expiry_date, roi::add_business_days(now, 30));
        assert_eq!(s.trx_id, out.transaction.trx_id);

        let account = db::get_account(&conn, id).unwrap();
        assert_eq!(account.main_balance, dec("500"));
        assert_eq!(account.total_amount_investment, dec("1000"));
        assert_eq!(account.total_expected_roi, dec("1600.00"));

        let broke = InvestRequest { plan_id: plan, amount: dec("600") };
        assert!(matches!(
            invest(&mut conn, &client, &broke, now),
            Err(AppError::InsufficientFunds { .. })
        ));
    }

    fn tx_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM transactions", [], |r| r.get(0)).unwrap()
    }

    #[test]
    fn oversized_amounts_are_rejected_before_any_write() {
        let mut conn = test_conn();
        let cfg = Config::default();
        let id = active_client(&mut conn, "ada", None);
        let client = db::get_client(&conn, id).unwrap();
        let wallet = add_wallet(&conn, "USDT");

        let huge = DepositRequest {
            wallet_id: wallet,
            amount: dec("10000000000000000000000000000"),
            receipt: None,
        };
        assert!(matches!(
            request_deposit(&mut conn, &cfg, &client, &huge, Utc::now()),
            Err(AppError::Validation(_))
        ));
        let just_over = DepositRequest { wallet_id: wallet, amount: dec("1000000000.01"), receipt: None };
        assert!(request_deposit(&mut conn, &cfg, &client, &just_over, Utc::now()).is_err());
        assert!(withdraw_roi(&mut conn, &cfg, &client, Decimal::MAX, Utc::now()).is_err());
        assert_eq!(tx_count(&conn), 0);
    }

    #[test]
    fn referral_overflow_rolls_back_the_confirmation() {
        let mut conn = test_conn();
        let cfg = Config {
            referral_bonus_percent: Decimal::MAX,
            ..Config::default()
        };
        let ada = active_client(&mut conn, "ada", None);
        let code = db::get_client(&conn, ada).unwrap().referral_code;
        let bob = active_client(&mut conn, "bob", Some(&code));
        let client = db::get_client(&conn, bob).unwrap();
        let wallet = add_wallet(&conn, "BTC");

        let req = DepositRequest { wallet_id: wallet, amount: dec("500"), receipt: None };
        let t = request_deposit(&mut conn, &cfg, &client, &req, Utc::now()).unwrap();
        assert!(matches!(
            confirm(&mut conn, &cfg, t.id, Utc::now()),
            Err(AppError::Validation(_))
        ));

        // nothing from the failed confirmation survives
        assert_eq!(db::get_transaction(&conn, t.id).unwrap().status, TxStatus::Pending);
        let account = db::get_account(&conn, bob).unwrap();
        assert_eq!(account.main_balance, Decimal::ZERO);
        assert!(!account.first_deposit);
        assert_eq!(db::get_account(&conn, ada).unwrap().bonus, Decimal::ZERO);
        assert!(!outbox_subjects(&conn).contains(&"Deposit Successful".to_string()));
    }

    #[test]
    fn invest_refuses_plans_outside_the_limits() {
        let mut conn = test_conn();
        let id = active_client(&mut conn, "ada", None);
        fund(&mut conn, id, "1000");
        let client = db::get_client(&conn, id).unwrap();
        // written straight to the table, bypassing plan management checks
        let endless = add_plan(&conn, "Endless", "2", 100_000_000);
        let moon = add_plan(&conn, "Moon", "100000000000000000000", 30);

        for plan_id in [endless, moon] {
            let req = InvestRequest { plan_id, amount: dec("500") };
            assert!(matches!(
                invest(&mut conn, &client, &req, Utc::now()),
                Err(AppError::Validation(_))
            ));
        }
        let account = db::get_account(&conn, id).unwrap();
        assert_eq!(account.main_balance, dec("1000"));
        assert_eq!(account.total_amount_investment, Decimal::ZERO);
        let subs: i64 = conn
            .query_row("SELECT COUNT(*) FROM subscriptions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(subs, 0);
    }

    #[test]
    fn zero_rate_plan_returns_only_the_principal() {
        let mut conn = test_conn();
        let id = active_client(&mut conn, "ada", None);
        fund(&mut conn, id, "300");
        let plan = add_plan(&conn, "Parking", "0", 5);
        let client = db::get_client(&conn, id).unwrap();

        let out = invest(&mut conn, &client, &InvestRequest { plan_id: plan, amount: dec("200") }, Utc::now())
            .unwrap();
        assert_eq!(out.subscription.earning, Decimal::ZERO);
        assert_eq!(out.subscription.expected_roi, dec("200"));
        assert_eq!(db::get_account(&conn, id).unwrap().total_expected_roi, dec("200"));
    }

    #[test]
    fn roi_withdrawal_moves_between_balances() {
        let mut conn = test_conn();
        let cfg = Config::default();
        let id = active_client(&mut conn, "ada", None);
        conn.execute(
            "UPDATE accounts SET roi_balance = '80' WHERE client_id = ?1",
            [id],
        )
        .unwrap();
        let client = db::get_client(&conn, id).unwrap();

        assert!(withdraw_roi(&mut conn, &cfg, &client, dec("81"), Utc::now()).is_err());
        let t = withdraw_roi(&mut conn, &cfg, &client, dec("60"), Utc::now()).unwrap();
        assert_eq!(t.transaction_type, TxType::RoiWithdrawal);
        assert_eq!(t.status, TxStatus::Successful);

        let account = db::get_account(&conn, id).unwrap();
        assert_eq!(account.roi_balance, dec("20"));
        assert_eq!(account.main_balance, dec("60"));
    }

    #[test]
    fn only_deposits_and_withdrawals_are_reviewable() {
        let mut conn = test_conn();
        let cfg = Config::default();
        let id = active_client(&mut conn, "ada", None);
        let roi_row = insert_tx(
            &conn,
            &NewTx::new(id, TxType::Roi, TxStatus::Successful, dec("5")),
            Utc::now(),
        )
        .unwrap();
        assert!(matches!(
            confirm(&mut conn, &cfg, roi_row.id, Utc::now()),
            Err(AppError::NotFound(_))
        ));
        assert!(delete(&conn, roi_row.id).is_err());

        let wallet = add_wallet(&conn, "ETH");
        let client = db::get_client(&conn, id).unwrap();
        let req = DepositRequest { wallet_id: wallet, amount: dec("20"), receipt: None };
        let t = request_deposit(&mut conn, &cfg, &client, &req, Utc::now()).unwrap();
        delete(&conn, t.id).unwrap();
        assert!(db::get_transaction(&conn, t.id).is_err());
    }
}
