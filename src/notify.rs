// Notification emails. Messages are written to the outbox on the caller's
// connection so they commit or roll back with the change they describe.
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;

use crate::db::ts;
use crate::error::Result;
use crate::models::{CompanyProfile, TxType};

#[derive(Debug, Clone, PartialEq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl Email {
    fn new(to: &str, subject: impl Into<String>, body: String) -> Self {
        Email {
            to: to.to_string(),
            subject: subject.into(),
            body,
        }
    }
}

pub fn queue(conn: &Connection, email: &Email, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT INTO outbox (recipient, subject, body, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![email.to, email.subject, email.body, ts(now)],
    )?;
    Ok(())
}

fn money(amount: Decimal) -> String {
    format!("${:.2}", amount)
}

fn signature(company: &CompanyProfile) -> String {
    format!("Thank you,\n{} Admin\n{}", company.name, company.support_email)
}

// ---------- client-facing ----------

pub fn activation(to: &str, name: &str, company: &CompanyProfile, token: &str) -> Email {
    Email::new(
        to,
        "Activate your account.",
        format!(
            "Hi {name},\n\nPlease click the link below to activate your account:\n\
             {}/activate/{token}\n\n{}",
            company.domain.trim_end_matches('/'),
            signature(company)
        ),
    )
}

pub fn password_reset(to: &str, company: &CompanyProfile, token: &str) -> Email {
    Email::new(
        to,
        format!("Password reset on {}", company.name),
        format!(
            "A password reset was requested for this address.\n\
             {}/reset/{token}\n\nIf this wasn't you, ignore this message.\n\n{}",
            company.domain.trim_end_matches('/'),
            signature(company)
        ),
    )
}

pub struct InvestmentNotice<'a> {
    pub name: &'a str,
    pub plan: &'a str,
    pub amount: Decimal,
    pub expected_roi: Decimal,
    pub earning: Decimal,
    pub next_payout: DateTime<Utc>,
    pub balance: Decimal,
    pub trx_id: &'a str,
    pub date: DateTime<Utc>,
}

pub fn investment_success(to: &str, n: &InvestmentNotice, company: &CompanyProfile) -> Email {
    Email::new(
        to,
        "Investment Notice",
        format!(
            "Dear {},\n\nYour {} investment of {} is now active.\n\
             Expected return: {}\nEarning per payout: {}\nNext payout: {}\n\
             Transaction ID: {}\nDate: {}\nAvailable balance: {}\n\n{}",
            n.name,
            n.plan,
            money(n.amount),
            money(n.expected_roi),
            money(n.earning),
            n.next_payout.format("%Y-%m-%d"),
            n.trx_id,
            n.date.format("%Y-%m-%d %H:%M UTC"),
            money(n.balance),
            signature(company)
        ),
    )
}

#[allow(clippy::too_many_arguments)]
pub fn roi_success(
    to: &str,
    name: &str,
    plan: &str,
    amount: Decimal,
    roi_balance: Decimal,
    trx_id: &str,
    date: DateTime<Utc>,
    company: &CompanyProfile,
) -> Email {
    Email::new(
        to,
        "ROI Successful",
        format!(
            "Dear {name},\n\n{} has been credited to your ROI balance from your {plan} plan.\n\
             Transaction ID: {trx_id}\nDate: {}\nROI balance: {}\n\n{}",
            money(amount),
            date.format("%Y-%m-%d %H:%M UTC"),
            money(roi_balance),
            signature(company)
        ),
    )
}

pub fn transaction_success(
    to: &str,
    name: &str,
    kind: TxType,
    amount: Decimal,
    trx_id: &str,
    balance: Decimal,
    company: &CompanyProfile,
) -> Email {
    Email::new(
        to,
        format!("{} Successful", kind.label()),
        format!(
            "Dear {name},\n\nYour {} of {} has been confirmed.\n\
             Transaction ID: {trx_id}\nAvailable balance: {}\n\n{}",
            kind.label().to_lowercase(),
            money(amount),
            money(balance),
            signature(company)
        ),
    )
}

pub fn declined(
    to: &str,
    name: &str,
    kind: TxType,
    amount: Decimal,
    balance: Decimal,
    company: &CompanyProfile,
) -> Email {
    Email::new(
        to,
        format!("{} Declined", kind.label()),
        format!(
            "Dear {name},\n\nUnfortunately, your {} of {} has been declined.\n\n\
             Please contact support if you need assistance.\nAvailable balance: {}\n\n{}",
            kind.label().to_lowercase(),
            money(amount),
            money(balance),
            signature(company)
        ),
    )
}

pub fn referral_bonus(
    to: &str,
    name: &str,
    bonus: Decimal,
    balance: Decimal,
    company: &CompanyProfile,
) -> Email {
    Email::new(
        to,
        "Referral Bonus Earned!",
        format!(
            "Dear {name},\n\nCongratulations! You have earned {} from your referral commission.\n\n\
             Available balance: {}\n\n{}",
            money(bonus),
            money(balance),
            signature(company)
        ),
    )
}

pub fn kyc_verified(to: &str, name: &str, company: &CompanyProfile) -> Email {
    Email::new(
        to,
        "Identity Verified",
        format!(
            "Dear {name},\n\nYour identity has been verified. Withdrawals are now enabled on your account.\n\n{}",
            signature(company)
        ),
    )
}

// ---------- admin-facing ----------

pub fn deposit_request(admin: &str, client_email: &str, amount: Decimal, method: &str) -> Email {
    Email::new(
        admin,
        "Deposit Request",
        format!(
            "Hello Admin.\nClient with email {client_email} sent a deposit request of {} via {method}.\n\
             Kindly verify the deposit request.",
            money(amount)
        ),
    )
}

pub fn withdrawal_request(admin: &str, client_email: &str, amount: Decimal, method: &str) -> Email {
    Email::new(
        admin,
        "Withdrawal Request",
        format!(
            "Hello Admin.\nClient with email {client_email} sent a withdrawal request of {} via {method}.\n\
             Kindly verify the withdrawal request.",
            money(amount)
        ),
    )
}

pub fn kyc_submitted(admin: &str, client_email: &str) -> Email {
    Email::new(
        admin,
        "KYC Verify",
        format!(
            "Hello Admin.\nClient with email {client_email} sent KYC details.\n\
             Kindly verify the KYC request."
        ),
    )
}

pub fn investment_expired(
    admin: &str,
    client_email: &str,
    invested: Decimal,
    earned: Decimal,
    topped_up: Decimal,
) -> Email {
    let correction = if topped_up.is_zero() {
        String::new()
    } else {
        format!("\nA correction of {} was credited at expiry.", money(topped_up))
    };
    Email::new(
        admin,
        "Expired Investment",
        format!(
            "Hello Admin,\nThe investment of {} by {client_email} has expired and has earned {}.{correction}",
            money(invested),
            money(earned)
        ),
    )
}

pub fn support(admin: &str, sender: &str, subject: &str, message: &str) -> Email {
    Email::new(
        admin,
        subject.trim(),
        format!("{}\n\nSender is {sender}", message.trim()),
    )
}
