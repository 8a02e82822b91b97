use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Implements the string mapping, `Display`, and SQLite conversions for a
/// fieldless enum stored as TEXT.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $name::ALL
                    .iter()
                    .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
                    .copied()
                    .ok_or_else(|| format!("unknown {} '{}'", stringify!($name), s))
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: String| FromSqlError::Other(e.into()))
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxType {
    #[serde(rename = "DEPOSIT")]
    Deposit,
    #[serde(rename = "WITHDRAWAL")]
    Withdrawal,
    #[serde(rename = "INVESTMENT")]
    Investment,
    #[serde(rename = "ROI")]
    Roi,
    #[serde(rename = "ROI_WITHDRAWAL")]
    RoiWithdrawal,
}

text_enum!(TxType {
    Deposit => "DEPOSIT",
    Withdrawal => "WITHDRAWAL",
    Investment => "INVESTMENT",
    Roi => "ROI",
    RoiWithdrawal => "ROI_WITHDRAWAL",
});

impl TxType {
    /// "Deposit", "Withdrawal", ... for email subjects.
    pub fn label(&self) -> &'static str {
        match self {
            TxType::Deposit => "Deposit",
            TxType::Withdrawal => "Withdrawal",
            TxType::Investment => "Investment",
            TxType::Roi => "ROI",
            TxType::RoiWithdrawal => "ROI withdrawal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Successful,
    Failed,
}

text_enum!(TxStatus {
    Pending => "pending",
    Successful => "successful",
    Failed => "failed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verification {
    Unverified,
    #[serde(rename = "Under Review")]
    UnderReview,
    Verified,
}

text_enum!(Verification {
    Unverified => "Unverified",
    UnderReview => "Under Review",
    Verified => "Verified",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionStatus {
    Active,
    Expired,
}

text_enum!(SubscriptionStatus {
    Active => "Active",
    Expired => "Expired",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Admin,
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip)]
    pub password_hash: String,
    pub is_active: bool,
    pub is_client: bool,
    pub is_staff: bool,
    pub date_joined: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Client {
    pub id: i64,
    pub user_id: i64,
    pub email: String,
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
    pub referral_code: String,
    pub recommended_by: Option<i64>,
    pub date_joined: DateTime<Utc>,
    pub is_active: bool,
}

impl Client {
    /// Name used in greetings; falls back to the email address.
    pub fn display_name(&self) -> &str {
        self.first_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.email)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub client_id: i64,
    pub main_balance: Decimal,
    pub book_balance: Decimal,
    pub bonus: Decimal,
    pub roi_balance: Decimal,
    pub total_amount_investment: Decimal,
    pub total_amount_deposited: Decimal,
    pub total_amount_withdrawn: Decimal,
    pub total_expected_roi: Decimal,
    pub total_roi_received: Decimal,
    #[serde(skip)]
    pub transaction_pin_hash: Option<String>,
    pub has_transaction_pin: bool,
    pub first_deposit: bool,
    pub last_deposit_date: Option<DateTime<Utc>>,
    pub last_withdrawal_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub id: i64,
    pub name: String,
    pub category: Option<String>,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub daily_rate: Decimal,
    pub period_in_days: i64,
    pub is_active: bool,
    pub is_promo: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanInput {
    pub name: String,
    pub category: Option<String>,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub daily_rate: Decimal,
    pub period_in_days: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_promo: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    pub id: i64,
    pub client_id: i64,
    pub plan_id: i64,
    pub plan_name: String,
    pub trx_id: String,
    pub amount_invested: Decimal,
    pub amount_earned: Decimal,
    pub expected_roi: Decimal,
    pub earning: Decimal,
    pub status: SubscriptionStatus,
    pub date_started: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
    pub next_payout: DateTime<Utc>,
    pub expired: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub id: i64,
    pub client_id: i64,
    pub amount: Decimal,
    pub fees: Option<Decimal>,
    pub date: DateTime<Utc>,
    pub trx_id: String,
    pub plan_id: Option<i64>,
    pub payment_method: Option<String>,
    pub status: TxStatus,
    pub receipt: Option<String>,
    pub wallet_address: Option<String>,
    pub transaction_type: TxType,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminWallet {
    pub id: i64,
    pub name: String,
    pub wallet_address: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Kyc {
    pub id: i64,
    pub client_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub dob: String,
    pub gender: Option<String>,
    pub postcode: String,
    pub address: String,
    pub state: String,
    pub document_type: Option<String>,
    pub id_front_view: Option<String>,
    pub id_back_view: Option<String>,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KycInput {
    pub first_name: String,
    pub last_name: String,
    pub dob: String,
    pub gender: Option<String>,
    pub postcode: String,
    pub address: String,
    pub state: String,
    pub document_type: Option<String>,
    pub id_front_view: Option<String>,
    pub id_back_view: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub name: String,
    pub domain: String,
    pub support_email: String,
    pub forwarding_email: String,
    pub address: Option<String>,
    pub phone: Option<String>,
}

/// A page of results, numbered from 1.
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub num_pages: usize,
    pub total: usize,
}

impl<T> Page<T> {
    /// Non-numeric page requests land on page 1, out-of-range ones on the
    /// last page.
    pub fn paginate(all: Vec<T>, requested: Option<&str>, per_page: usize) -> Self {
        let total = all.len();
        let per_page = per_page.max(1);
        let num_pages = total.div_ceil(per_page).max(1);
        let page = match requested.map(|p| p.trim().parse::<i64>()) {
            Some(Ok(n)) if n >= 1 => (n as usize).min(num_pages),
            Some(Ok(_)) => num_pages,
            _ => 1,
        };
        let items = all
            .into_iter()
            .skip((page - 1) * per_page)
            .take(per_page)
            .collect();
        Page {
            items,
            page,
            num_pages,
            total,
        }
    }
}
