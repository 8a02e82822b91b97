use dotenvy::dotenv;
use eyre::Result;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::{env, net::IpAddr, str::FromStr};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bind_addr: IpAddr,
    pub port: u16,
    pub db_path: String,
    pub min_deposit: Decimal,
    pub min_withdrawal: Decimal,
    pub referral_bonus_percent: Decimal,
    pub job_interval_secs: u64,
    pub job_weekdays_only: bool,
    pub session_ttl_secs: i64,
    pub mail_relay_url: Option<String>,
    pub mail_interval_secs: u64,
    pub mail_max_attempts: i64,
    /// Days delivered or abandoned mail stays in the outbox.
    pub outbox_retention_days: i64,
    pub site_domain: String,
    pub company_name: String,
    pub support_email: String,
    pub forwarding_email: String,
    pub admin_email: Option<String>,
    #[serde(skip_deserializing)]
    pub admin_password: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::from([127, 0, 0, 1]),
            port: 8080,
            db_path: "yieldbook.db".to_string(),
            min_deposit: Decimal::from(10),
            min_withdrawal: Decimal::from(50),
            referral_bonus_percent: Decimal::from(10),
            job_interval_secs: 60,
            job_weekdays_only: true,
            session_ttl_secs: 600,
            mail_relay_url: None,
            mail_interval_secs: 15,
            mail_max_attempts: 5,
            outbox_retention_days: 30,
            site_domain: "http://localhost:8080".to_string(),
            company_name: "My Company".to_string(),
            support_email: "support@example.com".to_string(),
            forwarding_email: "forward@example.com".to_string(),
            admin_email: None,
            admin_password: None,
        }
    }
}

/// Parse an env var, keeping `default` when it is missing or malformed.
fn var_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn load() -> Result<Config> {
    dotenv().ok();

    let d = Config::default();

    let cfg = Config {
        bind_addr: var_or("BIND_ADDR", d.bind_addr),
        port: var_or("PORT", d.port),
        db_path: env::var("DATABASE_URL").unwrap_or(d.db_path),
        min_deposit: var_or("MIN_DEPOSIT", d.min_deposit),
        min_withdrawal: var_or("MIN_WITHDRAWAL", d.min_withdrawal),
        referral_bonus_percent: var_or("REFERRAL_BONUS_PERCENT", d.referral_bonus_percent),
        job_interval_secs: var_or("JOB_INTERVAL_SECS", d.job_interval_secs).max(1),
        job_weekdays_only: var_or("JOB_WEEKDAYS_ONLY", d.job_weekdays_only),
        session_ttl_secs: var_or("SESSION_TTL_SECS", d.session_ttl_secs),
        mail_relay_url: non_empty("MAIL_RELAY_URL"),
        mail_interval_secs: var_or("MAIL_INTERVAL_SECS", d.mail_interval_secs).max(1),
        mail_max_attempts: var_or("MAIL_MAX_ATTEMPTS", d.mail_max_attempts),
        outbox_retention_days: var_or("OUTBOX_RETENTION_DAYS", d.outbox_retention_days).clamp(1, 3650),
        site_domain: non_empty("SITE_DOMAIN").unwrap_or(d.site_domain),
        company_name: non_empty("COMPANY_NAME").unwrap_or(d.company_name),
        support_email: non_empty("SUPPORT_EMAIL").unwrap_or(d.support_email),
        forwarding_email: non_empty("FORWARDING_EMAIL").unwrap_or(d.forwarding_email),
        admin_email: non_empty("ADMIN_EMAIL"),
        admin_password: non_empty("ADMIN_PASSWORD"),
    };

    // password stays out of the log line
    info!(
        port = cfg.port,
        db = %cfg.db_path,
        job_interval = cfg.job_interval_secs,
        weekdays_only = cfg.job_weekdays_only,
        relay = cfg.mail_relay_url.is_some(),
        "Loaded config"
    );

    Ok(cfg)
}
