use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::{DateTime, Duration, Utc};
use rand::{distributions::Uniform, Rng, RngCore};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::api::AppState;
use crate::db::{self, ts};
use crate::error::{AppError, Result};
use crate::models::{Client, Role, User};
use crate::notify;

const REFERRAL_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const REFERRAL_CODE_LEN: usize = 4;
const MIN_PASSWORD_LEN: usize = 8;
const ACTIVATION_TTL_HOURS: i64 = 72;
const RESET_TTL_HOURS: i64 = 1;

// ---------- secrets ----------

/// Salted SHA-256, stored as `hex(salt)$hex(digest)`.
pub fn hash_secret(secret: &str) -> String {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    format!("{}${}", hex::encode(salt), hex::encode(digest(&salt, secret)))
}

pub fn verify_secret(secret: &str, stored: &str) -> bool {
    let Some((salt_hex, digest_hex)) = stored.split_once('$') else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (hex::decode(salt_hex), hex::decode(digest_hex)) else {
        return false;
    };
    let actual = digest(&salt, secret);
    // compare every byte regardless of where the first mismatch is
    actual.len() == expected.len()
        && actual
            .iter()
            .zip(expected.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

fn digest(salt: &[u8], secret: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(secret.as_bytes());
    hasher.finalize().to_vec()
}

pub fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Random code over A-Z0-9.
pub fn random_code(len: usize) -> String {
    let dist = Uniform::from(0..REFERRAL_ALPHABET.len());
    rand::thread_rng()
        .sample_iter(dist)
        .take(len)
        .map(|i| REFERRAL_ALPHABET[i] as char)
        .collect()
}

fn unique_referral_code(conn: &Connection) -> Result<String> {
    loop {
        let code = random_code(REFERRAL_CODE_LEN);
        let taken: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM clients WHERE referral_code = ?1)",
            [&code],
            |r| r.get(0),
        )?;
        if !taken {
            return Ok(code);
        }
    }
}

fn check_password_rules(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::invalid(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

// ---------- registration ----------

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterForm {
    pub username: String,
    pub email: String,
    pub password1: String,
    pub password2: String,
    pub phone_number: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Registered {
    pub user_id: i64,
    pub client_id: i64,
    pub referral_code: String,
    #[serde(skip)]
    pub activation_token: String,
}

/// Create an inactive client with an empty account and queue the
/// activation email. Unknown referral codes are ignored.
pub fn register(
    conn: &mut Connection,
    form: &RegisterForm,
    ref_code: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Registered> {
    let email = form.email.trim().to_lowercase();
    if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
        return Err(AppError::invalid("Enter a valid email address"));
    }
    if form.password1 != form.password2 {
        return Err(AppError::invalid("The two password fields didn't match"));
    }
    check_password_rules(&form.password1)?;

    let phone = form
        .phone_number
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string);
    let country = form
        .country
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or("US")
        .to_string();

    let tx = conn.transaction()?;

    if db::find_user_by_email(&tx, &email)?.is_some() {
        return Err(AppError::Conflict("A user with that email already exists".into()));
    }
    if let Some(phone) = &phone {
        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM clients WHERE phone_number = ?1)",
            [phone],
            |r| r.get(0),
        )?;
        if exists {
            return Err(AppError::Conflict("Phone Number already exist".into()));
        }
    }

    tx.execute(
        "INSERT INTO users (email, username, password_hash, is_active, is_client, date_joined)
         VALUES (?1, ?2, ?3, 0, 1, ?4)",
        params![email, form.username.trim(), hash_secret(&form.password1), ts(now)],
    )?;
    let user_id = tx.last_insert_rowid();

    let recommended_by: Option<i64> = match ref_code.map(str::trim).filter(|c| !c.is_empty()) {
        Some(code) => {
            let found = tx
                .query_row(
                    "SELECT id FROM clients WHERE referral_code = ?1",
                    [code.to_uppercase()],
                    |r| r.get(0),
                )
                .optional()?;
            if found.is_none() {
                warn!("Ignoring unknown referral code {}", code);
            }
            found
        }
        None => None,
    };

    let referral_code = unique_referral_code(&tx)?;
    tx.execute(
        "INSERT INTO clients (user_id, first_name, phone_number, country, referral_code,
                              recommended_by, date_joined)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            user_id,
            form.username.trim(),
            phone,
            country,
            referral_code,
            recommended_by,
            ts(now)
        ],
    )?;
    let client_id = tx.last_insert_rowid();
    tx.execute("INSERT INTO accounts (client_id) VALUES (?1)", [client_id])?;

    let activation_token = issue_user_token(&tx, user_id, "activation", now, ACTIVATION_TTL_HOURS)?;
    let company = db::company(&tx)?;
    notify::queue(
        &tx,
        &notify::activation(&email, form.username.trim(), &company, &activation_token),
        now,
    )?;

    tx.commit()?;
    info!("Registered client {} ({})", client_id, email);

    Ok(Registered {
        user_id,
        client_id,
        referral_code,
        activation_token,
    })
}

fn issue_user_token(
    conn: &Connection,
    user_id: i64,
    purpose: &str,
    now: DateTime<Utc>,
    ttl_hours: i64,
) -> Result<String> {
    let token = new_token();
    conn.execute(
        "INSERT INTO user_tokens (token, user_id, purpose, expires_at) VALUES (?1, ?2, ?3, ?4)",
        params![token, user_id, purpose, ts(now + Duration::hours(ttl_hours))],
    )?;
    Ok(token)
}

/// Single-use: the token is deleted whether or not it was still valid.
/// `None` means the link is unknown or expired; callers must still commit
/// so the delete sticks.
fn consume_user_token(
    conn: &Connection,
    token: &str,
    purpose: &str,
    now: DateTime<Utc>,
) -> Result<Option<i64>> {
    let row: Option<(i64, String)> = conn
        .query_row(
            "SELECT user_id, expires_at FROM user_tokens WHERE token = ?1 AND purpose = ?2",
            params![token, purpose],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    conn.execute("DELETE FROM user_tokens WHERE token = ?1", [token])?;

    let cutoff = ts(now);
    Ok(row
        .filter(|(_, expires_at)| *expires_at > cutoff)
        .map(|(user_id, _)| user_id))
}

fn dead_link() -> AppError {
    AppError::invalid("The link is invalid or has expired")
}

pub fn activate(conn: &mut Connection, token: &str, now: DateTime<Utc>) -> Result<()> {
    let tx = conn.transaction()?;
    let Some(user_id) = consume_user_token(&tx, token, "activation", now)? else {
        tx.commit()?;
        return Err(dead_link());
    };
    tx.execute("UPDATE users SET is_active = 1 WHERE id = ?1", [user_id])?;
    tx.commit()?;
    info!("Activated user {}", user_id);
    Ok(())
}

// ---------- sessions ----------

#[derive(Debug, Serialize)]
pub struct LoginOutcome {
    pub token: String,
    pub role: Role,
    pub expires_at: DateTime<Utc>,
    /// Promotional plan to surface on the next dashboard view.
    pub promo_plan_id: Option<i64>,
}

pub fn login(
    conn: &Connection,
    email: &str,
    password: &str,
    ttl_secs: i64,
    now: DateTime<Utc>,
) -> Result<LoginOutcome> {
    let user = db::find_user_by_email(conn, email)?
        .filter(|u| verify_secret(password, &u.password_hash))
        .ok_or(AppError::InvalidCredentials)?;
    if !user.is_active {
        return Err(AppError::AccountInactive);
    }

    let token = new_token();
    let expires_at = now + Duration::seconds(ttl_secs);
    conn.execute(
        "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
        params![token, user.id, ts(now), ts(expires_at)],
    )?;

    let promo_plan_id = conn
        .query_row(
            "SELECT id FROM plans WHERE is_promo = 1 AND is_active = 1 ORDER BY id DESC LIMIT 1",
            [],
            |r| r.get(0),
        )
        .optional()?;

    info!("User {} logged in", user.id);
    Ok(LoginOutcome {
        token,
        role: if user.is_staff { Role::Admin } else { Role::Client },
        expires_at,
        promo_plan_id,
    })
}

pub fn logout(conn: &Connection, token: &str) -> Result<()> {
    conn.execute("DELETE FROM sessions WHERE token = ?1", [token])?;
    Ok(())
}

/// Resolve a bearer token, sliding its expiry forward on every use.
pub fn session_user(
    conn: &Connection,
    token: &str,
    ttl_secs: i64,
    now: DateTime<Utc>,
) -> Result<User> {
    let row: Option<(i64, String)> = conn
        .query_row(
            "SELECT user_id, expires_at FROM sessions WHERE token = ?1",
            [token],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((user_id, expires_at)) = row else {
        return Err(AppError::Unauthorized);
    };
    if expires_at <= ts(now) {
        conn.execute("DELETE FROM sessions WHERE token = ?1", [token])?;
        return Err(AppError::Unauthorized);
    }

    let user = db::get_user(conn, user_id)?;
    if !user.is_active {
        conn.execute("DELETE FROM sessions WHERE user_id = ?1", [user.id])?;
        return Err(AppError::AccountInactive);
    }
    conn.execute(
        "UPDATE sessions SET expires_at = ?2 WHERE token = ?1",
        params![token, ts(now + Duration::seconds(ttl_secs))],
    )?;
    Ok(user)
}

pub fn change_password(conn: &Connection, user_id: i64, old: &str, new: &str) -> Result<()> {
    let user = db::get_user(conn, user_id)?;
    if !verify_secret(old, &user.password_hash) {
        return Err(AppError::invalid("Incorrect Password"));
    }
    check_password_rules(new)?;
    conn.execute(
        "UPDATE users SET password_hash = ?2 WHERE id = ?1",
        params![user_id, hash_secret(new)],
    )?;
    Ok(())
}

/// Queues a reset link when the address is known; unknown addresses are
/// indistinguishable to the caller.
pub fn request_password_reset(conn: &Connection, email: &str, now: DateTime<Utc>) -> Result<()> {
    let Some(user) = db::find_user_by_email(conn, email)? else {
        info!("Password reset requested for unknown address");
        return Ok(());
    };
    let token = issue_user_token(conn, user.id, "password_reset", now, RESET_TTL_HOURS)?;
    let company = db::company(conn)?;
    notify::queue(conn, &notify::password_reset(&user.email, &company, &token), now)?;
    Ok(())
}

pub fn reset_password(
    conn: &mut Connection,
    token: &str,
    new_password: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    check_password_rules(new_password)?;
    let tx = conn.transaction()?;
    let Some(user_id) = consume_user_token(&tx, token, "password_reset", now)? else {
        tx.commit()?;
        return Err(dead_link());
    };
    tx.execute(
        "UPDATE users SET password_hash = ?2 WHERE id = ?1",
        params![user_id, hash_secret(new_password)],
    )?;
    // old sessions die with the old password
    tx.execute("DELETE FROM sessions WHERE user_id = ?1", [user_id])?;
    tx.commit()?;
    Ok(())
}

/// Drop sessions and one-time links that can no longer be used.
pub fn purge_expired(conn: &Connection, now: DateTime<Utc>) -> Result<usize> {
    let cutoff = ts(now);
    let sessions = conn.execute("DELETE FROM sessions WHERE expires_at <= ?1", [&cutoff])?;
    let links = conn.execute("DELETE FROM user_tokens WHERE expires_at <= ?1", [&cutoff])?;
    Ok(sessions + links)
}

// ---------- extractors ----------

fn bearer(parts: &Parts) -> Result<String> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or(AppError::Unauthorized)
}

async fn resolve(parts: &Parts, state: &AppState) -> Result<(String, User, Option<Client>)> {
    let token = bearer(parts)?;
    let ttl = state.cfg.session_ttl_secs;
    let t = token.clone();
    state
        .db(move |conn| {
            let user = session_user(conn, &t, ttl, Utc::now())?;
            let client = db::find_client_by_user(conn, user.id)?;
            Ok((t, user, client))
        })
        .await
}

/// An authenticated client.
pub struct ClientUser {
    pub token: String,
    pub user: User,
    pub client: Client,
}

#[async_trait]
impl FromRequestParts<AppState> for ClientUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let (token, user, client) = resolve(parts, state).await?;
        let client = client.ok_or(AppError::Forbidden)?;
        Ok(ClientUser {
            token,
            user,
            client,
        })
    }
}

/// An authenticated staff member.
pub struct StaffUser {
    pub token: String,
    pub user: User,
}

#[async_trait]
impl FromRequestParts<AppState> for StaffUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let (token, user, _) = resolve(parts, state).await?;
        if !user.is_staff {
            return Err(AppError::Forbidden);
        }
        Ok(StaffUser { token, user })
    }
}

/// Any authenticated user; used for logout and password changes.
pub struct AnyUser {
    pub token: String,
    pub user: User,
}

#[async_trait]
impl FromRequestParts<AppState> for AnyUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let (token, user, _) = resolve(parts, state).await?;
        Ok(AnyUser { token, user })
    }
}
