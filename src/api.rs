use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};
use tokio::task;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::auth::{self, AnyUser, ClientUser, LoginOutcome, RegisterForm, Registered};
use crate::boss_api;
use crate::config::Config;
use crate::db;
use crate::error::{AppError, Result};
use crate::ledger::{self, DepositRequest, InvestRequest, Invested, WithdrawalRequest};
use crate::models::{
    AdminWallet, CompanyProfile, Kyc, KycInput, Page, Plan, Subscription, Transaction,
};
use crate::portal::{self, Dashboard, PlanPreview, Portfolio, Profile, SupportMessage};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub conn: Arc<Mutex<Connection>>,
}

impl AppState {
    pub fn new(cfg: Arc<Config>, conn: Arc<Mutex<Connection>>) -> Self {
        AppState { cfg, conn }
    }

    /// Run blocking database work off the async runtime.
    pub async fn db<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        task::spawn_blocking(move || -> Result<T> {
            let mut guard = conn
                .lock()
                .map_err(|_| AppError::Internal("database mutex poisoned".into()))?;
            f(&mut *guard)
        })
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
    }
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub q: Option<String>,
    pub page: Option<String>,
}

#[derive(Deserialize)]
struct RefQuery {
    #[serde(rename = "ref")]
    ref_code: Option<String>,
}

#[derive(Deserialize)]
struct LoginForm {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct PasswordChange {
    old_password: String,
    new_password: String,
}

#[derive(Deserialize)]
struct ResetRequest {
    email: String,
}

#[derive(Deserialize)]
struct ResetConfirm {
    token: String,
    new_password: String,
}

#[derive(Deserialize)]
struct PreviewQuery {
    amount: Decimal,
}

#[derive(Deserialize)]
struct AmountForm {
    amount: Decimal,
}

#[derive(Deserialize)]
struct PinForm {
    pin: String,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "yieldbook API running" }))
        // public
        .route("/auth/register", post(register))
        .route("/auth/activate/:token", post(activate))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/password", post(change_password))
        .route("/auth/password/reset", post(request_reset))
        .route("/auth/password/reset/confirm", post(confirm_reset))
        .route("/company", get(company))
        .route("/plans", get(plans))
        .route("/plans/:id", get(plan))
        .route("/plans/:id/preview", get(plan_preview))
        // client
        .route("/me", get(profile))
        .route("/me/dashboard", get(dashboard))
        .route("/me/portfolio", get(portfolio))
        .route("/me/wallets", get(wallets))
        .route("/me/transactions", get(transactions))
        .route("/me/transactions/search", get(search))
        .route("/me/investments", get(investments).post(invest))
        .route("/me/deposits", post(deposit))
        .route("/me/withdrawals", post(withdraw))
        .route("/me/roi/withdraw", post(withdraw_roi))
        .route("/me/pin", post(set_pin))
        .route("/me/kyc", post(submit_kyc))
        .route("/me/support", post(support))
        .nest("/boss", boss_api::routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn serve(cfg: Arc<Config>, conn: Arc<Mutex<Connection>>) -> eyre::Result<()> {
    let addr = SocketAddr::new(cfg.bind_addr, cfg.port);
    let app = router(AppState::new(cfg, conn));

    info!("API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

// ---------- auth ----------

async fn register(
    State(state): State<AppState>,
    Query(q): Query<RefQuery>,
    Json(form): Json<RegisterForm>,
) -> Result<(StatusCode, Json<Registered>)> {
    let registered = state
        .db(move |conn| auth::register(conn, &form, q.ref_code.as_deref(), Utc::now()))
        .await?;
    Ok((StatusCode::CREATED, Json(registered)))
}

async fn activate(State(state): State<AppState>, Path(token): Path<String>) -> Result<Json<Value>> {
    state.db(move |conn| auth::activate(conn, &token, Utc::now())).await?;
    Ok(Json(json!({ "activated": true })))
}

async fn login(
    State(state): State<AppState>,
    Json(form): Json<LoginForm>,
) -> Result<Json<LoginOutcome>> {
    let ttl = state.cfg.session_ttl_secs;
    let outcome = state
        .db(move |conn| auth::login(conn, &form.email, &form.password, ttl, Utc::now()))
        .await?;
    Ok(Json(outcome))
}

async fn logout(State(state): State<AppState>, user: AnyUser) -> Result<StatusCode> {
    state.db(move |conn| auth::logout(conn, &user.token)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn change_password(
    State(state): State<AppState>,
    user: AnyUser,
    Json(form): Json<PasswordChange>,
) -> Result<StatusCode> {
    state
        .db(move |conn| {
            auth::change_password(conn, user.user.id, &form.old_password, &form.new_password)
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn request_reset(
    State(state): State<AppState>,
    Json(form): Json<ResetRequest>,
) -> Result<StatusCode> {
    state
        .db(move |conn| auth::request_password_reset(conn, &form.email, Utc::now()))
        .await?;
    Ok(StatusCode::ACCEPTED)
}

async fn confirm_reset(
    State(state): State<AppState>,
    Json(form): Json<ResetConfirm>,
) -> Result<StatusCode> {
    state
        .db(move |conn| auth::reset_password(conn, &form.token, &form.new_password, Utc::now()))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------- public catalogue ----------

async fn company(State(state): State<AppState>) -> Result<Json<CompanyProfile>> {
    Ok(Json(state.db(|conn| db::company(conn)).await?))
}

async fn plans(State(state): State<AppState>) -> Result<Json<Vec<Plan>>> {
    Ok(Json(state.db(|conn| portal::active_plans(conn)).await?))
}

async fn plan(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Plan>> {
    Ok(Json(state.db(move |conn| portal::plan_detail(conn, id)).await?))
}

async fn plan_preview(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(q): Query<PreviewQuery>,
) -> Result<Json<PlanPreview>> {
    let preview = state
        .db(move |conn| portal::plan_preview(conn, id, q.amount, Utc::now()))
        .await?;
    Ok(Json(preview))
}

// ---------- client views ----------

async fn profile(State(state): State<AppState>, me: ClientUser) -> Result<Json<Profile>> {
    Ok(Json(state.db(move |conn| portal::profile(conn, &me.client)).await?))
}

async fn dashboard(State(state): State<AppState>, me: ClientUser) -> Result<Json<Dashboard>> {
    Ok(Json(state.db(move |conn| portal::dashboard(conn, &me.client)).await?))
}

async fn portfolio(State(state): State<AppState>, me: ClientUser) -> Result<Json<Portfolio>> {
    let id = me.client.id;
    Ok(Json(state.db(move |conn| portal::portfolio(conn, id)).await?))
}

async fn wallets(State(state): State<AppState>, _me: ClientUser) -> Result<Json<Vec<AdminWallet>>> {
    Ok(Json(state.db(|conn| portal::wallets(conn)).await?))
}

async fn transactions(
    State(state): State<AppState>,
    me: ClientUser,
    Query(q): Query<ListQuery>,
) -> Result<Json<Page<Transaction>>> {
    let id = me.client.id;
    let page = state
        .db(move |conn| portal::transaction_history(conn, id, q.page.as_deref()))
        .await?;
    Ok(Json(page))
}

async fn search(
    State(state): State<AppState>,
    me: ClientUser,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<Transaction>>> {
    let id = me.client.id;
    let query = q.q.unwrap_or_default();
    let found = state
        .db(move |conn| portal::search_transactions(conn, id, &query))
        .await?;
    Ok(Json(found))
}

async fn investments(
    State(state): State<AppState>,
    me: ClientUser,
    Query(q): Query<ListQuery>,
) -> Result<Json<Page<Subscription>>> {
    let id = me.client.id;
    let page = state
        .db(move |conn| portal::investment_log(conn, id, q.page.as_deref()))
        .await?;
    Ok(Json(page))
}

async fn invest(
    State(state): State<AppState>,
    me: ClientUser,
    Json(req): Json<InvestRequest>,
) -> Result<(StatusCode, Json<Invested>)> {
    let out = state
        .db(move |conn| ledger::invest(conn, &me.client, &req, Utc::now()))
        .await?;
    Ok((StatusCode::CREATED, Json(out)))
}

async fn deposit(
    State(state): State<AppState>,
    me: ClientUser,
    Json(req): Json<DepositRequest>,
) -> Result<(StatusCode, Json<Transaction>)> {
    let cfg = Arc::clone(&state.cfg);
    let t = state
        .db(move |conn| ledger::request_deposit(conn, &cfg, &me.client, &req, Utc::now()))
        .await?;
    Ok((StatusCode::CREATED, Json(t)))
}

async fn withdraw(
    State(state): State<AppState>,
    me: ClientUser,
    Json(req): Json<WithdrawalRequest>,
) -> Result<(StatusCode, Json<Transaction>)> {
    let cfg = Arc::clone(&state.cfg);
    let t = state
        .db(move |conn| ledger::request_withdrawal(conn, &cfg, &me.client, &req, Utc::now()))
        .await?;
    Ok((StatusCode::CREATED, Json(t)))
}

async fn withdraw_roi(
    State(state): State<AppState>,
    me: ClientUser,
    Json(form): Json<AmountForm>,
) -> Result<Json<Transaction>> {
    let cfg = Arc::clone(&state.cfg);
    let t = state
        .db(move |conn| ledger::withdraw_roi(conn, &cfg, &me.client, form.amount, Utc::now()))
        .await?;
    Ok(Json(t))
}

async fn set_pin(
    State(state): State<AppState>,
    me: ClientUser,
    Json(form): Json<PinForm>,
) -> Result<StatusCode> {
    let id = me.client.id;
    state
        .db(move |conn| ledger::set_transaction_pin(conn, id, form.pin.trim()))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn submit_kyc(
    State(state): State<AppState>,
    me: ClientUser,
    Json(input): Json<KycInput>,
) -> Result<(StatusCode, Json<Kyc>)> {
    let kyc = state
        .db(move |conn| portal::submit_kyc(conn, &me.client, &input, Utc::now()))
        .await?;
    Ok((StatusCode::CREATED, Json(kyc)))
}

async fn support(
    State(state): State<AppState>,
    me: ClientUser,
    Json(msg): Json<SupportMessage>,
) -> Result<StatusCode> {
    state
        .db(move |conn| portal::contact_support(conn, &me.client, &msg, Utc::now()))
        .await?;
    Ok(StatusCode::ACCEPTED)
}
