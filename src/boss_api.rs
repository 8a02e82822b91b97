// Staff routes, mounted under /boss.
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post, put},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::api::{AppState, ListQuery};
use crate::auth::StaffUser;
use crate::boss::{self, ClientDetail, ProfileUpdate, ReviewItem, StaffDashboard, WalletInput};
use crate::db;
use crate::error::Result;
use crate::ledger;
use crate::models::{
    Account, AdminWallet, Client, CompanyProfile, Kyc, Page, Plan, PlanInput, Subscription,
    Transaction,
};

#[derive(Deserialize)]
struct BalanceForm {
    main_balance: Decimal,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(dashboard))
        .route("/clients", get(clients))
        .route("/clients/:id", get(client_detail).delete(delete_client))
        .route("/clients/:id/profile", put(update_profile))
        .route("/clients/:id/balance", put(set_balance))
        .route("/clients/:id/investments", get(client_investments))
        .route("/clients/:id/kyc", get(client_kyc))
        .route("/clients/:id/activate", post(activate_client))
        .route("/clients/:id/deactivate", post(deactivate_client))
        .route("/kyc/:id", delete(delete_kyc))
        .route("/kyc/:id/verify", post(verify_kyc))
        .route("/transactions", get(transactions))
        .route("/transactions/:id", get(transaction_detail).delete(delete_transaction))
        .route("/transactions/:id/confirm", post(confirm))
        .route("/transactions/:id/decline", post(decline))
        .route("/wallets", get(wallets).post(create_wallet))
        .route("/wallets/:id", put(update_wallet).delete(delete_wallet))
        .route("/plans", get(plans).post(create_plan))
        .route("/plans/:id", put(update_plan))
        .route("/company", get(company).put(update_company))
}

async fn dashboard(State(state): State<AppState>, _: StaffUser) -> Result<Json<StaffDashboard>> {
    Ok(Json(state.db(|conn| boss::dashboard(conn)).await?))
}

// ---------- clients ----------

async fn clients(
    State(state): State<AppState>,
    _: StaffUser,
    Query(q): Query<ListQuery>,
) -> Result<Json<Page<Client>>> {
    let page = state
        .db(move |conn| boss::clients(conn, q.q.as_deref().unwrap_or(""), q.page.as_deref()))
        .await?;
    Ok(Json(page))
}

async fn client_detail(
    State(state): State<AppState>,
    _: StaffUser,
    Path(id): Path<i64>,
) -> Result<Json<ClientDetail>> {
    Ok(Json(state.db(move |conn| boss::client_detail(conn, id)).await?))
}

async fn update_profile(
    State(state): State<AppState>,
    _: StaffUser,
    Path(id): Path<i64>,
    Json(upd): Json<ProfileUpdate>,
) -> Result<Json<Client>> {
    let client = state
        .db(move |conn| boss::update_client_profile(conn, id, &upd, Utc::now()))
        .await?;
    Ok(Json(client))
}

async fn set_balance(
    State(state): State<AppState>,
    _: StaffUser,
    Path(id): Path<i64>,
    Json(form): Json<BalanceForm>,
) -> Result<Json<Account>> {
    let account = state
        .db(move |conn| boss::set_main_balance(conn, id, form.main_balance))
        .await?;
    Ok(Json(account))
}

async fn client_investments(
    State(state): State<AppState>,
    _: StaffUser,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Subscription>>> {
    Ok(Json(state.db(move |conn| boss::client_investments(conn, id)).await?))
}

async fn client_kyc(
    State(state): State<AppState>,
    _: StaffUser,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Kyc>>> {
    Ok(Json(state.db(move |conn| boss::client_kyc(conn, id)).await?))
}

async fn activate_client(
    State(state): State<AppState>,
    _: StaffUser,
    Path(id): Path<i64>,
) -> Result<Json<Client>> {
    Ok(Json(state.db(move |conn| boss::activate_client(conn, id)).await?))
}

async fn deactivate_client(
    State(state): State<AppState>,
    _: StaffUser,
    Path(id): Path<i64>,
) -> Result<Json<Client>> {
    Ok(Json(state.db(move |conn| boss::deactivate_client(conn, id)).await?))
}

async fn delete_client(
    State(state): State<AppState>,
    _: StaffUser,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    state.db(move |conn| boss::delete_client(conn, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------- KYC ----------

async fn verify_kyc(
    State(state): State<AppState>,
    _: StaffUser,
    Path(id): Path<i64>,
) -> Result<Json<Client>> {
    Ok(Json(state.db(move |conn| boss::verify_kyc(conn, id, Utc::now())).await?))
}

async fn delete_kyc(
    State(state): State<AppState>,
    _: StaffUser,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    state.db(move |conn| boss::delete_kyc(conn, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------- transactions ----------

async fn transactions(
    State(state): State<AppState>,
    _: StaffUser,
    Query(q): Query<ListQuery>,
) -> Result<Json<Page<ReviewItem>>> {
    let page = state
        .db(move |conn| {
            boss::transactions(conn, q.q.as_deref().unwrap_or(""), q.page.as_deref())
        })
        .await?;
    Ok(Json(page))
}

async fn transaction_detail(
    State(state): State<AppState>,
    _: StaffUser,
    Path(id): Path<i64>,
) -> Result<Json<ReviewItem>> {
    Ok(Json(state.db(move |conn| boss::transaction_detail(conn, id)).await?))
}

async fn confirm(
    State(state): State<AppState>,
    _: StaffUser,
    Path(id): Path<i64>,
) -> Result<Json<Transaction>> {
    let cfg = state.cfg.clone();
    let t = state
        .db(move |conn| ledger::confirm(conn, &cfg, id, Utc::now()))
        .await?;
    Ok(Json(t))
}

async fn decline(
    State(state): State<AppState>,
    _: StaffUser,
    Path(id): Path<i64>,
) -> Result<Json<Transaction>> {
    Ok(Json(state.db(move |conn| ledger::decline(conn, id, Utc::now())).await?))
}

async fn delete_transaction(
    State(state): State<AppState>,
    _: StaffUser,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    state.db(move |conn| ledger::delete(conn, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------- catalogue ----------

async fn wallets(State(state): State<AppState>, _: StaffUser) -> Result<Json<Vec<AdminWallet>>> {
    Ok(Json(state.db(|conn| db::list_wallets(conn)).await?))
}

async fn create_wallet(
    State(state): State<AppState>,
    _: StaffUser,
    Json(input): Json<WalletInput>,
) -> Result<(StatusCode, Json<AdminWallet>)> {
    let wallet = state.db(move |conn| boss::create_wallet(conn, &input)).await?;
    Ok((StatusCode::CREATED, Json(wallet)))
}

async fn update_wallet(
    State(state): State<AppState>,
    _: StaffUser,
    Path(id): Path<i64>,
    Json(input): Json<WalletInput>,
) -> Result<Json<AdminWallet>> {
    Ok(Json(state.db(move |conn| boss::update_wallet(conn, id, &input)).await?))
}

async fn delete_wallet(
    State(state): State<AppState>,
    _: StaffUser,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    state.db(move |conn| boss::delete_wallet(conn, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn plans(State(state): State<AppState>, _: StaffUser) -> Result<Json<Vec<Plan>>> {
    Ok(Json(state.db(|conn| boss::all_plans(conn)).await?))
}

async fn create_plan(
    State(state): State<AppState>,
    _: StaffUser,
    Json(input): Json<PlanInput>,
) -> Result<(StatusCode, Json<Plan>)> {
    let plan = state.db(move |conn| boss::create_plan(conn, &input)).await?;
    Ok((StatusCode::CREATED, Json(plan)))
}

async fn update_plan(
    State(state): State<AppState>,
    _: StaffUser,
    Path(id): Path<i64>,
    Json(input): Json<PlanInput>,
) -> Result<Json<Plan>> {
    Ok(Json(state.db(move |conn| boss::update_plan(conn, id, &input)).await?))
}

async fn company(State(state): State<AppState>, _: StaffUser) -> Result<Json<CompanyProfile>> {
    Ok(Json(state.db(|conn| db::company(conn)).await?))
}

async fn update_company(
    State(state): State<AppState>,
    _: StaffUser,
    Json(profile): Json<CompanyProfile>,
) -> Result<Json<CompanyProfile>> {
    Ok(Json(state.db(move |conn| boss::update_company(conn, &profile)).await?))
}

#[cfg(test)]
mod tests {
    use crate::api::router;
    use crate::api::tests::{call, client_token, staff_token, test_state};
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn staff_routes_reject_clients() {
        let state = test_state();
        let app = router(state.clone());
        let token = client_token(&app, &state, "ada").await;

        let (status, _) = call(&app, Method::GET, "/boss/dashboard", Some(&token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = call(&app, Method::GET, "/boss/dashboard", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn staff_confirms_a_deposit_once() {
        let state = test_state();
        let app = router(state.clone());
        let client = client_token(&app, &state, "ada").await;
        let staff = staff_token(&app, &state).await;

        let (status, wallet) = call(
            &app,
            Method::POST,
            "/boss/wallets",
            Some(&staff),
            Some(json!({ "name": "BTC", "wallet_address": "bc1qcompany" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, deposit) = call(
            &app,
            Method::POST,
            "/me/deposits",
            Some(&client),
            Some(json!({ "wallet_id": wallet["id"], "amount": "200" })),
        )
        .await;
        let id = deposit["id"].as_i64().unwrap();

        let (_, dash) = call(&app, Method::GET, "/boss/dashboard", Some(&staff), None).await;
        assert_eq!(dash["pending_deposits"], 1);

        let uri = format!("/boss/transactions/{id}/confirm");
        let (status, body) = call(&app, Method::POST, &uri, Some(&staff), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "successful");

        let (status, _) = call(&app, Method::POST, &uri, Some(&staff), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, me) = call(&app, Method::GET, "/me/dashboard", Some(&client), None).await;
        assert_eq!(me["account"]["main_balance"], "200");

        let (_, list) = call(&app, Method::GET, "/boss/transactions?q=ada", Some(&staff), None).await;
        assert_eq!(list["total"], 1);
        assert_eq!(list["items"][0]["client_email"], "ada@example.com");
    }

    #[tokio::test]
    async fn deactivated_client_loses_access() {
        let state = test_state();
        let app = router(state.clone());
        let client = client_token(&app, &state, "ada").await;
        let staff = staff_token(&app, &state).await;

        let (_, page) = call(&app, Method::GET, "/boss/clients?q=ada", Some(&staff), None).await;
        let id = page["items"][0]["id"].as_i64().unwrap();

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/boss/clients/{id}/deactivate"),
            Some(&staff),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_active"], false);

        let (status, _) = call(&app, Method::GET, "/me/dashboard", Some(&client), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
