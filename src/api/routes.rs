//! HTTP handlers

use super::extract::{ApiJson, ApiPath, ApiQuery, AuthUser};
use super::SharedState;
use crate::error::{AppError, AppResult};
use crate::models::{
    BalanceView, CoffeeShop, CommitOutcome, Community, FriendRequest, FriendSummary,
    LedgerReceipt, ReconciliationReport, RequestDirection, TransactionView, UserProfile,
};
use crate::services::{
    AuthResponse, EarnRequest, LeaderboardEntry, RedeemRequest, RegisterRequest, SignInRequest,
    TransferRequest,
};
use axum::{
    extract::State,
    http::{header::CACHE_CONTROL, HeaderName, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub storage: &'static str,
    pub version: &'static str,
}

/// GET /health
pub async fn health(State(state): State<SharedState>) -> AppResult<Json<HealthResponse>> {
    let storage = match &state.database {
        Some(database) => {
            database.health_check().await.map_err(|e| {
                error!("Health check failed: {}", e);
                AppError::Unavailable("database unreachable".to_string())
            })?;
            "postgres"
        }
        None => "memory",
    };

    Ok(Json(HealthResponse {
        status: "ok",
        storage,
        version: env!("CARGO_PKG_VERSION"),
    }))
}

fn cache_control(state: &SharedState) -> [(HeaderName, String); 1] {
    [(
        CACHE_CONTROL,
        format!("public, max-age={}", state.catalog.ttl().as_secs()),
    )]
}

/// GET /communities
pub async fn list_communities(State(state): State<SharedState>) -> AppResult<impl IntoResponse> {
    let communities: Vec<Community> = state.catalog.list_communities().await?;
    Ok((cache_control(&state), Json(communities)))
}

#[derive(Deserialize)]
pub struct CoffeeShopQuery {
    #[serde(alias = "communityId")]
    pub community_id: Option<String>,
}

/// GET /coffee-shops?communityId=
pub async fn list_coffee_shops(
    State(state): State<SharedState>,
    ApiQuery(query): ApiQuery<CoffeeShopQuery>,
) -> AppResult<impl IntoResponse> {
    let community_id = query
        .community_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::Validation("communityId is required".to_string()))?;

    let shops: Vec<CoffeeShop> = state.catalog.list_coffee_shops(&community_id).await?;
    Ok((cache_control(&state), Json(shops)))
}

/// POST /users
pub async fn register(
    State(state): State<SharedState>,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    let response = state.accounts.register(request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /auth/sign-in
pub async fn sign_in(
    State(state): State<SharedState>,
    ApiJson(request): ApiJson<SignInRequest>,
) -> AppResult<Json<AuthResponse>> {
    Ok(Json(state.accounts.sign_in(request).await?))
}

/// GET /users/me
pub async fn me(State(state): State<SharedState>, caller: AuthUser) -> AppResult<Json<UserProfile>> {
    Ok(Json(state.accounts.profile(caller.user_id).await?))
}

/// DELETE /users/me
pub async fn deactivate_me(State(state): State<SharedState>, caller: AuthUser) -> AppResult<StatusCode> {
    state.accounts.deactivate(caller.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /users/:id/balance
pub async fn balance(
    State(state): State<SharedState>,
    caller: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> AppResult<Json<BalanceView>> {
    caller.ensure_self(id)?;
    Ok(Json(state.ledger.balance(id).await?))
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// GET /users/:id/transactions
pub async fn transactions(
    State(state): State<SharedState>,
    caller: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiQuery(query): ApiQuery<HistoryQuery>,
) -> AppResult<Json<Vec<TransactionView>>> {
    caller.ensure_self(id)?;
    Ok(Json(state.ledger.transaction_history(id, query.limit).await?))
}

/// GET /users/:id/reconciliation
pub async fn reconciliation(
    State(state): State<SharedState>,
    caller: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> AppResult<Json<ReconciliationReport>> {
    caller.ensure_self(id)?;
    Ok(Json(state.ledger.reconcile(id).await?))
}

/// Ledger receipt plus whether it came from an earlier call with the same key
#[derive(Serialize)]
pub struct LedgerResponse {
    #[serde(flatten)]
    pub receipt: LedgerReceipt,
    pub replayed: bool,
}

fn ledger_response(outcome: CommitOutcome) -> (StatusCode, Json<LedgerResponse>) {
    let replayed = outcome.is_replayed();
    let status = if replayed { StatusCode::OK } else { StatusCode::CREATED };
    (
        status,
        Json(LedgerResponse {
            receipt: outcome.into_receipt(),
            replayed,
        }),
    )
}

/// POST /ledger/earn
pub async fn earn(
    State(state): State<SharedState>,
    caller: AuthUser,
    ApiJson(request): ApiJson<EarnRequest>,
) -> AppResult<(StatusCode, Json<LedgerResponse>)> {
    let outcome = state.ledger.earn(caller.user_id, request).await?;
    Ok(ledger_response(outcome))
}

/// POST /ledger/redeem
pub async fn redeem(
    State(state): State<SharedState>,
    caller: AuthUser,
    ApiJson(request): ApiJson<RedeemRequest>,
) -> AppResult<(StatusCode, Json<LedgerResponse>)> {
    let outcome = state.ledger.redeem(caller.user_id, request).await?;
    Ok(ledger_response(outcome))
}

/// POST /ledger/transfer
pub async fn transfer(
    State(state): State<SharedState>,
    caller: AuthUser,
    ApiJson(request): ApiJson<TransferRequest>,
) -> AppResult<(StatusCode, Json<LedgerResponse>)> {
    let outcome = state.ledger.transfer(caller.user_id, request).await?;
    Ok(ledger_response(outcome))
}

#[derive(Deserialize)]
pub struct FriendRequestQuery {
    #[serde(default)]
    pub direction: RequestDirection,
}

/// GET /friend-requests
pub async fn list_friend_requests(
    State(state): State<SharedState>,
    caller: AuthUser,
    ApiQuery(query): ApiQuery<FriendRequestQuery>,
) -> AppResult<Json<Vec<FriendRequest>>> {
    let requests = state
        .friends
        .list_pending_requests(caller.user_id, query.direction)
        .await?;
    Ok(Json(requests))
}

#[derive(Deserialize)]
pub struct SendFriendRequest {
    #[serde(alias = "toUserId")]
    pub to_user_id: Uuid,
}

/// POST /friend-requests
pub async fn send_friend_request(
    State(state): State<SharedState>,
    caller: AuthUser,
    ApiJson(request): ApiJson<SendFriendRequest>,
) -> AppResult<(StatusCode, Json<FriendRequest>)> {
    let request = state
        .friends
        .send_request(caller.user_id, request.to_user_id)
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

#[derive(Deserialize)]
pub struct RespondToFriendRequest {
    pub accept: bool,
}

/// PATCH /friend-requests/:id
pub async fn respond_to_friend_request(
    State(state): State<SharedState>,
    caller: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(response): ApiJson<RespondToFriendRequest>,
) -> AppResult<Json<FriendRequest>> {
    let request = state
        .friends
        .respond_to_request(caller.user_id, id, response.accept)
        .await?;
    Ok(Json(request))
}

/// GET /friends
pub async fn list_friends(
    State(state): State<SharedState>,
    caller: AuthUser,
) -> AppResult<Json<Vec<FriendSummary>>> {
    Ok(Json(state.friends.list_friends(caller.user_id).await?))
}

/// GET /friends/leaderboard
pub async fn leaderboard(
    State(state): State<SharedState>,
    caller: AuthUser,
) -> AppResult<Json<Vec<LeaderboardEntry>>> {
    Ok(Json(state.friends.leaderboard(caller.user_id).await?))
}
