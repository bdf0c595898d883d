//! HTTP request router
//!
//! Handlers authenticate the caller from the bearer token and act only on
//! the caller's own account. Catalog reads are public.

pub mod extract;
pub mod routes;

use crate::error::AppError;
use crate::AppState;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::error;

pub type SharedState = Arc<AppState>;

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    let timeout = state.config.request_timeout();

    Router::new()
        .route("/health", get(routes::health))
        // Catalog
        .route("/communities", get(routes::list_communities))
        .route("/coffee-shops", get(routes::list_coffee_shops))
        // Accounts
        .route("/users", post(routes::register))
        .route("/auth/sign-in", post(routes::sign_in))
        .route("/users/me", get(routes::me).delete(routes::deactivate_me))
        .route("/users/:id/balance", get(routes::balance))
        .route("/users/:id/transactions", get(routes::transactions))
        .route("/users/:id/reconciliation", get(routes::reconciliation))
        // Ledger
        .route("/ledger/earn", post(routes::earn))
        .route("/ledger/redeem", post(routes::redeem))
        .route("/ledger/transfer", post(routes::transfer))
        // Friend graph
        .route(
            "/friend-requests",
            get(routes::list_friend_requests).post(routes::send_friend_request),
        )
        .route("/friend-requests/:id", patch(routes::respond_to_friend_request))
        .route("/friends", get(routes::list_friends))
        .route("/friends/leaderboard", get(routes::leaderboard))
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let message = if self.is_internal() {
            error!("Request failed: {}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        (
            status,
            Json(ErrorBody {
                error: self.code(),
                message,
            }),
        )
            .into_response()
    }
}
