mod helpers;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use cuppy_ledger::api::create_router;
use helpers::*;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn send(app: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn sign_up(app: &Router, name: &str) -> (String, String) {
    let (status, body) = send(
        app,
        Method::POST,
        "/users",
        None,
        Some(json!({
            "name": name,
            "email": format!("{}@example.com", name.to_lowercase()),
            "password": "correct horse battery",
            "communityId": "nyc",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["user"]["points"], 0);

    (
        body["user"]["id"].as_str().unwrap().to_string(),
        body["token"].as_str().unwrap().to_string(),
    )
}

// ============================================================================
// Public endpoints
// ============================================================================

#[tokio::test]
async fn test_health() {
    let app = create_router(test_state());
    let (status, body) = send(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["storage"], "memory");
}

#[tokio::test]
async fn test_catalog_is_public_and_cacheable() {
    let app = create_router(test_state());

    let response = app
        .clone()
        .oneshot(Request::get("/communities").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "public, max-age=60"
    );

    let (status, shops) = send(&app, Method::GET, "/coffee-shops?communityId=nyc", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let shop1 = shops
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["id"] == "shop1")
        .unwrap();
    assert_eq!(shop1["points_back_percentage"], 15);
    assert_eq!(shop1["beverages"].as_array().unwrap().len(), 3);

    let (status, body) = send(&app, Method::GET, "/coffee-shops", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

// ============================================================================
// Accounts
// ============================================================================

#[tokio::test]
async fn test_register_sign_in_and_profile() {
    let app = create_router(test_state());
    let (user_id, _) = sign_up(&app, "Alice").await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/auth/sign-in",
        None,
        Some(json!({ "email": "ALICE@example.com", "password": "correct horse battery" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap().to_string();

    let (status, profile) = send(&app, Method::GET, "/users/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["id"], user_id.as_str());
    assert_eq!(profile["email"], "alice@example.com");
    assert!(profile.get("password_hash").is_none());

    let (status, body) = send(
        &app,
        Method::POST,
        "/auth/sign-in",
        None,
        Some(json!({ "email": "alice@example.com", "password": "wrong password" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn test_duplicate_email_conflicts() {
    let app = create_router(test_state());
    sign_up(&app, "Alice").await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/users",
        None,
        Some(json!({
            "name": "Other Alice",
            "email": "Alice@Example.com",
            "password": "correct horse battery",
            "community_id": "nyc",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_exists");
}

#[tokio::test]
async fn test_requests_without_valid_token_are_unauthorized() {
    let app = create_router(test_state());

    let (status, body) = send(&app, Method::GET, "/users/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = send(&app, Method::GET, "/friends", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_deactivated_account_cannot_sign_in() {
    let app = create_router(test_state());
    let (_, token) = sign_up(&app, "Alice").await;

    let (status, _) = send(&app, Method::DELETE, "/users/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        &app,
        Method::POST,
        "/auth/sign-in",
        None,
        Some(json!({ "email": "alice@example.com", "password": "correct horse battery" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ============================================================================
// Ledger
// ============================================================================

#[tokio::test]
async fn test_earn_redeem_and_replay_over_http() {
    let app = create_router(test_state());
    let (user_id, token) = sign_up(&app, "Alice").await;

    let earn = json!({
        "coffeeShopId": "shop1",
        "purchaseAmount": "20.00",
        "idempotencyKey": "order-1",
    });
    let (status, body) = send(&app, Method::POST, "/ledger/earn", Some(&token), Some(earn.clone())).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["points"], 300);
    assert_eq!(body["replayed"], false);

    let (status, body) = send(&app, Method::POST, "/ledger/earn", Some(&token), Some(earn)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["replayed"], true);
    assert_eq!(body["balance_after"], 300);

    let (status, body) = send(
        &app,
        Method::POST,
        "/ledger/redeem",
        Some(&token),
        Some(json!({ "coffee_shop_id": "shop1", "amount": 500, "idempotency_key": "r-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "insufficient_balance");

    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/users/{}/balance", user_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["balance"], 300);

    let (status, history) = send(
        &app,
        Method::GET,
        &format!("/users/{}/transactions?limit=10", user_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["coffee_shop_name"], "Blue Bottle Coffee");

    let (status, report) = send(
        &app,
        Method::GET,
        &format!("/users/{}/reconciliation", user_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["replayed_balance"], 300);
}

#[tokio::test]
async fn test_transfer_over_http_and_self_transfer() {
    let app = create_router(test_state());
    let (alice_id, alice_token) = sign_up(&app, "Alice").await;
    let (bob_id, bob_token) = sign_up(&app, "Bob").await;

    send(
        &app,
        Method::POST,
        "/ledger/earn",
        Some(&alice_token),
        Some(json!({ "coffee_shop_id": "shop1", "purchase_amount": "10.00", "idempotency_key": "e-1" })),
    )
    .await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/ledger/transfer",
        Some(&alice_token),
        Some(json!({ "receiverId": bob_id, "amount": 30, "idempotencyKey": "t-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["balance_after"], 120);

    let (_, body) = send(&app, Method::GET, &format!("/users/{}/balance", bob_id), Some(&bob_token), None).await;
    assert_eq!(body["balance"], 30);

    let (status, body) = send(
        &app,
        Method::POST,
        "/ledger/transfer",
        Some(&alice_token),
        Some(json!({ "receiver_id": alice_id, "amount": 5, "idempotency_key": "t-2" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "self_transfer");
}

#[tokio::test]
async fn test_cannot_read_another_users_balance() {
    let app = create_router(test_state());
    let (_, alice_token) = sign_up(&app, "Alice").await;
    let (bob_id, _) = sign_up(&app, "Bob").await;

    let (status, _) = send(
        &app,
        Method::GET,
        &format!("/users/{}/balance", bob_id),
        Some(&alice_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_malformed_body_uses_error_envelope() {
    let app = create_router(test_state());
    let (_, token) = sign_up(&app, "Alice").await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/ledger/redeem",
        Some(&token),
        Some(json!({ "amount": "lots" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn test_bad_query_and_path_use_error_envelope() {
    let app = create_router(test_state());
    let (user_id, token) = sign_up(&app, "Alice").await;

    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/users/{}/transactions?limit=-1", user_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
    assert!(body["message"].is_string());

    let (status, body) = send(&app, Method::GET, "/users/not-a-uuid/balance", Some(&token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn test_token_of_deactivated_account_is_rejected() {
    let app = create_router(test_state());
    let (_, alice_token) = sign_up(&app, "Alice").await;
    let (bob_id, _) = sign_up(&app, "Bob").await;

    let (status, _) = send(&app, Method::DELETE, "/users/me", Some(&alice_token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(
        &app,
        Method::POST,
        "/friend-requests",
        Some(&alice_token),
        Some(json!({ "toUserId": bob_id })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = send(&app, Method::GET, "/friends", Some(&alice_token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ============================================================================
// Friend graph
// ============================================================================

#[tokio::test]
async fn test_friend_request_flow_over_http() {
    let app = create_router(test_state());
    let (alice_id, alice_token) = sign_up(&app, "Alice").await;
    let (bob_id, bob_token) = sign_up(&app, "Bob").await;

    let (status, request) = send(
        &app,
        Method::POST,
        "/friend-requests",
        Some(&alice_token),
        Some(json!({ "toUserId": bob_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(request["status"], "pending");
    let request_id = request["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        Method::POST,
        "/friend-requests",
        Some(&bob_token),
        Some(json!({ "to_user_id": alice_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "duplicate_request");

    let (_, incoming) = send(
        &app,
        Method::GET,
        "/friend-requests?direction=incoming",
        Some(&bob_token),
        None,
    )
    .await;
    assert_eq!(incoming.as_array().unwrap().len(), 1);

    let (status, resolved) = send(
        &app,
        Method::PATCH,
        &format!("/friend-requests/{}", request_id),
        Some(&bob_token),
        Some(json!({ "accept": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resolved["status"], "accepted");

    let (_, friends) = send(&app, Method::GET, "/friends", Some(&alice_token), None).await;
    assert_eq!(friends[0]["id"], bob_id.as_str());

    let (_, board) = send(&app, Method::GET, "/friends/leaderboard", Some(&alice_token), None).await;
    assert_eq!(board.as_array().unwrap().len(), 2);
    assert_eq!(board[0]["rank"], 1);
}
