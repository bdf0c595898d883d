#![allow(dead_code)]

use cuppy_ledger::models::{CoffeeShop, CommitOutcome};
use cuppy_ledger::repositories::seed::{default_coffee_shops, default_communities};
use cuppy_ledger::repositories::{MemoryRepository, Repositories};
use cuppy_ledger::services::{AuthResponse, EarnRequest, RegisterRequest};
use cuppy_ledger::{AppConfig, AppState};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Shop paying 100% back, so a purchase of `n` cents earns exactly `n` points
pub const FULL_BACK_SHOP: &str = "test-shop";

pub fn full_back_shop() -> CoffeeShop {
    CoffeeShop {
        id: FULL_BACK_SHOP.to_string(),
        name: "Test Roasters".to_string(),
        address: "1 Test Ave, NYC".to_string(),
        image_url: None,
        points_back_percentage: 100,
        current_crowdedness: 10,
        is_quiet_friendly: true,
        opening_hours: None,
        community_id: "nyc".to_string(),
        beverages: vec![],
    }
}

/// In-memory store with the default catalog plus the full-back test shop
pub fn test_store() -> Arc<MemoryRepository> {
    let mut shops = default_coffee_shops();
    shops.push(full_back_shop());
    Arc::new(MemoryRepository::with_catalog(default_communities(), shops))
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.ledger.retry_backoff_ms = 1;
    config
}

pub fn test_state_with(repositories: Repositories) -> Arc<AppState> {
    Arc::new(AppState::new(repositories, None, test_config()).expect("Failed to build app state"))
}

pub fn test_state() -> Arc<AppState> {
    test_state_with(Repositories::from_memory(test_store()))
}

/// Register a user with a unique email
pub async fn register(state: &AppState, name: &str) -> AuthResponse {
    state
        .accounts
        .register(RegisterRequest {
            name: name.to_string(),
            email: format!("{}-{}@example.com", name.to_lowercase(), Uuid::new_v4()),
            password: "correct horse battery".to_string(),
            community_id: "nyc".to_string(),
            profile_image_url: None,
        })
        .await
        .expect("Failed to register user")
}

pub async fn register_id(state: &AppState, name: &str) -> Uuid {
    register(state, name).await.user.id
}

/// Credit exactly `points` to the account
pub async fn fund(state: &AppState, user_id: Uuid, points: i64) -> CommitOutcome {
    state
        .ledger
        .earn(
            user_id,
            EarnRequest {
                coffee_shop_id: FULL_BACK_SHOP.to_string(),
                purchase_amount: Decimal::new(points, 2),
                idempotency_key: format!("fund-{}", Uuid::new_v4()),
                description: None,
            },
        )
        .await
        .expect("Failed to fund account")
}

pub async fn balance_of(state: &AppState, user_id: Uuid) -> i64 {
    state
        .ledger
        .balance(user_id)
        .await
        .expect("Failed to read balance")
        .balance
}

pub fn key() -> String {
    Uuid::new_v4().to_string()
}
