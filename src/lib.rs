//! Cuppy Points Ledger
//!
//! Backend for the Cuppy coffee rewards app: user accounts, a points ledger
//! with idempotent earn/redeem/transfer, a friend graph, and the HTTP and
//! WebSocket surfaces the mobile client talks to.

pub mod api;
pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod repositories;
pub mod services;
pub mod websocket;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{AppError, AppResult};

use auth::TokenManager;
use database::Database;
use repositories::Repositories;
use services::{AccountService, AuditTrailService, CatalogService, FriendService, LedgerService};
use std::sync::Arc;
use tracing::info;
use websocket::WebSocketServer;

/// Application state containing all repositories and services
pub struct AppState {
    pub config: AppConfig,
    /// Absent when running on the in-memory backend
    pub database: Option<Database>,
    pub repositories: Repositories,
    pub tokens: Arc<TokenManager>,
    pub ws_server: Arc<WebSocketServer>,
    pub accounts: AccountService,
    pub ledger: LedgerService,
    pub friends: FriendService,
    pub catalog: CatalogService,
}

impl AppState {
    /// Wire services over the given repositories
    pub fn new(
        repositories: Repositories,
        database: Option<Database>,
        config: AppConfig,
    ) -> AppResult<Self> {
        let tokens = Arc::new(TokenManager::new(&config.auth));
        let ws_server = Arc::new(WebSocketServer::new(tokens.clone()));

        let audit = match &config.audit_log_dir {
            Some(dir) => {
                let audit = AuditTrailService::new(dir)?;
                info!("Audit trail writing to {}", audit.path().display());
                Some(Arc::new(audit))
            }
            None => {
                info!("AUDIT_LOG_DIR not set - audit trail disabled");
                None
            }
        };

        let accounts = AccountService::new(
            repositories.accounts.clone(),
            repositories.friends.clone(),
            repositories.catalog.clone(),
            tokens.clone(),
            audit.clone(),
        );
        let ledger = LedgerService::new(
            repositories.accounts.clone(),
            repositories.ledger.clone(),
            repositories.catalog.clone(),
            config.ledger.clone(),
            ws_server.clone(),
            audit.clone(),
        );
        let friends = FriendService::new(
            repositories.friends.clone(),
            repositories.accounts.clone(),
            ws_server.clone(),
            audit,
        );
        let catalog = CatalogService::new(repositories.catalog.clone(), config.catalog_cache_ttl());

        Ok(Self {
            config,
            database,
            repositories,
            tokens,
            ws_server,
            accounts,
            ledger,
            friends,
            catalog,
        })
    }

    /// State over a fresh in-memory store seeded with the default catalog
    pub fn in_memory(config: AppConfig) -> AppResult<Self> {
        Self::new(Repositories::in_memory(), None, config)
    }
}
