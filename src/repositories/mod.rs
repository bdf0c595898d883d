//! Storage seams for accounts, the ledger, the friend graph and the catalog.
//!
//! Each concern is a trait with a PostgreSQL implementation and a shared
//! in-process implementation used in development and tests. Every method
//! that writes must be atomic on its own: services never compose two writes
//! and expect them to commit together.

pub mod account_repository;
pub mod catalog_repository;
pub mod friend_repository;
pub mod ledger_repository;
pub mod memory_repository;
pub mod seed;

pub use account_repository::PgAccountRepository;
pub use catalog_repository::PgCatalogRepository;
pub use friend_repository::PgFriendRepository;
pub use ledger_repository::PgLedgerRepository;
pub use memory_repository::MemoryRepository;

use crate::error::RepositoryError;
use crate::models::{
    Account, CoffeeShop, CommitOutcome, Community, FriendRequest, FriendRequestStatus,
    LedgerCommit, LedgerEntry, LedgerReceipt, NewUser, User,
};
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Users and their point accounts
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Insert the user and open an empty account in one step.
    /// Fails with `Duplicate` if the email is taken (case-insensitive).
    async fn create_user(&self, new_user: NewUser) -> Result<(User, Account), RepositoryError>;

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, RepositoryError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;

    async fn find_users(&self, ids: &[Uuid]) -> Result<Vec<User>, RepositoryError>;

    async fn get_account(&self, user_id: Uuid) -> Result<Option<Account>, RepositoryError>;

    async fn get_accounts(&self, user_ids: &[Uuid]) -> Result<Vec<Account>, RepositoryError>;

    /// Mark the account inactive and bump its version
    async fn deactivate(&self, user_id: Uuid) -> Result<Account, RepositoryError>;
}

/// Order in which to list ledger entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOrder {
    /// Replay order
    Oldest,
    /// History order
    Newest,
}

/// Append-only ledger with atomic multi-account commits
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn find_receipt(
        &self,
        account_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<LedgerReceipt>, RepositoryError>;

    /// Apply a commit all-or-nothing.
    ///
    /// Returns `Replayed` without writing when the receipt's key is already
    /// stored for its account, and `VersionConflict` when any update's
    /// expected version is stale.
    async fn commit(&self, commit: LedgerCommit) -> Result<CommitOutcome, RepositoryError>;

    async fn entries_for_account(
        &self,
        account_id: Uuid,
        order: EntryOrder,
        limit: Option<i64>,
    ) -> Result<Vec<LedgerEntry>, RepositoryError>;
}

/// Friend requests and materialized friendships
#[async_trait]
pub trait FriendRepository: Send + Sync {
    /// Store a new pending request.
    /// Fails with `Duplicate` if the unordered pair already has one pending.
    async fn create_request(&self, request: FriendRequest) -> Result<FriendRequest, RepositoryError>;

    async fn find_request(&self, id: Uuid) -> Result<Option<FriendRequest>, RepositoryError>;

    /// Move a pending request to `status`, creating the friendship on accept.
    /// Fails with `NotFound` if the request is missing or already resolved.
    async fn resolve_request(
        &self,
        id: Uuid,
        status: FriendRequestStatus,
    ) -> Result<FriendRequest, RepositoryError>;

    async fn pending_requests(&self, user_id: Uuid) -> Result<Vec<FriendRequest>, RepositoryError>;

    async fn are_friends(&self, a: Uuid, b: Uuid) -> Result<bool, RepositoryError>;

    async fn friend_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>, RepositoryError>;
}

/// Read-only catalog of communities and coffee shops
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn list_communities(&self) -> Result<Vec<Community>, RepositoryError>;

    async fn find_community(&self, id: &str) -> Result<Option<Community>, RepositoryError>;

    async fn list_coffee_shops(&self, community_id: &str) -> Result<Vec<CoffeeShop>, RepositoryError>;

    async fn find_coffee_shop(&self, id: &str) -> Result<Option<CoffeeShop>, RepositoryError>;
}

/// One handle per storage concern, all pointing at the same backend
#[derive(Clone)]
pub struct Repositories {
    pub accounts: Arc<dyn AccountRepository>,
    pub ledger: Arc<dyn LedgerRepository>,
    pub friends: Arc<dyn FriendRepository>,
    pub catalog: Arc<dyn CatalogRepository>,
}

impl Repositories {
    /// PostgreSQL-backed repositories sharing one pool
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            accounts: Arc::new(PgAccountRepository::new(pool.clone())),
            ledger: Arc::new(PgLedgerRepository::new(pool.clone())),
            friends: Arc::new(PgFriendRepository::new(pool.clone())),
            catalog: Arc::new(PgCatalogRepository::new(pool)),
        }
    }

    /// In-process repositories seeded with the default catalog
    pub fn in_memory() -> Self {
        Self::from_memory(Arc::new(MemoryRepository::with_default_catalog()))
    }

    pub fn from_memory(store: Arc<MemoryRepository>) -> Self {
        Self {
            accounts: store.clone(),
            ledger: store.clone(),
            friends: store.clone(),
            catalog: store,
        }
    }
}
