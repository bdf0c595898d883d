//! In-process store implementing every repository trait.
//!
//! All state sits behind one `RwLock`, so each trait method runs as a
//! single critical section and multi-record writes are atomic.

use super::seed::{default_coffee_shops, default_communities};
use super::{
    AccountRepository, CatalogRepository, EntryOrder, FriendRepository, LedgerRepository,
};
use crate::error::RepositoryError;
use crate::models::{
    ordered_pair, Account, CoffeeShop, CommitOutcome, Community, FriendRequest,
    FriendRequestStatus, LedgerCommit, LedgerEntry, LedgerReceipt, NewUser, User,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    /// Lowercased email -> user id
    emails: HashMap<String, Uuid>,
    accounts: HashMap<Uuid, Account>,
    /// Per account, in sequence order
    entries: HashMap<Uuid, Vec<LedgerEntry>>,
    receipts: HashMap<(Uuid, String), LedgerReceipt>,
    requests: HashMap<Uuid, FriendRequest>,
    /// Unordered pair -> pending request id
    pending_pairs: HashMap<(Uuid, Uuid), Uuid>,
    friendships: HashSet<(Uuid, Uuid)>,
    communities: Vec<Community>,
    coffee_shops: Vec<CoffeeShop>,
}

pub struct MemoryRepository {
    state: RwLock<MemoryState>,
}

impl MemoryRepository {
    /// Empty store with no catalog
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
        }
    }

    /// Store seeded with the default communities and coffee shops
    pub fn with_default_catalog() -> Self {
        Self::with_catalog(default_communities(), default_coffee_shops())
    }

    pub fn with_catalog(communities: Vec<Community>, coffee_shops: Vec<CoffeeShop>) -> Self {
        Self {
            state: RwLock::new(MemoryState {
                communities,
                coffee_shops,
                ..MemoryState::default()
            }),
        }
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountRepository for MemoryRepository {
    async fn create_user(&self, new_user: NewUser) -> Result<(User, Account), RepositoryError> {
        let mut state = self.state.write().await;

        let email_key = new_user.email.to_lowercase();
        if state.emails.contains_key(&email_key) {
            return Err(RepositoryError::Duplicate(format!(
                "email {} is already registered",
                new_user.email
            )));
        }
        if !state.communities.iter().any(|c| c.id == new_user.community_id) {
            return Err(RepositoryError::ConstraintViolation(format!(
                "unknown community {}",
                new_user.community_id
            )));
        }

        let user = User::from_new(new_user);
        let account = Account::open(user.id, user.community_id.clone());

        state.emails.insert(email_key, user.id);
        state.users.insert(user.id, user.clone());
        state.accounts.insert(user.id, account.clone());

        Ok((user, account))
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .emails
            .get(&email.to_lowercase())
            .and_then(|id| state.users.get(id))
            .cloned())
    }

    async fn find_users(&self, ids: &[Uuid]) -> Result<Vec<User>, RepositoryError> {
        let state = self.state.read().await;
        Ok(ids.iter().filter_map(|id| state.users.get(id).cloned()).collect())
    }

    async fn get_account(&self, user_id: Uuid) -> Result<Option<Account>, RepositoryError> {
        Ok(self.state.read().await.accounts.get(&user_id).cloned())
    }

    async fn get_accounts(&self, user_ids: &[Uuid]) -> Result<Vec<Account>, RepositoryError> {
        let state = self.state.read().await;
        Ok(user_ids
            .iter()
            .filter_map(|id| state.accounts.get(id).cloned())
            .collect())
    }

    async fn deactivate(&self, user_id: Uuid) -> Result<Account, RepositoryError> {
        let mut state = self.state.write().await;
        let account = state
            .accounts
            .get_mut(&user_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("account {}", user_id)))?;

        if account.is_active {
            account.is_active = false;
            account.version += 1;
            account.updated_at = Utc::now();
        }
        Ok(account.clone())
    }
}

#[async_trait]
impl LedgerRepository for MemoryRepository {
    async fn find_receipt(
        &self,
        account_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<LedgerReceipt>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .receipts
            .get(&(account_id, idempotency_key.to_string()))
            .cloned())
    }

    async fn commit(&self, commit: LedgerCommit) -> Result<CommitOutcome, RepositoryError> {
        let mut state = self.state.write().await;

        let receipt_key = (
            commit.receipt.account_id,
            commit.receipt.idempotency_key.clone(),
        );
        if let Some(existing) = state.receipts.get(&receipt_key) {
            return Ok(CommitOutcome::Replayed(existing.clone()));
        }

        // Validate every update before touching anything
        for update in &commit.updates {
            let account = state
                .accounts
                .get(&update.account_id)
                .ok_or_else(|| RepositoryError::NotFound(format!("account {}", update.account_id)))?;

            if !account.is_active {
                return Err(RepositoryError::NotFound(format!(
                    "account {} is inactive",
                    update.account_id
                )));
            }
            if account.version != update.expected_version {
                return Err(RepositoryError::VersionConflict(update.account_id));
            }
            if update.new_balance < 0 {
                return Err(RepositoryError::ConstraintViolation(format!(
                    "balance of account {} would go negative",
                    update.account_id
                )));
            }
        }

        let now = Utc::now();
        for update in &commit.updates {
            if let Some(account) = state.accounts.get_mut(&update.account_id) {
                account.balance = update.new_balance;
                account.version += 1;
                account.updated_at = now;
            }
        }
        for entry in commit.entries {
            state.entries.entry(entry.account_id).or_default().push(entry);
        }
        state.receipts.insert(receipt_key, commit.receipt.clone());

        Ok(CommitOutcome::Applied(commit.receipt))
    }

    async fn entries_for_account(
        &self,
        account_id: Uuid,
        order: EntryOrder,
        limit: Option<i64>,
    ) -> Result<Vec<LedgerEntry>, RepositoryError> {
        let state = self.state.read().await;
        let mut entries = state.entries.get(&account_id).cloned().unwrap_or_default();

        if order == EntryOrder::Newest {
            entries.reverse();
        }
        if let Some(limit) = limit {
            entries.truncate(limit.max(0) as usize);
        }
        Ok(entries)
    }
}

#[async_trait]
impl FriendRepository for MemoryRepository {
    async fn create_request(&self, request: FriendRequest) -> Result<FriendRequest, RepositoryError> {
        let mut state = self.state.write().await;

        let pair = request.pair();
        if state.pending_pairs.contains_key(&pair) {
            return Err(RepositoryError::Duplicate(
                "a pending friend request already exists for this pair".to_string(),
            ));
        }

        state.pending_pairs.insert(pair, request.id);
        state.requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn find_request(&self, id: Uuid) -> Result<Option<FriendRequest>, RepositoryError> {
        Ok(self.state.read().await.requests.get(&id).cloned())
    }

    async fn resolve_request(
        &self,
        id: Uuid,
        status: FriendRequestStatus,
    ) -> Result<FriendRequest, RepositoryError> {
        if !status.is_terminal() {
            return Err(RepositoryError::InvalidInput(
                "a request can only be accepted or declined".to_string(),
            ));
        }

        let mut state = self.state.write().await;
        let request = match state.requests.get_mut(&id) {
            Some(request) if request.status == FriendRequestStatus::Pending => request,
            _ => return Err(RepositoryError::NotFound(format!("pending friend request {}", id))),
        };

        request.status = status;
        request.responded_at = Some(Utc::now());
        let resolved = request.clone();

        state.pending_pairs.remove(&resolved.pair());
        if status == FriendRequestStatus::Accepted {
            state.friendships.insert(resolved.pair());
        }
        Ok(resolved)
    }

    async fn pending_requests(&self, user_id: Uuid) -> Result<Vec<FriendRequest>, RepositoryError> {
        let state = self.state.read().await;
        let mut requests: Vec<FriendRequest> = state
            .requests
            .values()
            .filter(|r| r.status == FriendRequestStatus::Pending && r.involves(user_id))
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(requests)
    }

    async fn are_friends(&self, a: Uuid, b: Uuid) -> Result<bool, RepositoryError> {
        Ok(self.state.read().await.friendships.contains(&ordered_pair(a, b)))
    }

    async fn friend_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .friendships
            .iter()
            .filter_map(|&(low, high)| match user_id {
                id if id == low => Some(high),
                id if id == high => Some(low),
                _ => None,
            })
            .collect())
    }
}

#[async_trait]
impl CatalogRepository for MemoryRepository {
    async fn list_communities(&self) -> Result<Vec<Community>, RepositoryError> {
        let mut communities = self.state.read().await.communities.clone();
        communities.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(communities)
    }

    async fn find_community(&self, id: &str) -> Result<Option<Community>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.communities.iter().find(|c| c.id == id).cloned())
    }

    async fn list_coffee_shops(&self, community_id: &str) -> Result<Vec<CoffeeShop>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .coffee_shops
            .iter()
            .filter(|shop| shop.community_id == community_id)
            .cloned()
            .collect())
    }

    async fn find_coffee_shop(&self, id: &str) -> Result<Option<CoffeeShop>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.coffee_shops.iter().find(|shop| shop.id == id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BalanceUpdate, EntryKind, LedgerOperation};

    fn new_user(email: &str) -> NewUser {
        NewUser {
            name: "John Doe".to_string(),
            email: email.to_string(),
            profile_image_url: None,
            community_id: "nyc".to_string(),
            password_hash: "hash".to_string(),
        }
    }

    fn credit(account: &Account, amount: i64, key: &str) -> LedgerCommit {
        let correlation_id = Uuid::new_v4();
        let now = Utc::now();
        LedgerCommit {
            updates: vec![BalanceUpdate {
                account_id: account.user_id,
                expected_version: account.version,
                new_balance: account.balance + amount,
            }],
            entries: vec![LedgerEntry {
                id: Uuid::new_v4(),
                account_id: account.user_id,
                counterparty_account_id: None,
                coffee_shop_id: Some("shop1".to_string()),
                kind: EntryKind::Earned,
                amount,
                balance_after: account.balance + amount,
                sequence: account.version + 1,
                correlation_id,
                description: "test".to_string(),
                idempotency_key: key.to_string(),
                created_at: now,
            }],
            receipt: LedgerReceipt {
                operation: LedgerOperation::Earn,
                account_id: account.user_id,
                correlation_id,
                points: amount,
                balance_after: account.balance + amount,
                counterparty_account_id: None,
                coffee_shop_id: Some("shop1".to_string()),
                idempotency_key: key.to_string(),
                created_at: now,
            },
        }
    }

    #[tokio::test]
    async fn test_email_is_unique_case_insensitively() {
        let repo = MemoryRepository::with_default_catalog();
        repo.create_user(new_user("john@example.com")).await.unwrap();

        let err = repo.create_user(new_user("JOHN@example.com")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_unknown_community_rejected() {
        let repo = MemoryRepository::with_default_catalog();
        let mut user = new_user("john@example.com");
        user.community_id = "tokyo".to_string();

        let err = repo.create_user(user).await.unwrap_err();
        assert!(matches!(err, RepositoryError::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn test_stale_version_is_rejected_without_writing() {
        let repo = MemoryRepository::with_default_catalog();
        let (_, account) = repo.create_user(new_user("john@example.com")).await.unwrap();

        repo.commit(credit(&account, 10, "k1")).await.unwrap();

        // `account` still carries version 0
        let err = repo.commit(credit(&account, 10, "k2")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::VersionConflict(_)));

        let stored = repo.get_account(account.user_id).await.unwrap().unwrap();
        assert_eq!(stored.balance, 10);
        assert_eq!(stored.version, 1);
        assert!(repo.find_receipt(account.user_id, "k2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reused_key_replays() {
        let repo = MemoryRepository::with_default_catalog();
        let (_, account) = repo.create_user(new_user("john@example.com")).await.unwrap();

        let first = repo.commit(credit(&account, 10, "k1")).await.unwrap();
        let second = repo.commit(credit(&account, 99, "k1")).await.unwrap();

        assert!(!first.is_replayed());
        assert!(second.is_replayed());
        assert_eq!(second.receipt().points, 10);
        let entries = repo
            .entries_for_account(account.user_id, EntryOrder::Oldest, None)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_twice_is_not_found() {
        let repo = MemoryRepository::with_default_catalog();
        let (a, _) = repo.create_user(new_user("a@example.com")).await.unwrap();
        let (b, _) = repo.create_user(new_user("b@example.com")).await.unwrap();

        let request = repo.create_request(FriendRequest::new(a.id, b.id)).await.unwrap();
        repo.resolve_request(request.id, FriendRequestStatus::Accepted).await.unwrap();

        let err = repo
            .resolve_request(request.id, FriendRequestStatus::Declined)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
        assert!(repo.are_friends(b.id, a.id).await.unwrap());
        assert_eq!(repo.friend_ids(a.id).await.unwrap(), vec![b.id]);
    }
}
