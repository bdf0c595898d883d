//! Ledger engine: earn, redeem and transfer points.
//!
//! Every mutation follows the same path:
//!
//! 1. validate the request and check for an existing receipt under the
//!    caller's idempotency key
//! 2. take the in-process locks of every touched account, in ascending id
//!    order, so two opposite transfers cannot deadlock
//! 3. read the accounts, build a [`LedgerCommit`] and hand it to the store,
//!    which rejects it if any account version moved underneath us
//! 4. on a version conflict, re-read and rebuild up to
//!    `max_commit_attempts` times, then give up with `Unavailable`
//!
//! Locks are released before notifications and audit writes go out.

use crate::config::LedgerConfig;
use crate::error::{AppError, AppResult};
use crate::models::{
    Account, BalanceUpdate, BalanceView, CoffeeShop, CommitOutcome, EntryKind, LedgerCommit,
    LedgerEntry, LedgerOperation, LedgerReceipt, ReconciliationReport, TransactionView,
};
use crate::repositories::{AccountRepository, CatalogRepository, EntryOrder, LedgerRepository};
use crate::services::AuditTrailService;
use crate::websocket::WebSocketServer;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;
pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const MAX_HISTORY_LIMIT: usize = 200;

#[derive(Debug, Clone, Deserialize)]
pub struct EarnRequest {
    #[serde(alias = "coffeeShopId")]
    pub coffee_shop_id: String,
    #[serde(alias = "purchaseAmount")]
    pub purchase_amount: Decimal,
    #[serde(alias = "idempotencyKey")]
    pub idempotency_key: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedeemRequest {
    #[serde(alias = "coffeeShopId")]
    pub coffee_shop_id: String,
    pub amount: i64,
    #[serde(alias = "idempotencyKey")]
    pub idempotency_key: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransferRequest {
    #[serde(alias = "receiverId")]
    pub receiver_id: Uuid,
    pub amount: i64,
    #[serde(alias = "idempotencyKey")]
    pub idempotency_key: String,
    #[serde(default)]
    pub description: Option<String>,
}

type LockMap = Arc<StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>>;

/// One async mutex per account, present only while someone holds or awaits it
#[derive(Default)]
pub struct AccountLocks {
    locks: LockMap,
}

impl AccountLocks {
    /// Lock every account in `ids`, smallest id first.
    /// Duplicates are locked once. Guards release on drop.
    pub async fn acquire(&self, ids: &[Uuid]) -> Vec<AccountGuard> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();

        let mutexes: Vec<(Uuid, Arc<Mutex<()>>)> = {
            let mut locks = lock_map(&self.locks);
            ids.iter()
                .map(|id| (*id, locks.entry(*id).or_default().clone()))
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for (account_id, mutex) in mutexes {
            guards.push(AccountGuard {
                account_id,
                guard: Some(mutex.lock_owned().await),
                locks: self.locks.clone(),
            });
        }
        guards
    }

    /// Accounts currently locked or awaited
    pub fn tracked(&self) -> usize {
        lock_map(&self.locks).len()
    }
}

fn lock_map(locks: &LockMap) -> MutexGuard<'_, HashMap<Uuid, Arc<Mutex<()>>>> {
    // The map holds no invariant a panicking holder could break
    locks.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Held account lock; the map entry is dropped with the last user
pub struct AccountGuard {
    account_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockMap,
}

impl Drop for AccountGuard {
    fn drop(&mut self) {
        self.guard.take();

        let mut locks = lock_map(&self.locks);
        let idle = locks
            .get(&self.account_id)
            .map_or(false, |mutex| Arc::strong_count(mutex) == 1);
        if idle {
            locks.remove(&self.account_id);
        }
    }
}

/// Service owning every balance change
pub struct LedgerService {
    accounts: Arc<dyn AccountRepository>,
    ledger: Arc<dyn LedgerRepository>,
    catalog: Arc<dyn CatalogRepository>,
    locks: AccountLocks,
    config: LedgerConfig,
    notifier: Arc<WebSocketServer>,
    audit: Option<Arc<AuditTrailService>>,
}

impl LedgerService {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        ledger: Arc<dyn LedgerRepository>,
        catalog: Arc<dyn CatalogRepository>,
        config: LedgerConfig,
        notifier: Arc<WebSocketServer>,
        audit: Option<Arc<AuditTrailService>>,
    ) -> Self {
        Self {
            accounts,
            ledger,
            catalog,
            locks: AccountLocks::default(),
            config,
            notifier,
            audit,
        }
    }

    /// Credit points for a purchase at a coffee shop
    pub async fn earn(&self, account_id: Uuid, request: EarnRequest) -> AppResult<CommitOutcome> {
        validate_idempotency_key(&request.idempotency_key)?;
        if let Some(receipt) = self.ledger.find_receipt(account_id, &request.idempotency_key).await? {
            return Ok(CommitOutcome::Replayed(receipt));
        }

        if request.purchase_amount <= Decimal::ZERO {
            return Err(AppError::InvalidAmount(
                "purchase amount must be positive".to_string(),
            ));
        }

        let shop = self.coffee_shop(&request.coffee_shop_id).await?;
        let points = shop
            .points_for_purchase(request.purchase_amount)
            .ok_or_else(|| AppError::InvalidAmount("purchase amount is too large".to_string()))?;
        if points <= 0 {
            return Err(AppError::InvalidAmount(format!(
                "a purchase of {} earns no points at {}",
                request.purchase_amount, shop.name
            )));
        }
        self.active_account(account_id).await?;

        info!(
            "Earning {} points for account {} at {} (purchase {})",
            points, account_id, shop.id, request.purchase_amount
        );

        let guards = self.locks.acquire(&[account_id]).await;
        let result = self
            .commit_with_retry(|| self.build_earn(account_id, &shop, points, &request))
            .await;
        drop(guards);

        self.finish(result?).await
    }

    async fn build_earn(
        &self,
        account_id: Uuid,
        shop: &CoffeeShop,
        points: i64,
        request: &EarnRequest,
    ) -> AppResult<LedgerCommit> {
        let account = self.active_account(account_id).await?;
        let new_balance = credit(&account, points)?;

        let description = request
            .description
            .clone()
            .unwrap_or_else(|| format!("Earned at {}", shop.name));

        Ok(single_entry_commit(
            LedgerOperation::Earn,
            EntryKind::Earned,
            &account,
            points,
            new_balance,
            Some(shop.id.clone()),
            description,
            &request.idempotency_key,
        ))
    }

    /// Spend points at a coffee shop
    pub async fn redeem(&self, account_id: Uuid, request: RedeemRequest) -> AppResult<CommitOutcome> {
        validate_idempotency_key(&request.idempotency_key)?;
        if let Some(receipt) = self.ledger.find_receipt(account_id, &request.idempotency_key).await? {
            return Ok(CommitOutcome::Replayed(receipt));
        }

        validate_points(request.amount)?;
        let shop = self.coffee_shop(&request.coffee_shop_id).await?;
        self.active_account(account_id).await?;

        info!(
            "Redeeming {} points for account {} at {}",
            request.amount, account_id, shop.id
        );

        let guards = self.locks.acquire(&[account_id]).await;
        let result = self
            .commit_with_retry(|| self.build_redeem(account_id, &shop, &request))
            .await;
        drop(guards);

        self.finish(result?).await
    }

    async fn build_redeem(
        &self,
        account_id: Uuid,
        shop: &CoffeeShop,
        request: &RedeemRequest,
    ) -> AppResult<LedgerCommit> {
        let account = self.active_account(account_id).await?;
        let new_balance = debit(&account, request.amount)?;

        let description = request
            .description
            .clone()
            .unwrap_or_else(|| format!("Redeemed at {}", shop.name));

        Ok(single_entry_commit(
            LedgerOperation::Redeem,
            EntryKind::Redeemed,
            &account,
            request.amount,
            new_balance,
            Some(shop.id.clone()),
            description,
            &request.idempotency_key,
        ))
    }

    /// Move points from the sender to another account, both sides or neither
    pub async fn transfer(&self, sender_id: Uuid, request: TransferRequest) -> AppResult<CommitOutcome> {
        validate_idempotency_key(&request.idempotency_key)?;
        if let Some(receipt) = self.ledger.find_receipt(sender_id, &request.idempotency_key).await? {
            return Ok(CommitOutcome::Replayed(receipt));
        }

        if sender_id == request.receiver_id {
            return Err(AppError::SelfTransfer);
        }
        validate_points(request.amount)?;

        // Unknown ids never reach the lock map
        self.active_account(sender_id).await?;
        self.active_account(request.receiver_id).await?;

        info!(
            "Transferring {} points from {} to {}",
            request.amount, sender_id, request.receiver_id
        );

        let guards = self.locks.acquire(&[sender_id, request.receiver_id]).await;
        let result = self
            .commit_with_retry(|| self.build_transfer(sender_id, &request))
            .await;
        drop(guards);

        self.finish(result?).await
    }

    async fn build_transfer(&self, sender_id: Uuid, request: &TransferRequest) -> AppResult<LedgerCommit> {
        let sender = self.active_account(sender_id).await?;
        let receiver = self.active_account(request.receiver_id).await?;

        let sender_balance = debit(&sender, request.amount)?;
        let receiver_balance = credit(&receiver, request.amount)?;

        let correlation_id = Uuid::new_v4();
        let now = Utc::now();
        let description = request
            .description
            .clone()
            .unwrap_or_else(|| "Points transfer".to_string());

        let entry = |account: &Account, kind, balance_after, counterparty| LedgerEntry {
            id: Uuid::new_v4(),
            account_id: account.user_id,
            counterparty_account_id: Some(counterparty),
            coffee_shop_id: None,
            kind,
            amount: request.amount,
            balance_after,
            sequence: account.version + 1,
            correlation_id,
            description: description.clone(),
            idempotency_key: request.idempotency_key.clone(),
            created_at: now,
        };

        let entries = vec![
            entry(&sender, EntryKind::Sent, sender_balance, receiver.user_id),
            entry(&receiver, EntryKind::Received, receiver_balance, sender.user_id),
        ];

        let mut updates = vec![
            BalanceUpdate {
                account_id: sender.user_id,
                expected_version: sender.version,
                new_balance: sender_balance,
            },
            BalanceUpdate {
                account_id: receiver.user_id,
                expected_version: receiver.version,
                new_balance: receiver_balance,
            },
        ];
        updates.sort_by_key(|u| u.account_id);

        let receipt = LedgerReceipt {
            operation: LedgerOperation::Transfer,
            account_id: sender.user_id,
            correlation_id,
            points: request.amount,
            balance_after: sender_balance,
            counterparty_account_id: Some(receiver.user_id),
            coffee_shop_id: None,
            idempotency_key: request.idempotency_key.clone(),
            created_at: now,
        };

        Ok(LedgerCommit {
            updates,
            entries,
            receipt,
        })
    }

    /// Build and commit, rebuilding from fresh reads on version conflict.
    /// Returns the outcome with the balance updates it carried.
    async fn commit_with_retry<F, Fut>(&self, mut build: F) -> AppResult<(CommitOutcome, Vec<BalanceUpdate>)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<LedgerCommit>>,
    {
        let attempts = self.config.max_commit_attempts;

        for attempt in 1..=attempts {
            let commit = build().await?;
            let updates = commit.updates.clone();

            match self.ledger.commit(commit).await.map_err(AppError::from) {
                Ok(outcome) => return Ok((outcome, updates)),
                Err(AppError::Conflict(reason)) => {
                    warn!(
                        "Ledger commit conflict (attempt {}/{}): {}",
                        attempt, attempts, reason
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.config.retry_backoff(attempt)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::Unavailable(format!(
            "ledger commit kept conflicting after {} attempts",
            attempts
        )))
    }

    /// Notify and audit an applied commit; replays produce no side effects
    async fn finish(&self, (outcome, updates): (CommitOutcome, Vec<BalanceUpdate>)) -> AppResult<CommitOutcome> {
        let receipt = match &outcome {
            CommitOutcome::Applied(receipt) => receipt,
            CommitOutcome::Replayed(receipt) => {
                info!(
                    "Replayed {} for account {} (key {})",
                    receipt.operation.as_str(),
                    receipt.account_id,
                    receipt.idempotency_key
                );
                return Ok(outcome);
            }
        };

        info!(
            "Applied {} for account {}: {} points, balance {} (correlation {})",
            receipt.operation.as_str(),
            receipt.account_id,
            receipt.points,
            receipt.balance_after,
            receipt.correlation_id
        );

        for update in &updates {
            self.notifier
                .notify_balance(
                    update.account_id,
                    update.new_balance,
                    update.expected_version + 1,
                    receipt.correlation_id,
                )
                .await;
        }

        if let Some(audit) = &self.audit {
            if let Err(e) = audit.log_ledger_receipt(receipt).await {
                warn!("Failed to write audit entry for {}: {}", receipt.correlation_id, e);
            }
        }

        Ok(outcome)
    }

    pub async fn balance(&self, account_id: Uuid) -> AppResult<BalanceView> {
        let account = self.active_account(account_id).await?;
        Ok(BalanceView::from(&account))
    }

    /// Newest entries first, with shop and counterparty details filled in
    pub async fn transaction_history(
        &self,
        account_id: Uuid,
        limit: Option<usize>,
    ) -> AppResult<Vec<TransactionView>> {
        self.active_account(account_id).await?;

        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        let entries = self
            .ledger
            .entries_for_account(account_id, EntryOrder::Newest, Some(limit as i64))
            .await?;

        let mut shops: HashMap<String, Option<CoffeeShop>> = HashMap::new();
        for shop_id in entries.iter().filter_map(|e| e.coffee_shop_id.as_ref()) {
            if !shops.contains_key(shop_id) {
                let shop = self.catalog.find_coffee_shop(shop_id).await?;
                shops.insert(shop_id.clone(), shop);
            }
        }

        let mut counterparty_ids: Vec<Uuid> = entries
            .iter()
            .filter_map(|e| e.counterparty_account_id)
            .collect();
        counterparty_ids.sort();
        counterparty_ids.dedup();
        let counterparties: HashMap<Uuid, _> = self
            .accounts
            .find_users(&counterparty_ids)
            .await?
            .into_iter()
            .map(|user| (user.id, user))
            .collect();

        Ok(entries
            .into_iter()
            .map(|entry| {
                let shop = entry
                    .coffee_shop_id
                    .as_ref()
                    .and_then(|id| shops.get(id))
                    .and_then(Option::as_ref);
                let counterparty = entry
                    .counterparty_account_id
                    .and_then(|id| counterparties.get(&id));

                let mut view = TransactionView::from_entry(entry);
                view.coffee_shop_name = shop.map(|s| s.name.clone());
                view.coffee_shop_address = shop.map(|s| s.address.clone());
                view.related_user_name = counterparty.map(|u| u.name.clone());
                view.related_user_email = counterparty.map(|u| u.email.clone());
                view
            })
            .collect())
    }

    /// Replay every entry of the account against its stored balance
    pub async fn reconcile(&self, account_id: Uuid) -> AppResult<ReconciliationReport> {
        let account = self
            .accounts
            .get_account(account_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("account {}", account_id)))?;

        let entries = self
            .ledger
            .entries_for_account(account_id, EntryOrder::Oldest, None)
            .await?;

        let report = ReconciliationReport::replay(account_id, account.balance, entries);
        if !report.is_consistent() {
            warn!(
                "Account {} does not reconcile: stored {}, replayed {}, first mismatch {:?}",
                account_id, report.stored_balance, report.replayed_balance, report.first_mismatch_sequence
            );
        }
        Ok(report)
    }

    async fn active_account(&self, account_id: Uuid) -> AppResult<Account> {
        match self.accounts.get_account(account_id).await? {
            Some(account) if account.is_active => Ok(account),
            _ => Err(AppError::NotFound(format!("account {}", account_id))),
        }
    }

    async fn coffee_shop(&self, coffee_shop_id: &str) -> AppResult<CoffeeShop> {
        self.catalog
            .find_coffee_shop(coffee_shop_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("coffee shop {}", coffee_shop_id)))
    }
}

fn validate_idempotency_key(key: &str) -> AppResult<()> {
    if key.trim().is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(AppError::Validation(format!(
            "idempotency key must be 1 to {} characters",
            MAX_IDEMPOTENCY_KEY_LEN
        )));
    }
    Ok(())
}

fn validate_points(amount: i64) -> AppResult<()> {
    if amount <= 0 {
        return Err(AppError::InvalidAmount("amount must be positive".to_string()));
    }
    Ok(())
}

fn credit(account: &Account, amount: i64) -> AppResult<i64> {
    account
        .balance
        .checked_add(amount)
        .ok_or_else(|| AppError::InvalidAmount("balance would overflow".to_string()))
}

fn debit(account: &Account, amount: i64) -> AppResult<i64> {
    if !account.can_debit(amount) {
        return Err(AppError::InsufficientBalance {
            available: account.balance,
            required: amount,
        });
    }
    Ok(account.balance - amount)
}

#[allow(clippy::too_many_arguments)]
fn single_entry_commit(
    operation: LedgerOperation,
    kind: EntryKind,
    account: &Account,
    points: i64,
    new_balance: i64,
    coffee_shop_id: Option<String>,
    description: String,
    idempotency_key: &str,
) -> LedgerCommit {
    let correlation_id = Uuid::new_v4();
    let now = Utc::now();

    let entry = LedgerEntry {
        id: Uuid::new_v4(),
        account_id: account.user_id,
        counterparty_account_id: None,
        coffee_shop_id: coffee_shop_id.clone(),
        kind,
        amount: points,
        balance_after: new_balance,
        sequence: account.version + 1,
        correlation_id,
        description,
        idempotency_key: idempotency_key.to_string(),
        created_at: now,
    };

    let receipt = LedgerReceipt {
        operation,
        account_id: account.user_id,
        correlation_id,
        points,
        balance_after: new_balance,
        counterparty_account_id: None,
        coffee_shop_id,
        idempotency_key: idempotency_key.to_string(),
        created_at: now,
    };

    LedgerCommit {
        updates: vec![BalanceUpdate {
            account_id: account.user_id,
            expected_version: account.version,
            new_balance,
        }],
        entries: vec![entry],
        receipt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_key_bounds() {
        assert!(validate_idempotency_key("k").is_ok());
        assert!(validate_idempotency_key(&"k".repeat(MAX_IDEMPOTENCY_KEY_LEN)).is_ok());
        assert!(validate_idempotency_key("").is_err());
        assert!(validate_idempotency_key("   ").is_err());
        assert!(validate_idempotency_key(&"k".repeat(MAX_IDEMPOTENCY_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn test_debit_rejects_overdraft() {
        let mut account = Account::open(Uuid::new_v4(), "nyc".to_string());
        account.balance = 100;

        assert_eq!(debit(&account, 100).unwrap(), 0);
        match debit(&account, 150) {
            Err(AppError::InsufficientBalance { available, required }) => {
                assert_eq!(available, 100);
                assert_eq!(required, 150);
            }
            other => panic!("expected InsufficientBalance, got {:?}", other),
        }
    }

    #[test]
    fn test_credit_overflow_is_invalid_amount() {
        let mut account = Account::open(Uuid::new_v4(), "nyc".to_string());
        account.balance = i64::MAX;
        assert!(matches!(credit(&account, 1), Err(AppError::InvalidAmount(_))));
    }

    #[tokio::test]
    async fn test_locks_are_exclusive_per_account() {
        let locks = Arc::new(AccountLocks::default());
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let held = locks.acquire(&[a, b, a]).await;
        assert_eq!(held.len(), 2);

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire(&[b]).await.len() })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(held);
        assert_eq!(contender.await.unwrap(), 1);
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn test_waiting_contender_keeps_entry_alive() {
        let locks = Arc::new(AccountLocks::default());
        let a = Uuid::new_v4();

        let held = locks.acquire(&[a]).await;
        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let guards = locks.acquire(&[a]).await;
                let tracked = locks.tracked();
                drop(guards);
                tracked
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        drop(held);
        assert_eq!(locks.tracked(), 1);
        assert_eq!(contender.await.unwrap(), 1);
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn test_lock_map_is_empty_after_transfers() {
        use crate::services::RegisterRequest;

        let state = crate::AppState::in_memory(crate::AppConfig::default()).unwrap();
        let sender = state
            .accounts
            .register(RegisterRequest {
                name: "Sender".to_string(),
                email: "sender@example.com".to_string(),
                password: "correct horse battery".to_string(),
                community_id: "nyc".to_string(),
                profile_image_url: None,
            })
            .await
            .unwrap()
            .user
            .id;

        state
            .ledger
            .earn(
                sender,
                EarnRequest {
                    coffee_shop_id: "shop1".to_string(),
                    purchase_amount: Decimal::new(1000, 2),
                    idempotency_key: "earn-1".to_string(),
                    description: None,
                },
            )
            .await
            .unwrap();

        for i in 0..100 {
            let result = state
                .ledger
                .transfer(
                    sender,
                    TransferRequest {
                        receiver_id: Uuid::new_v4(),
                        amount: 1,
                        idempotency_key: format!("t-{}", i),
                        description: None,
                    },
                )
                .await;
            assert!(matches!(result, Err(AppError::NotFound(_))));
        }

        assert_eq!(state.ledger.locks.tracked(), 0);
        assert_eq!(state.ledger.balance(sender).await.unwrap().balance, 150);
    }
}
