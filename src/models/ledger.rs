//! Ledger entries, receipts and the commit batch applied by the ledger engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of balance movement recorded for one account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Earned,
    Redeemed,
    Sent,
    Received,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earned => "earned",
            Self::Redeemed => "redeemed",
            Self::Sent => "sent",
            Self::Received => "received",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "earned" => Some(Self::Earned),
            "redeemed" => Some(Self::Redeemed),
            "sent" => Some(Self::Sent),
            "received" => Some(Self::Received),
            _ => None,
        }
    }

    /// Whether this kind adds to the balance
    pub fn is_credit(&self) -> bool {
        matches!(self, Self::Earned | Self::Received)
    }

    /// Signed effect of an entry of this kind on the balance
    pub fn signed(&self, amount: i64) -> i64 {
        if self.is_credit() {
            amount
        } else {
            -amount
        }
    }
}

/// Immutable record of one balance change on one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub account_id: Uuid,
    pub counterparty_account_id: Option<Uuid>,
    pub coffee_shop_id: Option<String>,
    pub kind: EntryKind,
    pub amount: i64,
    pub balance_after: i64,
    /// Account version produced by this entry; replay order
    pub sequence: i64,
    /// Shared by both sides of a transfer
    pub correlation_id: Uuid,
    pub description: String,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

/// Operation that produced a receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerOperation {
    Earn,
    Redeem,
    Transfer,
}

impl LedgerOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earn => "earn",
            Self::Redeem => "redeem",
            Self::Transfer => "transfer",
        }
    }
}

/// Result of an applied operation, stored under the caller's idempotency key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReceipt {
    pub operation: LedgerOperation,
    pub account_id: Uuid,
    pub correlation_id: Uuid,
    pub points: i64,
    pub balance_after: i64,
    pub counterparty_account_id: Option<Uuid>,
    pub coffee_shop_id: Option<String>,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

/// New balance for one account, valid only if the stored version still matches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceUpdate {
    pub account_id: Uuid,
    pub expected_version: i64,
    pub new_balance: i64,
}

/// Everything one ledger operation writes, committed all-or-nothing
#[derive(Debug, Clone)]
pub struct LedgerCommit {
    pub updates: Vec<BalanceUpdate>,
    pub entries: Vec<LedgerEntry>,
    pub receipt: LedgerReceipt,
}

/// What the store did with a commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Balances updated, entries appended, receipt stored
    Applied(LedgerReceipt),
    /// The idempotency key was already used; nothing was written
    Replayed(LedgerReceipt),
}

impl CommitOutcome {
    pub fn receipt(&self) -> &LedgerReceipt {
        match self {
            Self::Applied(receipt) | Self::Replayed(receipt) => receipt,
        }
    }

    pub fn into_receipt(self) -> LedgerReceipt {
        match self {
            Self::Applied(receipt) | Self::Replayed(receipt) => receipt,
        }
    }

    pub fn is_replayed(&self) -> bool {
        matches!(self, Self::Replayed(_))
    }
}

/// Transaction history row for the mobile client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub coffee_shop_id: Option<String>,
    pub related_user_id: Option<Uuid>,
    pub transaction_type: EntryKind,
    pub amount: i64,
    pub balance_after: i64,
    pub correlation_id: Uuid,
    pub description: String,
    pub coffee_shop_name: Option<String>,
    pub coffee_shop_address: Option<String>,
    pub related_user_name: Option<String>,
    pub related_user_email: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TransactionView {
    pub fn from_entry(entry: LedgerEntry) -> Self {
        Self {
            id: entry.id,
            user_id: entry.account_id,
            coffee_shop_id: entry.coffee_shop_id,
            related_user_id: entry.counterparty_account_id,
            transaction_type: entry.kind,
            amount: entry.amount,
            balance_after: entry.balance_after,
            correlation_id: entry.correlation_id,
            description: entry.description,
            coffee_shop_name: None,
            coffee_shop_address: None,
            related_user_name: None,
            related_user_email: None,
            created_at: entry.created_at,
        }
    }
}

/// Outcome of replaying an account's entries against its stored balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub account_id: Uuid,
    pub stored_balance: i64,
    pub replayed_balance: i64,
    pub entry_count: usize,
    /// Sequence of the first entry whose `balance_after` disagrees with the replay
    pub first_mismatch_sequence: Option<i64>,
}

impl ReconciliationReport {
    /// Replay entries (any order) and compare with the stored balance
    pub fn replay(account_id: Uuid, stored_balance: i64, mut entries: Vec<LedgerEntry>) -> Self {
        entries.sort_by_key(|e| e.sequence);

        let mut running = 0i64;
        let mut first_mismatch_sequence = None;
        for entry in &entries {
            running += entry.kind.signed(entry.amount);
            if first_mismatch_sequence.is_none() && (running != entry.balance_after || running < 0) {
                first_mismatch_sequence = Some(entry.sequence);
            }
        }

        Self {
            account_id,
            stored_balance,
            replayed_balance: running,
            entry_count: entries.len(),
            first_mismatch_sequence,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.stored_balance == self.replayed_balance && self.first_mismatch_sequence.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: EntryKind, amount: i64, balance_after: i64, sequence: i64) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4(),
            account_id: Uuid::nil(),
            counterparty_account_id: None,
            coffee_shop_id: None,
            kind,
            amount,
            balance_after,
            sequence,
            correlation_id: Uuid::new_v4(),
            description: String::new(),
            idempotency_key: format!("k{}", sequence),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_entry_kind_conversion() {
        for kind in [EntryKind::Earned, EntryKind::Redeemed, EntryKind::Sent, EntryKind::Received] {
            assert_eq!(EntryKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(EntryKind::from_str("refund"), None);
    }

    #[test]
    fn test_entry_kind_sign() {
        assert_eq!(EntryKind::Earned.signed(5), 5);
        assert_eq!(EntryKind::Received.signed(5), 5);
        assert_eq!(EntryKind::Redeemed.signed(5), -5);
        assert_eq!(EntryKind::Sent.signed(5), -5);
    }

    #[test]
    fn test_replay_out_of_order_entries() {
        let entries = vec![
            entry(EntryKind::Sent, 30, 70, 2),
            entry(EntryKind::Earned, 100, 100, 1),
            entry(EntryKind::Received, 5, 75, 3),
        ];
        let report = ReconciliationReport::replay(Uuid::nil(), 75, entries);
        assert!(report.is_consistent());
        assert_eq!(report.entry_count, 3);
    }

    #[test]
    fn test_replay_detects_drift() {
        let entries = vec![
            entry(EntryKind::Earned, 100, 100, 1),
            entry(EntryKind::Redeemed, 40, 50, 2),
        ];
        let report = ReconciliationReport::replay(Uuid::nil(), 60, entries);
        assert!(!report.is_consistent());
        assert_eq!(report.first_mismatch_sequence, Some(2));
        assert_eq!(report.replayed_balance, 60);
    }
}
