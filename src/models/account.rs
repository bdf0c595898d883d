//! Point account held by every registered user

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Balance and concurrency token for one user.
///
/// `version` increments on every mutation and is checked at commit time,
/// so a writer holding a stale copy is rejected instead of overwriting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub user_id: Uuid,
    pub community_id: String,
    pub balance: i64,
    pub version: i64,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Fresh account opened at registration
    pub fn open(user_id: Uuid, community_id: String) -> Self {
        Self {
            user_id,
            community_id,
            balance: 0,
            version: 0,
            is_active: true,
            updated_at: Utc::now(),
        }
    }

    /// Check whether `amount` can be debited without going negative
    pub fn can_debit(&self, amount: i64) -> bool {
        amount <= self.balance
    }
}

/// Current balance reported to the account owner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceView {
    pub user_id: Uuid,
    pub balance: i64,
    pub version: i64,
}

impl From<&Account> for BalanceView {
    fn from(account: &Account) -> Self {
        Self {
            user_id: account.user_id,
            balance: account.balance,
            version: account.version,
        }
    }
}
