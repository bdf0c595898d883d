//! Domain models for the Cuppy points ledger.
//!
//! Accounts and ledger entries are owned by the ledger engine; the catalog
//! and friend graph are read and written by their own services.

pub mod account;
pub mod catalog;
pub mod friend;
pub mod ledger;
pub mod user;

// Re-export all models for convenient access
pub use account::{Account, BalanceView};
pub use catalog::{Beverage, BeverageCategory, CoffeeShop, Community};
pub use friend::{ordered_pair, FriendRequest, FriendRequestStatus, FriendSummary, RequestDirection};
pub use ledger::{
    BalanceUpdate, CommitOutcome, EntryKind, LedgerCommit, LedgerEntry, LedgerOperation,
    LedgerReceipt, ReconciliationReport, TransactionView,
};
pub use user::{NewUser, User, UserProfile};
