pub mod account_service;
pub mod audit;
pub mod catalog_service;
pub mod friend_service;
pub mod ledger_service;

pub use account_service::{AccountService, AuthResponse, RegisterRequest, SignInRequest};
pub use audit::AuditTrailService;
pub use catalog_service::CatalogService;
pub use friend_service::{FriendService, LeaderboardEntry};
pub use ledger_service::{EarnRequest, LedgerService, RedeemRequest, TransferRequest};
