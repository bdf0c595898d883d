use crate::error::{AppError, AppResult};
use crate::models::{Account, FriendRequest, LedgerReceipt};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub timestamp: i64,
    pub event_type: String, // "points_earned", "points_transferred", "account_deactivated", etc.
    pub account_id: Option<Uuid>,
    pub correlation_id: Option<Uuid>,
    pub details: serde_json::Value,
}

/// Append-only JSON-lines record of every balance change and account lifecycle event
pub struct AuditTrailService {
    log_file: PathBuf,
    file_handle: Arc<Mutex<std::fs::File>>,
}

impl AuditTrailService {
    /// Open (or create) today's audit file under `log_directory`
    pub fn new(log_directory: &Path) -> AppResult<Self> {
        std::fs::create_dir_all(log_directory)
            .map_err(|e| AppError::Message(format!("Failed to create log directory: {}", e)))?;

        let date = chrono::Utc::now().format("%Y-%m-%d");
        let log_file = log_directory.join(format!("audit_{}.log", date));

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .map_err(|e| AppError::Message(format!("Failed to open audit log file: {}", e)))?;

        Ok(Self {
            log_file,
            file_handle: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.log_file
    }

    /// Append one entry and flush
    pub async fn log(&self, entry: AuditLogEntry) -> AppResult<()> {
        let json = serde_json::to_string(&entry)?;

        let mut file = self.file_handle.lock().await;
        writeln!(file, "{}", json)
            .map_err(|e| AppError::Message(format!("Failed to write audit log: {}", e)))?;

        file.flush()
            .map_err(|e| AppError::Message(format!("Failed to flush audit log: {}", e)))?;

        Ok(())
    }

    /// Log an applied earn, redeem or transfer
    pub async fn log_ledger_receipt(&self, receipt: &LedgerReceipt) -> AppResult<()> {
        let event_type = match receipt.operation {
            crate::models::LedgerOperation::Earn => "points_earned",
            crate::models::LedgerOperation::Redeem => "points_redeemed",
            crate::models::LedgerOperation::Transfer => "points_transferred",
        };

        let entry = AuditLogEntry {
            timestamp: receipt.created_at.timestamp(),
            event_type: event_type.to_string(),
            account_id: Some(receipt.account_id),
            correlation_id: Some(receipt.correlation_id),
            details: serde_json::json!({
                "points": receipt.points,
                "balance_after": receipt.balance_after,
                "counterparty_account_id": receipt.counterparty_account_id,
                "coffee_shop_id": receipt.coffee_shop_id,
                "idempotency_key": receipt.idempotency_key,
            }),
        };

        self.log(entry).await
    }

    /// Log account registration
    pub async fn log_account_opened(&self, account: &Account, email: &str) -> AppResult<()> {
        let entry = AuditLogEntry {
            timestamp: chrono::Utc::now().timestamp(),
            event_type: "account_opened".to_string(),
            account_id: Some(account.user_id),
            correlation_id: None,
            details: serde_json::json!({
                "email": email,
                "community_id": account.community_id,
            }),
        };

        self.log(entry).await
    }

    /// Log account deactivation, recording the balance left behind
    pub async fn log_account_deactivated(&self, account: &Account) -> AppResult<()> {
        let entry = AuditLogEntry {
            timestamp: chrono::Utc::now().timestamp(),
            event_type: "account_deactivated".to_string(),
            account_id: Some(account.user_id),
            correlation_id: None,
            details: serde_json::json!({
                "balance": account.balance,
                "version": account.version,
            }),
        };

        self.log(entry).await
    }

    /// Log a friend request being accepted or declined
    pub async fn log_friend_request_resolved(&self, request: &FriendRequest) -> AppResult<()> {
        let entry = AuditLogEntry {
            timestamp: chrono::Utc::now().timestamp(),
            event_type: "friend_request_resolved".to_string(),
            account_id: Some(request.to_user_id),
            correlation_id: Some(request.id),
            details: serde_json::json!({
                "from_user_id": request.from_user_id,
                "status": request.status.as_str(),
            }),
        };

        self.log(entry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LedgerOperation;

    #[tokio::test]
    async fn test_receipts_are_appended_as_json_lines() {
        let dir = std::env::temp_dir().join(format!("cuppy-audit-{}", Uuid::new_v4()));
        let audit = AuditTrailService::new(&dir).unwrap();

        let receipt = LedgerReceipt {
            operation: LedgerOperation::Redeem,
            account_id: Uuid::new_v4(),
            correlation_id: Uuid::new_v4(),
            points: 40,
            balance_after: 60,
            counterparty_account_id: None,
            coffee_shop_id: Some("shop1".to_string()),
            idempotency_key: "redeem-1".to_string(),
            created_at: chrono::Utc::now(),
        };
        audit.log_ledger_receipt(&receipt).await.unwrap();
        audit.log_ledger_receipt(&receipt).await.unwrap();

        let contents = std::fs::read_to_string(audit.path()).unwrap();
        let lines: Vec<AuditLogEntry> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].event_type, "points_redeemed");
        assert_eq!(lines[0].details["balance_after"], 60);

        std::fs::remove_dir_all(dir).ok();
    }
}
