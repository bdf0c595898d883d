//! PostgreSQL ledger: compare-and-set balance updates plus append-only entries

use super::{EntryOrder, LedgerRepository};
use crate::error::RepositoryError;
use crate::models::{CommitOutcome, EntryKind, LedgerCommit, LedgerEntry, LedgerReceipt};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(FromRow)]
struct LedgerEntryRow {
    id: Uuid,
    account_id: Uuid,
    counterparty_account_id: Option<Uuid>,
    coffee_shop_id: Option<String>,
    kind: String,
    amount: i64,
    balance_after: i64,
    sequence: i64,
    correlation_id: Uuid,
    description: String,
    idempotency_key: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<LedgerEntryRow> for LedgerEntry {
    type Error = RepositoryError;

    fn try_from(row: LedgerEntryRow) -> Result<Self, Self::Error> {
        let kind = EntryKind::from_str(&row.kind).ok_or_else(|| {
            RepositoryError::Corrupt(format!("ledger entry {} has kind {}", row.id, row.kind))
        })?;

        Ok(LedgerEntry {
            id: row.id,
            account_id: row.account_id,
            counterparty_account_id: row.counterparty_account_id,
            coffee_shop_id: row.coffee_shop_id,
            kind,
            amount: row.amount,
            balance_after: row.balance_after,
            sequence: row.sequence,
            correlation_id: row.correlation_id,
            description: row.description,
            idempotency_key: row.idempotency_key,
            created_at: row.created_at,
        })
    }
}

pub struct PgLedgerRepository {
    pool: PgPool,
}

impl PgLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerRepository for PgLedgerRepository {
    async fn find_receipt(
        &self,
        account_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<LedgerReceipt>, RepositoryError> {
        let receipt = sqlx::query_scalar::<_, Json<LedgerReceipt>>(
            r#"
            SELECT receipt
            FROM ledger_receipts
            WHERE account_id = $1 AND idempotency_key = $2
            "#,
        )
        .bind(account_id)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(receipt.map(|Json(receipt)| receipt))
    }

    async fn commit(&self, commit: LedgerCommit) -> Result<CommitOutcome, RepositoryError> {
        let LedgerCommit {
            mut updates,
            entries,
            receipt,
        } = commit;

        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_scalar::<_, Json<LedgerReceipt>>(
            r#"
            SELECT receipt
            FROM ledger_receipts
            WHERE account_id = $1 AND idempotency_key = $2
            "#,
        )
        .bind(receipt.account_id)
        .bind(&receipt.idempotency_key)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(Json(existing)) = existing {
            return Ok(CommitOutcome::Replayed(existing));
        }

        // Row locks are taken in ascending account order
        updates.sort_by_key(|u| u.account_id);
        for update in &updates {
            let result = sqlx::query(
                r#"
                UPDATE accounts
                SET balance = $1, version = version + 1, updated_at = NOW()
                WHERE user_id = $2 AND version = $3 AND is_active
                "#,
            )
            .bind(update.new_balance)
            .bind(update.account_id)
            .bind(update.expected_version)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                // Dropping the transaction rolls back earlier updates
                return Err(RepositoryError::VersionConflict(update.account_id));
            }
        }

        for entry in &entries {
            sqlx::query(
                r#"
                INSERT INTO ledger_entries
                (id, account_id, counterparty_account_id, coffee_shop_id, kind, amount,
                 balance_after, sequence, correlation_id, description, idempotency_key, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(entry.id)
            .bind(entry.account_id)
            .bind(entry.counterparty_account_id)
            .bind(&entry.coffee_shop_id)
            .bind(entry.kind.as_str())
            .bind(entry.amount)
            .bind(entry.balance_after)
            .bind(entry.sequence)
            .bind(entry.correlation_id)
            .bind(&entry.description)
            .bind(&entry.idempotency_key)
            .bind(entry.created_at)
            .execute(&mut *tx)
            .await?;
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO ledger_receipts (account_id, idempotency_key, receipt, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (account_id, idempotency_key) DO NOTHING
            "#,
        )
        .bind(receipt.account_id)
        .bind(&receipt.idempotency_key)
        .bind(Json(&receipt))
        .bind(receipt.created_at)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            // A concurrent commit stored the same key first
            tx.rollback().await?;
            return self
                .find_receipt(receipt.account_id, &receipt.idempotency_key)
                .await?
                .map(CommitOutcome::Replayed)
                .ok_or(RepositoryError::VersionConflict(receipt.account_id));
        }

        tx.commit().await?;

        Ok(CommitOutcome::Applied(receipt))
    }

    async fn entries_for_account(
        &self,
        account_id: Uuid,
        order: EntryOrder,
        limit: Option<i64>,
    ) -> Result<Vec<LedgerEntry>, RepositoryError> {
        let direction = match order {
            EntryOrder::Oldest => "ASC",
            EntryOrder::Newest => "DESC",
        };

        let rows = sqlx::query_as::<_, LedgerEntryRow>(&format!(
            r#"
            SELECT id, account_id, counterparty_account_id, coffee_shop_id, kind, amount,
                   balance_after, sequence, correlation_id, description, idempotency_key, created_at
            FROM ledger_entries
            WHERE account_id = $1
            ORDER BY sequence {}
            LIMIT $2
            "#,
            direction
        ))
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LedgerEntry::try_from).collect()
    }
}
