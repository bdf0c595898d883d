use super::AccountRepository;
use crate::error::RepositoryError;
use crate::models::{Account, NewUser, User};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

const USER_COLUMNS: &str =
    "id, name, email, profile_image_url, community_id, password_hash, created_at";
const ACCOUNT_COLUMNS: &str = "user_id, community_id, balance, version, is_active, updated_at";

/// Repository for users and their point accounts
pub struct PgAccountRepository {
    pool: PgPool,
}

impl PgAccountRepository {
    /// Create a new PgAccountRepository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    async fn create_user(&self, new_user: NewUser) -> Result<(User, Account), RepositoryError> {
        let user = User::from_new(new_user);
        let mut tx = self.pool.begin().await?;

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, name, email, profile_image_url, community_id, password_hash, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.profile_image_url)
        .bind(&user.community_id)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .fetch_one(&mut *tx)
        .await?;

        let account = sqlx::query_as::<_, Account>(&format!(
            r#"
            INSERT INTO accounts (user_id, community_id, balance, version, is_active)
            VALUES ($1, $2, 0, 0, TRUE)
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(user.id)
        .bind(&user.community_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok((user, account))
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE LOWER(email) = LOWER($1)",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_users(&self, ids: &[Uuid]) -> Result<Vec<User>, RepositoryError> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE id = ANY($1)",
            USER_COLUMNS
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    async fn get_account(&self, user_id: Uuid) -> Result<Option<Account>, RepositoryError> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM accounts WHERE user_id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    async fn get_accounts(&self, user_ids: &[Uuid]) -> Result<Vec<Account>, RepositoryError> {
        let accounts = sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM accounts WHERE user_id = ANY($1)",
            ACCOUNT_COLUMNS
        ))
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(accounts)
    }

    async fn deactivate(&self, user_id: Uuid) -> Result<Account, RepositoryError> {
        let updated = sqlx::query_as::<_, Account>(&format!(
            r#"
            UPDATE accounts
            SET is_active = FALSE, version = version + 1, updated_at = NOW()
            WHERE user_id = $1 AND is_active
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(account) => Ok(account),
            // Already inactive, or missing
            None => self
                .get_account(user_id)
                .await?
                .ok_or_else(|| RepositoryError::NotFound(format!("account {}", user_id))),
        }
    }
}
