use super::FriendRepository;
use crate::error::RepositoryError;
use crate::models::{ordered_pair, FriendRequest, FriendRequestStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const REQUEST_COLUMNS: &str = "id, from_user_id, to_user_id, status, created_at, responded_at";

#[derive(FromRow)]
struct FriendRequestRow {
    id: Uuid,
    from_user_id: Uuid,
    to_user_id: Uuid,
    status: String,
    created_at: DateTime<Utc>,
    responded_at: Option<DateTime<Utc>>,
}

impl TryFrom<FriendRequestRow> for FriendRequest {
    type Error = RepositoryError;

    fn try_from(row: FriendRequestRow) -> Result<Self, Self::Error> {
        let status = FriendRequestStatus::from_str(&row.status).ok_or_else(|| {
            RepositoryError::Corrupt(format!("friend request {} has status {}", row.id, row.status))
        })?;

        Ok(FriendRequest {
            id: row.id,
            from_user_id: row.from_user_id,
            to_user_id: row.to_user_id,
            status,
            created_at: row.created_at,
            responded_at: row.responded_at,
        })
    }
}

/// Repository for friend requests and friendships
pub struct PgFriendRepository {
    pool: PgPool,
}

impl PgFriendRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FriendRepository for PgFriendRepository {
    async fn create_request(&self, request: FriendRequest) -> Result<FriendRequest, RepositoryError> {
        // The partial unique index on the unordered pair rejects a second pending request
        let row = sqlx::query_as::<_, FriendRequestRow>(&format!(
            r#"
            INSERT INTO friend_requests (id, from_user_id, to_user_id, status, created_at)
            VALUES ($1, $2, $3, 'pending', $4)
            RETURNING {}
            "#,
            REQUEST_COLUMNS
        ))
        .bind(request.id)
        .bind(request.from_user_id)
        .bind(request.to_user_id)
        .bind(request.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match RepositoryError::from(e) {
            RepositoryError::Duplicate(_) => RepositoryError::Duplicate(
                "a pending friend request already exists for this pair".to_string(),
            ),
            other => other,
        })?;

        row.try_into()
    }

    async fn find_request(&self, id: Uuid) -> Result<Option<FriendRequest>, RepositoryError> {
        let row = sqlx::query_as::<_, FriendRequestRow>(&format!(
            "SELECT {} FROM friend_requests WHERE id = $1",
            REQUEST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(FriendRequest::try_from).transpose()
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

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, FriendRequestRow>(&format!(
            r#"
            UPDATE friend_requests
            SET status = $2, responded_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING {}
            "#,
            REQUEST_COLUMNS
        ))
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("pending friend request {}", id)))?;

        let resolved = FriendRequest::try_from(row)?;

        if status == FriendRequestStatus::Accepted {
            let (low, high) = resolved.pair();
            sqlx::query(
                r#"
                INSERT INTO friendships (user_low, user_high)
                VALUES ($1, $2)
                ON CONFLICT (user_low, user_high) DO NOTHING
                "#,
            )
            .bind(low)
            .bind(high)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(resolved)
    }

    async fn pending_requests(&self, user_id: Uuid) -> Result<Vec<FriendRequest>, RepositoryError> {
        let rows = sqlx::query_as::<_, FriendRequestRow>(&format!(
            r#"
            SELECT {}
            FROM friend_requests
            WHERE status = 'pending' AND (from_user_id = $1 OR to_user_id = $1)
            ORDER BY created_at DESC
            "#,
            REQUEST_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(FriendRequest::try_from).collect()
    }

    async fn are_friends(&self, a: Uuid, b: Uuid) -> Result<bool, RepositoryError> {
        let (low, high) = ordered_pair(a, b);
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM friendships WHERE user_low = $1 AND user_high = $2)",
        )
        .bind(low)
        .bind(high)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn friend_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>, RepositoryError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT CASE WHEN user_low = $1 THEN user_high ELSE user_low END
            FROM friendships
            WHERE user_low = $1 OR user_high = $1
            ORDER BY created_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }
}
