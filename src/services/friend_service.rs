use crate::error::{AppError, AppResult};
use crate::models::{FriendRequest, FriendRequestStatus, FriendSummary, RequestDirection};
use crate::repositories::{AccountRepository, FriendRepository};
use crate::services::AuditTrailService;
use crate::websocket::{WebSocketServer, WsMessage};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// One row of the friends ranking
#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    #[serde(flatten)]
    pub friend: FriendSummary,
    pub is_caller: bool,
}

/// Service for friend requests and friendships
pub struct FriendService {
    friends: Arc<dyn FriendRepository>,
    accounts: Arc<dyn AccountRepository>,
    notifier: Arc<WebSocketServer>,
    audit: Option<Arc<AuditTrailService>>,
}

impl FriendService {
    pub fn new(
        friends: Arc<dyn FriendRepository>,
        accounts: Arc<dyn AccountRepository>,
        notifier: Arc<WebSocketServer>,
        audit: Option<Arc<AuditTrailService>>,
    ) -> Self {
        Self {
            friends,
            accounts,
            notifier,
            audit,
        }
    }

    /// Ask `to_user_id` to become friends
    pub async fn send_request(&self, from_user_id: Uuid, to_user_id: Uuid) -> AppResult<FriendRequest> {
        if from_user_id == to_user_id {
            return Err(AppError::Validation(
                "cannot send a friend request to yourself".to_string(),
            ));
        }

        self.ensure_active(from_user_id).await?;
        self.ensure_active(to_user_id).await?;

        if self.friends.are_friends(from_user_id, to_user_id).await? {
            return Err(AppError::DuplicateRequest("already friends".to_string()));
        }

        let request = self
            .friends
            .create_request(FriendRequest::new(from_user_id, to_user_id))
            .await
            .map_err(|e| match AppError::from(e) {
                AppError::AlreadyExists(msg) => AppError::DuplicateRequest(msg),
                other => other,
            })?;

        info!(
            "Friend request {} sent from {} to {}",
            request.id, from_user_id, to_user_id
        );

        self.notifier
            .broadcast_to_user(
                to_user_id,
                WsMessage::FriendRequestReceived {
                    request_id: request.id,
                    from_user_id,
                },
            )
            .await;

        Ok(request)
    }

    /// Accept or decline a pending request addressed to `user_id`
    pub async fn respond_to_request(
        &self,
        user_id: Uuid,
        request_id: Uuid,
        accept: bool,
    ) -> AppResult<FriendRequest> {
        self.ensure_active(user_id).await?;

        let request = self
            .friends
            .find_request(request_id)
            .await?
            .filter(|r| r.status == FriendRequestStatus::Pending && r.involves(user_id))
            .ok_or_else(|| AppError::NotFound(format!("pending friend request {}", request_id)))?;

        if request.to_user_id != user_id {
            return Err(AppError::Unauthorized(
                "only the recipient can respond to a friend request".to_string(),
            ));
        }

        let status = if accept {
            FriendRequestStatus::Accepted
        } else {
            FriendRequestStatus::Declined
        };
        let resolved = self.friends.resolve_request(request_id, status).await?;

        info!(
            "Friend request {} {} by {}",
            resolved.id,
            resolved.status.as_str(),
            user_id
        );

        self.notifier
            .broadcast_to_user(
                resolved.from_user_id,
                WsMessage::FriendRequestResolved {
                    request_id: resolved.id,
                    to_user_id: resolved.to_user_id,
                    accepted: accept,
                },
            )
            .await;

        if let Some(audit) = &self.audit {
            if let Err(e) = audit.log_friend_request_resolved(&resolved).await {
                warn!("Failed to write audit entry for request {}: {}", resolved.id, e);
            }
        }

        Ok(resolved)
    }

    /// Active friends ordered by name
    pub async fn list_friends(&self, user_id: Uuid) -> AppResult<Vec<FriendSummary>> {
        self.ensure_active(user_id).await?;
        let ids = self.friends.friend_ids(user_id).await?;
        let mut friends = self.summaries(&ids).await?;
        friends.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(friends)
    }

    pub async fn list_pending_requests(
        &self,
        user_id: Uuid,
        direction: RequestDirection,
    ) -> AppResult<Vec<FriendRequest>> {
        self.ensure_active(user_id).await?;
        let requests = self.friends.pending_requests(user_id).await?;
        Ok(requests
            .into_iter()
            .filter(|r| direction.matches(r, user_id))
            .collect())
    }

    /// The caller and their friends ranked by points, highest first
    pub async fn leaderboard(&self, user_id: Uuid) -> AppResult<Vec<LeaderboardEntry>> {
        self.ensure_active(user_id).await?;
        let mut ids = self.friends.friend_ids(user_id).await?;
        ids.push(user_id);

        let mut summaries = self.summaries(&ids).await?;
        summaries.sort_by(|a, b| b.points.cmp(&a.points).then_with(|| a.name.cmp(&b.name)));

        Ok(summaries
            .into_iter()
            .enumerate()
            .map(|(i, friend)| LeaderboardEntry {
                rank: i + 1,
                is_caller: friend.id == user_id,
                friend,
            })
            .collect())
    }

    async fn ensure_active(&self, user_id: Uuid) -> AppResult<()> {
        match self.accounts.get_account(user_id).await? {
            Some(account) if account.is_active => Ok(()),
            _ => Err(AppError::NotFound(format!("user {}", user_id))),
        }
    }

    async fn summaries(&self, ids: &[Uuid]) -> AppResult<Vec<FriendSummary>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let accounts: HashMap<Uuid, _> = self
            .accounts
            .get_accounts(ids)
            .await?
            .into_iter()
            .filter(|a| a.is_active)
            .map(|a| (a.user_id, a))
            .collect();

        let users = self.accounts.find_users(ids).await?;
        Ok(users
            .into_iter()
            .filter_map(|user| {
                let account = accounts.get(&user.id)?;
                Some(FriendSummary {
                    id: user.id,
                    name: user.name,
                    email: user.email,
                    profile_image_url: user.profile_image_url,
                    points: account.balance,
                })
            })
            .collect())
    }
}
