use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Registered Cuppy user, identified by email
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub profile_image_url: Option<String>,
    pub community_id: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Input for registering a user and opening their points account
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub profile_image_url: Option<String>,
    pub community_id: String,
    pub password_hash: String,
}

impl User {
    /// Build a user record from registration input
    pub fn from_new(new_user: NewUser) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: new_user.name,
            email: new_user.email,
            profile_image_url: new_user.profile_image_url,
            community_id: new_user.community_id,
            password_hash: new_user.password_hash,
            created_at: Utc::now(),
        }
    }
}

/// User as seen by the mobile client: profile plus current points and friends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub profile_image_url: Option<String>,
    pub community_id: String,
    pub points: i64,
    pub friends: Vec<Uuid>,
    pub join_date: DateTime<Utc>,
    pub is_active: bool,
}

impl UserProfile {
    pub fn new(user: User, account: &super::Account, friends: Vec<Uuid>) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            profile_image_url: user.profile_image_url,
            community_id: user.community_id,
            points: account.balance,
            friends,
            join_date: user.created_at,
            is_active: account.is_active,
        }
    }
}
