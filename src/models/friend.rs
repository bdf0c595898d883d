use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a friend request; both non-pending states are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FriendRequestStatus {
    Pending,
    Accepted,
    Declined,
}

impl FriendRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "declined" => Some(Self::Declined),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendRequest {
    pub id: Uuid,
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
    pub status: FriendRequestStatus,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl FriendRequest {
    pub fn new(from_user_id: Uuid, to_user_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            from_user_id,
            to_user_id,
            status: FriendRequestStatus::Pending,
            created_at: Utc::now(),
            responded_at: None,
        }
    }

    pub fn involves(&self, user_id: Uuid) -> bool {
        self.from_user_id == user_id || self.to_user_id == user_id
    }

    /// Unordered pair key; `(a, b)` and `(b, a)` map to the same value
    pub fn pair(&self) -> (Uuid, Uuid) {
        ordered_pair(self.from_user_id, self.to_user_id)
    }
}

/// Order two user ids so the smaller comes first
pub fn ordered_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Which side of pending requests to list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestDirection {
    Incoming,
    Outgoing,
    #[default]
    All,
}

impl RequestDirection {
    pub fn matches(&self, request: &FriendRequest, user_id: Uuid) -> bool {
        match self {
            Self::Incoming => request.to_user_id == user_id,
            Self::Outgoing => request.from_user_id == user_id,
            Self::All => request.involves(user_id),
        }
    }
}

/// Friend as listed to the mobile client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub profile_image_url: Option<String>,
    pub points: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_conversion() {
        assert_eq!(FriendRequestStatus::Pending.as_str(), "pending");
        assert_eq!(
            FriendRequestStatus::from_str("declined"),
            Some(FriendRequestStatus::Declined)
        );
        assert!(FriendRequestStatus::Accepted.is_terminal());
        assert!(!FriendRequestStatus::Pending.is_terminal());
    }

    #[test]
    fn test_pair_is_unordered() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(FriendRequest::new(a, b).pair(), FriendRequest::new(b, a).pair());
    }

    #[test]
    fn test_direction_filter() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let incoming = FriendRequest::new(other, me);
        assert!(RequestDirection::Incoming.matches(&incoming, me));
        assert!(!RequestDirection::Outgoing.matches(&incoming, me));
        assert!(RequestDirection::All.matches(&incoming, me));
    }
}
