use crate::auth::{self, TokenManager};
use crate::error::{AppError, AppResult};
use crate::models::{NewUser, UserProfile};
use crate::repositories::{AccountRepository, CatalogRepository, FriendRepository};
use crate::services::AuditTrailService;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const MAX_NAME_LEN: usize = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(alias = "communityId")]
    pub community_id: String,
    #[serde(default, alias = "profileImageUrl")]
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

/// Profile plus a bearer token for subsequent requests
#[derive(Debug, Clone, Serialize)]
pub struct AuthResponse {
    pub user: UserProfile,
    pub token: String,
    pub expires_in: u64,
}

/// Registration, sign-in and account lifecycle
pub struct AccountService {
    accounts: Arc<dyn AccountRepository>,
    friends: Arc<dyn FriendRepository>,
    catalog: Arc<dyn CatalogRepository>,
    tokens: Arc<TokenManager>,
    audit: Option<Arc<AuditTrailService>>,
}

impl AccountService {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        friends: Arc<dyn FriendRepository>,
        catalog: Arc<dyn CatalogRepository>,
        tokens: Arc<TokenManager>,
        audit: Option<Arc<AuditTrailService>>,
    ) -> Self {
        Self {
            accounts,
            friends,
            catalog,
            tokens,
            audit,
        }
    }

    /// Create a user with an empty account and sign them in
    pub async fn register(&self, request: RegisterRequest) -> AppResult<AuthResponse> {
        let name = request.name.trim();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(AppError::Validation(format!(
                "name must be 1 to {} characters",
                MAX_NAME_LEN
            )));
        }

        let email = normalize_email(&request.email)?;

        if self.catalog.find_community(&request.community_id).await?.is_none() {
            return Err(AppError::Validation(format!(
                "unknown community {}",
                request.community_id
            )));
        }

        let password_hash = auth::hash_password(&request.password)?;

        let (user, account) = self
            .accounts
            .create_user(NewUser {
                name: name.to_string(),
                email,
                profile_image_url: request.profile_image_url.filter(|url| !url.trim().is_empty()),
                community_id: request.community_id,
                password_hash,
            })
            .await?;

        info!("Registered user {} in community {}", user.id, user.community_id);

        if let Some(audit) = &self.audit {
            if let Err(e) = audit.log_account_opened(&account, &user.email).await {
                warn!("Failed to write audit entry for user {}: {}", user.id, e);
            }
        }

        let token = self.tokens.issue(user.id, &user.email)?;
        Ok(AuthResponse {
            user: UserProfile::new(user, &account, Vec::new()),
            token,
            expires_in: self.tokens.expiry_secs(),
        })
    }

    pub async fn sign_in(&self, request: SignInRequest) -> AppResult<AuthResponse> {
        let invalid = || AppError::Unauthorized("Invalid email or password".to_string());

        let email = request.email.trim().to_lowercase();
        let user = self
            .accounts
            .find_user_by_email(&email)
            .await?
            .ok_or_else(invalid)?;

        if !auth::verify_password(&request.password, &user.password_hash) {
            return Err(invalid());
        }

        let account = self
            .accounts
            .get_account(user.id)
            .await?
            .filter(|a| a.is_active)
            .ok_or_else(|| AppError::Unauthorized("Account is deactivated".to_string()))?;

        let friends = self.friends.friend_ids(user.id).await?;
        let token = self.tokens.issue(user.id, &user.email)?;

        info!("User {} signed in", user.id);
        Ok(AuthResponse {
            user: UserProfile::new(user, &account, friends),
            token,
            expires_in: self.tokens.expiry_secs(),
        })
    }

    pub async fn profile(&self, user_id: Uuid) -> AppResult<UserProfile> {
        let user = self
            .accounts
            .find_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {}", user_id)))?;
        let account = self
            .accounts
            .get_account(user_id)
            .await?
            .filter(|a| a.is_active)
            .ok_or_else(|| AppError::NotFound(format!("account {}", user_id)))?;
        let friends = self.friends.friend_ids(user_id).await?;

        Ok(UserProfile::new(user, &account, friends))
    }

    /// Close the account; its entries stay on the ledger
    pub async fn deactivate(&self, user_id: Uuid) -> AppResult<()> {
        let account = self.accounts.deactivate(user_id).await?;
        info!("Deactivated account {} (balance {})", user_id, account.balance);

        if let Some(audit) = &self.audit {
            if let Err(e) = audit.log_account_deactivated(&account).await {
                warn!("Failed to write audit entry for account {}: {}", user_id, e);
            }
        }
        Ok(())
    }
}

/// Trim and lowercase an email, rejecting obviously malformed ones
fn normalize_email(email: &str) -> AppResult<String> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    };

    if !valid || email.chars().any(char::is_whitespace) {
        return Err(AppError::Validation(format!("invalid email address: {}", email)));
    }
    Ok(email)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  John@Example.COM ").unwrap(), "john@example.com");
        assert!(normalize_email("john").is_err());
        assert!(normalize_email("@example.com").is_err());
        assert!(normalize_email("john@localhost").is_err());
        assert!(normalize_email("jo hn@example.com").is_err());
    }
}
