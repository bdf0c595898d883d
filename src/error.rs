use crate::database::DatabaseError;
use sqlx::Error as SqlxError;
use thiserror::Error;

/// Application-level error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Amount is zero, negative, or overflows a balance
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Debit larger than the current balance
    #[error("Insufficient balance: available {available}, required {required}")]
    InsufficientBalance { available: i64, required: i64 },

    /// Sender and receiver are the same account
    #[error("Cannot transfer points to yourself")]
    SelfTransfer,

    /// A pending friend request (or friendship) already links the pair
    #[error("Duplicate request: {0}")]
    DuplicateRequest(String),

    /// Not found errors
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Unauthorized access errors
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Optimistic version mismatch; the caller may retry
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Transient infrastructure failure; retry with backoff
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Unique resource already exists (e.g. email)
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database errors
    #[error("SQL error: {0}")]
    Sqlx(#[from] SqlxError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Message(String),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Get HTTP status code for the error
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::InvalidAmount(_) | AppError::SelfTransfer | AppError::Validation(_) => 400,
            AppError::Unauthorized(_) => 401,
            AppError::NotFound(_) => 404,
            AppError::DuplicateRequest(_) | AppError::Conflict(_) | AppError::AlreadyExists(_) => 409,
            AppError::InsufficientBalance { .. } => 422,
            AppError::Unavailable(_) => 503,
            _ => 500,
        }
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidAmount(_) => "invalid_amount",
            AppError::InsufficientBalance { .. } => "insufficient_balance",
            AppError::SelfTransfer => "self_transfer",
            AppError::DuplicateRequest(_) => "duplicate_request",
            AppError::NotFound(_) => "not_found",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Conflict(_) => "conflict",
            AppError::Unavailable(_) => "unavailable",
            AppError::AlreadyExists(_) => "already_exists",
            AppError::Validation(_) => "validation_error",
            _ => "internal_error",
        }
    }

    /// Internal errors whose details must not reach the caller
    pub fn is_internal(&self) -> bool {
        self.status_code() >= 500 && !matches!(self, AppError::Unavailable(_))
    }
}

/// Repository-specific error types
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Database query error
    #[error("Query error: {0}")]
    Query(SqlxError),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Duplicate record
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// Constraint violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Stored version no longer matches the expected one
    #[error("Version conflict on account {0}")]
    VersionConflict(uuid::Uuid),

    /// Connection pool exhausted, closed, or network failure
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Stored value could not be decoded
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(msg) => AppError::NotFound(msg),
            RepositoryError::Query(e) => AppError::Sqlx(e),
            RepositoryError::Duplicate(msg) => AppError::AlreadyExists(msg),
            RepositoryError::ConstraintViolation(msg) => AppError::Validation(msg),
            RepositoryError::InvalidInput(msg) => AppError::Validation(msg),
            RepositoryError::VersionConflict(id) => {
                AppError::Conflict(format!("account {} was modified concurrently", id))
            }
            RepositoryError::Unavailable(msg) => AppError::Unavailable(msg),
            RepositoryError::Corrupt(msg) => AppError::Message(format!("Corrupt record: {}", msg)),
        }
    }
}

impl From<SqlxError> for RepositoryError {
    fn from(err: SqlxError) -> Self {
        match &err {
            SqlxError::RowNotFound => RepositoryError::NotFound("Record not found".to_string()),
            SqlxError::PoolTimedOut | SqlxError::PoolClosed | SqlxError::Io(_) => {
                RepositoryError::Unavailable(err.to_string())
            }
            SqlxError::Database(db_err) => {
                // Check for common PostgreSQL error codes
                let code = db_err.code().map(|c| c.to_string());
                match code.as_deref() {
                    // Unique violation
                    Some("23505") => RepositoryError::Duplicate(db_err.message().to_string()),
                    // Foreign key and check violations
                    Some("23503") | Some("23514") => {
                        RepositoryError::ConstraintViolation(db_err.message().to_string())
                    }
                    // Serialization failure and deadlock
                    Some("40001") | Some("40P01") => {
                        RepositoryError::Unavailable(db_err.message().to_string())
                    }
                    _ => RepositoryError::Query(err),
                }
            }
            _ => RepositoryError::Query(err),
        }
    }
}
