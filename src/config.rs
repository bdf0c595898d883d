use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Read and parse an optional environment variable.
/// A set but unparsable value is an error.
fn env_opt<T: FromStr>(key: &str) -> Result<Option<T>, String> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| format!("Invalid {}: {}", key, value)),
        Err(_) => Ok(None),
    }
}

/// Read and parse an environment variable, using `default` only when unset
fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, String> {
    Ok(env_opt(key)?.unwrap_or(default))
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
    pub test_before_acquire: bool,
}

impl DatabaseConfig {
    /// Create database config from environment variables
    pub fn from_env() -> Result<Self, String> {
        let url = env::var("DATABASE_URL")
            .map_err(|_| "DATABASE_URL environment variable is required")?;

        let max_connections = env_or("DATABASE_MAX_CONNECTIONS", 10u32)?;
        let acquire_timeout_secs = env_or("DATABASE_ACQUIRE_TIMEOUT_SECS", 30u64)?;
        let idle_timeout_secs = env_or("DATABASE_IDLE_TIMEOUT_SECS", 600u64)?; // 10 minutes
        let max_lifetime_secs = env_or("DATABASE_MAX_LIFETIME_SECS", 1800u64)?; // 30 minutes
        let test_before_acquire = env_or("DATABASE_TEST_BEFORE_ACQUIRE", true)?;

        // Validate configuration
        if max_connections == 0 {
            return Err("DATABASE_MAX_CONNECTIONS must be greater than 0".to_string());
        }

        if acquire_timeout_secs == 0 {
            return Err("DATABASE_ACQUIRE_TIMEOUT_SECS must be greater than 0".to_string());
        }

        Ok(Self {
            url,
            max_connections,
            acquire_timeout_secs,
            idle_timeout_secs,
            max_lifetime_secs,
            test_before_acquire,
        })
    }

    /// Get acquire timeout as Duration
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// Get idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Get max lifetime as Duration
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/cuppy".to_string(),
            max_connections: 10,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
            test_before_acquire: true,
        }
    }
}

/// Where accounts, ledger and friend graph live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(format!(
                "Invalid STORAGE_BACKEND: {}. Must be one of: [\"postgres\", \"memory\"]",
                other
            )),
        }
    }
}

/// Bearer token settings
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_expiry_secs: u64,
}

impl AuthConfig {
    const DEV_SECRET: &'static str = "dev-mode-secret-not-for-production-use-123456";

    fn from_env(is_development: bool) -> Result<Self, String> {
        let jwt_secret = match env::var("JWT_SECRET") {
            Ok(secret) => secret,
            Err(_) if is_development => Self::DEV_SECRET.to_string(),
            Err(_) => return Err("JWT_SECRET is required outside development".to_string()),
        };

        if jwt_secret.len() < 32 {
            return Err("JWT_SECRET must be at least 32 characters".to_string());
        }

        let token_expiry_secs = env_or("JWT_EXPIRY_SECS", 3600u64)?;
        if token_expiry_secs == 0 {
            return Err("JWT_EXPIRY_SECS must be greater than 0".to_string());
        }

        Ok(Self {
            jwt_secret,
            token_expiry_secs,
        })
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: Self::DEV_SECRET.to_string(),
            token_expiry_secs: 3600,
        }
    }
}

/// Ledger engine tuning
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Commit attempts on version conflict before giving up with `Unavailable`
    pub max_commit_attempts: u32,
    /// Base backoff between attempts; attempt `n` waits `n * backoff`
    pub retry_backoff_ms: u64,
}

impl LedgerConfig {
    fn from_env() -> Result<Self, String> {
        let max_commit_attempts = env_or("LEDGER_MAX_COMMIT_ATTEMPTS", 5u32)?;
        let retry_backoff_ms = env_or("LEDGER_RETRY_BACKOFF_MS", 10u64)?;

        if max_commit_attempts == 0 {
            return Err("LEDGER_MAX_COMMIT_ATTEMPTS must be greater than 0".to_string());
        }

        Ok(Self {
            max_commit_attempts,
            retry_backoff_ms,
        })
    }

    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_commit_attempts: 5,
            retry_backoff_ms: 10,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub storage: StorageBackend,
    /// Only present for the postgres backend
    pub database: Option<DatabaseConfig>,
    pub auth: AuthConfig,
    pub ledger: LedgerConfig,
    pub log_level: String,
    pub log_json: bool,
    pub http_port: u16,
    pub ws_port: Option<u16>,
    pub request_timeout_secs: u64,
    pub catalog_cache_ttl_secs: u64,
    pub audit_log_dir: Option<PathBuf>,
    pub environment: String,
}

impl AppConfig {
    /// Create application config from environment variables
    pub fn from_env() -> Result<Self, String> {
        let environment = env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase();

        // Validate environment
        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&environment.as_str()) {
            return Err(format!(
                "Invalid ENVIRONMENT: {}. Must be one of: {:?}",
                environment, valid_environments
            ));
        }

        let storage = env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .parse::<StorageBackend>()?;

        let database = match storage {
            StorageBackend::Postgres => Some(DatabaseConfig::from_env()?),
            StorageBackend::Memory => None,
        };

        let log_level = env::var("LOG_LEVEL")
            .unwrap_or_else(|_| "info".to_string())
            .to_lowercase();

        // Validate log level
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&log_level.as_str()) {
            return Err(format!(
                "Invalid LOG_LEVEL: {}. Must be one of: {:?}",
                log_level, valid_log_levels
            ));
        }

        let log_json = match env::var("LOG_FORMAT").map(|f| f.to_lowercase()) {
            Ok(format) if format == "json" => true,
            Ok(format) if format == "text" => false,
            Ok(format) => return Err(format!("Invalid LOG_FORMAT: {}. Must be text or json", format)),
            Err(_) => false,
        };

        let http_port = env_or("HTTP_PORT", 8080u16)?;
        let ws_port = env_opt::<u16>("WS_PORT")?;

        let request_timeout_secs = env_or("REQUEST_TIMEOUT_SECS", 15u64)?;
        if request_timeout_secs == 0 {
            return Err("REQUEST_TIMEOUT_SECS must be greater than 0".to_string());
        }

        let catalog_cache_ttl_secs = env_or("CATALOG_CACHE_TTL_SECS", 60u64)?;
        let audit_log_dir = env::var("AUDIT_LOG_DIR").ok().map(PathBuf::from);

        let auth = AuthConfig::from_env(environment == "development")?;
        let ledger = LedgerConfig::from_env()?;

        Ok(Self {
            storage,
            database,
            auth,
            ledger,
            log_level,
            log_json,
            http_port,
            ws_port,
            request_timeout_secs,
            catalog_cache_ttl_secs,
            audit_log_dir,
            environment,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Check if running in development
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn catalog_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.catalog_cache_ttl_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageBackend::Memory,
            database: None,
            auth: AuthConfig::default(),
            ledger: LedgerConfig::default(),
            log_level: "info".to_string(),
            log_json: false,
            http_port: 8080,
            ws_port: None,
            request_timeout_secs: 15,
            catalog_cache_ttl_secs: 60,
            audit_log_dir: None,
            environment: "development".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_config_default() {
        let config = DatabaseConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.acquire_timeout_secs, 30);
    }

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.storage, StorageBackend::Memory);
        assert!(config.is_development());
        assert!(!config.is_production());
    }

    #[test]
    fn test_storage_backend_parse() {
        assert_eq!("postgres".parse::<StorageBackend>(), Ok(StorageBackend::Postgres));
        assert_eq!("MEMORY".parse::<StorageBackend>(), Ok(StorageBackend::Memory));
        assert!("redis".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn test_ledger_backoff_grows_linearly() {
        let config = LedgerConfig {
            max_commit_attempts: 3,
            retry_backoff_ms: 10,
        };
        assert_eq!(config.retry_backoff(1), Duration::from_millis(10));
        assert_eq!(config.retry_backoff(3), Duration::from_millis(30));
    }

    #[test]
    fn test_ledger_backoff_saturates() {
        let config = LedgerConfig {
            max_commit_attempts: 5,
            retry_backoff_ms: u64::MAX,
        };
        assert_eq!(config.retry_backoff(4), Duration::from_millis(u64::MAX));
    }

    // Each test uses its own variable so parallel tests never share state

    #[test]
    fn test_env_or_uses_default_when_unset() {
        env::remove_var("CUPPY_TEST_UNSET_NUMBER");
        assert_eq!(env_or("CUPPY_TEST_UNSET_NUMBER", 5u32), Ok(5));
        assert_eq!(env_opt::<u16>("CUPPY_TEST_UNSET_NUMBER"), Ok(None));
    }

    #[test]
    fn test_env_or_parses_set_value() {
        env::set_var("CUPPY_TEST_SET_NUMBER", " 42 ");
        assert_eq!(env_or("CUPPY_TEST_SET_NUMBER", 5u32), Ok(42));
    }

    #[test]
    fn test_unparsable_number_is_rejected() {
        env::set_var("CUPPY_TEST_BAD_NUMBER", "abc");
        let err = env_or("CUPPY_TEST_BAD_NUMBER", 5u32).unwrap_err();
        assert_eq!(err, "Invalid CUPPY_TEST_BAD_NUMBER: abc");
    }

    #[test]
    fn test_unparsable_bool_is_rejected() {
        env::set_var("CUPPY_TEST_BAD_BOOL", "yes");
        assert!(env_or("CUPPY_TEST_BAD_BOOL", true).is_err());
    }

    #[test]
    fn test_unparsable_optional_port_is_rejected() {
        env::set_var("CUPPY_TEST_BAD_PORT", "abc");
        assert!(env_opt::<u16>("CUPPY_TEST_BAD_PORT").is_err());
    }
}
