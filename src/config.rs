//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//!
//! # Coordination Store
//!
//! - `STORE_BACKEND`: `redis` (default) or `memory` (single process only)
//! - `REDIS_URL`: Redis connection URL (default: `redis://127.0.0.1:6379/`)
//! - `STORE_COMMAND_TIMEOUT_MS`: Upper bound per store command (default: 2000)
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_MAX_TOKENS`: Bucket capacity per workspace (default: 100, 0 = disabled)
//! - `RATE_LIMIT_REFILL_RATE`: Tokens per second (default: 10.0)
//! - `RATE_LIMIT_FAIL_OPEN`: Admit requests when the store is down (default: false)
//!
//! # Idempotency
//!
//! - `IDEMPOTENCY_LOCK_TTL_SECS` / `IDEMPOTENCY_RESULT_TTL_SECS`: record lifetimes
//! - `IDEMPOTENCY_DUPLICATE_WAIT_MS`: wait before re-checking an in-flight duplicate
//!
//! # Security Configuration
//!
//! - `ADMIN_API_KEY`: When set, mounts `/admin` routes guarded by `X-Admin-Key`
//! - `CORS_ALLOWED_ORIGINS`: Comma-separated list of allowed origins (default: `*` for dev)

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::idempotency::IdempotencyConfig;
use crate::limiter::RateLimiterConfig;

/// Which [`crate::store::Store`] adapter backs coordination state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown backend '{other}' (expected redis or memory)")),
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::Redis => f.write_str("redis"),
            StoreBackend::Memory => f.write_str("memory"),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}' (expected text or json)")),
        }
    }
}

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    // =========================================================================
    // Coordination Store Configuration
    // =========================================================================
    pub store_backend: StoreBackend,

    /// Redis connection URL, used when `store_backend` is `Redis`
    pub redis_url: String,

    /// Timeout for a single store command (default: 2 seconds)
    pub store_command_timeout: Duration,

    /// Interval for background store health probes (default: 15 seconds)
    pub health_check_interval: Duration,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Bucket capacity per workspace (default: 100)
    /// Set to 0 to disable rate limiting
    pub rate_limit_max_tokens: u32,

    /// Tokens added per second (default: 10.0)
    pub rate_limit_refill_rate: f64,

    /// Idle bucket eviction horizon (default: 1 hour)
    pub rate_limit_ttl: Duration,

    /// Store key namespace for buckets
    pub rate_limit_prefix: String,

    /// Admit requests when the limiter cannot reach the store (default: false)
    pub rate_limit_fail_open: bool,

    // =========================================================================
    // Idempotency Configuration
    // =========================================================================
    /// Store key namespace for locks and results
    pub idempotency_prefix: String,

    /// Lifetime of an unreleased lock (default: 5 minutes)
    pub idempotency_lock_ttl: Duration,

    /// Lifetime of a stored result (default: 24 hours)
    pub idempotency_result_ttl: Duration,

    /// Wait before re-checking an in-flight duplicate (default: 250ms)
    pub idempotency_duplicate_wait: Duration,

    // =========================================================================
    // Request Limits Configuration
    // =========================================================================
    /// Maximum request body size in bytes (default: 1MB)
    pub max_request_body_size: usize,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// Admin API key. When unset the admin routes are not mounted.
    pub admin_api_key: Option<String>,

    /// Allowed CORS origins; `*` allows all (not recommended for production)
    pub cors_allowed_origins: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    pub log_format: LogFormat,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("store_backend", &self.store_backend)
            .field("store_command_timeout", &self.store_command_timeout)
            .field("rate_limit_max_tokens", &self.rate_limit_max_tokens)
            .field("rate_limit_refill_rate", &self.rate_limit_refill_rate)
            .field("rate_limit_fail_open", &self.rate_limit_fail_open)
            .field("idempotency_lock_ttl", &self.idempotency_lock_ttl)
            .field("idempotency_result_ttl", &self.idempotency_result_ttl)
            .field("admin_enabled", &self.admin_enabled())
            .field("metrics_port", &self.metrics_port)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any configuration is invalid
    /// (e.g., non-numeric PORT value, non-positive refill rate).
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,

            // Store
            store_backend: Self::parse_env("STORE_BACKEND", StoreBackend::Redis)?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379/".to_string()),
            store_command_timeout: Duration::from_millis(Self::parse_env(
                "STORE_COMMAND_TIMEOUT_MS",
                2000,
            )?),
            health_check_interval: Duration::from_secs(Self::parse_env(
                "HEALTH_CHECK_INTERVAL_SECS",
                15,
            )?),

            // Rate limiting
            rate_limit_max_tokens: Self::parse_env("RATE_LIMIT_MAX_TOKENS", 100)?,
            rate_limit_refill_rate: Self::parse_env("RATE_LIMIT_REFILL_RATE", 10.0)?,
            rate_limit_ttl: Duration::from_secs(Self::parse_env("RATE_LIMIT_TTL_SECS", 3600)?),
            rate_limit_prefix: env::var("RATE_LIMIT_PREFIX")
                .unwrap_or_else(|_| "ratelimit:".to_string()),
            rate_limit_fail_open: Self::parse_env("RATE_LIMIT_FAIL_OPEN", false)?,

            // Idempotency
            idempotency_prefix: env::var("IDEMPOTENCY_PREFIX")
                .unwrap_or_else(|_| "idempotency:".to_string()),
            idempotency_lock_ttl: Duration::from_secs(Self::parse_env(
                "IDEMPOTENCY_LOCK_TTL_SECS",
                300,
            )?),
            idempotency_result_ttl: Duration::from_secs(Self::parse_env(
                "IDEMPOTENCY_RESULT_TTL_SECS",
                86_400,
            )?),
            idempotency_duplicate_wait: Duration::from_millis(Self::parse_env(
                "IDEMPOTENCY_DUPLICATE_WAIT_MS",
                250,
            )?),

            // Request limits
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 1024 * 1024)?, // 1MB

            // Security
            admin_api_key: env::var("ADMIN_API_KEY").ok().filter(|k| !k.is_empty()),
            cors_allowed_origins: Self::parse_cors_origins(),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format: Self::parse_env("LOG_FORMAT", LogFormat::Text)?,
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if self.rate_limiting_enabled()
            && !(self.rate_limit_refill_rate.is_finite() && self.rate_limit_refill_rate > 0.0)
        {
            return Err(AppError::ConfigError(format!(
                "RATE_LIMIT_REFILL_RATE must be a positive number (got {})",
                self.rate_limit_refill_rate
            )));
        }

        if self.rate_limit_ttl.is_zero() {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_TTL_SECS must be greater than 0".to_string(),
            ));
        }

        if self.idempotency_lock_ttl.is_zero() || self.idempotency_result_ttl.is_zero() {
            return Err(AppError::ConfigError(
                "IDEMPOTENCY_LOCK_TTL_SECS and IDEMPOTENCY_RESULT_TTL_SECS must be greater than 0"
                    .to_string(),
            ));
        }

        // A result that expires before its lock would let a retry re-execute
        // while the key still looks locked to everyone else.
        if self.idempotency_result_ttl < self.idempotency_lock_ttl {
            return Err(AppError::ConfigError(format!(
                "IDEMPOTENCY_RESULT_TTL_SECS ({:?}) must be >= IDEMPOTENCY_LOCK_TTL_SECS ({:?})",
                self.idempotency_result_ttl, self.idempotency_lock_ttl
            )));
        }

        if self.idempotency_duplicate_wait >= self.idempotency_lock_ttl {
            return Err(AppError::ConfigError(
                "IDEMPOTENCY_DUPLICATE_WAIT_MS must be shorter than the lock TTL".to_string(),
            ));
        }

        if self.store_command_timeout.is_zero() {
            return Err(AppError::ConfigError(
                "STORE_COMMAND_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        if self.health_check_interval.is_zero() {
            return Err(AppError::ConfigError(
                "HEALTH_CHECK_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if rate limiting is enabled.
    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit_max_tokens > 0
    }

    /// Check if the admin routes are mounted.
    pub fn admin_enabled(&self) -> bool {
        self.admin_api_key.is_some()
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from((
                [0, 0, 0, 0],
                self.metrics_port,
            )))
        } else {
            None
        }
    }

    /// Limiter settings for the workspace rate limit.
    pub fn rate_limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig::new(self.rate_limit_max_tokens, self.rate_limit_refill_rate)
            .with_ttl(self.rate_limit_ttl)
            .with_prefix(self.rate_limit_prefix.clone())
    }

    /// Coordinator settings for email idempotency.
    pub fn idempotency_config(&self) -> IdempotencyConfig {
        IdempotencyConfig {
            prefix: self.idempotency_prefix.clone(),
            lock_ttl: self.idempotency_lock_ttl,
            result_ttl: self.idempotency_result_ttl,
        }
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse CORS allowed origins from environment variable.
    fn parse_cors_origins() -> Vec<String> {
        env::var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 3000,
            // Store
            store_backend: StoreBackend::Redis,
            redis_url: "redis://127.0.0.1:6379/".to_string(),
            store_command_timeout: Duration::from_secs(2),
            health_check_interval: Duration::from_secs(15),
            // Rate limiting
            rate_limit_max_tokens: 100,
            rate_limit_refill_rate: 10.0,
            rate_limit_ttl: Duration::from_secs(3600),
            rate_limit_prefix: "ratelimit:".to_string(),
            rate_limit_fail_open: false,
            // Idempotency
            idempotency_prefix: "idempotency:".to_string(),
            idempotency_lock_ttl: Duration::from_secs(300),
            idempotency_result_ttl: Duration::from_secs(86_400),
            idempotency_duplicate_wait: Duration::from_millis(250),
            // Request limits
            max_request_body_size: 1024 * 1024, // 1MB
            // Security
            admin_api_key: None,
            cors_allowed_origins: vec!["*".to_string()],
            // Observability
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            metrics_port: 9090,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.store_backend, StoreBackend::Redis);
        assert_eq!(config.rate_limit_max_tokens, 100);
        assert_eq!(config.max_request_body_size, 1024 * 1024);
        assert!(!config.rate_limit_fail_open);
        assert!(config.admin_api_key.is_none());
    }

    #[test]
    fn test_server_addr_format() {
        let config = Config {
            host: "localhost".to_string(),
            port: 3000,
            ..Config::default()
        };

        assert_eq!(config.server_addr(), "localhost:3000");
    }

    #[test]
    fn test_rate_limiting_enabled() {
        let config = Config::default();
        assert!(config.rate_limiting_enabled());

        let config = Config {
            rate_limit_max_tokens: 0,
            ..Config::default()
        };
        assert!(!config.rate_limiting_enabled());
    }

    #[test]
    fn test_admin_enabled() {
        let config = Config::default();
        assert!(!config.admin_enabled());

        let config = Config {
            admin_api_key: Some("secret-key".to_string()),
            ..Config::default()
        };
        assert!(config.admin_enabled());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = Config {
            admin_api_key: Some("super-secret".to_string()),
            redis_url: "redis://:hunter2@cache:6379/".to_string(),
            ..Config::default()
        };

        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("admin_enabled: true"));
    }

    #[test]
    fn test_store_backend_parsing() {
        assert_eq!("redis".parse::<StoreBackend>().unwrap(), StoreBackend::Redis);
        assert_eq!(" Memory ".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("postgres".parse::<StoreBackend>().is_err());
        assert_eq!(StoreBackend::Memory.to_string(), "memory");
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_validate_refill_rate() {
        for rate in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let config = Config {
                rate_limit_refill_rate: rate,
                ..Config::default()
            };
            let result = config.validate();
            assert!(
                result
                    .unwrap_err()
                    .to_string()
                    .contains("RATE_LIMIT_REFILL_RATE")
            );
        }
    }

    #[test]
    fn test_refill_rate_ignored_when_disabled() {
        let config = Config {
            rate_limit_max_tokens: 0,
            rate_limit_refill_rate: 0.0,
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_ttl_ordering() {
        let config = Config {
            idempotency_lock_ttl: Duration::from_secs(600),
            idempotency_result_ttl: Duration::from_secs(60),
            ..Config::default()
        };

        let result = config.validate();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("IDEMPOTENCY_RESULT_TTL_SECS")
        );
    }

    #[test]
    fn test_validate_zero_timeout() {
        let config = Config {
            store_command_timeout: Duration::ZERO,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_component_configs() {
        let config = Config {
            rate_limit_prefix: "rl:".to_string(),
            idempotency_prefix: "idem:".to_string(),
            ..Config::default()
        };

        let limiter = config.rate_limiter_config();
        assert_eq!(limiter.max_tokens, 100);
        assert_eq!(limiter.prefix, "rl:");

        let idempotency = config.idempotency_config();
        assert_eq!(idempotency.prefix, "idem:");
        assert_eq!(idempotency.lock_ttl, Duration::from_secs(300));
    }
}
