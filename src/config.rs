//! Application configuration loaded from environment variables.
//!
//! Every option has a development default and can be overridden by the
//! process environment or a `.env` file in the working directory.
//! The pipeline is built once from a `Config`; changing it requires a rebuild.
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_ENABLED`: Per-client admission control on/off (default: true)
//! - `RATE_LIMIT_RPS`: Token refill rate per client (default: 100.0)
//! - `RATE_LIMIT_BURST`: Bucket capacity per client (default: 20)
//! - `RATE_LIMIT_SWEEP_INTERVAL_SECS`: Registry eviction period (default: 600)
//!
//! # Write-behind
//!
//! - `WRITE_BEHIND_MAX_PENDING`: In-flight recording tasks before dropping (default: 1024)
//! - `DRAIN_TIMEOUT_SECS`: How long shutdown waits for recordings (default: 10, 0 = forever)

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::limiter::DEFAULT_SWEEP_INTERVAL;
use crate::middleware::compression::DEFAULT_COMPRESSION_LEVEL;
use crate::services::recorder::DEFAULT_MAX_PENDING;
use crate::sink::DEFAULT_HISTORY_CAPACITY;
use crate::validation::DEFAULT_HISTORY_LIMIT;

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 8080)
    pub port: u16,

    /// Maximum request body size in bytes (default: 1MB)
    pub max_request_body_size: usize,

    /// How long graceful shutdown waits for in-flight requests (default: 5s)
    pub shutdown_timeout: Duration,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Whether per-client rate limiting is active (default: true)
    pub rate_limit_enabled: bool,

    /// Tokens added per second to each client's bucket (default: 100.0)
    pub rate_limit_rps: f64,

    /// Bucket capacity per client (default: 20)
    pub rate_limit_burst: u32,

    /// Period of the registry's wholesale eviction (default: 10 minutes)
    pub rate_limit_sweep_interval: Duration,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// Origins allowed by the CORS stage; `*` allows any
    pub cors_allowed_origins: Vec<String>,

    /// CIDR ranges whose forwarded headers are believed (e.g. "10.0.0.0/8,::1/128").
    ///
    /// Empty means every peer is believed, so any client can pick its own
    /// rate-limit identity with `X-Forwarded-For`.
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // Response Configuration
    // =========================================================================
    /// Gzip level, 0 (store) to 9 (best) (default: 6)
    pub compression_level: u32,

    // =========================================================================
    // Write-behind / History Configuration
    // =========================================================================
    /// Maximum recording tasks in flight (default: 1024)
    pub write_behind_max_pending: usize,

    /// Upper bound on the shutdown drain; `None` waits forever (default: 10s)
    pub drain_timeout: Option<Duration>,

    /// Records retained by the in-memory history (default: 10000)
    pub history_capacity: usize,

    /// Records returned by `/history` without `?limit=` (default: 10)
    pub history_default_limit: usize,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log filter (e.g., "info", "debug", "playground_server=trace")
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable ones (`LOG_FORMAT=json`)
    pub log_json: bool,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any value fails to parse or
    /// validation fails.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let drain_timeout_secs: u64 = Self::parse_env("DRAIN_TIMEOUT_SECS", 10)?;

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 8080)?,
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 1024 * 1024)?,
            shutdown_timeout: Duration::from_secs(Self::parse_env("SHUTDOWN_TIMEOUT_SECS", 5)?),

            // Rate limiting
            rate_limit_enabled: Self::parse_env("RATE_LIMIT_ENABLED", true)?,
            rate_limit_rps: Self::parse_env("RATE_LIMIT_RPS", 100.0)?,
            rate_limit_burst: Self::parse_env("RATE_LIMIT_BURST", 20)?,
            rate_limit_sweep_interval: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_SWEEP_INTERVAL_SECS",
                DEFAULT_SWEEP_INTERVAL.as_secs(),
            )?),

            // Security
            cors_allowed_origins: Self::parse_cors_origins(),
            trusted_proxies: Self::parse_trusted_proxies(),

            // Responses
            compression_level: Self::parse_env("COMPRESSION_LEVEL", DEFAULT_COMPRESSION_LEVEL)?,

            // Write-behind / history
            write_behind_max_pending: Self::parse_env(
                "WRITE_BEHIND_MAX_PENDING",
                DEFAULT_MAX_PENDING,
            )?,
            drain_timeout: (drain_timeout_secs > 0)
                .then(|| Duration::from_secs(drain_timeout_secs)),
            history_capacity: Self::parse_env("HISTORY_CAPACITY", DEFAULT_HISTORY_CAPACITY)?,
            history_default_limit: Self::parse_env(
                "HISTORY_DEFAULT_LIMIT",
                DEFAULT_HISTORY_LIMIT,
            )?,

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_json: env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")),
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
        if self.rate_limit_enabled {
            if !self.rate_limit_rps.is_finite() || self.rate_limit_rps <= 0.0 {
                return Err(AppError::ConfigError(format!(
                    "RATE_LIMIT_RPS must be a finite number greater than 0 (got {}); \
                     set RATE_LIMIT_ENABLED=false to disable rate limiting",
                    self.rate_limit_rps
                )));
            }

            if self.rate_limit_burst == 0 {
                return Err(AppError::ConfigError(
                    "RATE_LIMIT_BURST must be greater than 0".to_string(),
                ));
            }
        }

        if self.rate_limit_sweep_interval.is_zero() {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_SWEEP_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }

        if self.compression_level > 9 {
            return Err(AppError::ConfigError(format!(
                "COMPRESSION_LEVEL must be between 0 and 9 (got {})",
                self.compression_level
            )));
        }

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.write_behind_max_pending == 0 {
            return Err(AppError::ConfigError(
                "WRITE_BEHIND_MAX_PENDING must be greater than 0".to_string(),
            ));
        }

        if self.history_capacity == 0 || self.history_default_limit == 0 {
            return Err(AppError::ConfigError(
                "HISTORY_CAPACITY and HISTORY_DEFAULT_LIMIT must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// `host:port` to bind.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit_enabled
    }

    /// Whether forwarded headers are checked against `trusted_proxies`.
    pub fn proxy_validation_enabled(&self) -> bool {
        !self.trusted_proxies.is_empty()
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Prometheus listener address, `None` when `METRICS_PORT=0`.
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_enabled()
            .then(|| SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Read `name` as `T`, or `default` when unset.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    fn parse_cors_origins() -> Vec<String> {
        split_list(&env::var("CORS_ALLOWED_ORIGINS").unwrap_or_else(|_| "*".to_string()))
    }

    fn parse_trusted_proxies() -> Vec<String> {
        env::var("TRUSTED_PROXIES")
            .map(|s| split_list(&s))
            .unwrap_or_default()
    }
}

/// Split a comma-separated list, dropping blank entries.
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Development defaults; identical to `from_env` with an empty environment.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_request_body_size: 1024 * 1024, // 1MB
            shutdown_timeout: Duration::from_secs(5),
            // Rate limiting
            rate_limit_enabled: true,
            rate_limit_rps: 100.0,
            rate_limit_burst: 20,
            rate_limit_sweep_interval: DEFAULT_SWEEP_INTERVAL,
            // Security
            cors_allowed_origins: vec!["*".to_string()],
            trusted_proxies: vec![], // Empty = trust all (dev mode)
            // Responses
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            // Write-behind / history
            write_behind_max_pending: DEFAULT_MAX_PENDING,
            drain_timeout: Some(Duration::from_secs(10)),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            history_default_limit: DEFAULT_HISTORY_LIMIT,
            // Observability
            log_level: "info".to_string(),
            log_json: false,
            metrics_port: 9090,
        }
    }
}
