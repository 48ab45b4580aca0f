//! Daemon configuration.
//!
//! Loads configuration from `TRADEPOST_*` environment variables with
//! sensible defaults.

use crate::error::{DaemonError, DaemonResult};
use chrono::Duration;
use std::env;
use std::path::PathBuf;
use tradepost_exec::OverflowPolicy;

// =============================================================================
// Configuration
// =============================================================================

/// Upper bound for any configured duration: ten years.
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API server configuration
    pub api: ApiConfig,

    /// Trade timing and delivery configuration
    pub trade: TradeConfig,

    /// Persistence configuration
    pub storage: StorageConfig,

    /// Environment (test, development, production)
    pub environment: Environment,
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
}

/// Trade configuration.
#[derive(Debug, Clone)]
pub struct TradeConfig {
    /// Maximum tolerated offline time before a side is force-settled
    pub grace_period: Duration,
    /// Reconciler sweep cadence
    pub sweep_interval: std::time::Duration,
    /// Lifetime of a pending exit confirmation
    pub confirm_ttl: Duration,
    /// What happens to items that do not fit an online inventory
    pub overflow: OverflowPolicy,
}

/// Persistence configuration.
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    /// Directory for the JSON file store; `None` keeps everything in memory
    pub data_dir: Option<PathBuf>,
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Test environment (uses stubs)
    Test,
    /// Development environment
    Development,
    /// Production environment
    Production,
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::seconds(300),
            sweep_interval: std::time::Duration::from_secs(5),
            confirm_ttl: Duration::seconds(30),
            overflow: OverflowPolicy::Drop,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        let environment = Self::load_environment()?;
        let api = Self::load_api_config()?;
        let trade = Self::load_trade_config()?;
        let storage = StorageConfig {
            data_dir: env::var("TRADEPOST_DATA_DIR")
                .ok()
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from),
        };

        Ok(Self {
            api,
            trade,
            storage,
            environment,
        })
    }

    /// Create test configuration.
    pub fn test() -> Self {
        Self {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
            },
            trade: TradeConfig {
                grace_period: Duration::seconds(60),
                sweep_interval: std::time::Duration::from_millis(50),
                confirm_ttl: Duration::seconds(30),
                overflow: OverflowPolicy::Drop,
            },
            storage: StorageConfig::default(),
            environment: Environment::Test,
        }
    }

    fn load_environment() -> DaemonResult<Environment> {
        let env_str = env::var("TRADEPOST_ENV").unwrap_or_else(|_| "development".to_string());

        match env_str.to_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(DaemonError::Config(format!(
                "Invalid TRADEPOST_ENV: {}. Expected: test, development, production",
                other
            ))),
        }
    }

    fn load_api_config() -> DaemonResult<ApiConfig> {
        let host = env::var("TRADEPOST_API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port_str = env::var("TRADEPOST_API_PORT").unwrap_or_else(|_| "8080".to_string());

        let port = port_str.parse::<u16>().map_err(|_| {
            DaemonError::Config(format!("Invalid TRADEPOST_API_PORT: {}", port_str))
        })?;

        Ok(ApiConfig { host, port })
    }

    fn load_trade_config() -> DaemonResult<TradeConfig> {
        let grace = Self::load_secs_env("TRADEPOST_GRACE_PERIOD_SECS", 300)?;
        let sweep = Self::load_secs_env("TRADEPOST_SWEEP_INTERVAL_SECS", 5)?;
        let confirm = Self::load_secs_env("TRADEPOST_CONFIRM_TTL_SECS", 30)?;

        if sweep == 0 {
            return Err(DaemonError::Config(
                "TRADEPOST_SWEEP_INTERVAL_SECS must be at least 1".to_string(),
            ));
        }

        let overflow = match env::var("TRADEPOST_OVERFLOW") {
            Ok(val) => val
                .parse::<OverflowPolicy>()
                .map_err(|e| DaemonError::Config(format!("Invalid TRADEPOST_OVERFLOW: {}", e)))?,
            Err(_) => OverflowPolicy::default(),
        };

        Ok(TradeConfig {
            grace_period: Duration::seconds(grace as i64),
            sweep_interval: std::time::Duration::from_secs(sweep),
            confirm_ttl: Duration::seconds(confirm as i64),
            overflow,
        })
    }

    fn load_secs_env(key: &str, default: u64) -> DaemonResult<u64> {
        match env::var(key) {
            Ok(val) => Self::parse_secs(key, &val),
            Err(_) => Ok(default),
        }
    }

    fn parse_secs(key: &str, val: &str) -> DaemonResult<u64> {
        let secs = val
            .trim()
            .parse::<u64>()
            .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val)))?;
        if secs > MAX_DURATION_SECS {
            return Err(DaemonError::Config(format!(
                "{} out of range: {} (max {})",
                key, val, MAX_DURATION_SECS
            )));
        }
        Ok(secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            trade: TradeConfig::default(),
            storage: StorageConfig::default(),
            environment: Environment::Development,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.api.port, 8080);
        assert_eq!(config.environment, Environment::Development);
        assert!(config.storage.data_dir.is_none());
    }

    #[test]
    fn test_test_config() {
        let config = Config::test();

        assert_eq!(config.api.port, 0);
        assert_eq!(config.environment, Environment::Test);
    }

    #[test]
    fn test_trade_config_defaults() {
        let trade = TradeConfig::default();

        assert_eq!(trade.grace_period, Duration::seconds(300));
        assert_eq!(trade.sweep_interval, std::time::Duration::from_secs(5));
        assert_eq!(trade.confirm_ttl, Duration::seconds(30));
        assert_eq!(trade.overflow, OverflowPolicy::Drop);
    }

    #[test]
    fn test_parse_secs_rejects_garbage() {
        assert_eq!(Config::parse_secs("X", "42").unwrap(), 42);
        assert_eq!(Config::parse_secs("X", " 7 ").unwrap(), 7);
        assert!(matches!(Config::parse_secs("X", "-1"), Err(DaemonError::Config(_))));
        assert!(matches!(Config::parse_secs("X", "soon"), Err(DaemonError::Config(_))));
    }

    #[test]
    fn test_parse_secs_caps_durations() {
        let max = MAX_DURATION_SECS.to_string();
        assert_eq!(Config::parse_secs("X", &max).unwrap(), MAX_DURATION_SECS);

        let over = (MAX_DURATION_SECS + 1).to_string();
        assert!(matches!(Config::parse_secs("X", &over), Err(DaemonError::Config(_))));

        let huge = (i64::MAX / 1000).to_string();
        assert!(matches!(Config::parse_secs("X", &huge), Err(DaemonError::Config(_))));
    }

    #[test]
    fn test_environment_display() {
        assert_eq!(Environment::Test.to_string(), "test");
        assert_eq!(Environment::Production.to_string(), "production");
    }
}
