//! Service configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! `control-plane.toml` in the working directory, then environment variables
//! such as `CONTROL_PLANE__ENGINE__MAX_CONCURRENT_BOTS=8`.

use chain_gateway::{FeeEstimate, RateLimiter, RpcGatewayConfig};
use config::{builder::DefaultState, ConfigBuilder, Environment, File, FileFormat};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::Level;

use crate::error::EngineError;
use crate::transactions::TransactionConfig;

pub const CONFIG_FILE: &str = "control-plane";
pub const ENV_PREFIX: &str = "CONTROL_PLANE";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub port: u16,
    pub log_level: String,
    /// In-memory store when absent
    pub database_url: Option<String>,
    pub engine: EngineSettings,
    pub rpc: RpcSettings,
    pub transactions: TransactionSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub max_concurrent_bots: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingMode {
    Paper,
    Live,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RpcSettings {
    pub url: String,
    /// Zero or below disables throttling
    pub requests_per_second: i64,
    /// Per-method overrides, keyed by RPC method name
    pub method_limits: HashMap<String, i64>,
    pub timeout_secs: u64,
    pub confirm_timeout_secs: u64,
    pub mode: TradingMode,
    /// External signing service, required in live mode
    pub signer_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransactionSettings {
    pub max_send_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_jitter: f64,
    pub fallback_base_fee: u64,
    pub fallback_priority_fee: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            engine: EngineSettings::default(),
            rpc: RpcSettings::default(),
            transactions: TransactionSettings::default(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_bots: 5,
        }
    }
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            url: RpcGatewayConfig::default().url,
            requests_per_second: 10,
            method_limits: HashMap::new(),
            timeout_secs: 30,
            confirm_timeout_secs: 60,
            mode: TradingMode::Paper,
            signer_url: None,
        }
    }
}

impl Default for TransactionSettings {
    fn default() -> Self {
        let defaults = TransactionConfig::default();
        Self {
            max_send_attempts: defaults.max_send_attempts,
            backoff_base_ms: defaults.backoff_base.as_millis() as u64,
            backoff_max_ms: defaults.backoff_max.as_millis() as u64,
            backoff_jitter: defaults.backoff_jitter,
            fallback_base_fee: defaults.fallback_fee.base_fee,
            fallback_priority_fee: defaults.fallback_fee.priority_fee,
        }
    }
}

fn config_error(e: config::ConfigError) -> EngineError {
    EngineError::Configuration(e.to_string())
}

impl Settings {
    /// File then environment, falling back to `DATABASE_URL` for the database
    pub fn load() -> Result<Self, EngineError> {
        let builder = config::Config::builder()
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let mut settings = Self::build(builder)?;
        if settings.database_url.is_none() {
            settings.database_url = std::env::var("DATABASE_URL").ok();
        }
        Ok(settings)
    }

    pub fn from_toml(contents: &str) -> Result<Self, EngineError> {
        Self::build(config::Config::builder().add_source(File::from_str(contents, FileFormat::Toml)))
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self, EngineError> {
        let settings: Settings = builder
            .build()
            .map_err(config_error)?
            .try_deserialize()
            .map_err(config_error)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.engine.max_concurrent_bots == 0 {
            return Err(EngineError::Configuration(
                "engine.max_concurrent_bots must be at least 1".to_string(),
            ));
        }
        if self.rpc.mode == TradingMode::Live && self.rpc.signer_url.is_none() {
            return Err(EngineError::Configuration(
                "rpc.signer_url is required in live mode".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.transactions.backoff_jitter) {
            return Err(EngineError::Configuration(
                "transactions.backoff_jitter must be between 0 and 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Unknown levels fall back to INFO
    pub fn log_level(&self) -> Level {
        self.log_level.parse().unwrap_or(Level::INFO)
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        self.rpc
            .method_limits
            .iter()
            .fold(RateLimiter::new(self.rpc.requests_per_second), |limiter, (method, rps)| {
                limiter.with_method_limit(method, *rps)
            })
    }

    pub fn rpc_gateway_config(&self) -> RpcGatewayConfig {
        RpcGatewayConfig {
            url: self.rpc.url.clone(),
            timeout: Duration::from_secs(self.rpc.timeout_secs),
            confirm_timeout: Duration::from_secs(self.rpc.confirm_timeout_secs),
            ..RpcGatewayConfig::default()
        }
    }

    pub fn transaction_config(&self) -> TransactionConfig {
        let t = &self.transactions;
        TransactionConfig {
            max_send_attempts: t.max_send_attempts,
            backoff_base: Duration::from_millis(t.backoff_base_ms),
            backoff_max: Duration::from_millis(t.backoff_max_ms),
            backoff_jitter: t.backoff_jitter,
            fallback_fee: FeeEstimate {
                base_fee: t.fallback_base_fee,
                priority_fee: t.fallback_priority_fee,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings.port, 3000);
        assert_eq!(settings.engine.max_concurrent_bots, 5);
        assert_eq!(settings.rpc.requests_per_second, 10);
        assert_eq!(settings.rpc.mode, TradingMode::Paper);
        assert!(settings.database_url.is_none());
        assert_eq!(settings.transaction_config().max_send_attempts, 3);
    }

    #[test]
    fn test_nested_overrides() {
        let settings = Settings::from_toml(
            r#"
            log_level = "debug"

            [engine]
            max_concurrent_bots = 2

            [rpc]
            requests_per_second = 0
            confirm_timeout_secs = 5

            [rpc.method_limits]
            sendTransaction = 2

            [transactions]
            backoff_base_ms = 100
            "#,
        )
        .unwrap();

        assert_eq!(settings.log_level(), Level::DEBUG);
        assert_eq!(settings.engine.max_concurrent_bots, 2);
        assert_eq!(settings.rpc.method_limits.get("sendTransaction"), Some(&2));
        assert_eq!(
            settings.rpc_gateway_config().confirm_timeout,
            Duration::from_secs(5)
        );
        assert_eq!(
            settings.transaction_config().backoff_base,
            Duration::from_millis(100)
        );
        // Untouched section keeps its defaults
        assert_eq!(settings.transactions.max_send_attempts, 3);
    }

    #[test]
    fn test_live_mode_requires_signer() {
        let err = Settings::from_toml("[rpc]\nmode = \"live\"").unwrap_err();
        assert!(matches!(err, EngineError::Configuration(msg) if msg.contains("signer_url")));

        let ok = Settings::from_toml("[rpc]\nmode = \"live\"\nsigner_url = \"http://signer:8080\"");
        assert!(ok.is_ok());
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        assert!(Settings::from_toml("[engine]\nmax_concurrent_bots = 0").is_err());
    }
}
