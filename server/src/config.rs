//! Configuration management for the spotwatch server.
//!
//! Loads configuration from environment variables (and a `.env` file when
//! present) with sensible defaults for every field.

use serde::{Deserialize, Serialize};
use spotwatch_core::config::EngineConfig;
use spotwatch_core::types::Money;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable was set but could not be parsed
    #[error("invalid value for {key}: {value:?}")]
    Invalid {
        /// Environment variable name
        key: &'static str,
        /// Raw value that failed to parse
        value: String,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Pricing and payment provider configuration
    pub payment: PaymentConfig,
    /// Background sweep configuration
    pub sweep: SweepConfig,
    /// Real-time notification configuration
    pub notifications: NotificationConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Log level used when `RUST_LOG` is not set
    pub log_level: String,
    /// Install the Prometheus recorder and serve `/metrics`
    pub metrics_enabled: bool,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
    /// Readings returned with a single spot
    pub recent_readings_limit: usize,
}

/// Pricing and payment provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfig {
    /// Price of one reserved hour, in cents
    pub hourly_rate_cents: u64,
    /// ISO currency code sent to the provider
    pub currency: String,
    /// Per-call deadline in seconds
    pub timeout_secs: u64,
    /// Consecutive transient failures before the circuit opens
    pub breaker_failures: usize,
    /// Seconds before an open circuit lets a trial call through
    pub breaker_reset_secs: u64,
}

/// Background sweep configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Seconds between expiry sweeps
    pub interval_secs: u64,
}

/// Real-time notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Broadcast channel capacity per subscriber
    pub capacity: usize,
    /// Recent notification keys remembered for duplicate suppression
    pub dedup_window: usize,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Reads `.env` first if one exists; variables already set in the
    /// environment take precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a variable is set to an
    /// unparseable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Ignore a missing .env file
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a variable is set to an
    /// unparseable value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);
        Ok(Self {
            server: ServerConfig {
                host: vars.string("SERVER_HOST", "0.0.0.0"),
                port: vars.parse("SERVER_PORT", 5000)?,
                log_level: vars.string("LOG_LEVEL", "info"),
                metrics_enabled: vars.parse("METRICS_ENABLED", true)?,
                shutdown_timeout: vars.parse("SHUTDOWN_TIMEOUT_SECS", 30)?,
                recent_readings_limit: vars.parse("RECENT_READINGS_LIMIT", 10)?,
            },
            payment: PaymentConfig {
                hourly_rate_cents: vars.parse("HOURLY_RATE_CENTS", 200)?,
                currency: vars.string("CURRENCY", "usd"),
                timeout_secs: vars.parse("PAYMENT_TIMEOUT_SECS", 10)?,
                breaker_failures: vars.parse("PAYMENT_BREAKER_FAILURES", 5)?,
                breaker_reset_secs: vars.parse("PAYMENT_BREAKER_RESET_SECS", 30)?,
            },
            sweep: SweepConfig {
                interval_secs: vars.parse("SWEEP_INTERVAL_SECS", 60)?,
            },
            notifications: NotificationConfig {
                capacity: vars.parse("NOTIFICATION_CAPACITY", 256)?,
                dedup_window: vars.parse("NOTIFICATION_DEDUP_WINDOW", 64)?,
            },
        })
    }

    /// Address the HTTP listener binds to
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Engine settings derived from this configuration
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_hourly_rate(Money::from_cents(self.payment.hourly_rate_cents))
            .with_currency(self.payment.currency.clone())
            .with_payment_timeout(self.payment_timeout())
            .with_dedup_window(self.notifications.dedup_window)
    }

    /// Payment call deadline
    #[must_use]
    pub const fn payment_timeout(&self) -> Duration {
        Duration::from_secs(self.payment.timeout_secs)
    }

    /// Interval between expiry sweeps
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep.interval_secs)
    }

    /// Graceful shutdown deadline
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout)
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str, default: &str) -> String {
        (self.0)(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match (self.0)(key) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { key, value: raw }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:5000");
        assert!(config.server.metrics_enabled);
        assert_eq!(config.server.recent_readings_limit, 10);
        assert_eq!(config.sweep_interval(), Duration::from_secs(60));

        let engine = config.engine_config();
        assert_eq!(engine.hourly_rate, Money::from_cents(200));
        assert_eq!(engine.currency, "usd");
        assert_eq!(engine.payment_timeout, Duration::from_secs(10));
        assert_eq!(engine.dedup_window, 64);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("SERVER_PORT", "8080"),
            ("HOURLY_RATE_CENTS", "350"),
            ("CURRENCY", "eur"),
            ("METRICS_ENABLED", "false"),
            ("NOTIFICATION_DEDUP_WINDOW", "0"),
        ])
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert!(!config.server.metrics_enabled);
        let engine = config.engine_config();
        assert_eq!(engine.hourly_rate, Money::from_cents(350));
        assert_eq!(engine.currency, "eur");
        assert_eq!(engine.dedup_window, 0);
    }

    #[test]
    fn unparseable_value_is_reported() {
        let err = load(&[("SERVER_PORT", "eighty")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "SERVER_PORT",
                value: "eighty".to_string()
            }
        );
    }
}
