//! Engine tuning knobs.
//!
//! Built by the host (usually from environment variables); the engine itself
//! never reads the environment.

use crate::types::Money;
use std::time::Duration;

/// Engine configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Price of one reserved hour
    pub hourly_rate: Money,
    /// Currency sent to the payment provider
    pub currency: String,
    /// Upper bound on a single payment-intent call
    pub payment_timeout: Duration,
    /// Number of recent notification keys remembered for dedup (0 disables)
    pub dedup_window: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hourly_rate: Money::from_cents(200),
            currency: "usd".to_string(),
            payment_timeout: Duration::from_secs(10),
            dedup_window: 64,
        }
    }
}

impl EngineConfig {
    /// Overrides the hourly rate
    #[must_use]
    pub const fn with_hourly_rate(mut self, rate: Money) -> Self {
        self.hourly_rate = rate;
        self
    }

    /// Overrides the currency
    #[must_use]
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    /// Overrides the payment timeout
    #[must_use]
    pub const fn with_payment_timeout(mut self, timeout: Duration) -> Self {
        self.payment_timeout = timeout;
        self
    }

    /// Overrides the dedup window
    #[must_use]
    pub const fn with_dedup_window(mut self, window: usize) -> Self {
        self.dedup_window = window;
        self
    }
}
