//! Pipeline options and circuit breaker configuration.

use crate::observability::{ErrorHandler, Logger, LoggingErrorHandler, TracingLogger};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Backoff policy between retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// delay = interval
    Static,
    /// delay = interval * attempt^2
    #[default]
    Exponential,
}

/// Configuration for the per-item circuit breaker.
///
/// The breaker is stateless across items: every parcel starts with a fresh
/// attempt counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// When false, failures are swallowed: no retry, no report.
    pub enabled: bool,
    /// Retries after the first call.
    pub number_of_retries: u32,
    /// Backoff policy.
    pub policy: BackoffPolicy,
    /// Base interval in milliseconds.
    pub interval_ms: u64,
    /// Scale exponential delays by a random extra 0-50%.
    pub jitter: bool,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            number_of_retries: 2,
            policy: BackoffPolicy::Exponential,
            interval_ms: 1,
            jitter: false,
        }
    }
}

impl BreakerConfig {
    /// Creates the default breaker configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a disabled breaker.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Sets the number of retries.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.number_of_retries = retries;
        self
    }

    /// Sets the backoff policy.
    #[must_use]
    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the base interval.
    #[must_use]
    pub fn with_interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Computes the delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.interval_ms;
        let delay = match self.policy {
            BackoffPolicy::Static => base,
            BackoffPolicy::Exponential => {
                let squared = u64::from(attempt).saturating_mul(u64::from(attempt));
                let delay = base.saturating_mul(squared);
                if self.jitter && delay > 0 {
                    let extra = rand::thread_rng().gen_range(0..=delay / 2);
                    delay.saturating_add(extra)
                } else {
                    delay
                }
            }
        };

        Duration::from_millis(delay)
    }
}

/// Pipeline-wide options, inherited by every stage that does not override them.
#[derive(Debug, Clone)]
pub struct Options {
    /// Pipeline name.
    pub name: String,
    /// Default breaker.
    pub breaker: BreakerConfig,
    logger: Arc<dyn Logger>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
}

impl Default for Options {
    fn default() -> Self {
        Self::new("Unnamed")
    }
}

impl Options {
    /// Creates options for the named pipeline, logging through `tracing`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            logger: Arc::new(TracingLogger::new(name.clone())),
            name,
            breaker: BreakerConfig::default(),
            error_handler: None,
        }
    }

    /// Sets the default breaker.
    #[must_use]
    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Sets the logger.
    #[must_use]
    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Sets the error handler.
    #[must_use]
    pub fn with_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Returns the logger.
    #[must_use]
    pub fn logger(&self) -> Arc<dyn Logger> {
        Arc::clone(&self.logger)
    }

    /// Returns the error handler. Without an explicit handler, failures are
    /// enqueued as error entries on the pipeline logger.
    #[must_use]
    pub fn error_handler(&self) -> Arc<dyn ErrorHandler> {
        match &self.error_handler {
            Some(handler) => Arc::clone(handler),
            None => Arc::new(LoggingErrorHandler::new(self.logger())),
        }
    }
}
