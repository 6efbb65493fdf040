//! Circuit breaker configuration with builder pattern.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Rejected breaker configuration
#[derive(Debug, Clone, Error)]
#[error("Invalid circuit breaker configuration: {0}")]
pub struct InvalidBreakerConfig(pub String);

/// Configuration for a circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// The circuit opens once consecutive failures exceed this number
    pub failure_threshold: u32,

    /// Consecutive half-open successes required to close
    pub success_threshold: u32,

    /// Cooldown spent open before admitting trial requests
    pub timeout_duration: Duration,

    /// Trial requests admitted per half-open episode
    pub half_open_max_requests: u32,

    /// Closed-state window after which failure counts are cleared.
    /// Zero keeps counts until the next success.
    pub interval: Duration,
}

impl CircuitBreakerConfig {
    /// Create a new builder for CircuitBreakerConfig
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), InvalidBreakerConfig> {
        if self.failure_threshold == 0 {
            return Err(InvalidBreakerConfig(
                "failure_threshold must be greater than 0".to_string(),
            ));
        }

        if self.success_threshold == 0 {
            return Err(InvalidBreakerConfig(
                "success_threshold must be greater than 0".to_string(),
            ));
        }

        if self.timeout_duration.is_zero() {
            return Err(InvalidBreakerConfig(
                "timeout_duration must be greater than 0".to_string(),
            ));
        }

        if self.half_open_max_requests == 0 {
            return Err(InvalidBreakerConfig(
                "half_open_max_requests must be greater than 0".to_string(),
            ));
        }

        if self.success_threshold > self.half_open_max_requests {
            return Err(InvalidBreakerConfig(format!(
                "success_threshold ({}) cannot exceed half_open_max_requests ({})",
                self.success_threshold, self.half_open_max_requests
            )));
        }

        Ok(())
    }

    /// Settings used for the broker publish path
    pub fn for_broker() -> Self {
        Self::default()
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            timeout_duration: Duration::from_secs(30),
            half_open_max_requests: 5,
            interval: Duration::from_secs(60),
        }
    }
}

/// Builder for CircuitBreakerConfig with fluent API
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerConfigBuilder {
    failure_threshold: Option<u32>,
    success_threshold: Option<u32>,
    timeout_duration: Option<Duration>,
    half_open_max_requests: Option<u32>,
    interval: Option<Duration>,
}

impl CircuitBreakerConfigBuilder {
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = Some(threshold);
        self
    }

    pub fn timeout_duration(mut self, duration: Duration) -> Self {
        self.timeout_duration = Some(duration);
        self
    }

    pub fn half_open_max_requests(mut self, max: u32) -> Self {
        self.half_open_max_requests = Some(max);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<CircuitBreakerConfig, InvalidBreakerConfig> {
        let default = CircuitBreakerConfig::default();

        let config = CircuitBreakerConfig {
            failure_threshold: self.failure_threshold.unwrap_or(default.failure_threshold),
            success_threshold: self.success_threshold.unwrap_or(default.success_threshold),
            timeout_duration: self.timeout_duration.unwrap_or(default.timeout_duration),
            half_open_max_requests: self
                .half_open_max_requests
                .unwrap_or(default.half_open_max_requests),
            interval: self.interval.unwrap_or(default.interval),
        };

        config.validate()?;
        Ok(config)
    }
}
