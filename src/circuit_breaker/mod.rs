//! Circuit breaker guarding calls to the message broker.
//!
//! - **Closed**: requests pass through, consecutive failures are counted; once
//!   they exceed `failure_threshold` the circuit opens
//! - **Open**: every call fails fast with [`CircuitBreakerError::Open`] until
//!   `timeout_duration` has elapsed
//! - **Half-Open**: up to `half_open_max_requests` trial calls are admitted; a
//!   success closes the circuit, a failure reopens it and restarts the cooldown
//!
//! Rejected calls never reach the operation and never count as failures.
//!
//! # Example
//!
//! ```no_run
//! use care_messaging::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let breaker = CircuitBreaker::new("rabbitmq", CircuitBreakerConfig::for_broker());
//!
//! let value = breaker
//!     .execute(|| async { Ok::<_, std::io::Error>(42) })
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod core;
mod state;

pub use config::{CircuitBreakerConfig, CircuitBreakerConfigBuilder, InvalidBreakerConfig};
pub use core::{CircuitBreaker, CircuitBreakerStats};
pub use state::{CircuitState, StateData, StateTransition};

/// Outcome of a guarded call that did not succeed
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open and rejecting requests; the operation was not invoked
    #[error("Circuit breaker is open for '{0}'")]
    Open(String),

    /// The operation ran and failed with its own error
    #[error("{0}")]
    Operation(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open(_))
    }
}
