//! Core circuit breaker implementation with async support.

use crate::circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerError, CircuitState, StateData, StateTransition,
};
use crate::metrics::{MetricsSink, NoopMetrics};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A thread-safe, async circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Arc<Mutex<StateData>>,
    metrics: Arc<dyn MetricsSink>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            name = %name,
            config = ?config,
            "Creating new circuit breaker"
        );

        Self {
            name,
            config,
            state: Arc::new(Mutex::new(StateData::new())),
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Report transitions and rejections to `metrics`
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        metrics.circuit_state(&self.name, CircuitState::Closed);
        self.metrics = metrics;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, applying any cooldown or window expiry that is due
    pub fn state(&self) -> CircuitState {
        let mut state = self.state.lock();
        self.refresh(&mut state);
        state.state
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `operation` under the breaker.
    ///
    /// Returns [`CircuitBreakerError::Open`] without invoking `operation` while the
    /// circuit is open or the half-open trial budget is spent. Otherwise the
    /// operation's own error is passed through unchanged.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let generation = self.before_call()?;
        let mut guard = CallGuard {
            breaker: self,
            generation,
            settled: false,
        };

        let result = operation().await;
        guard.settle(result.is_ok());

        result.map_err(CircuitBreakerError::Operation)
    }

    fn before_call<E>(&self) -> Result<u64, CircuitBreakerError<E>> {
        let mut state = self.state.lock();
        self.refresh(&mut state);

        match state.state {
            CircuitState::Closed => Ok(state.generation),
            CircuitState::Open => Err(self.reject()),
            CircuitState::HalfOpen => {
                if state.half_open_admitted >= self.config.half_open_max_requests {
                    Err(self.reject())
                } else {
                    state.half_open_admitted += 1;
                    Ok(state.generation)
                }
            }
        }
    }

    fn after_call(&self, generation: u64, success: bool) {
        let mut state = self.state.lock();
        self.refresh(&mut state);

        if state.generation != generation {
            debug!(
                name = %self.name,
                generation,
                current = state.generation,
                "Discarding result from a previous circuit generation"
            );
            return;
        }

        if success {
            self.on_success(&mut state);
        } else {
            self.on_failure(&mut state);
        }
    }

    fn reject<E>(&self) -> CircuitBreakerError<E> {
        self.metrics.circuit_rejected(&self.name);
        CircuitBreakerError::Open(self.name.clone())
    }

    /// Apply time-driven changes: cooldown expiry and closed-window rollover
    fn refresh(&self, state: &mut StateData) {
        if state.should_attempt_reset(self.config.timeout_duration) {
            let transition = state.transition_to(CircuitState::HalfOpen);
            self.log_transition(&transition);
        } else if state.roll_window(self.config.interval) {
            debug!(name = %self.name, "Closed-state counting window rolled over");
        }
    }

    fn on_success(&self, state: &mut StateData) {
        state.record_success();

        debug!(
            name = %self.name,
            current_state = %state.state,
            consecutive_successes = state.consecutive_successes,
            "Operation succeeded"
        );

        if state.state == CircuitState::HalfOpen
            && state.consecutive_successes >= self.config.success_threshold
        {
            let transition = state.transition_to(CircuitState::Closed);
            self.log_transition(&transition);
        }
    }

    fn on_failure(&self, state: &mut StateData) {
        state.record_failure();

        warn!(
            name = %self.name,
            current_state = %state.state,
            consecutive_failures = state.consecutive_failures,
            "Operation failed"
        );

        match state.state {
            CircuitState::Closed if state.consecutive_failures > self.config.failure_threshold => {
                let transition = state.transition_to(CircuitState::Open);
                self.log_transition(&transition);
            }
            CircuitState::HalfOpen => {
                let transition = state.transition_to(CircuitState::Open);
                self.log_transition(&transition);
            }
            _ => {}
        }
    }

    fn log_transition(&self, transition: &StateTransition) {
        info!(
            name = %self.name,
            from = %transition.from,
            to = %transition.to,
            reason = %transition.reason,
            "Circuit breaker state transition"
        );
        self.metrics.circuit_state(&self.name, transition.to);
    }

    /// Get statistics for this circuit breaker
    pub fn stats(&self) -> CircuitBreakerStats {
        let mut state = self.state.lock();
        self.refresh(&mut state);
        CircuitBreakerStats {
            name: self.name.clone(),
            state: state.state,
            consecutive_failures: state.consecutive_failures,
            consecutive_successes: state.consecutive_successes,
            transition_count: state.transition_count,
            last_state_change: state.last_state_change,
        }
    }

    /// Manually reset the circuit breaker to closed state
    pub fn reset(&self) {
        let mut state = self.state.lock();
        if state.state != CircuitState::Closed {
            let transition = state.transition_to(CircuitState::Closed);
            self.log_transition(&transition);
        }
    }
}

/// Settles an admitted call exactly once. A call dropped before completing
/// (caller cancelled) counts as a failure.
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    settled: bool,
}

impl CallGuard<'_> {
    fn settle(&mut self, success: bool) {
        if !self.settled {
            self.settled = true;
            self.breaker.after_call(self.generation, success);
        }
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.settle(false);
    }
}

/// Statistics for a circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub transition_count: u64,
    pub last_state_change: chrono::DateTime<chrono::Utc>,
}
