//! Circuit breaker state machine implementation.
//!
//! This module handles state transitions and the counters they reset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// The current state of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Requests are allowed through, failures are counted
    Closed,
    /// All requests are rejected until the cooldown elapses
    Open,
    /// A bounded number of trial requests test recovery
    HalfOpen,
}

impl CircuitState {
    /// Convert state to numeric value for a Prometheus gauge
    pub fn to_metric_value(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }

    /// Check if requests may be attempted in this state
    pub fn allows_requests(&self) -> bool {
        matches!(self, CircuitState::Closed | CircuitState::HalfOpen)
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Represents a state transition in the circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: CircuitState,
    pub to: CircuitState,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

impl StateTransition {
    pub fn new(from: CircuitState, to: CircuitState, reason: String) -> Self {
        Self {
            from,
            to,
            timestamp: Utc::now(),
            reason,
        }
    }
}

/// Internal state data for the circuit breaker
#[derive(Debug, Clone)]
pub struct StateData {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Trial requests admitted during the current half-open episode
    pub half_open_admitted: u32,
    /// Bumped on every transition and closed-window rollover; results from an
    /// older generation are discarded
    pub generation: u64,
    pub last_state_change: DateTime<Utc>,
    /// When the circuit was opened (if in Open state)
    pub opened_at: Option<Instant>,
    /// Start of the closed-state counting window
    pub window_started: Instant,
    pub transition_count: u64,
}

impl StateData {
    /// Create new state data in Closed state
    pub fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            half_open_admitted: 0,
            generation: 0,
            last_state_change: Utc::now(),
            opened_at: None,
            window_started: Instant::now(),
            transition_count: 0,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.consecutive_successes += 1;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_successes = 0;
        self.consecutive_failures += 1;
    }

    /// Transition to a new state. Every transition clears the counters.
    pub fn transition_to(&mut self, new_state: CircuitState) -> StateTransition {
        let transition = StateTransition::new(self.state, new_state, self.transition_reason(new_state));
        let now = Instant::now();

        self.state = new_state;
        self.last_state_change = Utc::now();
        self.transition_count += 1;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.half_open_admitted = 0;
        self.generation += 1;
        self.window_started = now;
        self.opened_at = (new_state == CircuitState::Open).then_some(now);

        transition
    }

    /// Start a fresh closed-state window once `interval` has elapsed
    pub fn roll_window(&mut self, interval: Duration) -> bool {
        if self.state != CircuitState::Closed || interval.is_zero() {
            return false;
        }
        let now = Instant::now();
        if now.duration_since(self.window_started) < interval {
            return false;
        }
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.generation += 1;
        self.window_started = now;
        true
    }

    fn transition_reason(&self, new_state: CircuitState) -> String {
        match (self.state, new_state) {
            (CircuitState::Closed, CircuitState::Open) => {
                format!("Failure threshold exceeded ({} consecutive failures)", self.consecutive_failures)
            }
            (CircuitState::Open, CircuitState::HalfOpen) => {
                "Cooldown elapsed, admitting trial requests".to_string()
            }
            (CircuitState::HalfOpen, CircuitState::Closed) => {
                format!("Recovery successful ({} consecutive successes)", self.consecutive_successes)
            }
            (CircuitState::HalfOpen, CircuitState::Open) => "Trial request failed".to_string(),
            _ => format!("Transitioned from {} to {}", self.state, new_state),
        }
    }

    /// Check if the cooldown has elapsed for an open circuit
    pub fn should_attempt_reset(&self, timeout_duration: Duration) -> bool {
        if self.state != CircuitState::Open {
            return false;
        }

        self.opened_at
            .map(|opened_at| Instant::now().duration_since(opened_at) >= timeout_duration)
            .unwrap_or(false)
    }
}

impl Default for StateData {
    fn default() -> Self {
        Self::new()
    }
}
