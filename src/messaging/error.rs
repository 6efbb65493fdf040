//! Error types for messaging operations

use crate::circuit_breaker::CircuitBreakerError;
use crate::error::AppError;

/// Result type for messaging operations
pub type MessagingResult<T> = std::result::Result<T, MessagingError>;

/// Errors that can occur during messaging operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum MessagingError {
    /// Dial, channel or publish failure expected to clear with retry or reconnection
    #[error("Transient broker error: {0}")]
    Transient(String),

    /// The breaker is open; the broker was not contacted
    #[error("Circuit breaker is open for '{0}'")]
    CircuitOpen(String),

    /// Inbound payload that can never be processed
    #[error("Poison message: {0}")]
    PoisonMessage(String),

    /// Downstream failure while handling a well-formed message
    #[error("Processing failed: {0}")]
    Processing(String),

    /// Operation attempted after the run signal was cancelled
    #[error("Messaging component is shut down")]
    Shutdown,

    /// No live broker connection is available
    #[error("Broker connection is closed")]
    ConnectionClosed,

    /// Every publish attempt failed
    #[error("Failed to publish after {attempts} attempts: {last_error}")]
    PublishExhausted { attempts: u32, last_error: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl MessagingError {
    /// Whether retrying later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MessagingError::Transient(_)
                | MessagingError::CircuitOpen(_)
                | MessagingError::ConnectionClosed
                | MessagingError::PublishExhausted { .. }
                | MessagingError::Processing(_)
        )
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            MessagingError::Transient(_) => "transient",
            MessagingError::CircuitOpen(_) => "circuit_open",
            MessagingError::PoisonMessage(_) => "poison",
            MessagingError::Processing(_) => "processing",
            MessagingError::Shutdown => "shutdown",
            MessagingError::ConnectionClosed => "connection_closed",
            MessagingError::PublishExhausted { .. } => "retries_exhausted",
            MessagingError::Serialization(_) => "serialization",
            MessagingError::Configuration(_) => "configuration",
        }
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        MessagingError::Serialization(err.to_string())
    }
}

impl From<lapin::Error> for MessagingError {
    fn from(err: lapin::Error) -> Self {
        MessagingError::Transient(err.to_string())
    }
}

impl From<CircuitBreakerError<MessagingError>> for MessagingError {
    fn from(err: CircuitBreakerError<MessagingError>) -> Self {
        match err {
            CircuitBreakerError::Open(name) => MessagingError::CircuitOpen(name),
            CircuitBreakerError::Operation(inner) => inner,
        }
    }
}

impl From<MessagingError> for AppError {
    fn from(err: MessagingError) -> Self {
        match err {
            MessagingError::Configuration(msg) => AppError::Configuration(msg),
            MessagingError::Serialization(msg) => AppError::Serialization(msg),
            MessagingError::PoisonMessage(msg) => AppError::Validation(msg),
            MessagingError::Shutdown => AppError::Shutdown,
            MessagingError::CircuitOpen(_) | MessagingError::ConnectionClosed => {
                AppError::Unavailable(err.to_string())
            }
            _ => AppError::Messaging(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_error_conversion_keeps_kind() {
        let open: MessagingError = CircuitBreakerError::Open("rabbitmq".to_string()).into();
        assert!(matches!(open, MessagingError::CircuitOpen(ref n) if n == "rabbitmq"));

        let inner: MessagingError =
            CircuitBreakerError::Operation(MessagingError::Transient("reset".to_string())).into();
        assert!(matches!(inner, MessagingError::Transient(_)));
    }

    #[test]
    fn test_app_error_mapping() {
        let app: AppError = MessagingError::CircuitOpen("rabbitmq".to_string()).into();
        assert!(matches!(app, AppError::Unavailable(_)));

        let app: AppError = MessagingError::Shutdown.into();
        assert!(matches!(app, AppError::Shutdown));
    }

    #[test]
    fn test_transient_classification() {
        assert!(MessagingError::ConnectionClosed.is_transient());
        assert!(!MessagingError::PoisonMessage("bad".to_string()).is_transient());
        assert!(!MessagingError::Shutdown.is_transient());
        assert_eq!(
            MessagingError::PublishExhausted { attempts: 3, last_error: "x".to_string() }.kind(),
            "retries_exhausted"
        );
    }
}
