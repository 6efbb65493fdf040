//! Care service messaging core
//!
//! Publishes critical measurement alerts to RabbitMQ and consumes baby
//! creation requests from it. See [`messaging`] for the broker-facing
//! components and [`circuit_breaker`] for the publish guard.

pub mod api;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod messaging;
pub mod metrics;
pub mod models;
pub mod services;

pub use error::{AppError, Result};
