//! Event bus for durable, at-least-once delivery.
//!
//! This module contains:
//! - `EventHandler` trait: business logic invoked once per decoded delivery
//! - `EventPublisher` trait: the publish seam handlers and callers depend on
//! - `Delivery` trait and the per-delivery state machine
//! - Implementations: AMQP (RabbitMQ), Mock

use std::future::Future;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::events::{DecodeError, DomainEvent};

// Implementation modules
#[cfg(feature = "amqp")]
pub mod amqp;
pub mod delivery;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

// Re-exports
#[cfg(feature = "amqp")]
pub use amqp::{
    AmqpConfig, ConnectionManager, Consumer, DeadLetterConfig, Publisher, QueueTopology,
};
pub use delivery::{process_delivery, Delivery, DeliveryOutcome, RejectReason};
#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockDelivery, MockPublisher};

// ============================================================================
// Traits
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Malformed broker URL or credentials. Fatal, never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Failed to declare '{name}': {reason}")]
    Declare { name: String, reason: String },

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Not ready: {0}")]
    NotReady(&'static str),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to acknowledge delivery: {0}")]
    Acknowledge(String),

    #[error("Handler failed: {0}")]
    Handler(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl BusError {
    /// Wrap any displayable business failure as a handler error.
    pub fn handler(err: impl std::fmt::Display) -> Self {
        BusError::Handler(err.to_string())
    }
}

/// Handler for decoded events.
///
/// Invoked at most once per successfully decoded delivery. `Ok` acknowledges
/// the delivery; `Err` rejects it without requeue.
pub trait EventHandler: Send + Sync {
    /// Process one event.
    fn handle(&self, event: DomainEvent) -> BoxFuture<'static, Result<()>>;
}

impl<F, Fut> EventHandler for F
where
    F: Fn(DomainEvent) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn handle(&self, event: DomainEvent) -> BoxFuture<'static, Result<()>> {
        Box::pin(self(event))
    }
}

/// Interface for depositing events onto a durable destination.
///
/// Implementations:
/// - `Publisher`: RabbitMQ via AMQP
/// - `MockPublisher`: In-memory mock for testing
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event. Returns the envelope id once the broker accepted it.
    ///
    /// Does not wait for downstream processing. No retries: failures
    /// propagate and retry policy belongs to the caller.
    async fn publish(&self, event: &DomainEvent) -> Result<String>;
}
