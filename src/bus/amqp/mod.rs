//! AMQP (RabbitMQ) transport.
//!
//! Events are published to the default exchange with the destination queue
//! as routing key, so each event stream is a single well-known durable queue.
//! Publisher and consumer each hold their own channel on one shared,
//! self-healing connection.

mod connection;
mod consumer;
mod delivery;
mod publisher;
mod topology;

use std::time::Duration;

pub use connection::{ConnectionManager, PREFETCH_COUNT};
pub use consumer::Consumer;
pub use delivery::AmqpDelivery;
pub use publisher::Publisher;
pub use topology::{DeadLetterConfig, QueueTopology};

use lapin::Channel;
use tracing::debug;

use crate::config::{Config, ConfigError};

/// Reply code for a normal channel/connection close.
pub(crate) const REPLY_SUCCESS: u16 = 200;

/// Close a channel that is no longer needed, logging instead of failing.
pub(crate) async fn close_quietly(channel: Channel) {
    if channel.status().connected() {
        if let Err(e) = channel.close(REPLY_SUCCESS, "replaced").await {
            debug!(error = %e, "Failed to close unused channel");
        }
    }
}

/// Configuration for the AMQP connection.
#[derive(Clone, Debug)]
pub struct AmqpConfig {
    /// AMQP connection URL (e.g., amqp://localhost:5672).
    pub url: String,
    /// Connection name reported to the broker.
    pub connection_name: String,
    /// Upper bound for establishing or waiting on the pooled connection.
    pub connect_timeout: Duration,
}

impl AmqpConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection_name: "eventline".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = name.into();
        self
    }

    /// Build from application configuration.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self::new(config.rabbitmq.connection_url()?)
            .with_connection_name(&config.messaging.connection_name))
    }
}
