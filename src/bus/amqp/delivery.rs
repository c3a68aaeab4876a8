use async_trait::async_trait;
use lapin::options::{BasicAckOptions, BasicRejectOptions};

use crate::bus::{BusError, Delivery, Result};

/// A delivery received on an AMQP channel.
pub struct AmqpDelivery(lapin::message::Delivery);

impl From<lapin::message::Delivery> for AmqpDelivery {
    fn from(delivery: lapin::message::Delivery) -> Self {
        Self(delivery)
    }
}

#[async_trait]
impl Delivery for AmqpDelivery {
    fn body(&self) -> &[u8] {
        &self.0.data
    }

    fn message_id(&self) -> Option<&str> {
        self.0.properties.message_id().as_ref().map(|s| s.as_str())
    }

    fn correlation_id(&self) -> Option<&str> {
        self.0
            .properties
            .correlation_id()
            .as_ref()
            .map(|s| s.as_str())
    }

    async fn ack(&self) -> Result<()> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| BusError::Acknowledge(format!("Failed to ack: {}", e)))
    }

    async fn reject(&self) -> Result<()> {
        self.0
            .reject(BasicRejectOptions { requeue: false })
            .await
            .map_err(|e| BusError::Acknowledge(format!("Failed to reject: {}", e)))
    }
}
