//! Durable event publisher.

use std::sync::Arc;

use async_trait::async_trait;
use cloudevents::event::AttributesReader;
use lapin::{
    options::{BasicPublishOptions, ConfirmSelectOptions},
    publisher_confirm::Confirmation,
    BasicProperties, Channel,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{close_quietly, ConnectionManager, QueueTopology, REPLY_SUCCESS};
use crate::bus::{BusError, EventPublisher, Result};
use crate::events::{self, DomainEvent, ENVELOPE_CONTENT_TYPE};

/// Persistent delivery mode.
const PERSISTENT: u8 = 2;

/// Publishes typed events to a durable queue.
///
/// Each publish waits for the broker's confirm, so a successful return
/// means the message is safely stored. Publishing is never retried here.
pub struct Publisher {
    manager: Arc<ConnectionManager>,
    topology: QueueTopology,
    channel: Mutex<Option<Channel>>,
}

impl Publisher {
    pub fn new(manager: Arc<ConnectionManager>, topology: QueueTopology) -> Self {
        Self {
            manager,
            topology,
            channel: Mutex::new(None),
        }
    }

    /// Open the publishing channel and declare the destination queue.
    ///
    /// Safe to call again; the previous channel is closed.
    pub async fn setup(&self) -> Result<()> {
        let channel = self.open().await?;
        let previous = self.channel.lock().await.replace(channel);
        if let Some(previous) = previous {
            close_quietly(previous).await;
        }
        Ok(())
    }

    async fn open(&self) -> Result<Channel> {
        let channel = self.manager.open_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BusError::Connection(format!("Failed to enable confirms: {}", e)))?;
        self.topology.declare(&channel).await?;
        Ok(channel)
    }

    /// Current channel, reopened if the connection dropped since setup.
    async fn channel(&self) -> Result<Channel> {
        let mut guard = self.channel.lock().await;
        match guard.as_ref() {
            None => Err(BusError::NotReady("publisher setup has not run")),
            Some(channel) if channel.status().connected() => Ok(channel.clone()),
            Some(_) => {
                warn!(queue = %self.topology.queue, "Publisher channel closed, reopening");
                let channel = self.open().await?;
                *guard = Some(channel.clone());
                Ok(channel)
            }
        }
    }

    /// Publish `event`, tagging it with `correlation_id` (defaults to the event id).
    ///
    /// Returns the envelope id.
    pub async fn publish_with_correlation(
        &self,
        event: &DomainEvent,
        correlation_id: Option<&str>,
    ) -> Result<String> {
        let channel = self.channel().await?;

        let envelope = events::encode(event);
        let event_id = envelope.id().to_string();
        let payload = events::to_json(&envelope)?;

        let properties = BasicProperties::default()
            .with_content_type(ENVELOPE_CONTENT_TYPE.into())
            .with_delivery_mode(PERSISTENT)
            .with_message_id(event_id.clone().into())
            .with_correlation_id(correlation_id.unwrap_or(&event_id).to_string().into())
            .with_kind(envelope.ty().to_string().into())
            .with_timestamp(chrono::Utc::now().timestamp().max(0) as u64);

        let confirm = channel
            .basic_publish(
                "",
                &self.topology.queue,
                BasicPublishOptions {
                    mandatory: true,
                    ..Default::default()
                },
                &payload,
                properties,
            )
            .await
            .map_err(|e| BusError::Publish(format!("Failed to publish: {}", e)))?
            .await
            .map_err(|e| BusError::Publish(format!("Publish confirmation failed: {}", e)))?;

        match confirm {
            Confirmation::Nack(_) => {
                return Err(BusError::Publish("Broker rejected message".to_string()));
            }
            Confirmation::Ack(Some(_)) => {
                return Err(BusError::Publish(format!(
                    "Message unroutable: queue '{}' does not exist",
                    self.topology.queue
                )));
            }
            Confirmation::Ack(None) | Confirmation::NotRequested => {}
        }

        info!(
            queue = %self.topology.queue,
            event_type = %envelope.ty(),
            event_id = %event_id,
            "Published event"
        );

        Ok(event_id)
    }

    /// Close the publishing channel.
    pub async fn close(&self) -> Result<()> {
        let Some(channel) = self.channel.lock().await.take() else {
            return Ok(());
        };
        if !channel.status().connected() {
            return Ok(());
        }
        channel
            .close(REPLY_SUCCESS, "shutdown")
            .await
            .map_err(|e| BusError::Connection(format!("Failed to close channel: {}", e)))?;
        debug!(queue = %self.topology.queue, "Publisher channel closed");
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for Publisher {
    async fn publish(&self, event: &DomainEvent) -> Result<String> {
        self.publish_with_correlation(event, None).await
    }
}
