//! Mock bus implementations for testing.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{BusError, Delivery, EventPublisher, Result};
use crate::events::{encode, to_json, DomainEvent, Envelope};

/// How a mock delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Rejected,
}

/// In-memory delivery that records its settlement.
pub struct MockDelivery {
    body: Vec<u8>,
    message_id: Option<String>,
    correlation_id: Option<String>,
    settlements: Arc<Mutex<Vec<Settlement>>>,
    fail_settlement: bool,
}

/// Observer for a [`MockDelivery`] that outlives it.
#[derive(Clone)]
pub struct MockDeliveryHandle {
    settlements: Arc<Mutex<Vec<Settlement>>>,
}

impl MockDeliveryHandle {
    pub fn settlements(&self) -> Vec<Settlement> {
        lock(&self.settlements).clone()
    }
}

impl MockDelivery {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            message_id: None,
            correlation_id: None,
            settlements: Arc::new(Mutex::new(Vec::new())),
            fail_settlement: false,
        }
    }

    /// Build a delivery carrying an encoded event, with ids set the way the publisher sets them.
    pub fn from_event(event: &DomainEvent) -> Result<Self> {
        let envelope = encode(event);
        Self::from_envelope(&envelope)
    }

    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        use cloudevents::event::AttributesReader;

        let mut delivery = Self::new(to_json(envelope)?);
        delivery.message_id = Some(envelope.id().to_string());
        delivery.correlation_id = Some(envelope.id().to_string());
        Ok(delivery)
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Make ack/reject fail, as on a closed channel.
    pub fn failing_settlement(mut self) -> Self {
        self.fail_settlement = true;
        self
    }

    pub fn handle(&self) -> MockDeliveryHandle {
        MockDeliveryHandle {
            settlements: self.settlements.clone(),
        }
    }

    pub fn settlements(&self) -> Vec<Settlement> {
        lock(&self.settlements).clone()
    }

    fn settle(&self, settlement: Settlement) -> Result<()> {
        if self.fail_settlement {
            return Err(BusError::Acknowledge("Mock channel closed".to_string()));
        }
        lock(&self.settlements).push(settlement);
        Ok(())
    }
}

#[async_trait]
impl Delivery for MockDelivery {
    fn body(&self) -> &[u8] {
        &self.body
    }

    fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    async fn ack(&self) -> Result<()> {
        self.settle(Settlement::Acked)
    }

    async fn reject(&self) -> Result<()> {
        self.settle(Settlement::Rejected)
    }
}

fn lock(settlements: &Mutex<Vec<Settlement>>) -> std::sync::MutexGuard<'_, Vec<Settlement>> {
    settlements
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mock publisher for testing.
#[derive(Default)]
pub struct MockPublisher {
    published: RwLock<Vec<Envelope>>,
    fail_on_publish: RwLock<bool>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    pub async fn take_published(&self) -> Vec<Envelope> {
        std::mem::take(&mut *self.published.write().await)
    }
}

#[async_trait]
impl EventPublisher for MockPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<String> {
        use cloudevents::event::AttributesReader;

        if *self.fail_on_publish.read().await {
            return Err(BusError::Publish("Mock publish failure".to_string()));
        }
        let envelope = encode(event);
        let id = envelope.id().to_string();
        self.published.write().await.push(envelope);
        Ok(id)
    }
}
