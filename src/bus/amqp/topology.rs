//! Queue and dead-letter declarations.
//!
//! Events travel over the default exchange straight to one durable queue.
//! When dead-lettering is configured, rejected deliveries are rerouted by
//! the broker through a fanout exchange into `<queue>.dlq`.

use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable},
    Channel, ExchangeKind,
};
use tracing::info;

use crate::bus::{BusError, Result};
use crate::config::MessagingConfig;

/// Queue argument naming the exchange that receives rejected deliveries.
const DEAD_LETTER_EXCHANGE_ARG: &str = "x-dead-letter-exchange";

/// Suffix of the queue that collects dead-lettered deliveries.
const DEAD_LETTER_QUEUE_SUFFIX: &str = ".dlq";

/// Where rejected deliveries go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterConfig {
    /// Fanout exchange receiving rejected deliveries.
    pub exchange: String,
}

/// Everything declared before publishing or consuming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTopology {
    pub queue: String,
    pub dead_letter: Option<DeadLetterConfig>,
}

impl QueueTopology {
    /// A single durable queue. Rejected deliveries are dropped.
    pub fn durable(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            dead_letter: None,
        }
    }

    /// Route rejected deliveries to `exchange` and on into [`Self::dead_letter_queue`].
    pub fn with_dead_letter(mut self, exchange: impl Into<String>) -> Self {
        self.dead_letter = Some(DeadLetterConfig {
            exchange: exchange.into(),
        });
        self
    }

    pub fn from_config(config: &MessagingConfig) -> Self {
        let topology = Self::durable(config.queue.clone());
        match &config.dead_letter_exchange {
            Some(exchange) if !exchange.is_empty() => topology.with_dead_letter(exchange.clone()),
            _ => topology,
        }
    }

    /// Name of the dead-letter queue, if dead-lettering is enabled.
    pub fn dead_letter_queue(&self) -> Option<String> {
        self.dead_letter
            .as_ref()
            .map(|_| format!("{}{}", self.queue, DEAD_LETTER_QUEUE_SUFFIX))
    }

    fn queue_arguments(&self) -> FieldTable {
        let mut args = FieldTable::default();
        if let Some(dl) = &self.dead_letter {
            args.insert(
                DEAD_LETTER_EXCHANGE_ARG.into(),
                AMQPValue::LongString(dl.exchange.clone().into()),
            );
        }
        args
    }

    /// Declare the queue (and dead-letter plumbing) on `channel`.
    ///
    /// Idempotent as long as the existing declarations match. The broker
    /// refuses a redeclaration with different arguments and closes the
    /// channel, which surfaces here as [`BusError::Declare`].
    pub async fn declare(&self, channel: &Channel) -> Result<()> {
        if let (Some(dl), Some(dlq)) = (&self.dead_letter, self.dead_letter_queue()) {
            channel
                .exchange_declare(
                    &dl.exchange,
                    ExchangeKind::Fanout,
                    ExchangeDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| declare_error(&dl.exchange, e))?;

            channel
                .queue_declare(
                    &dlq,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| declare_error(&dlq, e))?;

            channel
                .queue_bind(
                    &dlq,
                    &dl.exchange,
                    "",
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| declare_error(&dlq, e))?;

            info!(exchange = %dl.exchange, queue = %dlq, "Declared dead-letter queue");
        }

        channel
            .queue_declare(
                &self.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                self.queue_arguments(),
            )
            .await
            .map_err(|e| declare_error(&self.queue, e))?;

        info!(queue = %self.queue, "Declared queue");
        Ok(())
    }
}

fn declare_error(name: &str, err: lapin::Error) -> BusError {
    BusError::Declare {
        name: name.to_string(),
        reason: err.to_string(),
    }
}
