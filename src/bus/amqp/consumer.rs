//! Sequential queue consumer.
//!
//! Deliveries are handled one at a time on a dedicated task. If the channel
//! or connection drops, the task re-opens a channel, redeclares the topology
//! and resubscribes under the same consumer tag, backing off between
//! attempts until it succeeds or is stopped.

use std::sync::Arc;

use backon::BackoffBuilder;
use futures::StreamExt;
use lapin::{
    options::{BasicCancelOptions, BasicConsumeOptions},
    types::FieldTable,
    Channel,
};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{close_quietly, AmqpDelivery, ConnectionManager, QueueTopology, REPLY_SUCCESS};
use crate::bus::delivery::drain;
use crate::bus::{BusError, EventHandler, Result};
use crate::utils::retry::{reconnect_backoff, MAX_RECONNECT_DELAY};

/// Consumes a durable queue and feeds each delivery through an [`EventHandler`].
pub struct Consumer {
    manager: Arc<ConnectionManager>,
    topology: QueueTopology,
    consumer_tag: String,
    channel: Option<Channel>,
    running: Option<Running>,
}

struct Running {
    stop_tx: watch::Sender<bool>,
    /// Channel the live subscription is on; replaced on restoration.
    current: Arc<Mutex<Channel>>,
    task: JoinHandle<()>,
}

impl Consumer {
    pub fn new(manager: Arc<ConnectionManager>, topology: QueueTopology) -> Self {
        Self {
            manager,
            topology,
            consumer_tag: format!("eventline-{}", uuid::Uuid::new_v4()),
            channel: None,
            running: None,
        }
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Open a prefetch-limited channel and declare the queue.
    ///
    /// Safe to call again before [`Consumer::start`]; the previous channel is closed.
    pub async fn setup(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(BusError::Subscribe("consumer already started".to_string()));
        }
        let channel = self.manager.open_channel().await?;
        self.topology.declare(&channel).await?;
        if let Some(previous) = self.channel.replace(channel) {
            close_quietly(previous).await;
        }
        Ok(())
    }

    /// Begin consuming. Returns once the subscription is registered; handling
    /// continues in the background until [`Consumer::stop`].
    pub async fn start(&mut self, handler: Arc<dyn EventHandler>) -> Result<()> {
        if self.running.is_some() {
            return Err(BusError::Subscribe("consumer already started".to_string()));
        }
        let channel = self
            .channel
            .clone()
            .ok_or(BusError::NotReady("consumer setup has not run"))?;

        let consumer = subscribe(&channel, &self.topology.queue, &self.consumer_tag).await?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let current = Arc::new(Mutex::new(channel));
        let ctx = ConsumeLoop {
            manager: self.manager.clone(),
            topology: self.topology.clone(),
            consumer_tag: self.consumer_tag.clone(),
            current: current.clone(),
            handler,
        };
        let task = tokio::spawn(ctx.run(consumer, stop_rx));

        self.running = Some(Running {
            stop_tx,
            current,
            task,
        });

        info!(
            queue = %self.topology.queue,
            consumer_tag = %self.consumer_tag,
            "Consumer started"
        );
        Ok(())
    }

    /// Whether the consume task is alive.
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    /// Cancel the subscription and wait for the in-flight delivery, if any,
    /// to finish. Safe to call more than once.
    ///
    /// Deliveries the broker pushed before the cancel took effect are still
    /// handled and settled; the consume task exits once the broker confirms
    /// the cancel and the delivery stream ends.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        let Running {
            stop_tx,
            current,
            mut task,
        } = running;

        // Prevents restoration once the stream ends. The task may already be gone.
        let _ = stop_tx.send(true);

        let result = {
            let channel = current.lock().await;
            if channel.status().connected() {
                channel
                    .basic_cancel(&self.consumer_tag, BasicCancelOptions::default())
                    .await
                    .map_err(|e| BusError::Subscribe(format!("Failed to cancel consumer: {}", e)))
            } else {
                Ok(())
            }
        };

        if result.is_err() {
            // Without a cancel the stream never ends.
            task.abort();
        }
        match (&mut task).await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {
                warn!(consumer_tag = %self.consumer_tag, "Consume task aborted")
            }
            Err(e) => warn!(error = %e, "Consume task did not exit cleanly"),
        }

        self.channel = Some(current.lock().await.clone());
        info!(consumer_tag = %self.consumer_tag, "Consumer stopped");
        result
    }

    /// Stop consuming, then close the channel.
    pub async fn close(&mut self) -> Result<()> {
        let stopped = self.stop().await;

        let closed = match self.channel.take() {
            Some(channel) if channel.status().connected() => channel
                .close(REPLY_SUCCESS, "shutdown")
                .await
                .map_err(|e| BusError::Connection(format!("Failed to close channel: {}", e))),
            _ => Ok(()),
        };

        stopped.and(closed)
    }
}

async fn subscribe(
    channel: &Channel,
    queue: &str,
    consumer_tag: &str,
) -> Result<lapin::Consumer> {
    channel
        .basic_consume(
            queue,
            consumer_tag,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| BusError::Subscribe(format!("Failed to start consumer: {}", e)))
}

/// Resolves once stop has been requested or the stop handle is dropped.
async fn stopped(mut stop: watch::Receiver<bool>) {
    loop {
        let requested = *stop.borrow_and_update();
        if requested || stop.changed().await.is_err() {
            return;
        }
    }
}

struct ConsumeLoop {
    manager: Arc<ConnectionManager>,
    topology: QueueTopology,
    consumer_tag: String,
    current: Arc<Mutex<Channel>>,
    handler: Arc<dyn EventHandler>,
}

impl ConsumeLoop {
    async fn run(self, mut consumer: lapin::Consumer, stop: watch::Receiver<bool>) {
        loop {
            // Runs until the broker ends the subscription: a requested cancel,
            // a broker-side cancel or a lost channel. Buffered deliveries are
            // handled first, so none is left unsettled.
            let deliveries = consumer.map(|item| {
                item.map(AmqpDelivery::from)
                    .map_err(|e| BusError::Connection(format!("Delivery stream failed: {}", e)))
            });

            let failure = drain(deliveries, self.handler.as_ref()).await;

            let stopping = *stop.borrow();
            if stopping {
                debug!(consumer_tag = %self.consumer_tag, "Consume loop exiting");
                return;
            }

            match &failure {
                Some(e) => warn!(error = %e, queue = %self.topology.queue, "Subscription lost"),
                None => warn!(queue = %self.topology.queue, "Subscription cancelled by broker"),
            }

            match self.restore(&stop).await {
                Some(restored) => consumer = restored,
                None => return,
            }
        }
    }

    /// Resubscribe with backoff. Returns `None` if stopped first.
    async fn restore(&self, stop: &watch::Receiver<bool>) -> Option<lapin::Consumer> {
        let mut delays = reconnect_backoff().build();
        loop {
            let delay = delays.next().unwrap_or(MAX_RECONNECT_DELAY);
            tokio::select! {
                _ = stopped(stop.clone()) => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.resubscribe(stop).await {
                Ok(Some(consumer)) => {
                    info!(
                        queue = %self.topology.queue,
                        consumer_tag = %self.consumer_tag,
                        "Subscription restored"
                    );
                    return Some(consumer);
                }
                Ok(None) => return None,
                Err(e) => {
                    warn!(
                        error = %e,
                        backoff_ms = %delay.as_millis(),
                        "Failed to restore subscription, retrying after backoff"
                    );
                }
            }
        }
    }

    async fn resubscribe(&self, stop: &watch::Receiver<bool>) -> Result<Option<lapin::Consumer>> {
        let channel = self.manager.open_channel().await?;
        self.topology.declare(&channel).await?;

        // Holding the lock orders this against a concurrent stop: either stop
        // is seen here, or stop cancels the new subscription afterwards.
        let mut current = self.current.lock().await;
        let stopping = *stop.borrow();
        if stopping {
            close_quietly(channel).await;
            return Ok(None);
        }

        match subscribe(&channel, &self.topology.queue, &self.consumer_tag).await {
            Ok(consumer) => {
                let previous = std::mem::replace(&mut *current, channel);
                close_quietly(previous).await;
                Ok(Some(consumer))
            }
            Err(e) => {
                close_quietly(channel).await;
                Err(e)
            }
        }
    }
}
