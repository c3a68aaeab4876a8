//! eventline-consumer: Reference consumer process
//!
//! Connects to RabbitMQ, consumes the configured queue one delivery at a
//! time and logs every decoded event. Shuts down gracefully on Ctrl-C.
//!
//! ## Configuration
//! ```yaml
//! app:
//!   app_env: development
//!   log_level: info
//! rabbitmq:
//!   host: localhost
//!   user: guest
//!   password: guest
//! messaging:
//!   queue: eventline-notifications
//!   dead_letter_exchange: eventline-notifications.dlx
//! ```
//!
//! The config file path may be passed as the first argument or via
//! `EVENTLINE_CONFIG`. Any key can be overridden with `EVENTLINE__SECTION__KEY`.

use std::sync::Arc;

use tracing::info;

use eventline::bus::{
    AmqpConfig, BusError, ConnectionManager, Consumer, EventHandler, QueueTopology,
};
use eventline::config::Config;
use eventline::events::DomainEvent;
use eventline::health::{ConnectionHealth, HealthReport};
use eventline::utils::bootstrap::{init_tracing, safe_shutdown};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args().nth(1);
    let config = Config::load(path.as_deref())?;
    init_tracing(&config.app);

    info!(app_env = ?config.app.app_env, "Starting eventline-consumer");

    let manager = Arc::new(ConnectionManager::connect(AmqpConfig::from_config(&config)?).await?);

    let topology = QueueTopology::from_config(&config.messaging);
    let mut consumer = Consumer::new(manager.clone(), topology);
    consumer.setup().await?;

    let handler: Arc<dyn EventHandler> = Arc::new(|event: DomainEvent| async move {
        match event {
            DomainEvent::Ping(data) => info!(message = %data.message, "Received ping"),
        }
        Ok::<(), BusError>(())
    });
    consumer.start(handler).await?;

    let rabbitmq: &dyn ConnectionHealth = manager.as_ref();
    let health = HealthReport::collect(&[("rabbitmq", rabbitmq)]).await;
    info!(status = ?health.status, "eventline-consumer started");

    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    safe_shutdown("consumer", consumer.stop()).await;
    safe_shutdown("rabbitmq_channel", consumer.close()).await;
    safe_shutdown("rabbitmq_connection", manager.close()).await;
    info!("Shutdown complete");

    Ok(())
}
