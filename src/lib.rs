//! Eventline - durable event messaging over AMQP
//!
//! Typed domain events wrapped in CloudEvents envelopes, published to a
//! durable RabbitMQ queue and consumed strictly one at a time with
//! at-least-once delivery.

pub mod bus;
pub mod config;
pub mod events;
pub mod health;
pub mod utils;
