//! Messaging destination configuration.

use serde::Deserialize;

/// Default destination queue.
pub const DEFAULT_QUEUE: &str = "eventline-notifications";

/// Messaging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Durable queue both publisher and consumer declare.
    pub queue: String,
    /// Dead-letter exchange for rejected deliveries. Unset drops them.
    pub dead_letter_exchange: Option<String>,
    /// Connection name shown in the broker management UI.
    pub connection_name: String,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            queue: DEFAULT_QUEUE.to_string(),
            dead_letter_exchange: None,
            connection_name: "eventline".to_string(),
        }
    }
}
