//! Event model.
//!
//! A closed set of typed domain events and their CloudEvents envelope.
//! Every variant pairs a discriminator (the envelope `type`) with a
//! strongly-shaped payload. Decoding is all-or-nothing: an unknown
//! discriminator or a payload that does not match its variant exactly is
//! an error, never coerced.
//!
//! Adding an event means adding a [`DomainEvent`] variant, an [`EventType`]
//! entry, and its payload struct. Nothing else accepts unknown types.

mod envelope;

use std::fmt;

use cloudevents::event::AttributesReader;
use serde::{Deserialize, Serialize};

pub use envelope::{
    from_json, to_json, Envelope, DATA_CONTENT_TYPE, ENVELOPE_CONTENT_TYPE, EVENT_SOURCE,
};

/// Discriminator of the ping event.
pub const PING_EVENT_TYPE: &str = "ping";

/// Errors raised while turning an envelope back into a typed event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Unknown event type '{0}'")]
    UnknownEventType(String),

    #[error("Malformed payload for event type '{event_type}': {reason}")]
    MalformedPayload { event_type: String, reason: String },
}

/// Discriminator table of every known event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Ping,
}

impl EventType {
    /// All known event types.
    pub const ALL: &'static [EventType] = &[EventType::Ping];

    /// Wire discriminator for this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Ping => PING_EVENT_TYPE,
        }
    }

    /// Look up a wire discriminator. Returns `None` for anything outside the closed set.
    pub fn from_discriminator(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == value)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of the ping event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PingData {
    /// Free-text message.
    pub message: String,
}

impl PingData {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Typed domain event: one variant per known discriminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    Ping(PingData),
}

impl DomainEvent {
    /// Convenience constructor for a ping.
    pub fn ping(message: impl Into<String>) -> Self {
        DomainEvent::Ping(PingData::new(message))
    }

    /// Discriminator of this event.
    pub fn event_type(&self) -> EventType {
        match self {
            DomainEvent::Ping(_) => EventType::Ping,
        }
    }

    fn payload(&self) -> serde_json::Value {
        match self {
            DomainEvent::Ping(data) => serde_json::json!({ "message": data.message }),
        }
    }
}

/// Wrap a typed event into a new envelope with a unique id.
pub fn encode(event: &DomainEvent) -> Envelope {
    envelope::new_envelope(event.event_type().as_str(), event.payload())
}

/// Match the envelope `type` against the closed set and deserialize `data`
/// into that variant's payload.
pub fn decode(envelope: &Envelope) -> Result<DomainEvent, DecodeError> {
    let raw_type = envelope.ty();
    let event_type = EventType::from_discriminator(raw_type)
        .ok_or_else(|| DecodeError::UnknownEventType(raw_type.to_string()))?;

    let data = envelope::json_data(envelope, raw_type)?;

    match event_type {
        EventType::Ping => payload::<PingData>(event_type, data).map(DomainEvent::Ping),
    }
}

/// Parse a wire body and decode it in one step.
///
/// Returns the envelope alongside the event so callers can log its attributes.
pub fn decode_bytes(body: &[u8]) -> Result<(Envelope, DomainEvent), DecodeError> {
    let envelope = from_json(body)?;
    let event = decode(&envelope)?;
    Ok((envelope, event))
}

fn payload<T: serde::de::DeserializeOwned>(
    event_type: EventType,
    data: &serde_json::Value,
) -> Result<T, DecodeError> {
    // Structs would otherwise also accept positional arrays.
    if !data.is_object() {
        return Err(DecodeError::MalformedPayload {
            event_type: event_type.to_string(),
            reason: "data is not a JSON object".to_string(),
        });
    }
    T::deserialize(data).map_err(|e| DecodeError::MalformedPayload {
        event_type: event_type.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudevents::{EventBuilder, EventBuilderV10};

    fn envelope_with(ty: &str, data: serde_json::Value) -> Envelope {
        EventBuilderV10::new()
            .id("test-1")
            .ty(ty)
            .source("/test")
            .data(DATA_CONTENT_TYPE, data)
            .build()
            .expect("should build valid event")
    }

    #[test]
    fn test_encode_wraps_ping() {
        let envelope = encode(&DomainEvent::ping("hello"));

        assert_eq!(envelope.ty(), PING_EVENT_TYPE);
        assert_eq!(envelope.source().to_string(), EVENT_SOURCE);
        assert_eq!(
            envelope.data(),
            Some(&cloudevents::Data::Json(
                serde_json::json!({"message": "hello"})
            ))
        );
    }

    #[test]
    fn test_decode_roundtrips() {
        let original = DomainEvent::ping("roundtrip");
        let decoded = decode(&encode(&original)).expect("should decode");
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_decode_bytes_roundtrips_through_wire() {
        let original = DomainEvent::ping("over the wire");
        let envelope = encode(&original);
        let body = to_json(&envelope).unwrap();

        let (parsed, decoded) = decode_bytes(&body).expect("should decode");

        assert_eq!(decoded, original);
        assert_eq!(parsed.id(), envelope.id());
    }

    #[test]
    fn test_decode_pong_example() {
        let envelope = envelope_with("ping", serde_json::json!({"message": "pong"}));
        let DomainEvent::Ping(data) = decode(&envelope).unwrap();
        assert_eq!(data.message, "pong");
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let envelope = envelope_with("com.unknown.event", serde_json::json!({"key": "value"}));
        assert_eq!(
            decode(&envelope),
            Err(DecodeError::UnknownEventType("com.unknown.event".to_string()))
        );
    }

    #[test]
    fn test_decode_type_is_case_sensitive() {
        let envelope = envelope_with("PING", serde_json::json!({"message": "x"}));
        assert!(matches!(
            decode(&envelope),
            Err(DecodeError::UnknownEventType(_))
        ));
    }

    #[test]
    fn test_decode_rejects_missing_field() {
        let envelope = envelope_with("ping", serde_json::json!({}));
        assert!(matches!(
            decode(&envelope),
            Err(DecodeError::MalformedPayload { ref event_type, .. }) if event_type == "ping"
        ));
    }

    #[test]
    fn test_decode_rejects_mistyped_field() {
        let envelope = envelope_with("ping", serde_json::json!({"message": 42}));
        assert!(matches!(
            decode(&envelope),
            Err(DecodeError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_extra_field() {
        let envelope = envelope_with(
            "ping",
            serde_json::json!({"message": "hi", "order_id": "123"}),
        );
        assert!(matches!(
            decode(&envelope),
            Err(DecodeError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_non_object_payload() {
        let envelope = envelope_with("ping", serde_json::json!(["hi"]));
        assert!(matches!(
            decode(&envelope),
            Err(DecodeError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn test_decode_bytes_rejects_invalid_body() {
        assert!(matches!(
            decode_bytes(b"not a valid cloud event"),
            Err(DecodeError::InvalidEnvelope(_))
        ));
    }

    #[test]
    fn test_event_type_table() {
        for event_type in EventType::ALL {
            assert_eq!(
                EventType::from_discriminator(event_type.as_str()),
                Some(*event_type)
            );
        }
        assert_eq!(EventType::from_discriminator("pong"), None);
        assert_eq!(EventType::from_discriminator(""), None);
    }
}
