//! CloudEvents envelope helpers.
//!
//! Events travel as CloudEvents 1.0 documents in structured JSON mode:
//! `specversion`, `type`, `source`, `id`, `time`, `datacontenttype` and
//! `data` all live in one self-contained message body.

pub use cloudevents::Event as Envelope;
use cloudevents::{AttributesWriter, Data};

use super::DecodeError;

/// Source attribute stamped on every envelope produced by this crate.
pub const EVENT_SOURCE: &str = "urn:eventline";

/// AMQP content type for a structured-mode CloudEvent body.
pub const ENVELOPE_CONTENT_TYPE: &str = "application/cloudevents+json";

/// Content type of the `data` attribute.
pub const DATA_CONTENT_TYPE: &str = "application/json";

/// Build a fresh envelope with a unique id.
pub(crate) fn new_envelope(event_type: &str, data: serde_json::Value) -> Envelope {
    let mut envelope = Envelope::default();
    envelope.set_id(uuid::Uuid::new_v4().to_string());
    envelope.set_type(event_type);
    envelope.set_source(EVENT_SOURCE);
    envelope.set_time(Some(chrono::Utc::now()));
    envelope.set_data(DATA_CONTENT_TYPE, data);
    envelope
}

/// Serialize an envelope into its wire body.
pub fn to_json(envelope: &Envelope) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(envelope)
}

/// Parse a wire body into an envelope.
///
/// Fails with [`DecodeError::InvalidEnvelope`] when the body is not a
/// CloudEvents JSON document (missing required attributes included).
pub fn from_json(body: &[u8]) -> Result<Envelope, DecodeError> {
    serde_json::from_slice(body).map_err(|e| DecodeError::InvalidEnvelope(e.to_string()))
}

/// Borrow the envelope payload as JSON.
///
/// Only structured JSON data is accepted; string or binary payloads are not
/// reinterpreted as JSON.
pub(crate) fn json_data<'a>(
    envelope: &'a Envelope,
    event_type: &str,
) -> Result<&'a serde_json::Value, DecodeError> {
    match envelope.data() {
        Some(Data::Json(value)) => Ok(value),
        Some(Data::String(_)) | Some(Data::Binary(_)) => Err(DecodeError::MalformedPayload {
            event_type: event_type.to_string(),
            reason: "data is not a JSON document".to_string(),
        }),
        None => Err(DecodeError::MalformedPayload {
            event_type: event_type.to_string(),
            reason: "data is missing".to_string(),
        }),
    }
}
