//! Per-delivery state machine.
//!
//! ```text
//! RECEIVED -> DECODING -> DECODE_OK -> HANDLING -> HANDLE_OK   -> ACKED
//!                                              -> HANDLE_FAIL -> REJECTED
//!                      -> DECODE_FAIL -> REJECTED
//! ```
//!
//! Every delivery ends in exactly one of ACKED or REJECTED. Rejections never
//! requeue: a poison message is dropped (or dead-lettered by the broker)
//! after one attempt, and the handler is never retried here.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use cloudevents::event::AttributesReader;
use futures::{FutureExt, Stream, StreamExt};
use tracing::{error, info, warn, Instrument};

use super::{EventHandler, Result};
use crate::events;

/// An in-flight unit of consumption, owned by the task processing it.
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Raw message body.
    fn body(&self) -> &[u8];

    /// Broker message id, as set by the publisher.
    fn message_id(&self) -> Option<&str>;

    /// Correlation id propagated from the publisher.
    fn correlation_id(&self) -> Option<&str>;

    /// Acknowledge the delivery.
    async fn ack(&self) -> Result<()>;

    /// Reject the delivery without requeue.
    async fn reject(&self) -> Result<()>;
}

/// Why a delivery was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Body was not a valid envelope or did not decode into a known event.
    Decode,
    /// Handler returned an error.
    Handler,
}

/// Terminal state of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Acked,
    Rejected(RejectReason),
}

/// Drive one delivery from RECEIVED to ACKED or REJECTED.
///
/// A panicking handler counts as a handler failure.
///
/// Each call runs in its own `delivery` span so log lines carry only this
/// delivery's message id, correlation id and, once decoded, event attributes.
pub async fn process_delivery<D>(delivery: &D, handler: &dyn EventHandler) -> DeliveryOutcome
where
    D: Delivery + ?Sized,
{
    let span = tracing::info_span!(
        "delivery",
        message_id = delivery.message_id().unwrap_or_default(),
        correlation_id = delivery.correlation_id().unwrap_or_default(),
        event_type = tracing::field::Empty,
        event_id = tracing::field::Empty,
        event_source = tracing::field::Empty,
    );

    async {
        let (envelope, event) = match events::decode_bytes(delivery.body()) {
            Ok(decoded) => decoded,
            Err(e) => {
                error!(error = %e, "Invalid event envelope, rejecting");
                settle(delivery, DeliveryOutcome::Rejected(RejectReason::Decode)).await;
                return DeliveryOutcome::Rejected(RejectReason::Decode);
            }
        };

        let span = tracing::Span::current();
        span.record("event_type", envelope.ty());
        span.record("event_id", envelope.id());
        span.record("event_source", envelope.source().as_str());

        info!("Processing event");
        let handled = AssertUnwindSafe(async { handler.handle(event).await })
            .catch_unwind()
            .await;
        let outcome = match handled {
            Ok(Ok(())) => DeliveryOutcome::Acked,
            Ok(Err(e)) => {
                error!(error = %e, "Event processing failed, rejecting");
                DeliveryOutcome::Rejected(RejectReason::Handler)
            }
            Err(panic) => {
                error!(
                    panic = %panic_message(panic.as_ref()),
                    "Event handler panicked, rejecting"
                );
                DeliveryOutcome::Rejected(RejectReason::Handler)
            }
        };

        settle(delivery, outcome).await;
        if outcome == DeliveryOutcome::Acked {
            info!("Event processed");
        }
        outcome
    }
    .instrument(span)
    .await
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Apply the terminal outcome to the broker.
///
/// A failed ack/reject is logged; the broker redelivers unsettled messages
/// once the channel goes away.
async fn settle<D: Delivery + ?Sized>(delivery: &D, outcome: DeliveryOutcome) {
    let result = match outcome {
        DeliveryOutcome::Acked => delivery.ack().await,
        DeliveryOutcome::Rejected(_) => delivery.reject().await,
    };
    if let Err(e) = result {
        warn!(error = %e, outcome = ?outcome, "Failed to settle delivery");
    }
}

/// Process deliveries strictly one at a time, in stream order.
///
/// The next delivery is not pulled until the previous one is settled, so
/// two deliveries are never in the handler at once. Returns when the stream
/// ends or yields an error, which is handed back to the caller.
pub async fn drain<S, D>(deliveries: S, handler: &dyn EventHandler) -> Option<super::BusError>
where
    S: Stream<Item = Result<D>>,
    D: Delivery,
{
    futures::pin_mut!(deliveries);
    while let Some(next) = deliveries.next().await {
        match next {
            Ok(delivery) => {
                process_delivery(&delivery, handler).await;
            }
            Err(e) => return Some(e),
        }
    }
    None
}
