//! Broadcast event values.

use std::fmt;

use axum::body::Bytes;

use crate::ids::{allocate_or_zero, IdAllocator};

/// Consumer ID meaning "every connected consumer".
pub const BROADCAST: u64 = 0;

/// One message moving through the broker.
///
/// Immutable once built. Broadcast delivery hands each recipient its own
/// copy stamped with that recipient's consumer ID; the original keeps
/// [`BROADCAST`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    id: u64,
    message: Bytes,
    consumer: u64,
}

impl Event {
    /// Build an event with a freshly allocated ID.
    ///
    /// Allocation failure degrades the ID to `0`; it is logged, never returned.
    /// An empty message is allowed.
    pub fn new(ids: &dyn IdAllocator, message: impl Into<Bytes>, consumer: u64) -> Self {
        Self::from_parts(allocate_or_zero(ids, "event"), message, consumer)
    }

    /// Build an event from already known parts.
    pub fn from_parts(id: u64, message: impl Into<Bytes>, consumer: u64) -> Self {
        Self {
            id,
            message: message.into(),
            consumer,
        }
    }

    /// Unique event ID, `0` when allocation failed.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Raw message bytes.
    pub fn message(&self) -> &Bytes {
        &self.message
    }

    /// The consumer this event is addressed to, or [`BROADCAST`].
    pub fn consumer(&self) -> u64 {
        self.consumer
    }

    /// Whether the event goes to every consumer.
    pub fn is_broadcast(&self) -> bool {
        self.consumer == BROADCAST
    }

    /// Copy of this event carrying `consumer` as its recipient.
    pub(crate) fn stamped(&self, consumer: u64) -> Self {
        Self {
            id: self.id,
            message: self.message.clone(),
            consumer,
        }
    }
}

/// Plain-text rendering: `<id>: <message>`, with the message decoded lossily.
impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, String::from_utf8_lossy(&self.message))
    }
}
