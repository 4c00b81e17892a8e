//! Subscriber handles returned by [`Broker::subscribe`](super::Broker::subscribe).

use std::fmt;

use tokio::sync::mpsc::{self, error::TryRecvError};

use super::event::{Event, BROADCAST};

/// Identity of one registry entry.
///
/// Distinct from the consumer ID: keys are never reused, even when two
/// subscribers end up holding the same consumer ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey(u64);

impl SubscriptionKey {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Read side of one subscriber's delivery channel.
///
/// The channel holds at most one pending event. Once the broker unsubscribes
/// or closes, `recv` drains whatever is pending and then returns `None`.
#[derive(Debug)]
pub struct Subscription {
    key: SubscriptionKey,
    consumer_id: u64,
    receiver: mpsc::Receiver<Event>,
}

impl Subscription {
    pub(crate) fn new(key: SubscriptionKey, consumer_id: u64, receiver: mpsc::Receiver<Event>) -> Self {
        Self {
            key,
            consumer_id,
            receiver,
        }
    }

    /// Registry key to pass back to [`Broker::unsubscribe`](super::Broker::unsubscribe).
    pub fn key(&self) -> SubscriptionKey {
        self.key
    }

    /// Consumer ID assigned at subscribe time.
    pub fn consumer_id(&self) -> u64 {
        self.consumer_id
    }

    /// Whether addressed events can reach this subscriber.
    ///
    /// A subscriber whose ID fell back to `0` only receives broadcasts.
    pub fn is_addressable(&self) -> bool {
        self.consumer_id != BROADCAST
    }

    /// Wait for the next event, `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Take a pending event without waiting.
    pub fn try_recv(&mut self) -> Result<Event, TryRecvError> {
        self.receiver.try_recv()
    }
}
