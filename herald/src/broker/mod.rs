//! Subscriber registry and event delivery.
//!
//! The [`Broker`] tracks every live consumer, assigns it a consumer ID and
//! delivers published events to the right subset:
//!
//! - events addressed to a consumer ID (`> 0`) reach the earliest registered
//!   subscriber holding that ID, or nobody;
//! - broadcast events (`0`) reach every subscriber, each receiving a copy
//!   stamped with its own ID.
//!
//! Subscribe, unsubscribe, publish and close all take the same exclusive
//! lock for their whole duration. Delivery is a blocking handoff into a
//! one-slot channel, so a subscriber that stops reading stalls `publish`
//! while it holds that lock, and with it every other registry operation.
//! Set a delivery timeout to bound that stall per recipient; a recipient
//! that misses the deadline simply does not get that event.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use herald::broker::Broker;
//! use herald::ids::SequentialAllocator;
//!
//! let broker = Broker::new(Arc::new(SequentialAllocator::new()));
//! let mut subscription = broker.subscribe().await;
//!
//! broker.publish(&broker.new_event("hello", 0)).await;
//! let event = subscription.recv().await;
//!
//! broker.unsubscribe(subscription.key()).await;
//! ```

mod event;
mod subscription;

pub use event::{Event, BROADCAST};
pub use subscription::{Subscription, SubscriptionKey};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use tokio::sync::{mpsc, Mutex};

use crate::config::BrokerConfig;
use crate::error::{Error, Result};
use crate::ids::{allocate_or_zero, IdAllocator, SnowflakeAllocator};

/// Pending events a subscriber channel can hold before `publish` blocks.
const CHANNEL_CAPACITY: usize = 1;

#[derive(Debug)]
struct Subscriber {
    consumer_id: u64,
    sender: mpsc::Sender<Event>,
}

#[derive(Debug, Default)]
struct Registry {
    next_key: u64,
    // keys grow monotonically, so iteration follows registration order
    subscribers: BTreeMap<SubscriptionKey, Subscriber>,
}

impl Registry {
    fn insert(&mut self, consumer_id: u64, sender: mpsc::Sender<Event>) -> SubscriptionKey {
        self.next_key += 1;
        let key = SubscriptionKey::new(self.next_key);
        self.subscribers.insert(key, Subscriber { consumer_id, sender });
        key
    }
}

/// Owner of the live subscriber registry.
#[derive(Debug)]
pub struct Broker {
    registry: Mutex<Registry>,
    ids: Arc<dyn IdAllocator>,
    delivery_timeout: Option<Duration>,
}

impl Broker {
    /// Create a broker that draws every ID from `ids`.
    pub fn new(ids: Arc<dyn IdAllocator>) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            ids,
            delivery_timeout: None,
        }
    }

    /// Create a broker with a snowflake allocator and the configured timeout.
    pub fn from_config(config: &BrokerConfig) -> Result<Self> {
        let ids = SnowflakeAllocator::new(config.worker_id)
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        Ok(Self::new(Arc::new(ids)).with_delivery_timeout(config.delivery_timeout()))
    }

    /// Bound how long `publish` waits on each recipient (`None` waits forever).
    #[must_use]
    pub fn with_delivery_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// The configured per-recipient delivery timeout.
    pub fn delivery_timeout(&self) -> Option<Duration> {
        self.delivery_timeout
    }

    /// Build an event whose ID comes from this broker's allocator.
    pub fn new_event(&self, message: impl Into<Bytes>, consumer: u64) -> Event {
        Event::new(self.ids.as_ref(), message, consumer)
    }

    /// Register a new subscriber and hand back its read side.
    ///
    /// The caller must pass the subscription's key to
    /// [`unsubscribe`](Self::unsubscribe) exactly once when it is done.
    pub async fn subscribe(&self) -> Subscription {
        let consumer_id = allocate_or_zero(self.ids.as_ref(), "consumer");
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);

        let mut registry = self.registry.lock().await;
        let key = registry.insert(consumer_id, sender);

        tracing::info!(consumer_id, %key, "client {} connected", consumer_id);
        Subscription::new(key, consumer_id, receiver)
    }

    /// Remove a subscriber and close its channel.
    ///
    /// Unknown keys, including ones already removed, are ignored. Returns
    /// whether an entry was removed.
    pub async fn unsubscribe(&self, key: SubscriptionKey) -> bool {
        let mut registry = self.registry.lock().await;

        // dropping the only sender closes the channel
        let Some(subscriber) = registry.subscribers.remove(&key) else {
            tracing::debug!(%key, "unsubscribe of unknown subscription ignored");
            return false;
        };

        let remaining = registry.subscribers.len();
        tracing::info!(
            consumer_id = subscriber.consumer_id,
            remaining,
            "client {} killed, {} remaining",
            subscriber.consumer_id,
            remaining
        );
        true
    }

    /// Deliver `event` and return how many subscribers received it.
    ///
    /// Unmatched addressed events are delivered to nobody, which is not an
    /// error.
    pub async fn publish(&self, event: &Event) -> usize {
        let registry = self.registry.lock().await;
        let mut delivered = 0;

        if event.is_broadcast() {
            for subscriber in registry.subscribers.values() {
                if self.deliver(subscriber, event.stamped(subscriber.consumer_id)).await {
                    delivered += 1;
                }
            }
        } else if let Some(subscriber) = registry
            .subscribers
            .values()
            .find(|s| s.consumer_id == event.consumer())
        {
            if self.deliver(subscriber, event.clone()).await {
                delivered = 1;
            }
        }

        tracing::info!(
            event_id = event.id(),
            consumer_id = event.consumer(),
            delivered,
            "published message to {} subscribers",
            delivered
        );
        delivered
    }

    /// Close every remaining subscriber channel and empty the registry.
    ///
    /// Meant to run once at shutdown, after traffic has stopped. Returns the
    /// number of channels closed.
    pub async fn close(&self) -> usize {
        let mut registry = self.registry.lock().await;
        let closed = std::mem::take(&mut registry.subscribers).len();
        tracing::info!(closed, "broker closed");
        closed
    }

    /// Number of registered subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.registry.lock().await.subscribers.len()
    }

    /// Whether `key` is still registered.
    pub async fn is_subscribed(&self, key: SubscriptionKey) -> bool {
        self.registry.lock().await.subscribers.contains_key(&key)
    }

    async fn deliver(&self, subscriber: &Subscriber, event: Event) -> bool {
        let Some(limit) = self.delivery_timeout else {
            return subscriber.sender.send(event).await.is_ok();
        };

        match tokio::time::timeout(limit, subscriber.sender.send(event)).await {
            Ok(sent) => sent.is_ok(),
            Err(_) => {
                tracing::warn!(
                    consumer_id = subscriber.consumer_id,
                    timeout_ms = limit.as_millis() as u64,
                    "subscriber did not accept event in time, skipping"
                );
                false
            }
        }
    }
}
