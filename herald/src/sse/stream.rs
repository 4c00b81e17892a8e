//! Per-connection streaming loop.
//!
//! A [`Listener`] is Listening from the moment it subscribes until it is
//! Closed by one of:
//! - the server shutdown token firing,
//! - the broker closing its channel,
//! - the connection going away, which drops the listener.
//!
//! Every path ends in `Drop`, which unsubscribes exactly once.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Bytes;
use axum::response::sse::Event as SseEvent;
use futures::stream::{self, Stream};
use tokio_util::sync::CancellationToken;

use super::wire;
use crate::broker::{Broker, Event, Subscription};

/// Listening or Closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Waiting for events
    Listening,
    /// Finished; never restarts
    Closed,
}

/// One consumer connection's view of the broker.
#[derive(Debug)]
pub struct Listener {
    broker: Arc<Broker>,
    subscription: Subscription,
    shutdown: CancellationToken,
    state: ListenerState,
}

impl Listener {
    /// Subscribe and announce the new consumer ID to its owner.
    ///
    /// The announcement is an empty event addressed to the new ID, published
    /// from a separate task. Anonymous subscriptions (ID `0`) skip it, since
    /// an event addressed to `0` would reach every consumer.
    pub async fn open(broker: Arc<Broker>, shutdown: CancellationToken) -> Self {
        let subscription = broker.subscribe().await;
        let listener = Self {
            broker: Arc::clone(&broker),
            subscription,
            shutdown,
            state: ListenerState::Listening,
        };

        let consumer_id = listener.consumer_id();
        if listener.subscription.is_addressable() {
            let announcement = broker.new_event(Bytes::new(), consumer_id);
            tokio::spawn(async move {
                broker.publish(&announcement).await;
            });
        } else {
            tracing::warn!("no consumer id available, listener receives broadcasts only");
        }

        listener
    }

    /// Consumer ID assigned to this connection.
    pub fn consumer_id(&self) -> u64 {
        self.subscription.consumer_id()
    }

    /// Current state.
    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// Wait for the next event, `None` once Closed.
    ///
    /// Shutdown takes precedence over a pending event.
    pub async fn next_event(&mut self) -> Option<Event> {
        if self.state == ListenerState::Closed {
            return None;
        }

        tokio::select! {
            biased;

            _ = self.shutdown.cancelled() => {
                self.close("server shutting down");
                None
            }
            event = self.subscription.recv() => {
                if event.is_none() {
                    self.close("subscription closed by broker");
                }
                event
            }
        }
    }

    /// Turn the listener into a stream of SSE frames.
    pub fn into_stream(self) -> impl Stream<Item = Result<SseEvent, Infallible>> + Send + 'static {
        stream::unfold(self, |mut listener| async move {
            let event = listener.next_event().await?;
            Some((Ok(wire::frame(&event)), listener))
        })
    }

    fn close(&mut self, reason: &'static str) {
        tracing::debug!(consumer_id = self.consumer_id(), reason, "listener closed");
        self.state = ListenerState::Closed;
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let broker = Arc::clone(&self.broker);
        let key = self.subscription.key();

        // unsubscribe needs the registry lock, which may be held right now
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    broker.unsubscribe(key).await;
                });
            }
            Err(_) => {
                tracing::warn!(%key, "no runtime to unsubscribe on, entry left for broker close");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BROADCAST;
    use crate::ids::tests::FailingAllocator;
    use crate::ids::SequentialAllocator;
    use futures::StreamExt;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(1);

    fn broker() -> Arc<Broker> {
        Arc::new(Broker::new(Arc::new(SequentialAllocator::new())))
    }

    async fn wait_for_count(broker: &Broker, expected: usize) {
        timeout(WAIT, async {
            while broker.subscriber_count().await != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("subscriber count never settled");
    }

    #[tokio::test]
    async fn test_announces_own_id() {
        let broker = broker();
        let mut listener = Listener::open(Arc::clone(&broker), CancellationToken::new()).await;

        let event = timeout(WAIT, listener.next_event()).await.unwrap().unwrap();
        assert_eq!(event.consumer(), listener.consumer_id());
        assert!(event.message().is_empty());
        assert_eq!(listener.state(), ListenerState::Listening);
    }

    #[tokio::test]
    async fn test_receives_broadcast_with_own_id() {
        let broker = broker();
        let mut listener = Listener::open(Arc::clone(&broker), CancellationToken::new()).await;
        timeout(WAIT, listener.next_event()).await.unwrap().unwrap();

        broker.publish(&broker.new_event("hello", BROADCAST)).await;
        let event = timeout(WAIT, listener.next_event()).await.unwrap().unwrap();
        assert_eq!(event.message(), &Bytes::from_static(b"hello"));
        assert_eq!(event.consumer(), listener.consumer_id());
    }

    #[tokio::test]
    async fn test_shutdown_wins_over_pending_event() {
        let broker = broker();
        let shutdown = CancellationToken::new();
        let mut listener = Listener::open(Arc::clone(&broker), shutdown.clone()).await;

        // the slot is full afterwards: either the announcement or this event
        let pending = broker.new_event("pending", BROADCAST);
        let _ = timeout(Duration::from_millis(50), broker.publish(&pending)).await;
        shutdown.cancel();

        assert!(listener.next_event().await.is_none());
        assert_eq!(listener.state(), ListenerState::Closed);
        assert!(listener.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let broker = broker();
        let listener = Listener::open(Arc::clone(&broker), CancellationToken::new()).await;
        assert_eq!(broker.subscriber_count().await, 1);

        drop(listener);
        wait_for_count(&broker, 0).await;
    }

    #[tokio::test]
    async fn test_broker_close_ends_stream() {
        let broker = broker();
        let listener = Listener::open(Arc::clone(&broker), CancellationToken::new()).await;
        let mut frames = Box::pin(listener.into_stream());

        // announcement frame
        assert!(timeout(WAIT, frames.next()).await.unwrap().is_some());

        broker.close().await;
        assert!(timeout(WAIT, frames.next()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_anonymous_listener_skips_announcement() {
        let broker = Arc::new(Broker::new(Arc::new(FailingAllocator)));
        let other = broker.subscribe().await;
        let mut listener = Listener::open(Arc::clone(&broker), CancellationToken::new()).await;
        assert_eq!(listener.consumer_id(), 0);

        let nothing = timeout(Duration::from_millis(100), listener.next_event()).await;
        assert!(nothing.is_err(), "anonymous listener must not announce to everyone");
        drop(other);
    }
}
