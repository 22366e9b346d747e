//! Per-source topics with live fan-out and checkpointed replay.
//!
//! Each configured source gets one bounded broadcast channel, created up
//! front from the immutable source list. Publishing never waits on
//! subscribers: a subscriber that falls more than the channel capacity behind
//! loses the oldest buffered events and is caught up from the archive
//! instead.
//!
//! # Joining replay and live
//!
//! [`Broker::subscribe`] attaches to the live channel *before* it reads the
//! store. Anything stashed while the replay runs is therefore both in the
//! replay and in the live buffer, and the subscription drops live events
//! whose id is not above the last one it delivered. Events for one topic are
//! published in id order, so this yields every id exactly once.

use std::collections::HashMap;
use std::pin::{Pin, pin};
use std::sync::Arc;

use async_stream::try_stream;
use futures::{Stream, TryStreamExt};
use tokio::sync::{broadcast, watch};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::Event;
use crate::store::Store;

/// A subscriber's view of one topic.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event>> + Send>>;

#[derive(Clone)]
pub struct Broker {
    inner: Arc<Inner>,
}

struct Inner {
    names: Vec<String>,
    topics: HashMap<String, broadcast::Sender<Event>>,
    store: Store,
    shutdown: watch::Sender<bool>,
}

impl Broker {
    /// One topic per name in `topics`. `buffer` bounds each topic's live
    /// backlog.
    pub fn new(store: Store, topics: impl IntoIterator<Item = String>, buffer: usize) -> Self {
        let names: Vec<String> = topics.into_iter().collect();
        let topics = names
            .iter()
            .map(|name| (name.clone(), broadcast::channel(buffer.max(1)).0))
            .collect();
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                names,
                topics,
                store,
                shutdown,
            }),
        }
    }

    /// Topic names in configuration order.
    pub fn topics(&self) -> &[String] {
        &self.inner.names
    }

    /// Fan `event` out to current subscribers of its topic. Never blocks.
    pub fn publish(&self, event: &Event) {
        match self.inner.topics.get(event.topic()) {
            Some(tx) => {
                // Err only means nobody is listening right now.
                let receivers = tx.send(event.clone()).unwrap_or(0);
                debug!(topic = event.topic(), id = event.id, receivers, "Published event");
            }
            None => warn!(topic = event.topic(), id = event.id, "Dropping event for unknown topic"),
        }
    }

    /// Subscribe to `topic`, resuming after `last_seen` when given.
    ///
    /// With a checkpoint the stream first replays archived events after it,
    /// then continues live. Without one it starts at the topic's current
    /// high-water mark. The stream ends when the broker is closed, or after
    /// yielding a store error.
    ///
    /// # Arguments
    ///
    /// * `topic` - A configured source name
    /// * `last_seen` - The last event id the client already has, if any
    ///
    /// # Returns
    ///
    /// * `Ok(Some(stream))` - Every later event of `topic`, once each, in id
    ///   order
    /// * `Ok(None)` - `topic` is not configured
    /// * `Err(Error::Store)` - The high-water mark could not be read
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let mut events = broker.subscribe("tesco", Some(120)).await?.unwrap();
    /// while let Some(event) = events.try_next().await? {
    ///     println!("{} {}", event.id, event.item.title);
    /// }
    /// ```
    pub async fn subscribe(&self, topic: &str, last_seen: Option<i64>) -> Result<Option<EventStream>> {
        let Some(tx) = self.inner.topics.get(topic) else {
            return Ok(None);
        };
        let mut live = tx.subscribe();
        let mut shutdown = self.inner.shutdown.subscribe();
        let store = self.inner.store.clone();
        let topic = topic.to_string();

        let watermark = match last_seen {
            Some(id) => id,
            None => store.latest_id(&topic).await?,
        };
        debug!(%topic, ?last_seen, watermark, "Subscriber attached");

        let stream = boxed(try_stream! {
            let mut last = watermark;
            if last_seen.is_some() {
                let mut replay = pin!(store.replay(&topic, Some(last)));
                while let Some(event) = replay.try_next().await? {
                    last = event.id;
                    yield event;
                }
            }

            loop {
                let closed = *shutdown.borrow_and_update();
                if closed {
                    break;
                }
                let received = tokio::select! {
                    changed = shutdown.changed() => match changed {
                        Ok(()) => continue,
                        Err(_) => break,
                    },
                    received = live.recv() => received,
                };
                match received {
                    Ok(event) if event.id > last => {
                        last = event.id;
                        yield event;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(%topic, skipped, last, "Subscriber lagged; catching up from archive");
                        let mut replay = pin!(store.replay(&topic, Some(last)));
                        while let Some(event) = replay.try_next().await? {
                            last = event.id;
                            yield event;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!(%topic, last, "Subscriber stream ended");
        });
        Ok(Some(stream))
    }

    /// End every subscription. Publishing afterwards is harmless.
    pub fn close(&self) {
        self.inner.shutdown.send_replace(true);
    }
}

fn boxed<S>(stream: S) -> EventStream
where
    S: Stream<Item = Result<Event>> + Send + 'static,
{
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;
    use tokio::time::timeout;

    use super::*;
    use crate::store::testing::{item, temp_store};

    async fn stash_and_publish(store: &Store, broker: &Broker, n: u32) -> i64 {
        let event = store.stash(&item("acme", n)).await.unwrap().unwrap();
        broker.publish(&event);
        event.id
    }

    async fn next_id(stream: &mut EventStream) -> i64 {
        timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .unwrap()
            .id
    }

    fn broker(store: &Store, buffer: usize) -> Broker {
        Broker::new(store.clone(), ["acme".to_string(), "other".to_string()], buffer)
    }

    #[tokio::test]
    async fn test_unknown_topic() {
        let (store, _dir) = temp_store().await;
        let broker = broker(&store, 8);
        assert!(broker.subscribe("nobody", None).await.unwrap().is_none());
        assert_eq!(broker.topics(), ["acme", "other"]);
        // No subscribers is fine.
        stash_and_publish(&store, &broker, 1).await;
    }

    #[tokio::test]
    async fn test_replay_then_live_without_gap_or_duplicate() {
        let (store, _dir) = temp_store().await;
        let broker = broker(&store, 64);
        for n in 1..=8 {
            stash_and_publish(&store, &broker, n).await;
        }

        let mut stream = broker.subscribe("acme", Some(5)).await.unwrap().unwrap();

        // Stashed after attaching but before the replay has run: these are in
        // both the archive and the live buffer.
        stash_and_publish(&store, &broker, 9).await;
        stash_and_publish(&store, &broker, 10).await;

        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(next_id(&mut stream).await);
        }
        assert_eq!(seen, [6, 7, 8, 9, 10]);

        let id = stash_and_publish(&store, &broker, 11).await;
        assert_eq!(next_id(&mut stream).await, id);

        broker.close();
        let end = timeout(Duration::from_secs(5), stream.next()).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_live_only_subscriber_starts_at_attach() {
        let (store, _dir) = temp_store().await;
        let broker = broker(&store, 8);
        for n in 1..=3 {
            stash_and_publish(&store, &broker, n).await;
        }

        let mut stream = broker.subscribe("acme", None).await.unwrap().unwrap();
        let other = store.stash(&item("other", 1)).await.unwrap().unwrap();
        broker.publish(&other);
        let id = stash_and_publish(&store, &broker, 4).await;
        assert_eq!(next_id(&mut stream).await, id);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_recovers_from_archive() {
        let (store, _dir) = temp_store().await;
        let broker = broker(&store, 2);
        let mut stream = broker.subscribe("acme", None).await.unwrap().unwrap();

        // Ten events into a buffer of two: the subscriber lags and has to
        // fetch what it missed from the archive.
        let mut expected = Vec::new();
        for n in 1..=10 {
            expected.push(stash_and_publish(&store, &broker, n).await);
        }

        let mut seen = Vec::new();
        for _ in 0..10 {
            seen.push(next_id(&mut stream).await);
        }
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_close_ends_idle_subscription() {
        let (store, _dir) = temp_store().await;
        let broker = broker(&store, 8);
        let mut stream = broker.subscribe("other", None).await.unwrap().unwrap();
        broker.close();
        let end = timeout(Duration::from_secs(5), stream.next()).await.unwrap();
        assert!(end.is_none());
    }
}
