//! crates/proscientia_core/src/bus.rs
//!
//! Process-wide fan-out of job lifecycle events.
//!
//! Each topic owns a `tokio::sync::broadcast` channel. Every subscriber gets its own
//! bounded buffer; a subscriber that falls behind loses the oldest events and skips
//! ahead instead of holding up the publisher. There is no replay: a subscriber only
//! sees events published after it subscribed. A topic lives only as long as it has
//! subscribers; the last `Subscription` to go removes it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use futures::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::domain::{JobId, LifecycleEvent, UserId};

/// Routing key for lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Every event of the deployment, for administrative dashboards.
    Global,
    Owner(UserId),
    Job(JobId),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Global => f.write_str("global"),
            Topic::Owner(id) => write!(f, "owner:{}", id),
            Topic::Job(id) => write!(f, "job:{}", id),
        }
    }
}

type TopicMap = HashMap<Topic, broadcast::Sender<LifecycleEvent>>;

pub struct StatusBus {
    capacity: usize,
    topics: Arc<RwLock<TopicMap>>,
}

fn write_topics(topics: &RwLock<TopicMap>) -> RwLockWriteGuard<'_, TopicMap> {
    topics.write().unwrap_or_else(|e| e.into_inner())
}

impl StatusBus {
    /// `capacity` is the per-subscriber buffer length.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, TopicMap> {
        self.topics.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, TopicMap> {
        write_topics(&self.topics)
    }

    /// Hands `event` to every current subscriber of `topic` and returns how many
    /// there were. Never waits on a subscriber.
    pub fn publish(&self, topic: Topic, event: LifecycleEvent) -> usize {
        let sender = match self.read().get(&topic) {
            Some(sender) => sender.clone(),
            None => return 0,
        };

        match sender.send(event) {
            Ok(delivered) => delivered,
            Err(_) => {
                // Everyone left; drop the topic unless someone re-subscribed meanwhile.
                let mut topics = self.write();
                if topics
                    .get(&topic)
                    .is_some_and(|tx| tx.receiver_count() == 0)
                {
                    topics.remove(&topic);
                    debug!(%topic, "Dropped topic with no subscribers");
                }
                0
            }
        }
    }

    /// Publishes a lifecycle event to its job topic, its owner topic and the global topic.
    pub fn publish_lifecycle(&self, event: &LifecycleEvent) {
        let job = self.publish(Topic::Job(event.job_id), event.clone());
        let owner = self.publish(Topic::Owner(event.owner_id), event.clone());
        let global = self.publish(Topic::Global, event.clone());
        debug!(
            job_id = %event.job_id,
            status = %event.state,
            job_subscribers = job,
            owner_subscribers = owner,
            global_subscribers = global,
            "Lifecycle event published"
        );
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let mut topics = self.write();
        let sender = topics
            .entry(topic)
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Subscription {
            topic,
            receiver: sender.subscribe(),
            topics: Arc::downgrade(&self.topics),
        }
    }

    /// Number of topics that currently have a channel.
    pub fn topic_count(&self) -> usize {
        self.read().len()
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.read()
            .get(&topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

/// A live, cancellable feed of one topic. Dropping it unsubscribes.
pub struct Subscription {
    topic: Topic,
    receiver: broadcast::Receiver<LifecycleEvent>,
    topics: Weak<RwLock<TopicMap>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(topics) = self.topics.upgrade() else {
            return;
        };
        // Our own receiver is still alive here, so a count of one means we are the last.
        let mut topics = write_topics(&topics);
        if topics
            .get(&self.topic)
            .is_some_and(|tx| tx.receiver_count() <= 1)
        {
            topics.remove(&self.topic);
            debug!(topic = %self.topic, "Dropped topic with no subscribers");
        }
    }
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Waits for the next event. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<LifecycleEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "Subscriber lagged; oldest events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`Subscription::recv`]; `None` when nothing is buffered.
    pub fn try_recv(&mut self) -> Option<LifecycleEvent> {
        use tokio::sync::broadcast::error::TryRecvError;
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "Subscriber lagged; oldest events dropped");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Turns the subscription into a lazy stream that ends when the bus is dropped.
    pub fn into_stream(mut self) -> impl Stream<Item = LifecycleEvent> + Send {
        async_stream::stream! {
            while let Some(event) = self.recv().await {
                yield event;
            }
        }
    }
}
