use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{BusError, ChangeEvent, ChangeNotification, Topic};

/// Publishing half of the bus as seen by mutating services.
///
/// Publishing never waits for subscribers. The returned count is the number
/// of local subscribers the notification was handed to.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: Topic, event: ChangeEvent) -> Result<usize, BusError>;

    async fn publish_all(&self, topics: &[Topic], event: ChangeEvent) -> Result<usize, BusError> {
        let mut delivered = 0;
        for topic in topics {
            delivered += self.publish(*topic, event).await?;
        }
        Ok(delivered)
    }
}

/// Forwards locally published notifications to another transport.
#[async_trait]
pub trait EventRelay: Send + Sync {
    async fn relay(&self, notification: &ChangeNotification) -> Result<(), BusError>;
}

struct BusInner {
    instance_id: Uuid,
    capacity: usize,
    open: AtomicBool,
    topics: RwLock<HashMap<Topic, broadcast::Sender<ChangeNotification>>>,
    relays: RwLock<Vec<Arc<dyn EventRelay>>>,
}

/// In-process topic registry. One broadcast channel per topic, created on
/// first subscribe and dropped once its last receiver is gone.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn open(capacity: usize) -> Self {
        let instance_id = Uuid::new_v4();
        info!("Event bus {} opened (per-topic capacity {})", instance_id, capacity);

        Self {
            inner: Arc::new(BusInner {
                instance_id,
                capacity: capacity.max(1),
                open: AtomicBool::new(true),
                topics: RwLock::new(HashMap::new()),
                relays: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Drops every topic channel; open subscriptions observe end-of-stream.
    pub async fn close(&self) {
        if !self.inner.open.swap(false, Ordering::SeqCst) {
            return;
        }

        let mut topics = self.inner.topics.write().await;
        let dropped = topics.len();
        topics.clear();
        self.inner.relays.write().await.clear();

        info!("Event bus {} closed, released {} topics", self.inner.instance_id, dropped);
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    pub fn instance_id(&self) -> Uuid {
        self.inner.instance_id
    }

    pub async fn attach_relay(&self, relay: Arc<dyn EventRelay>) {
        self.inner.relays.write().await.push(relay);
    }

    pub async fn subscribe(&self, topic: Topic) -> Result<Subscription, BusError> {
        if !self.is_open() {
            return Err(BusError::Closed);
        }

        let mut topics = self.inner.topics.write().await;
        let receiver = match topics.get(&topic) {
            Some(sender) => sender.subscribe(),
            None => {
                let (sender, receiver) = broadcast::channel(self.inner.capacity);
                topics.insert(topic, sender);
                receiver
            }
        };

        debug!("New subscriber on {}", topic);
        Ok(Subscription {
            topic,
            receiver: Some(receiver),
            bus: self.clone(),
        })
    }

    pub async fn subscriber_count(&self, topic: Topic) -> usize {
        let topics = self.inner.topics.read().await;
        topics
            .get(&topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    pub async fn active_topics(&self) -> Vec<Topic> {
        let topics = self.inner.topics.read().await;
        topics.keys().copied().collect()
    }

    /// Removes topics whose subscribers have all gone away.
    pub async fn prune(&self) -> usize {
        let mut topics = self.inner.topics.write().await;
        let before = topics.len();
        topics.retain(|_, sender| sender.receiver_count() > 0);
        before - topics.len()
    }

    /// Delivers a notification that originated on another instance.
    /// Echoes of this instance's own notifications are dropped.
    pub async fn deliver_remote(&self, notification: ChangeNotification) -> usize {
        if notification.origin == self.inner.instance_id || !self.is_open() {
            return 0;
        }
        self.fan_out(&notification).await
    }

    async fn release(&self, topic: Topic) {
        let mut topics = self.inner.topics.write().await;
        if let Some(sender) = topics.get(&topic) {
            if sender.receiver_count() == 0 {
                topics.remove(&topic);
                debug!("Released topic {}", topic);
            }
        }
    }

    async fn fan_out(&self, notification: &ChangeNotification) -> usize {
        let topics = self.inner.topics.read().await;
        match topics.get(&notification.topic) {
            // send only fails when there are no receivers left
            Some(sender) => sender.send(notification.clone()).unwrap_or(0),
            None => 0,
        }
    }
}

#[async_trait]
impl EventPublisher for EventBus {
    async fn publish(&self, topic: Topic, event: ChangeEvent) -> Result<usize, BusError> {
        if !self.is_open() {
            return Err(BusError::Closed);
        }

        let notification = ChangeNotification::new(topic, event, self.inner.instance_id);
        let delivered = self.fan_out(&notification).await;

        let relays = self.inner.relays.read().await.clone();
        for relay in relays {
            let outbound = notification.clone();
            tokio::spawn(async move {
                if let Err(e) = relay.relay(&outbound).await {
                    warn!("Failed to relay notification on {}: {}", outbound.topic, e);
                }
            });
        }

        debug!(
            "Published {:?} for {} on {} to {} subscribers",
            event.change_kind, event.entity_id, topic, delivered
        );
        Ok(delivered)
    }
}

/// A dashboard's handle on one topic. Dropping it releases the topic once
/// no other subscriber holds it.
pub struct Subscription {
    topic: Topic,
    receiver: Option<broadcast::Receiver<ChangeNotification>>,
    bus: EventBus,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("topic", &self.topic).finish_non_exhaustive()
    }
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Next notification, or `None` once the bus is closed.
    ///
    /// A subscriber that fell behind receives a single `Resync` in place of
    /// the notifications it missed.
    pub async fn recv(&mut self) -> Option<ChangeNotification> {
        let receiver = self.receiver.as_mut()?;
        match receiver.recv().await {
            Ok(notification) => Some(notification),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Subscriber on {} lagged by {} notifications", self.topic, skipped);
                Some(ChangeNotification::resync(self.topic, self.bus.instance_id()))
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    pub async fn close(mut self) {
        self.receiver.take();
        self.bus.release(self.topic).await;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.receiver.take().is_none() {
            return;
        }

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let bus = self.bus.clone();
            let topic = self.topic;
            handle.spawn(async move { bus.release(topic).await });
        }
    }
}
