// Fan-out of pipeline output to live subscribers
//
// The subscriber set is the only state shared between the broadcast task and
// connection handlers. `publish` copies the current set under a read lock and
// delivers outside it, so a slow or broken subscriber never holds up
// registration or the other subscribers.

use crate::streaming::dashboard::DashboardSnapshot;
use crate::streaming::types::CombinedDatapoint;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

pub type SubscriberId = Uuid;

/// Everything the pipeline sends to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Datapoint(CombinedDatapoint),
    Dashboard(Box<DashboardSnapshot>),
}

/// Which messages a subscriber wants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Datapoints,
    Dashboard,
    All,
}

impl Topic {
    pub fn accepts(&self, message: &OutboundMessage) -> bool {
        matches!(
            (self, message),
            (Topic::All, _)
                | (Topic::Datapoints, OutboundMessage::Datapoint(_))
                | (Topic::Dashboard, OutboundMessage::Dashboard(_))
        )
    }
}

#[derive(Debug, Error)]
pub enum SubscriberError {
    #[error("Subscriber disconnected")]
    Closed,

    #[error("Subscriber queue full")]
    Full,

    #[error("Delivery failed: {0}")]
    Failed(String),
}

/// A destination for broadcast messages. `send` must not block.
pub trait Subscriber: Send + Sync {
    fn send(&self, message: Arc<OutboundMessage>) -> Result<(), SubscriberError>;

    /// Whether `send` should be offered this message at all
    fn accepts(&self, _message: &OutboundMessage) -> bool {
        true
    }
}

/// Subscriber backed by a bounded channel; a full channel drops the message
pub struct ChannelSubscriber {
    sender: mpsc::Sender<Arc<OutboundMessage>>,
    topic: Topic,
}

impl ChannelSubscriber {
    pub fn new(topic: Topic, capacity: usize) -> (Self, mpsc::Receiver<Arc<OutboundMessage>>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender, topic }, receiver)
    }
}

impl Subscriber for ChannelSubscriber {
    fn send(&self, message: Arc<OutboundMessage>) -> Result<(), SubscriberError> {
        self.sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SubscriberError::Full,
            mpsc::error::TrySendError::Closed(_) => SubscriberError::Closed,
        })
    }

    fn accepts(&self, message: &OutboundMessage) -> bool {
        self.topic.accepts(message)
    }
}

/// Outcome of one publish. `skipped` counts subscribers whose topic does not
/// take the message; they are neither delivered nor failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Live subscriber set
#[derive(Clone)]
pub struct Broadcaster {
    subscribers: Arc<RwLock<HashMap<SubscriberId, Arc<dyn Subscriber>>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn register(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        let id = Uuid::new_v4();
        self.subscribers.write().insert(id, subscriber);
        log::debug!("Subscriber {} registered", id);
        id
    }

    /// Returns false if the id was not registered
    pub fn unregister(&self, id: &SubscriberId) -> bool {
        let removed = self.subscribers.write().remove(id).is_some();
        if removed {
            log::debug!("Subscriber {} unregistered", id);
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Deliver a message to every current subscriber
    pub fn publish(&self, message: OutboundMessage) -> PublishReport {
        let subscribers: Vec<(SubscriberId, Arc<dyn Subscriber>)> = self
            .subscribers
            .read()
            .iter()
            .map(|(id, subscriber)| (*id, Arc::clone(subscriber)))
            .collect();

        let message = Arc::new(message);
        let mut report = PublishReport::default();

        for (id, subscriber) in subscribers {
            if !subscriber.accepts(&message) {
                report.skipped += 1;
                continue;
            }
            match subscriber.send(Arc::clone(&message)) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    log::debug!("Delivery to subscriber {} failed: {}", id, e);
                    report.failed += 1;
                }
            }
        }

        report
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}
