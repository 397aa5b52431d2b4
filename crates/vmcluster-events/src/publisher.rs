//! Event bus publishers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use vmcluster_core::UserId;

use crate::error::Result;
use crate::event::ChangeEvent;

/// Delivers change events to an owner-keyed topic.
///
/// Publishing is synchronous: it runs on the writer's thread right after a
/// store commit, so implementations should hand the event off quickly.
pub trait EventPublisher: Send + Sync {
    /// Publish `event` on the topic of `owner`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus rejects the event.
    fn publish(&self, owner: &UserId, event: &ChangeEvent) -> Result<()>;
}

impl<T: EventPublisher + ?Sized> EventPublisher for Arc<T> {
    fn publish(&self, owner: &UserId, event: &ChangeEvent) -> Result<()> {
        (**self).publish(owner, event)
    }
}

/// In-process publisher fanning events out to per-owner channels.
///
/// Events for an owner without subscribers are dropped. Subscribers whose
/// receiver has been dropped are pruned on the next publish.
#[derive(Default)]
pub struct ChannelPublisher {
    topics: Mutex<HashMap<UserId, Vec<mpsc::UnboundedSender<ChangeEvent>>>>,
}

impl ChannelPublisher {
    /// Create a publisher with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every event published for `owner`.
    pub fn subscribe(&self, owner: &UserId) -> mpsc::UnboundedReceiver<ChangeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics.lock().entry(owner.clone()).or_default().push(tx);
        rx
    }

    /// Number of live subscribers for `owner`.
    #[must_use]
    pub fn subscriber_count(&self, owner: &UserId) -> usize {
        self.topics
            .lock()
            .get(owner)
            .map_or(0, |senders| senders.iter().filter(|tx| !tx.is_closed()).count())
    }
}

impl EventPublisher for ChannelPublisher {
    fn publish(&self, owner: &UserId, event: &ChangeEvent) -> Result<()> {
        let mut topics = self.topics.lock();
        if let Some(senders) = topics.get_mut(owner) {
            senders.retain(|tx| tx.send(event.clone()).is_ok());
            if senders.is_empty() {
                topics.remove(owner);
            }
        }
        Ok(())
    }
}

/// A recording publisher for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use crate::error::EventError;

    /// Records every published event; can be told to reject them.
    #[derive(Default)]
    pub struct MockPublisher {
        published: Mutex<Vec<(UserId, ChangeEvent)>>,
        fail: Mutex<bool>,
    }

    impl MockPublisher {
        /// Create an empty recorder.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make subsequent publishes fail.
        pub fn set_fail(&self, fail: bool) {
            *self.fail.lock() = fail;
        }

        /// Drain the recorded events.
        pub fn take(&self) -> Vec<(UserId, ChangeEvent)> {
            std::mem::take(&mut *self.published.lock())
        }
    }

    impl EventPublisher for MockPublisher {
        fn publish(&self, owner: &UserId, event: &ChangeEvent) -> Result<()> {
            if *self.fail.lock() {
                return Err(EventError::Publish("bus unavailable".to_string()));
            }
            self.published.lock().push((owner.clone(), event.clone()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChangeAction;
    use vmcluster_store::Table;

    fn event(owner: &UserId) -> ChangeEvent {
        ChangeEvent::new(Table::Job, "j-00000001", ChangeAction::Create, owner.clone())
    }

    #[tokio::test]
    async fn events_reach_only_the_owner_topic() {
        let publisher = ChannelPublisher::new();
        let alice = UserId::new("usr-alice").unwrap();
        let bob = UserId::new("usr-bob").unwrap();
        let mut alice_rx = publisher.subscribe(&alice);
        let mut bob_rx = publisher.subscribe(&bob);

        publisher.publish(&alice, &event(&alice)).unwrap();

        assert_eq!(alice_rx.recv().await.unwrap().resource_id, "j-00000001");
        assert!(bob_rx.try_recv().is_err());
    }

    #[test]
    fn closed_subscribers_are_pruned() {
        let publisher = ChannelPublisher::new();
        let owner = UserId::new("usr-1").unwrap();
        let rx = publisher.subscribe(&owner);
        let _kept = publisher.subscribe(&owner);
        drop(rx);

        publisher.publish(&owner, &event(&owner)).unwrap();
        assert_eq!(publisher.subscriber_count(&owner), 1);
    }

    #[test]
    fn publish_without_subscribers_is_ok() {
        let publisher = ChannelPublisher::new();
        let owner = UserId::new("usr-1").unwrap();
        assert!(publisher.publish(&owner, &event(&owner)).is_ok());
    }
}
