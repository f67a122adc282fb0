//! Process-local bus. Backs the live channel when the worker and the client
//! gateway share a process, and stands in for Redis pub/sub in tests.

use std::sync::{Mutex, mpsc};

use crate::bus::{EventBus, Subscription};

#[derive(Debug, thiserror::Error)]
pub enum InMemoryBusError {
    #[error("in-memory bus lock poisoned")]
    Poisoned,
}

type Filter<M> = Box<dyn Fn(&M) -> bool + Send>;

struct Subscriber<M> {
    sender: mpsc::Sender<M>,
    filter: Option<Filter<M>>,
}

impl<M: Clone> Subscriber<M> {
    fn wants(&self, message: &M) -> bool {
        self.filter.as_ref().is_none_or(|f| f(message))
    }

    /// `false` once the receiving side is gone.
    fn offer(&self, message: &M) -> bool {
        if !self.wants(message) {
            return true;
        }
        self.sender.send(message.clone()).is_ok()
    }
}

/// Fan-out bus where each subscriber may narrow what it receives.
///
/// Subscribers whose receiver was dropped are pruned on the next publish.
pub struct InMemoryEventBus<M> {
    subscribers: Mutex<Vec<Subscriber<M>>>,
}

impl<M> std::fmt::Debug for InMemoryEventBus<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Subscribe to the messages matching `filter` only.
    pub fn subscribe_where<F>(&self, filter: F) -> Subscription<M>
    where
        F: Fn(&M) -> bool + Send + 'static,
    {
        self.attach(Some(Box::new(filter)))
    }

    fn attach(&self, filter: Option<Filter<M>>) -> Subscription<M> {
        let (sender, receiver) = mpsc::channel();
        // On a poisoned lock the subscription is returned detached and stays silent.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(Subscriber { sender, filter });
        }
        Subscription::new(receiver)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut subs = self
            .subscribers
            .lock()
            .map_err(|_| InMemoryBusError::Poisoned)?;
        subs.retain(|s| s.offer(&message));
        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        self.attach(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_gets_a_copy() {
        let bus = InMemoryEventBus::<u32>::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.publish(7).unwrap();

        assert_eq!(a.drain(), vec![7]);
        assert_eq!(b.drain(), vec![7]);
    }

    #[test]
    fn filtered_subscriber_only_sees_matches() {
        let bus = InMemoryEventBus::<u32>::new();
        let evens = bus.subscribe_where(|n| n % 2 == 0);
        let all = bus.subscribe();

        for n in 1..=4 {
            bus.publish(n).unwrap();
        }

        assert_eq!(evens.drain(), vec![2, 4]);
        assert_eq!(all.drain(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = InMemoryEventBus::<u32>::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());

        bus.publish(1).unwrap();

        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.drain(), vec![1]);
    }

    #[test]
    fn dropped_filtered_subscriber_survives_until_a_match() {
        let bus = InMemoryEventBus::<u32>::new();
        drop(bus.subscribe_where(|n| *n > 10));

        bus.publish(1).unwrap();
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(11).unwrap();
        assert_eq!(bus.subscriber_count(), 0);
    }
}
