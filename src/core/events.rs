use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use super::types::UploadEvent;

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<UploadEvent>,
}

#[derive(Default)]
struct HubInner {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

/// Fan-out of task changes to every live subscription.
///
/// Each subscriber gets its own unbounded channel, so a slow listener never
/// loses events and never blocks the scheduler.
#[derive(Clone, Default)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        // A closed hub hands out subscriptions that end immediately.
        let mut subscribers = self.inner.subscribers.lock();
        if !self.inner.closed.load(Ordering::Acquire) {
            subscribers.push(Subscriber { id, tx });
        }
        drop(subscribers);

        Subscription {
            id,
            rx,
            hub: self.clone(),
        }
    }

    pub fn emit(&self, event: UploadEvent) {
        let mut subscribers = self.inner.subscribers.lock();
        subscribers.retain(|subscriber| subscriber.tx.send(event.clone()).is_ok());
    }

    /// Drop every sender so pending `recv` calls finish with `None`.
    pub(crate) fn close(&self) {
        let mut subscribers = self.inner.subscribers.lock();
        self.inner.closed.store(true, Ordering::Release);
        subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    fn unsubscribe(&self, id: u64) {
        self.inner.subscribers.lock().retain(|subscriber| subscriber.id != id);
    }
}

/// Receives every task change in the order the scheduler applied it.
/// Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<UploadEvent>,
    hub: EventHub,
}

impl Subscription {
    /// `None` once the manager has shut down and the backlog is drained.
    pub async fn recv(&mut self) -> Option<UploadEvent> {
        self.rx.recv().await
    }

    pub fn unsubscribe(self) {}

    pub fn filter<F>(self, filter: F) -> FilteredSubscription<F>
    where
        F: Fn(&UploadEvent) -> bool,
    {
        FilteredSubscription {
            subscription: self,
            filter,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}

/// 过滤的事件接收器
pub struct FilteredSubscription<F> {
    subscription: Subscription,
    filter: F,
}

impl<F> FilteredSubscription<F>
where
    F: Fn(&UploadEvent) -> bool,
{
    pub async fn recv(&mut self) -> Option<UploadEvent> {
        loop {
            let event = self.subscription.recv().await?;
            if (self.filter)(&event) {
                return Some(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::UploadId;

    #[tokio::test]
    async fn every_subscriber_sees_every_event_in_order() {
        let hub = EventHub::new();
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        let ids: Vec<_> = (0..3).map(|_| UploadId::new()).collect();
        for id in &ids {
            hub.emit(UploadEvent::Removed { upload_id: *id });
        }

        for subscription in [&mut first, &mut second] {
            for id in &ids {
                let event = subscription.recv().await.unwrap();
                assert_eq!(event.upload_id(), Some(*id));
            }
        }
    }

    #[tokio::test]
    async fn dropping_subscription_unsubscribes() {
        let hub = EventHub::new();
        let subscription = hub.subscribe();
        let other = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        subscription.unsubscribe();
        assert_eq!(hub.subscriber_count(), 1);

        drop(other);
        hub.emit(UploadEvent::Removed { upload_id: UploadId::new() });
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn filtered_subscription_skips_other_tasks() {
        let hub = EventHub::new();
        let wanted = UploadId::new();
        let mut filtered = hub.subscribe().filter(move |event| event.upload_id() == Some(wanted));

        hub.emit(UploadEvent::Removed { upload_id: UploadId::new() });
        hub.emit(UploadEvent::Removed { upload_id: wanted });

        let event = filtered.recv().await.unwrap();
        assert_eq!(event.upload_id(), Some(wanted));
    }

    #[tokio::test]
    async fn close_ends_subscriptions() {
        let hub = EventHub::new();
        let mut subscription = hub.subscribe();
        hub.emit(UploadEvent::Removed { upload_id: UploadId::new() });
        hub.close();

        assert!(subscription.recv().await.is_some());
        assert!(subscription.recv().await.is_none());
        assert!(hub.subscribe().recv().await.is_none());
    }
}
