//! In-process publish/subscribe for token lifecycle events.
//!
//! The bus is constructed explicitly and handed to both the pipeline and
//! whatever UI state needs to react to session changes. Events carry no
//! payload: subscribers re-read the token store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

/// Topics published on the [`TokenEventBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenEvent {
    /// A new token pair was persisted.
    Updated,
    /// The token pair was cleared.
    Removed,
}

impl TokenEvent {
    /// Wire name of the topic.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Updated => "TOKEN_UPDATED",
            Self::Removed => "TOKEN_REMOVED",
        }
    }
}

impl std::fmt::Display for TokenEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.topic())
    }
}

type Handler = Arc<dyn Fn(TokenEvent) + Send + Sync>;

struct Subscriber {
    id: u64,
    topic: TokenEvent,
    handler: Handler,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<Subscriber>>,
}

impl BusInner {
    fn remove(&self, id: u64) -> bool {
        let mut subs = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }
}

/// Process-wide token event channel.
///
/// Cloning is cheap and every clone publishes to the same subscribers.
#[derive(Clone, Default)]
pub struct TokenEventBus {
    inner: Arc<BusInner>,
}

impl TokenEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `topic`.
    ///
    /// The handler stays registered until the returned [`Subscription`] is
    /// dropped or [`Subscription::unsubscribe`] is called.
    pub fn subscribe<F>(&self, topic: TokenEvent, handler: F) -> Subscription
    where
        F: Fn(TokenEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber {
                id,
                topic,
                handler: Arc::new(handler),
            });
        tracing::trace!(%topic, id, "Subscribed to token events");
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Invoke every current subscriber of `topic` once.
    ///
    /// Returns after all handlers have run and reports how many were invoked.
    /// Handlers run outside the subscriber lock, so they may subscribe or
    /// unsubscribe themselves.
    pub fn publish(&self, topic: TokenEvent) -> usize {
        let handlers: Vec<Handler> = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.topic == topic)
            .map(|s| Arc::clone(&s.handler))
            .collect();

        tracing::debug!(%topic, subscribers = handlers.len(), "Publishing token event");
        for handler in &handlers {
            handler(topic);
        }
        handlers.len()
    }

    /// Number of live subscriptions for `topic`.
    pub fn subscriber_count(&self, topic: TokenEvent) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.topic == topic)
            .count()
    }
}

impl std::fmt::Debug for TokenEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEventBus")
            .field("updated_subscribers", &self.subscriber_count(TokenEvent::Updated))
            .field("removed_subscribers", &self.subscriber_count(TokenEvent::Removed))
            .finish()
    }
}

/// Handle to a registered handler. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the handler immediately"]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Remove the handler from the bus.
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(TokenEvent) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_topic_names() {
        assert_eq!(TokenEvent::Updated.topic(), "TOKEN_UPDATED");
        assert_eq!(TokenEvent::Removed.to_string(), "TOKEN_REMOVED");
    }

    #[test]
    fn test_publish_reaches_only_matching_topic() {
        let bus = TokenEventBus::new();
        let (updated, on_updated) = counter();
        let (removed, on_removed) = counter();
        let _a = bus.subscribe(TokenEvent::Updated, on_updated);
        let _b = bus.subscribe(TokenEvent::Removed, on_removed);

        assert_eq!(bus.publish(TokenEvent::Updated), 1);
        assert_eq!(updated.load(Ordering::SeqCst), 1);
        assert_eq!(removed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_fan_out_to_all_subscribers() {
        let bus = TokenEventBus::new();
        let (first, h1) = counter();
        let (second, h2) = counter();
        let _a = bus.subscribe(TokenEvent::Removed, h1);
        let _b = bus.subscribe(TokenEvent::Removed, h2);

        assert_eq!(bus.publish(TokenEvent::Removed), 2);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_and_drop() {
        let bus = TokenEventBus::new();
        let (count, handler) = counter();
        let sub = bus.subscribe(TokenEvent::Updated, handler);
        assert_eq!(bus.subscriber_count(TokenEvent::Updated), 1);

        sub.unsubscribe();
        assert_eq!(bus.subscriber_count(TokenEvent::Updated), 0);
        assert_eq!(bus.publish(TokenEvent::Updated), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        {
            let (_, handler) = counter();
            let _scoped = bus.subscribe(TokenEvent::Updated, handler);
            assert_eq!(bus.subscriber_count(TokenEvent::Updated), 1);
        }
        assert_eq!(bus.subscriber_count(TokenEvent::Updated), 0);
    }

    #[test]
    fn test_late_subscriber_gets_no_past_events() {
        let bus = TokenEventBus::new();
        bus.publish(TokenEvent::Updated);
        let (count, handler) = counter();
        let _sub = bus.subscribe(TokenEvent::Updated, handler);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_clones_share_subscribers() {
        let bus = TokenEventBus::new();
        let clone = bus.clone();
        let (count, handler) = counter();
        let _sub = bus.subscribe(TokenEvent::Updated, handler);
        clone.publish(TokenEvent::Updated);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_may_subscribe_during_publish() {
        let bus = TokenEventBus::new();
        let inner_bus = bus.clone();
        let held = Arc::new(std::sync::Mutex::new(Vec::new()));
        let held_in_handler = Arc::clone(&held);
        let _sub = bus.subscribe(TokenEvent::Updated, move |_| {
            let sub = inner_bus.subscribe(TokenEvent::Removed, |_| {});
            held_in_handler.lock().unwrap().push(sub);
        });

        bus.publish(TokenEvent::Updated);
        assert_eq!(bus.subscriber_count(TokenEvent::Removed), 1);
    }

    #[test]
    fn test_subscription_outliving_bus() {
        let (_, handler) = counter();
        let sub = {
            let bus = TokenEventBus::new();
            bus.subscribe(TokenEvent::Updated, handler)
        };
        // Bus is gone; dropping must not panic.
        drop(sub);
    }
}
