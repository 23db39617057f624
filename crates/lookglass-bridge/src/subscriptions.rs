use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

/// Token returned by [`Subscriptions::on`]; hand it back to `off` to
/// unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Entry<T> {
    id: SubscriptionId,
    once: bool,
    handler: Handler<T>,
}

struct Registry<K, T> {
    next_id: u64,
    topics: HashMap<K, Vec<Entry<T>>>,
}

/// Handlers keyed by topic, fanned out in registration order.
pub struct Subscriptions<K, T> {
    inner: Mutex<Registry<K, T>>,
}

impl<K, T> Default for Subscriptions<K, T> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Registry {
                next_id: 0,
                topics: HashMap::new(),
            }),
        }
    }
}

impl<K, T> Subscriptions<K, T>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, topic: K, handler: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.insert(topic, false, Arc::new(handler))
    }

    /// Like [`on`](Self::on) but the handler is dropped after its first call.
    pub fn once<F>(&self, topic: K, handler: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.insert(topic, true, Arc::new(handler))
    }

    fn insert(&self, topic: K, once: bool, handler: Handler<T>) -> SubscriptionId {
        let mut registry = self.inner.lock();
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry
            .topics
            .entry(topic)
            .or_default()
            .push(Entry { id, once, handler });
        id
    }

    /// Returns false when `id` was not subscribed to `topic`.
    pub fn off(&self, topic: &K, id: SubscriptionId) -> bool {
        let mut registry = self.inner.lock();
        let Some(entries) = registry.topics.get_mut(topic) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            registry.topics.remove(topic);
        }
        removed
    }

    /// Calls every handler for `topic` and returns how many ran. Handlers run
    /// without the registry lock held, so they may subscribe or unsubscribe.
    pub fn emit(&self, topic: &K, value: &T) -> usize {
        let handlers: Vec<Handler<T>> = {
            let mut registry = self.inner.lock();
            let Some(entries) = registry.topics.get_mut(topic) else {
                return 0;
            };
            let handlers = entries.iter().map(|entry| entry.handler.clone()).collect();
            entries.retain(|entry| !entry.once);
            if entries.is_empty() {
                registry.topics.remove(topic);
            }
            handlers
        };
        for handler in &handlers {
            handler(value);
        }
        handlers.len()
    }

    pub fn count(&self, topic: &K) -> usize {
        self.inner
            .lock()
            .topics
            .get(topic)
            .map_or(0, Vec::len)
    }
}
