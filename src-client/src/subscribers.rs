//! Callback registry with handle-based unsubscription.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// A set of callbacks invoked in subscription order.
pub struct Subscribers<T> {
    inner: Arc<Mutex<Registry<T>>>,
}

impl<T> Clone for Subscribers<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Subscribers<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register a callback. It stays registered until the returned handle is
    /// dropped or [`Subscription::unsubscribe`] is called.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = self.inner.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.push((id, Arc::new(callback)));
            id
        };

        let registry: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    registry.lock().entries.retain(|(entry, _)| *entry != id);
                }
            })),
        }
    }

    /// Invoke every callback with `value`.
    ///
    /// Callbacks run outside the registry lock, so a callback may subscribe or
    /// unsubscribe without deadlocking.
    pub fn emit(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = self
            .inner
            .lock()
            .entries
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();

        for callback in callbacks {
            callback(value);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }
}

/// Handle returned by [`Subscribers::subscribe`]. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_reaches_every_subscriber() {
        let subscribers = Subscribers::<u32>::new();
        let total = Arc::new(AtomicUsize::new(0));

        let a = total.clone();
        let _first = subscribers.subscribe(move |v| {
            a.fetch_add(*v as usize, Ordering::SeqCst);
        });
        let b = total.clone();
        let _second = subscribers.subscribe(move |v| {
            b.fetch_add(*v as usize * 10, Ordering::SeqCst);
        });

        subscribers.emit(&2);
        assert_eq!(total.load(Ordering::SeqCst), 22);
    }

    #[test]
    fn test_unsubscribe_and_drop_remove_callback() {
        let subscribers = Subscribers::<()>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        let kept = subscribers.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let dropped = subscribers.subscribe(|_| panic!("should have been removed"));
        drop(dropped);
        assert_eq!(subscribers.len(), 1);

        subscribers.emit(&());
        kept.unsubscribe();
        subscribers.emit(&());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(subscribers.is_empty());
    }

    #[test]
    fn test_handle_outlives_registry() {
        let subscribers = Subscribers::<u8>::new();
        let handle = subscribers.subscribe(|_| {});
        drop(subscribers);
        drop(handle);
    }

    #[test]
    fn test_callback_may_unsubscribe_during_emit() {
        let subscribers = Subscribers::<()>::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let s = slot.clone();
        let handle = subscribers.subscribe(move |_| {
            s.lock().take();
        });
        *slot.lock() = Some(handle);

        subscribers.emit(&());
        assert!(subscribers.is_empty());
    }
}
