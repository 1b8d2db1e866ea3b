//! Subscription handles.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Handle returned from every `subscribe` call.
///
/// Dropping the handle unsubscribes. Call [Subscription::detach] to keep
/// the callback registered for the lifetime of its source instead.
#[must_use = "dropping a Subscription immediately unsubscribes"]
pub struct Subscription(Option<Box<dyn FnOnce() + Send + Sync>>);

impl Subscription {
    /// Construct a subscription that runs `unsubscribe` when dropped.
    pub fn new<F: FnOnce() + Send + Sync + 'static>(unsubscribe: F) -> Self {
        Self(Some(Box::new(unsubscribe)))
    }

    /// Unsubscribe now.
    pub fn unsubscribe(mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }

    /// Leave the callback registered.
    pub fn detach(mut self) {
        self.0.take();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.0.is_some())
            .finish()
    }
}

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// An ordered list of callbacks for events of type `E`.
///
/// Callbacks run in registration order. Notification never holds the
/// internal lock, so a callback may subscribe or unsubscribe.
pub struct Subscribers<E> {
    inner: Arc<Mutex<SubscribersInner<E>>>,
}

struct SubscribersInner<E> {
    next_id: u64,
    list: BTreeMap<u64, Callback<E>>,
}

impl<E> Default for Subscribers<E> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SubscribersInner {
                next_id: 0,
                list: BTreeMap::new(),
            })),
        }
    }
}

impl<E> Clone for Subscribers<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E> std::fmt::Debug for Subscribers<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribers")
            .field("count", &self.len())
            .finish()
    }
}

impl<E> Subscribers<E> {
    /// The number of registered callbacks.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().list.len()
    }

    /// Whether no callbacks are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: 'static> Subscribers<E> {
    /// Register a callback.
    pub fn add<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.add_with_cleanup(callback, || ())
    }

    /// Register a callback, running `cleanup` after it is unsubscribed.
    ///
    /// `cleanup` does not run for a detached subscription.
    pub fn add_with_cleanup<F, C>(
        &self,
        callback: F,
        cleanup: C,
    ) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
        C: FnOnce() + Send + Sync + 'static,
    {
        let id = {
            let mut lock = self.inner.lock().unwrap();
            let id = lock.next_id;
            lock.next_id += 1;
            lock.list.insert(id, Arc::new(callback));
            id
        };
        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().unwrap().list.remove(&id);
            }
            cleanup();
        })
    }

    /// Call every registered callback with `event`.
    pub fn notify(&self, event: &E) {
        let list: Vec<Callback<E>> =
            self.inner.lock().unwrap().list.values().cloned().collect();
        for callback in list {
            callback(event);
        }
    }
}
