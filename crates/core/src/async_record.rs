//! Memoized async records.
//!
//! An [AsyncRecordStore] guarantees at most one outstanding load per key.
//! The first request for a key creates a pending record and spawns its
//! loader; every later request for the same key observes that same record,
//! whether it is still in flight or already settled.
//!
//! A record settles exactly once, to either a value or an error, and never
//! resets. The only way to load a key again is to [AsyncRecordStore::remove]
//! it first.
//!
//! Two read modes share one record:
//! - [AsyncRecordStore::read] suspends: it answers immediately with the
//!   value, the error, or a [NotReady] handle to await before retrying.
//! - [AsyncRecordStore::read_async] awaits the settled outcome.

use replay_cache_api::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// The observable status of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    /// No record exists for the key.
    NotStarted,
    /// The loader is running.
    Pending,
    /// The loader produced a value.
    Resolved,
    /// The loader failed.
    Rejected,
}

#[derive(Debug, Clone)]
enum RecordState<T> {
    Pending,
    Resolved(T),
    Rejected(ReplayError),
}

impl<T: Clone> RecordState<T> {
    fn status(&self) -> RecordStatus {
        match self {
            RecordState::Pending => RecordStatus::Pending,
            RecordState::Resolved(_) => RecordStatus::Resolved,
            RecordState::Rejected(_) => RecordStatus::Rejected,
        }
    }

    fn outcome(&self) -> Option<ReplayResult<T>> {
        match self {
            RecordState::Pending => None,
            RecordState::Resolved(v) => Some(Ok(v.clone())),
            RecordState::Rejected(e) => Some(Err(e.clone())),
        }
    }
}

#[derive(Debug)]
struct RecordInner<T> {
    key: String,
    state: watch::Sender<RecordState<T>>,
}

/// A handle to one memoized load.
#[derive(Debug)]
pub struct AsyncRecord<T>(Arc<RecordInner<T>>);

impl<T> Clone for AsyncRecord<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Clone + Send + Sync + 'static> AsyncRecord<T> {
    /// The key this record was created for.
    pub fn key(&self) -> &str {
        &self.0.key
    }

    /// The current status.
    pub fn status(&self) -> RecordStatus {
        self.0.state.borrow().status()
    }

    /// The settled outcome, or a handle to await if still pending.
    pub fn read(&self) -> SuspendResult<T> {
        match self.0.state.borrow().outcome() {
            Some(Ok(v)) => Ok(v),
            Some(Err(e)) => Err(Suspend::Failed(e)),
            None => Err(Suspend::NotReady(self.not_ready())),
        }
    }

    /// A future resolving to the settled outcome.
    pub fn settled(&self) -> BoxFut<'static, ReplayResult<T>> {
        let record = self.0.clone();
        Box::pin(async move {
            let mut rx = record.state.subscribe();
            let state = rx
                .wait_for(|s| !matches!(s, RecordState::Pending))
                .await
                .map_err(|_| {
                    ReplayError::invariant(format!(
                        "record {} dropped while pending",
                        record.key
                    ))
                })?;
            state.outcome().ok_or_else(|| {
                ReplayError::invariant(format!(
                    "record {} observed pending after settling",
                    record.key
                ))
            })?
        })
    }

    /// A handle that completes once this record settles.
    pub fn not_ready(&self) -> NotReady {
        let settled = self.settled();
        NotReady::new(async move {
            let _ = settled.await;
        })
    }
}

#[derive(Debug)]
struct StoreInner<T> {
    records: HashMap<String, AsyncRecord<T>>,
    subscribers: HashMap<String, Subscribers<RecordStatus>>,
}

impl<T> Default for StoreInner<T> {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
            subscribers: HashMap::new(),
        }
    }
}

/// Remove the subscriber list for `key` once nobody is on it.
pub(crate) fn drop_if_unobserved<E>(
    subscribers: &mut HashMap<String, Subscribers<E>>,
    key: &str,
) {
    if subscribers.get(key).is_some_and(|s| s.is_empty()) {
        subscribers.remove(key);
    }
}

/// A keyed registry of [AsyncRecord]s.
///
/// Cloning the store yields another handle to the same registry.
#[derive(Debug)]
pub struct AsyncRecordStore<T> {
    inner: Arc<Mutex<StoreInner<T>>>,
}

impl<T> Clone for AsyncRecordStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for AsyncRecordStore<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner::default())),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> AsyncRecordStore<T> {
    /// Construct an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the record for `key`, creating it and spawning `loader` if absent.
    ///
    /// `loader` is only invoked when a new record is created.
    pub fn get_or_create<F>(&self, key: &str, loader: F) -> AsyncRecord<T>
    where
        F: FnOnce() -> BoxFut<'static, ReplayResult<T>>,
    {
        use std::collections::hash_map::Entry;

        // The loader is spawned outside the lock, we only construct the
        // record here.
        let (record, subscribers) = {
            let mut lock = self.inner.lock().unwrap();
            let record = match lock.records.entry(key.to_string()) {
                Entry::Occupied(e) => return e.get().clone(),
                Entry::Vacant(e) => {
                    let (state, _) = watch::channel(RecordState::Pending);
                    e.insert(AsyncRecord(Arc::new(RecordInner {
                        key: key.to_string(),
                        state,
                    })))
                    .clone()
                }
            };
            let subscribers =
                lock.subscribers.get(key).cloned().unwrap_or_default();
            (record, subscribers)
        };

        subscribers.notify(&RecordStatus::Pending);

        let fut = loader();
        let store = Arc::downgrade(&self.inner);
        let spawned = record.clone();
        tokio::task::spawn(async move {
            let state = match fut.await {
                Ok(v) => RecordState::Resolved(v),
                Err(e) => {
                    tracing::debug!(
                        key = %spawned.key(),
                        ?e,
                        "record rejected"
                    );
                    RecordState::Rejected(e)
                }
            };
            let status = state.status();
            spawned.0.state.send_replace(state);

            // Only report the transition if this record is still the one
            // registered for the key.
            let subscribers = store.upgrade().and_then(|store| {
                let lock = store.lock().unwrap();
                let current = lock.records.get(spawned.key())?;
                if !Arc::ptr_eq(&current.0, &spawned.0) {
                    return None;
                }
                let out = lock.subscribers.get(spawned.key()).cloned();
                out
            });
            if let Some(subscribers) = subscribers {
                subscribers.notify(&status);
            }
        });

        record
    }

    /// Get the record for `key` without creating one.
    pub fn get(&self, key: &str) -> Option<AsyncRecord<T>> {
        self.inner.lock().unwrap().records.get(key).cloned()
    }

    /// The status of `key`.
    pub fn status(&self, key: &str) -> RecordStatus {
        self.get(key)
            .map(|r| r.status())
            .unwrap_or(RecordStatus::NotStarted)
    }

    /// Suspending read.
    ///
    /// Returns the value once resolved, [Suspend::Failed] once rejected and
    /// [Suspend::NotReady] while pending.
    pub fn read<F>(&self, key: &str, loader: F) -> SuspendResult<T>
    where
        F: FnOnce() -> BoxFut<'static, ReplayResult<T>>,
    {
        self.get_or_create(key, loader).read()
    }

    /// Awaiting read.
    pub async fn read_async<F>(&self, key: &str, loader: F) -> ReplayResult<T>
    where
        F: FnOnce() -> BoxFut<'static, ReplayResult<T>>,
    {
        self.get_or_create(key, loader).settled().await
    }

    /// Observe status changes of `key`.
    ///
    /// The callback is invoked once immediately with the current status and
    /// again on every transition, until the subscription is dropped.
    pub fn subscribe<F>(&self, key: &str, callback: F) -> Subscription
    where
        F: Fn(&RecordStatus) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        let subscription = {
            let mut lock = self.inner.lock().unwrap();
            let callback = callback.clone();
            let store = Arc::downgrade(&self.inner);
            let owned_key = key.to_string();
            lock.subscribers
                .entry(key.to_string())
                .or_default()
                .add_with_cleanup(
                    move |status| callback(status),
                    move || {
                        if let Some(store) = store.upgrade() {
                            let mut lock = store.lock().unwrap();
                            drop_if_unobserved(
                                &mut lock.subscribers,
                                &owned_key,
                            );
                        }
                    },
                )
        };
        callback(&self.status(key));
        subscription
    }

    /// Delete the record for `key` so the next request loads it afresh.
    ///
    /// Holders of the removed record still observe its outcome.
    pub fn remove(&self, key: &str) -> bool {
        let (removed, subscribers) = {
            let mut lock = self.inner.lock().unwrap();
            (
                lock.records.remove(key).is_some(),
                lock.subscribers.get(key).cloned(),
            )
        };
        if removed {
            if let Some(subscribers) = subscribers {
                subscribers.notify(&RecordStatus::NotStarted);
            }
        }
        removed
    }

    /// Drop every record and subscriber.
    pub fn clear(&self) {
        let mut lock = self.inner.lock().unwrap();
        lock.records.clear();
        lock.subscribers.clear();
    }

    /// The number of records held.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().records.len()
    }

    /// Whether no records are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test;
