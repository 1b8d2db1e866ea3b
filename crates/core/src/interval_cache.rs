//! The interval cache serves "every value for a logical key whose point
//! lies in a range", fetching only what is not already known.
//!
//! ### Per-key state
//!
//! Each cache key (derived from [CacheParams::cache_key], independent of any
//! range) owns:
//! - cached ranges: a [RangeList] of fully fetched ranges, and the values
//!   for them sorted by point.
//! - pending loads: in-flight sub-range fetches, each accumulating the
//!   values it has emitted so far and carrying an [AsyncRecord] that
//!   settles when the load does.
//! - failed ranges: sub-ranges whose fetch failed, with the error.
//!
//! Cached and pending ranges never overlap. A read only starts loads for
//! the gaps `missing(range, cached + pending)`.
//!
//! ### Failure inheritance
//!
//! If any gap fully contains a failed range, the read fails with that error
//! before issuing any work. A gap that is narrower than every failed range
//! is fetched afresh, so a narrow retry may succeed after a broad fetch
//! failed.
//!
//! ### Aborts
//!
//! A load whose error is a transient abort, or whose range leaves the focus
//! window while in flight, is discarded: nothing it produced is cached and
//! no failure is recorded. The loader future itself is not cancelled. It
//! runs to completion in the background and its late output is ignored.
//!
//! A suspending read waiting on a load that aborts answers its retry with
//! what is cached, rather than starting the same load again. The aborted
//! range is only fetched again by a later read.
//!
//! ### Streaming
//!
//! Loaders may emit values any number of times before finishing. Emitted
//! batches are sorted and merged into the pending accumulation, and
//! subscribers receive a snapshot at most once per throttle interval while
//! values stream in, plus one immediately whenever a load settles.

use crate::async_record::drop_if_unobserved;
use crate::*;
use replay_cache_api::range::{contains, merge, missing, overlaps};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

/// IntervalCache configuration types.
pub mod config {
    /// Configuration parameters for [IntervalCache](super::IntervalCache).
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(default, rename_all = "camelCase")]
    pub struct IntervalCacheConfig {
        /// How long streamed values are coalesced before subscribers are
        /// notified, in milliseconds. Default: 100.
        pub stream_throttle_ms: u64,
    }

    impl Default for IntervalCacheConfig {
        fn default() -> Self {
            Self {
                stream_throttle_ms: 100,
            }
        }
    }

    impl replay_cache_api::config::ModConfig for IntervalCacheConfig {
        const MODULE_NAME: &'static str = "intervalCache";
    }
}

pub use config::*;

/// The logical identity a cache is partitioned by.
pub trait CacheParams: 'static + Clone + Send + Sync + std::fmt::Debug {
    /// A string identity, independent of any requested range.
    fn cache_key(&self) -> String;
}

impl CacheParams for PointSelector {
    fn cache_key(&self) -> String {
        PointSelector::cache_key(self)
    }
}

/// Fetches the values of one sub-range.
pub trait IntervalLoader<P, V>: 'static + Send + Sync + std::fmt::Debug {
    /// Load every value for `params` within `range`.
    ///
    /// Values are delivered through `emit`, in any order and any number of
    /// batches. Returning `Ok(())` marks the emitted values as the complete
    /// result for `range`.
    fn load(
        &self,
        range: PointRange,
        params: P,
        emit: Emitter<V>,
    ) -> BoxFut<'static, ReplayResult<()>>;
}

/// Trait-object [IntervalLoader].
pub type DynIntervalLoader<P, V> = Arc<dyn IntervalLoader<P, V>>;

/// What subscribers of a key observe.
#[derive(Debug, Clone)]
pub struct IntervalSnapshot<V> {
    /// Every known value for the key, cached or still streaming, sorted by
    /// point.
    pub values: Vec<V>,
    /// The fully fetched ranges.
    pub cached_ranges: RangeList,
    /// The ranges currently being fetched.
    pub pending_ranges: RangeList,
}

/// How a load settled, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadOutcome {
    Loaded,
    Aborted,
}

#[derive(Debug)]
struct PendingLoad<V> {
    id: u64,
    range: PointRange,
    values: Vec<V>,
    record: AsyncRecord<LoadOutcome>,
}

#[derive(Debug)]
struct KeyState<V> {
    cached: RangeList,
    values: Vec<V>,
    pending: Vec<PendingLoad<V>>,
    failed: Vec<(PointRange, ReplayError)>,
    aborted: Vec<PointRange>,
    flush_scheduled: bool,
}

impl<V> Default for KeyState<V> {
    fn default() -> Self {
        Self {
            cached: RangeList::new(),
            values: Vec::new(),
            pending: Vec::new(),
            failed: Vec::new(),
            aborted: Vec::new(),
            flush_scheduled: false,
        }
    }
}

impl<V: HasPoint + Clone> KeyState<V> {
    fn pending_ranges(&self) -> RangeList {
        RangeList::from_ranges(self.pending.iter().map(|p| p.range.clone()))
    }

    fn snapshot(&self) -> IntervalSnapshot<V> {
        let values = self
            .pending
            .iter()
            .fold(self.values.clone(), |acc, p| {
                merge_sorted(acc, p.values.clone())
            });
        IntervalSnapshot {
            values,
            cached_ranges: self.cached.clone(),
            pending_ranges: self.pending_ranges(),
        }
    }
}

#[derive(Debug)]
struct Inner<V> {
    keys: HashMap<String, KeyState<V>>,
    subscribers: HashMap<String, Subscribers<IntervalSnapshot<V>>>,
    next_load_id: u64,
}

impl<V> Default for Inner<V> {
    fn default() -> Self {
        Self {
            keys: HashMap::new(),
            subscribers: HashMap::new(),
            next_load_id: 0,
        }
    }
}

/// Handle through which a loader delivers values.
///
/// Values outside the load's range are dropped. Emitting after the load
/// has settled or been discarded is a no-op.
pub struct Emitter<V> {
    inner: Weak<Mutex<Inner<V>>>,
    key: String,
    id: u64,
    range: PointRange,
    throttle: std::time::Duration,
}

impl<V> Clone for Emitter<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            key: self.key.clone(),
            id: self.id,
            range: self.range.clone(),
            throttle: self.throttle,
        }
    }
}

impl<V> std::fmt::Debug for Emitter<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("range", &self.range)
            .finish()
    }
}

impl<V> Emitter<V>
where
    V: HasPoint + Clone + Send + Sync + std::fmt::Debug + 'static,
{
    /// The range being loaded.
    pub fn range(&self) -> &PointRange {
        &self.range
    }

    /// Deliver a batch of values.
    pub fn emit(&self, mut values: Vec<V>) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };

        values.retain(|v| self.range_contains(v.point()));
        values.sort_by(|a, b| a.point().cmp(b.point()));

        let schedule_flush = {
            let mut lock = inner.lock().unwrap();
            let Some(state) = lock.keys.get_mut(&self.key) else {
                return;
            };
            let Some(load) =
                state.pending.iter_mut().find(|p| p.id == self.id)
            else {
                tracing::warn!(
                    key = %self.key,
                    range = %self.range,
                    "ignoring values emitted by a discarded load"
                );
                return;
            };
            load.values =
                merge_sorted(std::mem::take(&mut load.values), values);
            !std::mem::replace(&mut state.flush_scheduled, true)
        };

        if schedule_flush {
            let weak = self.inner.clone();
            let key = self.key.clone();
            let throttle = self.throttle;
            tokio::task::spawn(async move {
                tokio::time::sleep(throttle).await;
                if let Some(inner) = weak.upgrade() {
                    broadcast(&inner, &key, true);
                }
            });
        }
    }

    fn range_contains(&self, point: &ExecutionPoint) -> bool {
        replay_cache_api::range::is_in_range(point, &self.range)
    }
}

/// Merge two point-sorted lists into one.
fn merge_sorted<V: HasPoint>(a: Vec<V>, b: Vec<V>) -> Vec<V> {
    if a.is_empty() {
        return b;
    }
    if b.is_empty() {
        return a;
    }
    let mut out = Vec::with_capacity(a.len() + b.len());
    let mut a = a.into_iter().peekable();
    let mut b = b.into_iter().peekable();
    loop {
        let take_a = match (a.peek(), b.peek()) {
            (Some(x), Some(y)) => x.point() <= y.point(),
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        out.extend(if take_a { a.next() } else { b.next() });
    }
    out
}

/// Notify the subscribers of `key` with a fresh snapshot.
fn broadcast<V: HasPoint + Clone + 'static>(
    inner: &Mutex<Inner<V>>,
    key: &str,
    clear_flush: bool,
) {
    let (subscribers, snapshot) = {
        let mut lock = inner.lock().unwrap();
        let snapshot = match lock.keys.get_mut(key) {
            Some(state) => {
                if clear_flush {
                    state.flush_scheduled = false;
                }
                state.snapshot()
            }
            None => KeyState::default().snapshot(),
        };
        match lock.subscribers.get(key) {
            Some(subscribers) => (subscribers.clone(), snapshot),
            None => return,
        }
    };
    subscribers.notify(&snapshot);
}

/// A cache of point-indexed values, partitioned by [CacheParams] and
/// filled range by range.
///
/// Cloning the cache yields another handle to the same state.
#[derive(Debug)]
pub struct IntervalCache<P, V> {
    inner: Arc<Mutex<Inner<V>>>,
    loads: AsyncRecordStore<LoadOutcome>,
    gate: Arc<FocusWindowGate>,
    loader: DynIntervalLoader<P, V>,
    throttle: std::time::Duration,
}

impl<P, V> Clone for IntervalCache<P, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            loads: self.loads.clone(),
            gate: self.gate.clone(),
            loader: self.loader.clone(),
            throttle: self.throttle,
        }
    }
}

impl<P, V> IntervalCache<P, V>
where
    P: CacheParams,
    V: HasPoint + Clone + Send + Sync + std::fmt::Debug + 'static,
{
    /// Construct an empty cache.
    pub fn new(
        config: IntervalCacheConfig,
        gate: Arc<FocusWindowGate>,
        loader: DynIntervalLoader<P, V>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            loads: AsyncRecordStore::new(),
            gate,
            loader,
            throttle: std::time::Duration::from_millis(
                config.stream_throttle_ms,
            ),
        }
    }

    /// Suspending read of every value for `params` within `range`.
    ///
    /// Suspends while the range is outside the focus window, and while any
    /// load overlapping the range is in flight. Parts of the range whose
    /// load aborted since the last read are missing from the result.
    pub fn read(
        &self,
        params: &P,
        range: &PointRange,
    ) -> SuspendResult<Vec<V>> {
        self.gate.check_range(range)?;
        let waiting: Vec<NotReady> = self
            .prepare(params, range, true)?
            .iter()
            .filter(|r| r.status() == RecordStatus::Pending)
            .map(|r| r.not_ready())
            .collect();
        if !waiting.is_empty() {
            return Err(NotReady::all(waiting).into());
        }
        Ok(self.collect(&params.cache_key(), range))
    }

    /// Awaiting read of every value for `params` within `range`.
    ///
    /// If a load for part of the range is aborted, the values for that part
    /// are missing from the result. A later read fetches them again.
    pub async fn read_async(
        &self,
        params: &P,
        range: &PointRange,
    ) -> ReplayResult<Vec<V>> {
        self.gate.wait_for_range_in_window(range).await;
        let key = params.cache_key();
        let waiting = self.prepare(params, range, false)?;
        let outcomes = futures::future::join_all(
            waiting.iter().map(|r| r.settled()),
        )
        .await;
        let mut aborted = false;
        for outcome in outcomes {
            aborted |= outcome? == LoadOutcome::Aborted;
        }
        if aborted {
            self.forget_aborted(&key, range);
        }
        Ok(self.collect(&key, range))
    }

    /// Observe the values known for `params`.
    ///
    /// The callback is invoked once immediately with the current snapshot.
    pub fn subscribe<F>(&self, params: &P, callback: F) -> Subscription
    where
        F: Fn(&IntervalSnapshot<V>) + Send + Sync + 'static,
    {
        let key = params.cache_key();
        let callback = Arc::new(callback);
        let (subscription, snapshot) = {
            let mut lock = self.inner.lock().unwrap();
            let cb = callback.clone();
            let inner = Arc::downgrade(&self.inner);
            let owned_key = key.clone();
            let subscription = lock
                .subscribers
                .entry(key.clone())
                .or_default()
                .add_with_cleanup(
                    move |s| cb(s),
                    move || {
                        if let Some(inner) = inner.upgrade() {
                            let mut lock = inner.lock().unwrap();
                            drop_if_unobserved(
                                &mut lock.subscribers,
                                &owned_key,
                            );
                        }
                    },
                );
            let snapshot = lock
                .keys
                .get(&key)
                .map(|s| s.snapshot())
                .unwrap_or_else(|| KeyState::default().snapshot());
            (subscription, snapshot)
        };
        callback(&snapshot);
        subscription
    }

    /// The fully fetched ranges for `params`.
    pub fn cached_ranges(&self, params: &P) -> RangeList {
        self.with_state(params, |s| s.cached.clone())
            .unwrap_or_default()
    }

    /// The ranges being fetched for `params`.
    pub fn pending_ranges(&self, params: &P) -> RangeList {
        self.with_state(params, |s| s.pending_ranges())
            .unwrap_or_default()
    }

    /// The ranges whose fetch failed for `params`, with their errors.
    pub fn failed_ranges(&self, params: &P) -> Vec<(PointRange, ReplayError)> {
        self.with_state(params, |s| s.failed.clone())
            .unwrap_or_default()
    }

    /// Forget everything known for `params`.
    ///
    /// In-flight loads for the key are discarded.
    pub fn evict(&self, params: &P) {
        let key = params.cache_key();
        let removed = self.inner.lock().unwrap().keys.remove(&key).is_some();
        if removed {
            tracing::debug!(%key, "evicted interval cache key");
            broadcast(&self.inner, &key, false);
        }
    }

    /// Forget everything, including subscribers.
    pub fn clear(&self) {
        {
            let mut lock = self.inner.lock().unwrap();
            lock.keys.clear();
            lock.subscribers.clear();
        }
        self.loads.clear();
    }

    fn with_state<R>(
        &self,
        params: &P,
        f: impl FnOnce(&KeyState<V>) -> R,
    ) -> Option<R> {
        self.inner.lock().unwrap().keys.get(&params.cache_key()).map(f)
    }

    fn forget_aborted(&self, key: &str, range: &PointRange) {
        if let Some(state) = self.inner.lock().unwrap().keys.get_mut(key) {
            state.aborted.retain(|r| !overlaps(r, range));
        }
    }

    /// Start loads for every gap in `range` and return the records of every
    /// load overlapping `range`.
    ///
    /// Aborted ranges overlapping `range` are forgotten. With
    /// `skip_aborted` they are also left out of the gaps for this call.
    fn prepare(
        &self,
        params: &P,
        range: &PointRange,
        skip_aborted: bool,
    ) -> ReplayResult<Vec<AsyncRecord<LoadOutcome>>> {
        let key = params.cache_key();
        let mut started = false;

        let records = {
            let mut lock = self.inner.lock().unwrap();
            let Inner {
                keys, next_load_id, ..
            } = &mut *lock;
            let state = keys.entry(key.clone()).or_default();

            let mut covered = merge(&state.cached, &state.pending_ranges());
            let (aborted, kept): (Vec<_>, Vec<_>) =
                std::mem::take(&mut state.aborted)
                    .into_iter()
                    .partition(|r| overlaps(r, range));
            state.aborted = kept;
            if skip_aborted && !aborted.is_empty() {
                tracing::debug!(
                    %key,
                    %range,
                    count = aborted.len(),
                    "not refetching aborted ranges on retry"
                );
                covered = merge(&covered, &RangeList::from_ranges(aborted));
            }
            let gaps = missing(range, &covered);

            for gap in gaps.iter() {
                if let Some((failed, err)) =
                    state.failed.iter().find(|(f, _)| contains(gap, f))
                {
                    tracing::debug!(
                        %key,
                        %gap,
                        %failed,
                        "gap contains a failed range"
                    );
                    return Err(err.clone());
                }
            }

            let mut records: Vec<AsyncRecord<LoadOutcome>> = state
                .pending
                .iter()
                .filter(|p| overlaps(&p.range, range))
                .map(|p| p.record.clone())
                .collect();

            for gap in gaps.iter() {
                let id = *next_load_id;
                *next_load_id += 1;

                tracing::debug!(%key, %gap, id, "starting load");
                let record_key = format!("{key}@{gap}#{id}");
                let record = self.loads.get_or_create(&record_key, || {
                    Box::pin(self.clone().run_load(
                        key.clone(),
                        record_key.clone(),
                        id,
                        gap.clone(),
                        params.clone(),
                    ))
                });

                state.pending.push(PendingLoad {
                    id,
                    range: gap.clone(),
                    values: Vec::new(),
                    record: record.clone(),
                });
                records.push(record);
                started = true;
            }

            records
        };

        if started {
            broadcast(&self.inner, &key, false);
        }

        Ok(records)
    }

    async fn run_load(
        self,
        key: String,
        record_key: String,
        id: u64,
        range: PointRange,
        params: P,
    ) -> ReplayResult<LoadOutcome> {
        let emitter = Emitter {
            inner: Arc::downgrade(&self.inner),
            key: key.clone(),
            id,
            range: range.clone(),
            throttle: self.throttle,
        };

        // Spawned so that a discarded load still runs to completion.
        let load = tokio::task::spawn(self.loader.load(
            range.clone(),
            params,
            emitter,
        ));

        let gate = self.gate.clone();
        let outcome = tokio::select! {
            res = load => match res {
                Ok(res) => res,
                Err(err) => {
                    Err(ReplayError::other_src("load task failed", err))
                }
            },
            _ = gate.wait_for_range_outside_window(&range) => {
                Err(ReplayError::protocol(
                    ProtocolErrorKind::FocusWindowChange,
                    format!("{range} left the focus window"),
                ))
            }
        };

        let result = self.settle(&key, id, &range, outcome);
        self.loads.remove(&record_key);
        broadcast(&self.inner, &key, false);
        result
    }

    fn settle(
        &self,
        key: &str,
        id: u64,
        range: &PointRange,
        outcome: ReplayResult<()>,
    ) -> ReplayResult<LoadOutcome> {
        let mut lock = self.inner.lock().unwrap();
        let Some(state) = lock.keys.get_mut(key) else {
            tracing::debug!(%key, %range, "ignoring load for evicted key");
            return Ok(LoadOutcome::Aborted);
        };
        let Some(pos) = state.pending.iter().position(|p| p.id == id) else {
            tracing::warn!(
                %key,
                %range,
                "ignoring late result of discarded load"
            );
            return Ok(LoadOutcome::Aborted);
        };
        let load = state.pending.remove(pos);

        match outcome {
            Ok(()) => {
                tracing::debug!(
                    %key,
                    %range,
                    count = load.values.len(),
                    "load complete"
                );
                state.cached = merge(
                    &state.cached,
                    &RangeList::from_ranges([range.clone()]),
                );
                state.values = merge_sorted(
                    std::mem::take(&mut state.values),
                    load.values,
                );
                state.aborted.retain(|r| !contains(range, r));
                Ok(LoadOutcome::Loaded)
            }
            Err(err) if err.is_transient_abort() => {
                tracing::debug!(%key, %range, ?err, "load aborted");
                state.aborted.push(range.clone());
                Ok(LoadOutcome::Aborted)
            }
            Err(err) => {
                tracing::warn!(%key, %range, ?err, "load failed");
                state.failed.push((range.clone(), err.clone()));
                Err(err)
            }
        }
    }

    fn collect(&self, key: &str, range: &PointRange) -> Vec<V> {
        let lock = self.inner.lock().unwrap();
        let Some(state) = lock.keys.get(key) else {
            return Vec::new();
        };
        let lo = state.values.partition_point(|v| v.point() < range.begin());
        let hi = state.values.partition_point(|v| v.point() < range.end());
        state.values[lo..hi.max(lo)].to_vec()
    }
}
