#![deny(missing_docs)]
//! Replay cache core: the caching and synchronization layer between a
//! consumer and a range-queryable recording service.
//!
//! - [AsyncRecordStore]: at most one load per key, memoized.
//! - [IntervalCache]: range-bounded values, fetched only where missing.
//! - [FocusWindowGate]: which ranges may be queried right now.
//! - [SessionTimeSynchronizer]: supplemental timestamps in primary time.
//! - [ReplayClient]: owns all of the above for one session.
//!
//! [MemRecordingService] is an in-memory service for tests and demos.

use replay_cache_api::*;

mod async_record;
pub use async_record::*;

mod focus_window;
pub use focus_window::*;

pub mod interval_cache;
pub use interval_cache::{
    CacheParams, DynIntervalLoader, Emitter, IntervalCache,
    IntervalCacheConfig, IntervalLoader, IntervalSnapshot,
};

mod points_cache;
pub use points_cache::*;

mod evaluation_cache;
pub use evaluation_cache::*;

pub mod time_sync;
pub use time_sync::{
    Connection, SessionTimeSynchronizer, SupplementalSession, TimeSyncConfig,
};

mod client;
pub use client::*;

mod mem_recording_service;
pub use mem_recording_service::*;
