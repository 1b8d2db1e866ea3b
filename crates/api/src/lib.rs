#![deny(missing_docs)]
//! Replay cache API contains the types and traits shared by the client-side
//! caching layer in front of a recording service.
//!
//! If you want the caches themselves, please see the replay_cache_core
//! crate.

/// Boxed future type.
pub type BoxFut<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

pub mod config;

mod error;
pub use error::*;

mod point;
pub use point::*;

pub mod range;
pub use range::{PointRange, RangeList};
pub(crate) use range::{contains, is_in_range};

mod suspend;
pub use suspend::*;

mod subscription;
pub use subscription::*;

mod window;
pub use window::*;

mod service;
pub use service::*;
