#![deny(missing_docs)]
//! Test utilities for the replay cache crates.

use replay_cache_api::{ExecutionPoint, PointRange};

/// Enable tracing with the RUST_LOG environment variable.
///
/// This is intended to be used in tests, so it defaults to DEBUG level.
pub fn enable_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::DEBUG.into())
                .from_env_lossy(),
        )
        .try_init();
}

/// Shorthand for a numeric [ExecutionPoint].
pub fn point(p: u64) -> ExecutionPoint {
    p.into()
}

/// Shorthand for the half-open range `[begin, end)`.
///
/// Panics if `begin > end`.
pub fn range(begin: u64, end: u64) -> PointRange {
    PointRange::new(begin.into(), end.into()).unwrap()
}

/// Repeat a block until it breaks or returns, panicking on timeout.
///
/// - `iter_check!({ .. })` checks every 10ms for up to 1s.
/// - `iter_check!(timeout_ms, { .. })` checks every 10ms.
/// - `iter_check!(timeout_ms, sleep_ms, { .. })`.
///
/// A `return value` inside the block makes the macro evaluate to `value`.
#[macro_export]
macro_rules! iter_check {
    ($timeout_ms:expr, $sleep_ms:expr, $code:block) => {
        tokio::time::timeout(
            std::time::Duration::from_millis($timeout_ms),
            async {
                loop {
                    tokio::time::sleep(std::time::Duration::from_millis(
                        $sleep_ms,
                    ))
                    .await;
                    $code
                }
            },
        )
        .await
        .expect("iter_check timed out")
    };
    ($timeout_ms:expr, $code:block) => {
        $crate::iter_check!($timeout_ms, 10, $code)
    };
    ($code:block) => {
        $crate::iter_check!(1000, $code)
    };
}
