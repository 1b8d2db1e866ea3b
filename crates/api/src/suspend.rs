//! Cooperative suspension.
//!
//! A suspending read never blocks. When its answer is not available yet it
//! returns [Suspend::NotReady] carrying a [NotReady] handle. The caller's
//! scheduler awaits that handle and then invokes the same read again.
//! [resolve] is the reference scheduler.

use crate::*;
use futures::future::{FutureExt, Shared};

/// A handle that completes once whatever a suspending read was waiting on
/// has settled.
///
/// Completion only means "try again"; it carries no value. The handle is
/// cheap to clone and every clone completes together.
#[derive(Clone)]
pub struct NotReady(Shared<BoxFut<'static, ()>>);

impl NotReady {
    /// Wrap a future that completes when the awaited state settles.
    pub fn new<F>(fut: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let fut: BoxFut<'static, ()> = Box::pin(fut);
        Self(fut.shared())
    }

    /// A handle that completes once every handle in the list has.
    pub fn all(list: Vec<NotReady>) -> Self {
        Self::new(async move {
            futures::future::join_all(list.into_iter().map(|n| n.settled()))
                .await;
        })
    }

    /// Wait for the awaited state to settle.
    pub async fn settled(self) {
        self.0.await
    }
}

impl std::fmt::Debug for NotReady {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("NotReady").finish()
    }
}

/// The non-value outcomes of a suspending read.
#[derive(Debug, Clone)]
pub enum Suspend {
    /// The value is not available yet. Await the handle and retry.
    NotReady(NotReady),

    /// The read failed.
    Failed(ReplayError),
}

impl From<ReplayError> for Suspend {
    fn from(err: ReplayError) -> Self {
        Suspend::Failed(err)
    }
}

impl From<NotReady> for Suspend {
    fn from(not_ready: NotReady) -> Self {
        Suspend::NotReady(not_ready)
    }
}

/// The result type of suspending reads.
pub type SuspendResult<T> = Result<T, Suspend>;

/// Drive a suspending read to completion.
///
/// `read` is invoked, and whenever it reports [Suspend::NotReady] the
/// handle is awaited before invoking it again.
pub async fn resolve<T, F>(mut read: F) -> ReplayResult<T>
where
    F: FnMut() -> SuspendResult<T>,
{
    loop {
        match read() {
            Ok(value) => return Ok(value),
            Err(Suspend::Failed(err)) => return Err(err),
            Err(Suspend::NotReady(not_ready)) => not_ready.settled().await,
        }
    }
}
