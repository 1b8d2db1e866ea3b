//! The focus window gate.
//!
//! The recording service only answers queries inside its currently loaded
//! region, the focus window. The gate holds the last window the service
//! granted or pushed, and lets range queries wait until they are legal.
//!
//! ### Window lifecycle
//!
//! - Undefined until the first [FocusWindowGate::request_window],
//!   [FocusWindowGate::refresh] or [FocusWindowGate::sync_window].
//! - Every change replaces the window and notifies the `windowChanged`
//!   subscribers.
//!
//! ### Waiting
//!
//! Waits never poll. They observe the window channel, evaluating their
//! condition against the current window at subscribe time and again on
//! every replacement, so a change between the check and the subscription
//! cannot be missed.

use replay_cache_api::*;
use tokio::sync::watch;

/// Gate that bounds which ranges and points may be queried.
#[derive(Debug)]
pub struct FocusWindowGate {
    service: DynRecordingService,
    window: watch::Sender<Option<FocusWindow>>,
    changed: Subscribers<FocusWindow>,
}

impl FocusWindowGate {
    /// Construct a gate with an undefined window.
    pub fn new(service: DynRecordingService) -> Self {
        let (window, _) = watch::channel(None);
        Self {
            service,
            window,
            changed: Subscribers::default(),
        }
    }

    /// The current window, if one has been established.
    pub fn current(&self) -> Option<FocusWindow> {
        self.window.borrow().clone()
    }

    /// Ask the service to load `range` and adopt whatever it grants.
    pub async fn request_window(
        &self,
        range: PointRange,
    ) -> ReplayResult<FocusWindow> {
        tracing::debug!(%range, "requesting focus window");
        let granted = self.service.request_focus_window(range).await?;
        self.sync_window(granted.clone());
        Ok(granted)
    }

    /// Adopt the window the service currently has loaded.
    pub async fn refresh(&self) -> ReplayResult<FocusWindow> {
        let current = self.service.get_focus_window().await?;
        self.sync_window(current.clone());
        Ok(current)
    }

    /// Adopt a window pushed by the service.
    pub fn sync_window(&self, window: FocusWindow) {
        let changed = self.window.send_if_modified(|current| {
            if current.as_ref() == Some(&window) {
                false
            } else {
                *current = Some(window.clone());
                true
            }
        });
        if changed {
            tracing::debug!(%window, "focus window changed");
            self.changed.notify(&window);
        }
    }

    /// Observe window replacements.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&FocusWindow) + Send + Sync + 'static,
    {
        self.changed.add(callback)
    }

    /// Wait until the window contains `point`.
    pub async fn wait_for_point_in_window(&self, point: &ExecutionPoint) {
        self.wait_until(|w| w.contains_point(point)).await
    }

    /// Wait until the window contains the whole of `range`.
    pub async fn wait_for_range_in_window(&self, range: &PointRange) {
        self.wait_until(|w| w.contains_range(range)).await
    }

    /// Wait until `range` is no longer entirely inside the window.
    pub(crate) async fn wait_for_range_outside_window(
        &self,
        range: &PointRange,
    ) {
        let mut rx = self.window.subscribe();
        let _ = rx
            .wait_for(|w| !w.as_ref().is_some_and(|w| w.contains_range(range)))
            .await;
    }

    /// Suspending form of [Self::wait_for_point_in_window].
    pub fn check_point(&self, point: &ExecutionPoint) -> Result<(), NotReady> {
        let point = point.clone();
        self.check(move |w| w.contains_point(&point))
    }

    /// Suspending form of [Self::wait_for_range_in_window].
    pub fn check_range(&self, range: &PointRange) -> Result<(), NotReady> {
        let range = range.clone();
        self.check(move |w| w.contains_range(&range))
    }

    /// Whether an error only means the window moved under a request.
    pub fn is_transient_abort(err: &ReplayError) -> bool {
        err.is_transient_abort()
    }

    async fn wait_until(&self, f: impl Fn(&FocusWindow) -> bool) {
        let mut rx = self.window.subscribe();
        // The gate outlives every borrow of it, so the channel stays open.
        let _ = rx.wait_for(|w| w.as_ref().is_some_and(&f)).await;
    }

    fn check<F>(&self, f: F) -> Result<(), NotReady>
    where
        F: Fn(&FocusWindow) -> bool + Send + Sync + 'static,
    {
        if self.window.borrow().as_ref().is_some_and(&f) {
            return Ok(());
        }
        let mut rx = self.window.subscribe();
        Err(NotReady::new(async move {
            let _ = rx.wait_for(|w| w.as_ref().is_some_and(&f)).await;
        }))
    }
}
