//! The focus window: the region of the recording the service has loaded.

use crate::*;

/// The currently server-loaded region of the timeline.
///
/// A window is replaced wholesale whenever it changes, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusWindow(PointRange);

impl FocusWindow {
    /// Construct a window covering `range`.
    pub fn new(range: PointRange) -> Self {
        Self(range)
    }

    /// The covered range.
    pub fn range(&self) -> &PointRange {
        &self.0
    }

    /// Whether the point may legally be queried under this window.
    pub fn contains_point(&self, point: &ExecutionPoint) -> bool {
        is_in_range(point, &self.0)
    }

    /// Whether the whole range may legally be queried under this window.
    pub fn contains_range(&self, range: &PointRange) -> bool {
        contains(&self.0, range)
    }
}

impl From<PointRange> for FocusWindow {
    fn from(range: PointRange) -> Self {
        Self(range)
    }
}

impl std::fmt::Display for FocusWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
