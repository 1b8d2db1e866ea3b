//! The in-memory recording service implementation.
//!
//! This answers queries from a fixed list of points held in memory. It
//! enforces the same rules a real service does: queries outside the focus
//! window fail with [ProtocolErrorKind::FocusWindowChange], and queries
//! matching more points than allowed fail with
//! [ProtocolErrorKind::TooManyPoints]. Requested windows are clamped to the
//! extent of the recording.
//!
//! Every range query is logged so tests can assert on network traffic.

use replay_cache_api::*;
use std::sync::Mutex;

/// One point of an in-memory recording.
#[derive(Debug, Clone, PartialEq)]
pub struct MemPoint {
    /// The execution point.
    pub point: ExecutionPoint,
    /// Milliseconds since the start of the recording.
    pub time: f64,
    /// The location hit at this point, if any.
    pub location: Option<Location>,
    /// The event type handled at this point, if any.
    pub event_type: Option<String>,
}

impl MemPoint {
    /// A point with no location or event.
    pub fn new(point: impl Into<ExecutionPoint>, time: f64) -> Self {
        Self {
            point: point.into(),
            time,
            location: None,
            event_type: None,
        }
    }

    /// Attach a location to this point.
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Attach an event type to this point.
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    fn matches(&self, selector: &PointSelector) -> bool {
        match selector {
            PointSelector::Locations { locations } => self
                .location
                .as_ref()
                .is_some_and(|l| locations.contains(l)),
            PointSelector::EventHandlers { event_types } => self
                .event_type
                .as_ref()
                .is_some_and(|e| event_types.contains(e)),
            PointSelector::Points { points } => points.contains(&self.point),
        }
    }

    fn describe(&self) -> PointDescription {
        PointDescription {
            point: self.point.clone(),
            time: self.time,
            frame: self.location.as_ref().map(|l| l.source_id.clone()),
        }
    }
}

/// A range query received by [MemRecordingService].
#[derive(Debug, Clone, PartialEq)]
pub enum MemQuery {
    /// A `find_points` call.
    FindPoints(PointSelector, PointRange),
    /// A `run_evaluation` call.
    RunEvaluation(PointSelector, PointRange, String),
}

#[derive(Debug)]
struct Inner {
    points: Vec<MemPoint>,
    extent: PointRange,
    window: FocusWindow,
    max_points: usize,
    evaluation_batch_size: usize,
    queries: Vec<MemQuery>,
}

/// An in-memory [RecordingService].
#[derive(Debug)]
pub struct MemRecordingService(Mutex<Inner>);

impl MemRecordingService {
    /// Construct a service over `points`.
    ///
    /// The recording extends from zero to just past the last point, and
    /// the whole recording starts out loaded.
    pub fn new(mut points: Vec<MemPoint>) -> Self {
        points.sort_by(|a, b| a.point.cmp(&b.point));
        let end = points
            .last()
            .map(|p| p.point.successor())
            .unwrap_or_else(ExecutionPoint::zero);
        let extent = PointRange::up_to(end);
        Self(Mutex::new(Inner {
            points,
            window: FocusWindow::new(extent.clone()),
            extent,
            max_points: usize::MAX,
            evaluation_batch_size: 1,
            queries: Vec::new(),
        }))
    }

    /// Construct a service with one bare point at every position in
    /// `[0, extent)`, each at a time equal to its position.
    pub fn with_extent(extent: u64) -> Self {
        Self::new((0..extent).map(|p| MemPoint::new(p, p as f64)).collect())
    }

    /// Refuse queries matching more than `max_points` points.
    pub fn set_max_points(&self, max_points: usize) {
        self.0.lock().unwrap().max_points = max_points;
    }

    /// Stream evaluation results in batches of `size`.
    pub fn set_evaluation_batch_size(&self, size: usize) {
        self.0.lock().unwrap().evaluation_batch_size = size.max(1);
    }

    /// Simulate a server-side window change.
    pub fn set_focus_window(&self, window: FocusWindow) {
        self.0.lock().unwrap().window = window;
    }

    /// Every range query received so far.
    pub fn queries(&self) -> Vec<MemQuery> {
        self.0.lock().unwrap().queries.clone()
    }

    fn matching(
        &self,
        query: MemQuery,
        selector: &PointSelector,
        range: &PointRange,
    ) -> ReplayResult<Vec<MemPoint>> {
        let mut lock = self.0.lock().unwrap();
        lock.queries.push(query);

        if !lock.window.contains_range(range) {
            return Err(ReplayError::protocol(
                ProtocolErrorKind::FocusWindowChange,
                format!("{range} is outside focus window {}", lock.window),
            ));
        }

        let out: Vec<MemPoint> = lock
            .points
            .iter()
            .filter(|p| replay_cache_api::range::is_in_range(&p.point, range))
            .filter(|p| p.matches(selector))
            .cloned()
            .collect();

        if out.len() > lock.max_points {
            return Err(ReplayError::protocol(
                ProtocolErrorKind::TooManyPoints,
                format!("{} points in {range}", out.len()),
            ));
        }

        Ok(out)
    }
}

impl RecordingService for MemRecordingService {
    fn find_points(
        &self,
        selector: PointSelector,
        range: PointRange,
    ) -> BoxFut<'_, ReplayResult<Vec<PointDescription>>> {
        Box::pin(async move {
            let query = MemQuery::FindPoints(selector.clone(), range.clone());
            Ok(self
                .matching(query, &selector, &range)?
                .iter()
                .map(MemPoint::describe)
                .collect())
        })
    }

    fn run_evaluation(
        &self,
        selector: PointSelector,
        range: PointRange,
        expression: String,
        on_results: EvaluationSink,
    ) -> BoxFut<'_, ReplayResult<()>> {
        Box::pin(async move {
            let query = MemQuery::RunEvaluation(
                selector.clone(),
                range.clone(),
                expression.clone(),
            );
            let points = self.matching(query, &selector, &range)?;
            let batch_size = self.0.lock().unwrap().evaluation_batch_size;

            // Results arrive newest first, the way a parallel backend
            // would deliver them.
            let results: Vec<EvaluationResult> = points
                .iter()
                .rev()
                .map(|p| EvaluationResult {
                    point: p.point.clone(),
                    time: p.time,
                    value: Some(serde_json::json!({
                        "expression": expression,
                        "point": p.point.as_str(),
                    })),
                    exception: None,
                })
                .collect();

            for batch in results.chunks(batch_size) {
                on_results(batch.to_vec());
                tokio::task::yield_now().await;
            }
            Ok(())
        })
    }

    fn request_focus_window(
        &self,
        range: PointRange,
    ) -> BoxFut<'_, ReplayResult<FocusWindow>> {
        Box::pin(async move {
            let mut lock = self.0.lock().unwrap();
            let begin = std::cmp::min(
                std::cmp::max(range.begin(), lock.extent.begin()),
                lock.extent.end(),
            )
            .clone();
            let end = std::cmp::max(
                std::cmp::min(range.end(), lock.extent.end()),
                &begin,
            )
            .clone();
            let granted = FocusWindow::new(PointRange::new(begin, end)?);
            lock.window = granted.clone();
            Ok(granted)
        })
    }

    fn get_focus_window(&self) -> BoxFut<'_, ReplayResult<FocusWindow>> {
        Box::pin(async move { Ok(self.0.lock().unwrap().window.clone()) })
    }
}

#[cfg(test)]
mod test;
