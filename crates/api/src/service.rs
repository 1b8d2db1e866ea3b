//! The recording service consumed by the cache layer.
//!
//! The transport that reaches the service is out of scope here. An
//! implementation of [RecordingService] is expected to already deliver
//! typed, range-bounded responses and streamed partial results, and to
//! report failures as [ReplayError::Protocol] with a machine-readable
//! [ProtocolErrorKind].

use crate::*;
use std::sync::Arc;

/// A source location in the recorded program.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// Id of the source the location is in.
    pub source_id: String,
    /// 1-based line.
    pub line: u32,
    /// 0-based column.
    pub column: u32,
}

/// Which points a query is asking about.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PointSelector {
    /// Points hitting any of the given locations.
    #[serde(rename_all = "camelCase")]
    Locations {
        /// The locations.
        locations: Vec<Location>,
    },
    /// Points at which an event handler of one of the given types runs.
    #[serde(rename_all = "camelCase")]
    EventHandlers {
        /// The event types, e.g. "click".
        event_types: Vec<String>,
    },
    /// Exactly the listed points.
    #[serde(rename_all = "camelCase")]
    Points {
        /// The points.
        points: Vec<ExecutionPoint>,
    },
}

impl PointSelector {
    /// A stable string identity for this selector.
    ///
    /// The identity does not depend on any range the selector is used with.
    pub fn cache_key(&self) -> String {
        match self {
            PointSelector::Locations { locations } => {
                let mut locations = locations.clone();
                locations.sort();
                let parts: Vec<String> = locations
                    .iter()
                    .map(|l| format!("{}:{}:{}", l.source_id, l.line, l.column))
                    .collect();
                format!("locations({})", parts.join(","))
            }
            PointSelector::EventHandlers { event_types } => {
                let mut event_types = event_types.clone();
                event_types.sort();
                format!("events({})", event_types.join(","))
            }
            PointSelector::Points { points } => {
                let mut points = points.clone();
                points.sort();
                let parts: Vec<&str> =
                    points.iter().map(|p| p.as_str()).collect();
                format!("points({})", parts.join(","))
            }
        }
    }
}

/// A point reported by the service.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointDescription {
    /// The execution point.
    pub point: ExecutionPoint,
    /// Milliseconds since the start of the recording.
    pub time: f64,
    /// The id of the frame the point is in, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<String>,
}

/// The outcome of evaluating an expression at one point.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    /// The point the expression was evaluated at.
    pub point: ExecutionPoint,
    /// Milliseconds since the start of the recording.
    pub time: f64,
    /// The value produced, if evaluation completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    /// The exception thrown, if evaluation threw.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<serde_json::Value>,
}

/// Anything cached in an interval cache is indexed by its point.
pub trait HasPoint {
    /// The execution point of this value.
    fn point(&self) -> &ExecutionPoint;
}

impl HasPoint for PointDescription {
    fn point(&self) -> &ExecutionPoint {
        &self.point
    }
}

impl HasPoint for EvaluationResult {
    fn point(&self) -> &ExecutionPoint {
        &self.point
    }
}

/// Callback receiving streamed evaluation results.
pub type EvaluationSink = Arc<dyn Fn(Vec<EvaluationResult>) + Send + Sync>;

/// The remote, range-queryable recording service.
pub trait RecordingService: 'static + Send + Sync + std::fmt::Debug {
    /// Find the points matching `selector` within `range`, ordered by
    /// point.
    ///
    /// Fails with [ProtocolErrorKind::TooManyPoints] when the service
    /// refuses to return that many results.
    fn find_points(
        &self,
        selector: PointSelector,
        range: PointRange,
    ) -> BoxFut<'_, ReplayResult<Vec<PointDescription>>>;

    /// Evaluate `expression` at every point matching `selector` within
    /// `range`.
    ///
    /// Results are streamed through `on_results` in batches, in no
    /// particular order, before the returned future completes.
    fn run_evaluation(
        &self,
        selector: PointSelector,
        range: PointRange,
        expression: String,
        on_results: EvaluationSink,
    ) -> BoxFut<'_, ReplayResult<()>>;

    /// Ask the service to load `range`. The granted window may differ.
    fn request_focus_window(
        &self,
        range: PointRange,
    ) -> BoxFut<'_, ReplayResult<FocusWindow>>;

    /// The window the service currently has loaded.
    fn get_focus_window(&self) -> BoxFut<'_, ReplayResult<FocusWindow>>;
}

/// Trait-object [RecordingService].
pub type DynRecordingService = Arc<dyn RecordingService>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn selector_cache_key_is_order_independent() {
        let a = PointSelector::EventHandlers {
            event_types: vec!["keydown".into(), "click".into()],
        };
        let b = PointSelector::EventHandlers {
            event_types: vec!["click".into(), "keydown".into()],
        };
        assert_eq!(a.cache_key(), b.cache_key());
        assert_eq!("events(click,keydown)", a.cache_key());

        let loc = PointSelector::Locations {
            locations: vec![Location {
                source_id: "s1".into(),
                line: 3,
                column: 7,
            }],
        };
        assert_eq!("locations(s1:3:7)", loc.cache_key());
    }

    #[test]
    fn selector_json_shape() {
        let sel = PointSelector::EventHandlers {
            event_types: vec!["click".into()],
        };
        assert_eq!(
            r#"{"kind":"eventHandlers","eventTypes":["click"]}"#,
            serde_json::to_string(&sel).unwrap()
        );
    }

    #[test]
    fn evaluation_result_carries_json() {
        let result: EvaluationResult = serde_json::from_str(
            r#"{"point":"12","time":1.5,"value":{"a":[1,null,true]}}"#,
        )
        .unwrap();
        assert_eq!(ExecutionPoint::from(12u64), result.point);
        assert_eq!(
            Some(serde_json::json!({"a": [1, null, true]})),
            result.value
        );
        assert!(result.exception.is_none());
    }
}
