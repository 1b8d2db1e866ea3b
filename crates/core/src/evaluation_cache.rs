//! The interval cache of expression evaluations.
//!
//! Evaluation results stream in from the service in batches and in no
//! particular order. Each batch is handed straight to the cache's emitter,
//! which keeps them sorted by point.

use crate::*;
use std::sync::Arc;

/// What to evaluate and where.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EvaluationParams {
    /// The points to evaluate at.
    pub selector: PointSelector,
    /// The expression to evaluate.
    pub expression: String,
}

impl CacheParams for EvaluationParams {
    fn cache_key(&self) -> String {
        format!("{}|{}", self.selector.cache_key(), self.expression)
    }
}

/// Cache of [EvaluationResult]s keyed by [EvaluationParams].
pub type EvaluationCache = IntervalCache<EvaluationParams, EvaluationResult>;

/// Loads evaluations through [RecordingService::run_evaluation].
#[derive(Debug)]
pub struct EvaluationLoader {
    service: DynRecordingService,
}

impl EvaluationLoader {
    /// Construct a loader over `service`.
    pub fn create(
        service: DynRecordingService,
    ) -> DynIntervalLoader<EvaluationParams, EvaluationResult> {
        Arc::new(Self { service })
    }
}

impl IntervalLoader<EvaluationParams, EvaluationResult> for EvaluationLoader {
    fn load(
        &self,
        range: PointRange,
        params: EvaluationParams,
        emit: Emitter<EvaluationResult>,
    ) -> BoxFut<'static, ReplayResult<()>> {
        let service = self.service.clone();
        Box::pin(async move {
            let sink: EvaluationSink =
                Arc::new(move |results| emit.emit(results));
            service
                .run_evaluation(params.selector, range, params.expression, sink)
                .await
        })
    }
}
