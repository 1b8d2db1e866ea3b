//! The top-level client owning every registry of one replay session.

use crate::*;
use replay_cache_api::config::Config;
use std::sync::Arc;

/// One replay session's caches, created when the session starts and torn
/// down when it ends.
#[derive(Debug)]
pub struct ReplayClient {
    service: DynRecordingService,
    gate: Arc<FocusWindowGate>,
    records: AsyncRecordStore<serde_json::Value>,
    points: PointsCache,
    evaluations: EvaluationCache,
    time_sync: SessionTimeSynchronizer,
}

impl ReplayClient {
    /// The configuration with every module at its defaults.
    pub fn default_config() -> ReplayResult<Config> {
        let mut config = Config::default();
        config.add_default_module_config::<IntervalCacheConfig>()?;
        config.add_default_module_config::<TimeSyncConfig>()?;
        Ok(config)
    }

    /// Construct a client for a session served by `service`.
    pub fn new(
        config: &Config,
        service: DynRecordingService,
    ) -> ReplayResult<Self> {
        let cache_config: IntervalCacheConfig = config.get_module_config()?;
        let time_config: TimeSyncConfig = config.get_module_config()?;
        let gate = Arc::new(FocusWindowGate::new(service.clone()));

        Ok(Self {
            points: IntervalCache::new(
                cache_config.clone(),
                gate.clone(),
                FindPointsLoader::create(service.clone()),
            ),
            evaluations: IntervalCache::new(
                cache_config,
                gate.clone(),
                EvaluationLoader::create(service.clone()),
            ),
            records: AsyncRecordStore::new(),
            time_sync: SessionTimeSynchronizer::new(time_config),
            gate,
            service,
        })
    }

    /// The recording service.
    pub fn service(&self) -> &DynRecordingService {
        &self.service
    }

    /// The focus window gate.
    pub fn focus_window(&self) -> &Arc<FocusWindowGate> {
        &self.gate
    }

    /// Memoized per-session records, such as analysis results.
    pub fn records(&self) -> &AsyncRecordStore<serde_json::Value> {
        &self.records
    }

    /// The points cache.
    pub fn points(&self) -> &PointsCache {
        &self.points
    }

    /// The evaluation cache.
    pub fn evaluations(&self) -> &EvaluationCache {
        &self.evaluations
    }

    /// The supplemental session registry.
    pub fn time_sync(&self) -> &SessionTimeSynchronizer {
        &self.time_sync
    }

    /// Ask the service to load `range`.
    pub async fn request_focus_window(
        &self,
        range: PointRange,
    ) -> ReplayResult<FocusWindow> {
        self.gate.request_window(range).await
    }

    /// Suspending read of the points matching `selector` in `range`.
    pub fn find_points(
        &self,
        selector: &PointSelector,
        range: &PointRange,
    ) -> SuspendResult<Vec<PointDescription>> {
        self.points.read(selector, range)
    }

    /// Awaiting read of the points matching `selector` in `range`.
    pub async fn find_points_async(
        &self,
        selector: &PointSelector,
        range: &PointRange,
    ) -> ReplayResult<Vec<PointDescription>> {
        self.points.read_async(selector, range).await
    }

    /// Suspending read of evaluations in `range`.
    pub fn evaluate(
        &self,
        params: &EvaluationParams,
        range: &PointRange,
    ) -> SuspendResult<Vec<EvaluationResult>> {
        self.evaluations.read(params, range)
    }

    /// Awaiting read of evaluations in `range`.
    pub async fn evaluate_async(
        &self,
        params: &EvaluationParams,
        range: &PointRange,
    ) -> ReplayResult<Vec<EvaluationResult>> {
        self.evaluations.read_async(params, range).await
    }

    /// Observe the status of the record for `key`.
    pub fn subscribe_to_status<F>(&self, key: &str, callback: F) -> Subscription
    where
        F: Fn(&RecordStatus) + Send + Sync + 'static,
    {
        self.records.subscribe(key, callback)
    }

    /// Wait until the focus window contains `point`.
    pub async fn wait_for_point_in_window(&self, point: &ExecutionPoint) {
        self.gate.wait_for_point_in_window(point).await
    }

    /// Map a time reported by a supplemental session into primary time.
    pub fn normalize_supplemental_time(
        &self,
        session_id: &str,
        time: f64,
    ) -> ReplayResult<f64> {
        self.time_sync.normalize_supplemental_time(session_id, time)
    }

    /// Drop everything cached for this session.
    pub fn teardown(&self) {
        tracing::debug!("tearing down replay client");
        self.points.clear();
        self.evaluations.clear();
        self.records.clear();
        self.time_sync.clear();
    }
}
