//! The interval cache of points matching a selector.

use crate::*;
use std::sync::Arc;

/// Cache of [PointDescription]s keyed by [PointSelector].
pub type PointsCache = IntervalCache<PointSelector, PointDescription>;

/// Loads points through [RecordingService::find_points].
#[derive(Debug)]
pub struct FindPointsLoader {
    service: DynRecordingService,
}

impl FindPointsLoader {
    /// Construct a loader over `service`.
    pub fn create(
        service: DynRecordingService,
    ) -> DynIntervalLoader<PointSelector, PointDescription> {
        Arc::new(Self { service })
    }
}

impl IntervalLoader<PointSelector, PointDescription> for FindPointsLoader {
    fn load(
        &self,
        range: PointRange,
        params: PointSelector,
        emit: Emitter<PointDescription>,
    ) -> BoxFut<'static, ReplayResult<()>> {
        let service = self.service.clone();
        Box::pin(async move {
            let points = service.find_points(params, range).await?;
            emit.emit(points);
            Ok(())
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use replay_cache_test_utils::{point, range};

    async fn setup(
        service: Arc<MemRecordingService>,
    ) -> PointsCache {
        let gate = Arc::new(FocusWindowGate::new(service.clone()));
        gate.refresh().await.unwrap();
        IntervalCache::new(
            IntervalCacheConfig::default(),
            gate,
            FindPointsLoader::create(service),
        )
    }

    #[tokio::test]
    async fn finds_points_once() {
        let service = Arc::new(MemRecordingService::new(vec![
            MemPoint::new(3u64, 3.0).with_event_type("click"),
            MemPoint::new(8u64, 8.0).with_event_type("click"),
            MemPoint::new(9u64, 9.0).with_event_type("keydown"),
        ]));
        let cache = setup(service.clone()).await;
        let clicks = PointSelector::EventHandlers {
            event_types: vec!["click".into()],
        };

        let found = cache.read_async(&clicks, &range(0, 10)).await.unwrap();
        assert_eq!(
            vec![point(3), point(8)],
            found.into_iter().map(|p| p.point).collect::<Vec<_>>()
        );

        let found = cache.read_async(&clicks, &range(4, 9)).await.unwrap();
        assert_eq!(1, found.len());
        assert_eq!(1, service.queries().len());
    }

    #[tokio::test]
    async fn too_many_points_is_a_hard_failure() {
        let service = Arc::new(MemRecordingService::with_extent(50));
        service.set_max_points(10);
        let cache = setup(service.clone()).await;
        let all = PointSelector::Points {
            points: (0..50u64).map(point).collect(),
        };

        let err = cache.read_async(&all, &range(0, 50)).await.unwrap_err();
        assert_eq!(Some(ProtocolErrorKind::TooManyPoints), err.protocol_kind());
        assert_eq!(1, cache.failed_ranges(&all).len());

        // a narrower query is allowed to try again
        let found = cache.read_async(&all, &range(0, 10)).await.unwrap();
        assert_eq!(10, found.len());
        assert_eq!(2, service.queries().len());
    }
}
