use super::*;
use replay_cache_test_utils::{point, range};
use std::sync::Arc;

fn loc(line: u32) -> Location {
    Location {
        source_id: "app.js".into(),
        line,
        column: 0,
    }
}

fn service() -> MemRecordingService {
    MemRecordingService::new(vec![
        MemPoint::new(30u64, 3.0).with_location(loc(1)),
        MemPoint::new(10u64, 1.0).with_location(loc(1)),
        MemPoint::new(20u64, 2.0).with_event_type("click"),
        MemPoint::new(40u64, 4.0).with_location(loc(2)),
    ])
}

#[tokio::test]
async fn find_points_filters_by_selector_and_range() {
    let service = service();
    let selector = PointSelector::Locations {
        locations: vec![loc(1)],
    };

    let found = service
        .find_points(selector.clone(), range(0, 30))
        .await
        .unwrap();
    assert_eq!(
        vec![point(10)],
        found.iter().map(|p| p.point.clone()).collect::<Vec<_>>()
    );
    assert_eq!(Some("app.js".to_string()), found[0].frame);

    let found = service.find_points(selector, range(0, 41)).await.unwrap();
    assert_eq!(2, found.len());

    let clicks = service
        .find_points(
            PointSelector::EventHandlers {
                event_types: vec!["click".into()],
            },
            range(0, 41),
        )
        .await
        .unwrap();
    assert_eq!(point(20), clicks[0].point);
    assert_eq!(3, service.queries().len());
}

#[tokio::test]
async fn too_many_points() {
    let service = MemRecordingService::with_extent(10);
    service.set_max_points(3);
    let err = service
        .find_points(
            PointSelector::Points {
                points: (0..10u64).map(point).collect(),
            },
            range(0, 10),
        )
        .await
        .unwrap_err();
    assert_eq!(Some(ProtocolErrorKind::TooManyPoints), err.protocol_kind());
    assert!(!err.is_transient_abort());
}

#[tokio::test]
async fn queries_outside_window_abort() {
    let service = MemRecordingService::with_extent(10);
    service.set_focus_window(FocusWindow::new(range(0, 5)));
    let err = service
        .find_points(
            PointSelector::Points {
                points: vec![point(6)],
            },
            range(0, 10),
        )
        .await
        .unwrap_err();
    assert_eq!(
        Some(ProtocolErrorKind::FocusWindowChange),
        err.protocol_kind()
    );
    assert!(err.is_transient_abort());
}

#[tokio::test]
async fn focus_window_is_clamped_to_extent() {
    let service = MemRecordingService::with_extent(10);
    assert_eq!(
        FocusWindow::new(range(0, 10)),
        service.get_focus_window().await.unwrap()
    );
    assert_eq!(
        FocusWindow::new(range(4, 10)),
        service.request_focus_window(range(4, 1000)).await.unwrap()
    );
    assert_eq!(
        FocusWindow::new(range(10, 10)),
        service.request_focus_window(range(50, 60)).await.unwrap()
    );
}

#[tokio::test]
async fn evaluation_streams_in_batches() {
    let service = MemRecordingService::with_extent(5);
    service.set_evaluation_batch_size(2);
    let batches = Arc::new(Mutex::new(Vec::new()));

    service
        .run_evaluation(
            PointSelector::Points {
                points: (0..5u64).map(point).collect(),
            },
            range(0, 5),
            "x + 1".into(),
            Arc::new({
                let batches = batches.clone();
                move |batch: Vec<EvaluationResult>| {
                    batches.lock().unwrap().push(
                        batch
                            .iter()
                            .map(|r| r.point.clone())
                            .collect::<Vec<_>>(),
                    )
                }
            }),
        )
        .await
        .unwrap();

    assert_eq!(
        vec![
            vec![point(4), point(3)],
            vec![point(2), point(1)],
            vec![point(0)]
        ],
        *batches.lock().unwrap()
    );
    assert_eq!(
        vec![MemQuery::RunEvaluation(
            PointSelector::Points {
                points: (0..5u64).map(point).collect(),
            },
            range(0, 5),
            "x + 1".into()
        )],
        service.queries()
    );
}
