use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::oneshot;

fn counting_loader(
    calls: Arc<AtomicUsize>,
    rx: oneshot::Receiver<ReplayResult<u32>>,
) -> impl FnOnce() -> BoxFut<'static, ReplayResult<u32>> {
    move || -> BoxFut<'static, ReplayResult<u32>> {
        calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            rx.await
                .unwrap_or_else(|_| Err(ReplayError::other("sender dropped")))
        })
    }
}

#[tokio::test]
async fn at_most_one_load_per_key() {
    let store = AsyncRecordStore::<u32>::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = oneshot::channel();
    let (_tx2, rx2) = oneshot::channel();

    let first = store.read("a", counting_loader(calls.clone(), rx));
    let second = store.read("a", counting_loader(calls.clone(), rx2));
    assert!(matches!(first, Err(Suspend::NotReady(_))));
    assert!(matches!(second, Err(Suspend::NotReady(_))));
    assert_eq!(1, calls.load(Ordering::SeqCst));
    assert_eq!(RecordStatus::Pending, store.status("a"));

    tx.send(Ok(7)).unwrap();
    let record = store.get("a").unwrap();
    assert_eq!(7, record.settled().await.unwrap());

    let (_tx3, rx3) = oneshot::channel();
    assert_eq!(
        7,
        store.read("a", counting_loader(calls.clone(), rx3)).unwrap()
    );
    assert_eq!(1, calls.load(Ordering::SeqCst));
}

#[tokio::test]
async fn suspending_read_resolves_through_scheduler() {
    let store = AsyncRecordStore::<u32>::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = oneshot::channel();
    let mut rx = Some(rx);

    tx.send(Ok(3)).unwrap();
    let value = resolve(|| {
        // only the first attempt creates the record
        let rx = rx.take().unwrap_or_else(|| oneshot::channel().1);
        store.read("k", counting_loader(calls.clone(), rx))
    })
    .await
    .unwrap();

    assert_eq!(3, value);
    assert_eq!(1, calls.load(Ordering::SeqCst));
}

#[tokio::test]
async fn rejection_is_memoized() {
    let store = AsyncRecordStore::<u32>::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = oneshot::channel();
    tx.send(Err(ReplayError::other("boom"))).unwrap();

    let err = store
        .read_async("k", counting_loader(calls.clone(), rx))
        .await
        .unwrap_err();
    assert_eq!("boom (src: None)", err.to_string());

    let (_tx, rx) = oneshot::channel();
    match store.read("k", counting_loader(calls.clone(), rx)) {
        Err(Suspend::Failed(e)) => assert_eq!(err.to_string(), e.to_string()),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(1, calls.load(Ordering::SeqCst));
    assert_eq!(RecordStatus::Rejected, store.status("k"));
}

#[tokio::test]
async fn remove_forces_a_fresh_load() {
    let store = AsyncRecordStore::<u32>::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let (tx, rx) = oneshot::channel();
    tx.send(Ok(1)).unwrap();
    assert_eq!(
        1,
        store
            .read_async("k", counting_loader(calls.clone(), rx))
            .await
            .unwrap()
    );

    assert!(store.remove("k"));
    assert!(!store.remove("k"));
    assert_eq!(RecordStatus::NotStarted, store.status("k"));

    let (tx, rx) = oneshot::channel();
    tx.send(Ok(2)).unwrap();
    assert_eq!(
        2,
        store
            .read_async("k", counting_loader(calls.clone(), rx))
            .await
            .unwrap()
    );
    assert_eq!(2, calls.load(Ordering::SeqCst));
}

#[tokio::test]
async fn subscribers_see_every_transition() {
    let store = AsyncRecordStore::<u32>::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sub = store.subscribe("k", {
        let seen = seen.clone();
        move |s| seen.lock().unwrap().push(*s)
    });

    let (tx, rx) = oneshot::channel();
    let record = store.get_or_create("k", move || {
        Box::pin(async move { rx.await.unwrap_or(Ok(0)) })
    });
    tx.send(Ok(5)).unwrap();
    record.settled().await.unwrap();
    // the transition is reported by the loader task after the value lands
    tokio::task::yield_now().await;

    store.remove("k");
    sub.unsubscribe();

    let (tx, rx) = oneshot::channel();
    tx.send(Ok(6)).unwrap();
    store
        .read_async("k", move || Box::pin(async move { rx.await.unwrap() }))
        .await
        .unwrap();

    assert_eq!(
        vec![
            RecordStatus::NotStarted,
            RecordStatus::Pending,
            RecordStatus::Resolved,
            RecordStatus::NotStarted,
        ],
        *seen.lock().unwrap()
    );
}

#[tokio::test]
async fn late_result_of_removed_record_reaches_holders_only() {
    let store = AsyncRecordStore::<u32>::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (tx, rx) = oneshot::channel();

    let record = store.get_or_create("k", move || {
        Box::pin(async move { rx.await.unwrap_or(Ok(0)) })
    });
    let _sub = store.subscribe("k", {
        let seen = seen.clone();
        move |s| seen.lock().unwrap().push(*s)
    });
    store.remove("k");

    tx.send(Ok(9)).unwrap();
    assert_eq!(9, record.settled().await.unwrap());
    tokio::task::yield_now().await;

    assert_eq!(
        vec![RecordStatus::Pending, RecordStatus::NotStarted],
        *seen.lock().unwrap()
    );
    assert!(store.is_empty());
}

#[tokio::test]
async fn subscriber_lists_are_dropped_with_their_last_subscription() {
    let store = AsyncRecordStore::<u32>::new();
    let observed = |store: &AsyncRecordStore<u32>| {
        let mut keys: Vec<String> = store
            .inner
            .lock()
            .unwrap()
            .subscribers
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    };

    let a1 = store.subscribe("a", |_| ());
    let a2 = store.subscribe("a", |_| ());
    let b = store.subscribe("b", |_| ());
    store.subscribe("c", |_| ()).detach();
    assert_eq!(vec!["a", "b", "c"], observed(&store));

    drop(a1);
    assert_eq!(vec!["a", "b", "c"], observed(&store));
    drop(a2);
    b.unsubscribe();
    assert_eq!(vec!["c"], observed(&store));
}
