use std::sync::Arc;
use std::time::Duration;

use cart_sdk::{CartLine, Endpoint, InMemoryCartBackend, LineId, SearchHit};
use smartcart_core::{
    spawn_session, PollerState, PromptResolution, RecordingObserver, SessionError, SessionHandle,
    SessionSettings,
};
use tokio::task::JoinHandle;

const PERIOD: Duration = Duration::from_millis(2_000);

fn catalog() -> Vec<SearchHit> {
    vec![
        SearchHit {
            name: "Milk".into(),
            price: 60.0,
            description: "Full cream milk - 1L".into(),
        },
        SearchHit {
            name: "Bread".into(),
            price: 40.0,
            description: "Whole wheat bread - 400g".into(),
        },
    ]
}

struct Harness {
    backend: Arc<InMemoryCartBackend>,
    observer: Arc<RecordingObserver>,
    handle: SessionHandle,
    actor: JoinHandle<()>,
}

fn harness() -> Harness {
    let backend = InMemoryCartBackend::with_catalog(catalog());
    let observer = Arc::new(RecordingObserver::new());
    let (handle, actor) = spawn_session(
        backend.clone(),
        observer.clone(),
        &SessionSettings::default(),
    );
    Harness {
        backend,
        observer,
        handle,
        actor,
    }
}

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[test_timeout::tokio_timeout_test(paused)]
async fn first_poll_lands_one_period_after_start() {
    let h = harness();
    h.handle.start_capture().await.unwrap();
    assert_eq!(h.handle.snapshot().await.unwrap().poller, PollerState::Polling);

    sleep_ms(1_900).await;
    assert_eq!(h.backend.count_calls(Endpoint::Prompt).await, 0);

    sleep_ms(200).await;
    assert_eq!(h.backend.count_calls(Endpoint::Prompt).await, 1);
    assert_eq!(h.backend.count_calls(Endpoint::Cart).await, 1);
}

#[test_timeout::tokio_timeout_test(paused)]
async fn detections_reach_the_cache_on_the_next_tick() {
    let h = harness();
    h.handle.start_capture().await.unwrap();
    assert!(h.backend.detect("Bread").await);

    sleep_ms(2_100).await;
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.frame.lines.len(), 1);
    assert_eq!(snapshot.frame.lines[0].name, "Bread");
    assert_eq!(snapshot.frame.total_label(), "40.00");
    assert_eq!(h.observer.count_message("Bread added to cart!"), 1);
    assert_eq!(h.observer.recorded().chimes, 1);
}

#[test_timeout::tokio_timeout_test(paused)]
async fn duplicate_detection_prompts_and_resolves() {
    let h = harness();
    h.backend
        .seed_line(CartLine {
            id: LineId(0),
            name: "Milk".into(),
            price: 60.0,
            description: "Full cream milk - 1L".into(),
            quantity: 1,
        })
        .await;
    h.handle.start_capture().await.unwrap();
    assert!(h.backend.detect("Milk").await);

    sleep_ms(2_100).await;
    let prompt = h.handle.snapshot().await.unwrap().prompt.expect("prompt missing");
    assert_eq!(prompt.item.id, LineId(0));

    h.handle.resolve_prompt(PromptResolution::Increment).await.unwrap();
    let snapshot = h.handle.snapshot().await.unwrap();
    assert!(snapshot.prompt.is_none());
    assert_eq!(snapshot.frame.lines[0].quantity, 2);
    assert_eq!(h.backend.cart_lines().await[0].quantity, 2);
}

#[test_timeout::tokio_timeout_test(paused)]
async fn cart_failures_suspend_polling_until_restart() {
    let h = harness();
    h.handle.start_capture().await.unwrap();
    h.backend.fail_next(Endpoint::Cart, 1_000).await;

    sleep_ms(3 * 2_000 + 100).await;
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.cart_fetch_failures, 3);
    assert_eq!(snapshot.poller, PollerState::Idle);
    // Each failed poll is one attempt plus three retries.
    assert_eq!(h.backend.count_calls(Endpoint::Cart).await, 12);
    assert_eq!(h.observer.count_message("Failed to update cart"), 1);
    assert_eq!(
        h.observer
            .count_message("Too many cart update failures. Pausing updates."),
        1
    );

    sleep_ms(10 * 2_000).await;
    assert_eq!(h.backend.count_calls(Endpoint::Cart).await, 12);

    h.backend.fail_next(Endpoint::Cart, 0).await;
    h.handle.start_capture().await.unwrap();
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.cart_fetch_failures, 0);
    assert_eq!(snapshot.poller, PollerState::Polling);

    sleep_ms(PERIOD.as_millis() as u64 + 100).await;
    assert_eq!(h.backend.count_calls(Endpoint::Cart).await, 13);
}

#[test_timeout::tokio_timeout_test(paused)]
async fn stop_capture_idles_the_poller() {
    let h = harness();
    h.handle.start_capture().await.unwrap();
    sleep_ms(2_100).await;
    h.handle.stop_capture().await.unwrap();

    let polls = h.backend.count_calls(Endpoint::Prompt).await;
    assert_eq!(h.handle.snapshot().await.unwrap().poller, PollerState::Idle);
    sleep_ms(20_000).await;
    assert_eq!(h.backend.count_calls(Endpoint::Prompt).await, polls);
}

#[test_timeout::tokio_timeout_test(paused)]
async fn handle_reports_closed_session() {
    let h = harness();
    h.handle.shutdown();
    h.actor.await.unwrap();

    let err = h.handle.refresh().await.unwrap_err();
    assert!(matches!(err, SessionError::SessionClosed));
    assert!(h.handle.is_closed());
}

#[test_timeout::tokio_timeout_test(paused)]
async fn search_add_and_checkout_through_handle() {
    let h = harness();
    let hits = h.handle.search("bre").await.unwrap();
    assert_eq!(hits.len(), 1);

    let hit = hits.into_iter().next().expect("no hit");
    let id = h
        .handle
        .add_by_name(hit.name, hit.price, hit.description)
        .await
        .unwrap();
    assert!(!id.is_provisional());

    let message = h.handle.checkout().await.unwrap();
    assert_eq!(message, "Payment successful! Thank You For Shopping.");
    assert!(h.handle.snapshot().await.unwrap().frame.is_empty());
    assert!(h.backend.cart_lines().await.is_empty());
}
