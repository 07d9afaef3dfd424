use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use cart_sdk::{ReqwestCartBackend, ServerConfig, Timeouts};
use serde_json::{json, Value};
use smartcart_core::{
    spawn_session, PollerState, RecordingObserver, SessionHandle, SessionSettings,
};
use tokio::sync::Mutex;

#[derive(Default)]
struct FakeServer {
    cart: Vec<Value>,
    signals: VecDeque<Value>,
    updates: Vec<(i64, String)>,
    slow_prompt: bool,
}

type Shared = Arc<Mutex<FakeServer>>;

async fn serve(shared: Shared) -> String {
    let router = Router::new()
        .route("/camera/start", post(|| async { Json(json!({ "success": true })) }))
        .route("/camera/stop", post(|| async { Json(json!({ "success": true })) }))
        .route(
            "/prompt",
            get(|State(shared): State<Shared>| async move {
                let (slow, signal) = {
                    let mut server = shared.lock().await;
                    (server.slow_prompt, server.signals.pop_front())
                };
                if slow {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
                Json(signal.unwrap_or_else(|| json!({ "action": "none" })))
            }),
        )
        .route(
            "/cart",
            get(|State(shared): State<Shared>| async move {
                let server = shared.lock().await;
                let count: i64 = server
                    .cart
                    .iter()
                    .map(|line| line["quantity"].as_i64().unwrap_or(0))
                    .sum();
                Json(json!({ "cart": server.cart, "item_count": count }))
            }),
        )
        .route(
            "/cart/update/:id",
            post(
                |State(shared): State<Shared>, Path(id): Path<i64>, Json(body): Json<Value>| async move {
                    let action = body["action"].as_str().unwrap_or_default().to_string();
                    let mut server = shared.lock().await;
                    if let Some(line) = server.cart.iter_mut().find(|line| line["id"] == id) {
                        let quantity = line["quantity"].as_i64().unwrap_or(1);
                        line["quantity"] = json!(if action == "increment" { quantity + 1 } else { quantity });
                    }
                    server.updates.push((id, action));
                    Json(json!({ "success": true }))
                },
            ),
        )
        .with_state(shared);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .await
            .unwrap();
    });
    format!("http://{addr}")
}

fn settings() -> SessionSettings {
    SessionSettings {
        poll_interval: Duration::from_millis(50),
        timeouts: Timeouts {
            prompt: Duration::from_millis(100),
            ..Timeouts::default()
        },
        ..SessionSettings::default()
    }
}

async fn connect(shared: Shared) -> (SessionHandle, Arc<RecordingObserver>) {
    let base = serve(shared).await;
    let settings = settings();
    let config = ServerConfig::new(&base)
        .unwrap()
        .with_timeouts(settings.timeouts);
    let backend = Arc::new(ReqwestCartBackend::new(config).unwrap());
    let observer = Arc::new(RecordingObserver::new());
    let (handle, _actor) = spawn_session(backend, observer.clone(), &settings);
    (handle, observer)
}

/// Polls `check` against fresh snapshots until it holds or two seconds pass.
async fn eventually<F>(handle: &SessionHandle, check: F) -> bool
where
    F: Fn(&smartcart_core::SessionSnapshot) -> bool,
{
    for _ in 0..100 {
        let snapshot = handle.snapshot().await.unwrap();
        if check(&snapshot) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[test_timeout::tokio_timeout_test]
async fn polled_detection_then_increment_over_http() {
    let shared = Shared::default();
    let milk = json!({ "id": 7, "name": "Milk", "price": 60, "description": "1L", "quantity": 1 });
    {
        let mut server = shared.lock().await;
        server.cart.push(milk.clone());
        server
            .signals
            .push_back(json!({ "action": "add", "item": milk }));
    }
    let (handle, observer) = connect(shared.clone()).await;

    handle.start_capture().await.unwrap();
    assert!(
        eventually(&handle, |s| s.frame.lines.len() == 1).await,
        "detected line never reached the cache"
    );
    assert_eq!(observer.count_message("Milk added to cart!"), 1);

    handle.increment(cart_sdk::LineId(7)).await.unwrap();
    assert_eq!(
        shared.lock().await.updates,
        vec![(7, "increment".to_string())]
    );
    assert!(eventually(&handle, |s| s.frame.item_count == 2).await);

    handle.stop_capture().await.unwrap();
    assert_eq!(handle.snapshot().await.unwrap().poller, PollerState::Idle);
}

#[test_timeout::tokio_timeout_test]
async fn stalled_prompt_feed_trips_the_ceiling() {
    let shared = Shared::default();
    shared.lock().await.slow_prompt = true;
    let (handle, observer) = connect(shared).await;

    handle.start_capture().await.unwrap();
    assert!(
        eventually(&handle, |s| s.poller == PollerState::Idle).await,
        "poller kept running after repeated prompt timeouts"
    );
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.scan_feed_failures, 3);
    assert!(snapshot.capture_active);
    assert_eq!(
        observer.count_message("Prompt feed unavailable. Pausing cart updates."),
        1
    );
}
