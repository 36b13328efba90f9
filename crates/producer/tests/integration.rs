//! Producer tests against a stand-in router served over real HTTP.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use relay_common::types::{ChannelClass, Level, WireMessage};
use relay_producer::transport::{HttpConnector, RouterConnector, RouterLink};
use relay_producer::{DeliverySession, DurableQueue, LinkError, SendOutcome, SessionConfig, SessionState};

#[derive(Clone, Default)]
struct FakeRouter {
    received: Arc<Mutex<Vec<Value>>>,
}

async fn alert(State(router): State<FakeRouter>, headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match token {
        Some("ABC123") => {}
        Some(_) => return (StatusCode::FORBIDDEN, Json(json!({"error": "Invalid token"}))),
        None => return (StatusCode::UNAUTHORIZED, Json(json!({"error": "Missing token"}))),
    }
    if body["message"].as_str().unwrap_or_default().contains("reject") {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "message refused"})));
    }

    let id = body["id"].clone();
    router.received.lock().unwrap().push(body);
    (StatusCode::OK, Json(json!({"success": true, "messageId": id})))
}

async fn spawn_router() -> (String, FakeRouter) {
    let state = FakeRouter::default();
    let app = Router::new()
        .route("/health", get(|| async { Json(json!({"status": "ok"})) }))
        .route("/api/alert", post(alert))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), state)
}

fn msg(body: &str) -> WireMessage {
    WireMessage::new(body, Level::Warn, ChannelClass::Logs)
}

#[tokio::test]
async fn test_http_link_delivers_with_bearer_token() {
    let (url, router) = spawn_router().await;
    let connector = HttpConnector::new(url, "ABC123", Duration::from_secs(2)).unwrap();
    let mut link = connector.connect().await.unwrap();

    let message = msg("disk at 91%");
    link.deliver(&message).await.unwrap();

    let received = router.received.lock().unwrap().clone();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["id"], message.id);
    assert_eq!(received[0]["message"], "disk at 91%");
    assert_eq!(received[0]["level"], "warn");
    assert_eq!(received[0]["channelClass"], "logs");
}

#[tokio::test]
async fn test_http_link_maps_status_codes() {
    let (url, _router) = spawn_router().await;

    let mut link = HttpConnector::new(url.clone(), "ABC123", Duration::from_secs(2))
        .unwrap()
        .connect()
        .await
        .unwrap();
    assert!(matches!(link.deliver(&msg("please reject")).await, Err(LinkError::Rejected(_))));

    let mut bad = HttpConnector::new(url, "ZZZ999", Duration::from_secs(2))
        .unwrap()
        .connect()
        .await
        .unwrap();
    match bad.deliver(&msg("hello")).await {
        Err(LinkError::Auth(reason)) => assert_eq!(reason, "Invalid token"),
        other => panic!("expected auth error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_router_is_a_connectivity_error() {
    // Bind and drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let connector = HttpConnector::new(format!("http://{}", addr), "ABC123", Duration::from_secs(2)).unwrap();
    let err = connector.connect().await.err().unwrap();
    assert!(err.is_connectivity());
}

#[tokio::test]
async fn test_session_drains_persisted_queue_on_startup() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut queue = DurableQueue::open(dir.path(), 10).await.unwrap();
        queue.enqueue(msg("left over 1")).await.unwrap();
        queue.enqueue(msg("left over 2")).await.unwrap();
    }

    let (url, router) = spawn_router().await;
    let connector = HttpConnector::new(url, "ABC123", Duration::from_secs(2)).unwrap();
    let queue = DurableQueue::open(dir.path(), 10).await.unwrap();
    let (session, task) = DeliverySession::new(connector, queue, SessionConfig::default()).spawn();

    let mut state = session.watch_state();
    tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| *s == SessionState::Online))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(session.send(msg("fresh")).await, SendOutcome::Delivered);
    assert!(session.pending().await.unwrap().is_empty());

    let bodies: Vec<String> = router
        .received
        .lock()
        .unwrap()
        .iter()
        .map(|b| b["message"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(bodies, vec!["left over 1", "left over 2", "fresh"]);

    session.shutdown().await.unwrap();
    task.await.unwrap();

    let reopened = DurableQueue::open(dir.path(), 10).await.unwrap();
    assert!(reopened.is_empty());
}
