use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde_json::json;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tungstenite::protocol::Message as WsMessage;

use super::{DedupRecord, Delivery, Hub};
use crate::broker::{Broker, InMemoryBroker};
use crate::session::{ClientSession, Session};
use crate::subscription::{Readiness, SubscriptionManager};
use crate::utils::error::DispatchError;

const WAIT: Duration = Duration::from_secs(2);

fn build_hub(window: Duration) -> (Arc<InMemoryBroker>, Arc<Hub>) {
    let broker = Arc::new(InMemoryBroker::new());
    let manager = Arc::new(SubscriptionManager::new(
        broker.clone(),
        Duration::from_millis(50),
    ));
    let dedup = Arc::new(DedupRecord::new(window, window * 2));
    let hub = Arc::new(Hub::new(manager, dedup, WAIT));
    (broker, hub)
}

async fn connect(
    hub: &Arc<Hub>,
    recipient: &str,
) -> (Arc<ClientSession>, UnboundedReceiver<WsMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = Arc::new(ClientSession::new(tx));
    let readiness = hub
        .register_session(recipient, session.clone())
        .await
        .unwrap();
    assert_eq!(readiness, Readiness::Confirmed);
    (session, rx)
}

fn drain(rx: &mut UnboundedReceiver<WsMessage>) -> Vec<String> {
    let mut frames = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        match msg {
            WsMessage::Text(text) => frames.push(text.as_str().to_owned()),
            other => panic!("Expected a text message, got {other:?}"),
        }
    }
    frames
}

fn chat(id: &str, recipient: &str) -> String {
    json!({
        "messageId": id,
        "senderId": "u9",
        "recipientId": recipient,
        "content": "hi",
        "type": "text"
    })
    .to_string()
}

fn notification(recipient: &str) -> String {
    json!({"type": "notification", "subType": "inbox", "count": 1, "recipientId": recipient})
        .to_string()
}

#[tokio::test]
async fn test_duplicate_within_window_is_written_once() {
    let (_broker, hub) = build_hub(Duration::from_millis(100));
    let (_session, mut rx) = connect(&hub, "u1").await;
    let raw = chat("m1", "u1");

    assert_eq!(hub.dispatch(raw.as_bytes()).unwrap(), Delivery::Delivered);
    assert_eq!(hub.dispatch(raw.as_bytes()).unwrap(), Delivery::Duplicate);
    assert_eq!(drain(&mut rx), vec![raw.clone()]);

    sleep(Duration::from_millis(150)).await;
    assert_eq!(hub.dispatch(raw.as_bytes()).unwrap(), Delivery::Delivered);
    assert_eq!(drain(&mut rx), vec![raw]);
}

#[tokio::test]
async fn test_dispatch_without_session_is_a_noop() {
    let (_broker, hub) = build_hub(Duration::from_secs(5));
    let raw = chat("m1", "ghost");

    assert_eq!(hub.dispatch(raw.as_bytes()).unwrap(), Delivery::NoSession);
    // Nothing was delivered, so nothing is remembered.
    assert!(hub.dedup().is_empty());

    let (_session, mut rx) = connect(&hub, "ghost").await;
    assert_eq!(hub.dispatch(raw.as_bytes()).unwrap(), Delivery::Delivered);
    assert_eq!(drain(&mut rx).len(), 1);
}

#[tokio::test]
async fn test_notifications_bypass_dedup() {
    let (_broker, hub) = build_hub(Duration::from_secs(5));
    let (_session, mut rx) = connect(&hub, "u1").await;
    let raw = notification("u1");

    assert_eq!(hub.dispatch(raw.as_bytes()).unwrap(), Delivery::Notified);
    assert_eq!(hub.dispatch(raw.as_bytes()).unwrap(), Delivery::Notified);

    let frames = drain(&mut rx);
    assert_eq!(frames.len(), 2);
    for frame in frames {
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value, json!({"type": "notification", "subType": "inbox", "count": 1}));
    }
}

#[tokio::test]
async fn test_notification_without_session_is_a_noop() {
    let (_broker, hub) = build_hub(Duration::from_secs(5));
    assert_eq!(
        hub.dispatch(notification("ghost").as_bytes()).unwrap(),
        Delivery::NoSession
    );
}

#[tokio::test]
async fn test_malformed_payload_is_reported() {
    let (_broker, hub) = build_hub(Duration::from_secs(5));
    assert!(matches!(
        hub.dispatch(b"{broken"),
        Err(DispatchError::Malformed(_))
    ));
    assert!(matches!(
        hub.dispatch(br#"{"recipientId":"u1"}"#),
        Err(DispatchError::Malformed(_))
    ));
}

#[tokio::test]
async fn test_failed_write_is_reported_and_not_remembered() {
    let (_broker, hub) = build_hub(Duration::from_secs(5));
    let (_session, rx) = connect(&hub, "u1").await;
    drop(rx);
    let raw = chat("m1", "u1");

    match hub.dispatch(raw.as_bytes()) {
        Err(DispatchError::SessionWrite { recipient, .. }) => assert_eq!(recipient, "u1"),
        other => panic!("Expected a session write error, got {other:?}"),
    }

    let (_session, mut rx) = connect(&hub, "u1").await;
    assert_eq!(hub.dispatch(raw.as_bytes()).unwrap(), Delivery::Delivered);
    assert_eq!(drain(&mut rx), vec![raw]);
}

#[tokio::test]
async fn test_remove_session_tears_down_subscription() {
    let (broker, hub) = build_hub(Duration::from_secs(5));
    let _conn = connect(&hub, "u1").await;
    assert_eq!(broker.listener_count("u1"), 1);

    assert!(hub.remove_session("u1").await);
    assert!(!hub.remove_session("u1").await);

    assert!(hub.session("u1").is_none());
    assert!(!hub.subscriptions().is_registered("u1").await);
    assert_eq!(broker.listener_count("u1"), 0);
    assert_eq!(
        hub.dispatch(chat("m1", "u1").as_bytes()).unwrap(),
        Delivery::NoSession
    );
}

#[tokio::test]
async fn test_stale_session_cannot_remove_its_replacement() {
    let (broker, hub) = build_hub(Duration::from_secs(5));
    let (old, _old_rx) = connect(&hub, "u1").await;
    let (new, _new_rx) = connect(&hub, "u1").await;
    assert_eq!(hub.session_count(), 1);

    assert!(!hub.remove_session_if("u1", old.id()).await);
    assert_eq!(hub.session("u1").unwrap().id(), new.id());
    assert_eq!(broker.listener_count("u1"), 1);

    assert!(hub.remove_session_if("u1", new.id()).await);
    assert!(hub.session("u1").is_none());
    assert_eq!(broker.listener_count("u1"), 0);
}

#[tokio::test]
async fn test_published_bytes_reach_session_verbatim() {
    let (broker, hub) = build_hub(Duration::from_secs(5));
    let (_session, mut rx) = connect(&hub, "u1").await;
    let raw = chat("m1", "u1");

    assert_eq!(broker.publish("u1", Bytes::from(raw.clone())).unwrap(), 1);

    let frame = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(frame, WsMessage::text(raw));
}

#[tokio::test]
async fn test_reconnect_routes_to_new_session_only() {
    let (broker, hub) = build_hub(Duration::from_secs(5));
    let (_old, mut old_rx) = connect(&hub, "u1").await;
    let (_new, mut new_rx) = connect(&hub, "u1").await;

    broker.publish("u1", Bytes::from(chat("m1", "u1"))).unwrap();
    // The same message pushed again, e.g. by the reconciler.
    broker.publish("u1", Bytes::from(chat("m1", "u1"))).unwrap();

    timeout(WAIT, new_rx.recv()).await.unwrap().unwrap();
    sleep(Duration::from_millis(50)).await;
    assert!(drain(&mut new_rx).is_empty());
    assert!(drain(&mut old_rx).is_empty());
}

#[test]
fn test_dedup_reserve_window() {
    let dedup = DedupRecord::new(Duration::from_secs(5), Duration::from_secs(10));
    let t0 = Instant::now();

    assert!(dedup.try_reserve("m1", t0));
    assert!(dedup.is_recent("m1", t0 + Duration::from_secs(4)));
    assert!(!dedup.try_reserve("m1", t0 + Duration::from_secs(4)));
    assert!(!dedup.is_recent("m1", t0 + Duration::from_secs(5)));
    assert!(dedup.try_reserve("m1", t0 + Duration::from_secs(5)));
    assert!(dedup.try_reserve("m2", t0));
}

#[test]
fn test_dedup_release_only_drops_own_claim() {
    let dedup = DedupRecord::new(Duration::from_secs(5), Duration::from_secs(10));
    let t0 = Instant::now();
    let t1 = t0 + Duration::from_millis(1);

    assert!(dedup.try_reserve("m1", t0));
    dedup.record("m1", t1);
    dedup.release("m1", t0);
    assert!(dedup.is_recent("m1", t1));

    dedup.release("m1", t1);
    assert!(dedup.is_empty());
}

#[test]
fn test_dedup_prune_respects_horizon() {
    let dedup = DedupRecord::new(Duration::from_secs(5), Duration::from_secs(10));
    let t0 = Instant::now();
    dedup.record("old", t0);
    dedup.record("new", t0 + Duration::from_secs(6));

    assert_eq!(dedup.prune(t0 + Duration::from_secs(9)), 0);
    assert_eq!(dedup.prune(t0 + Duration::from_secs(10)), 1);
    assert_eq!(dedup.len(), 1);
    assert!(dedup.is_recent("new", t0 + Duration::from_secs(10)));
}

#[test]
fn test_dedup_horizon_never_shorter_than_window() {
    let dedup = DedupRecord::new(Duration::from_secs(5), Duration::from_secs(1));
    let t0 = Instant::now();
    dedup.record("m1", t0);
    assert_eq!(dedup.prune(t0 + Duration::from_secs(2)), 0);
    assert!(dedup.is_recent("m1", t0 + Duration::from_secs(2)));
}

#[tokio::test]
async fn test_sweep_loop_prunes_and_stops() {
    let dedup = Arc::new(DedupRecord::new(
        Duration::from_millis(10),
        Duration::from_millis(10),
    ));
    dedup.record("m1", Instant::now());
    let (tx, rx) = watch::channel(false);

    let task = tokio::spawn(DedupRecord::start_sweep_loop(
        dedup.clone(),
        Duration::from_millis(5),
        rx,
    ));

    timeout(WAIT, async {
        while !dedup.is_empty() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("entry was never swept");

    tx.send_replace(true);
    timeout(WAIT, task).await.unwrap().unwrap();
}
