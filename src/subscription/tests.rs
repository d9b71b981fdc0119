use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::json;
use tokio::time::{sleep, timeout};

use super::{MessageHandler, Readiness, SubscriptionManager};
use crate::broker::{Broker, InMemoryBroker};
use crate::utils::error::{DispatchError, SubscriptionError};

const GRACE: Duration = Duration::from_millis(50);
const WAIT: Duration = Duration::from_secs(2);

type Seen = Arc<Mutex<Vec<Vec<u8>>>>;

fn recorder() -> (Arc<dyn MessageHandler>, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler: Arc<dyn MessageHandler> =
        Arc::new(move |payload: &[u8]| -> Result<(), DispatchError> {
            sink.lock().push(payload.to_vec());
            Ok(())
        });
    (handler, seen)
}

async fn wait_for_len(seen: &Seen, len: usize) {
    timeout(WAIT, async {
        while seen.lock().len() < len {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("handler was not invoked in time");
}

fn chat(id: &str, recipient: &str) -> Bytes {
    Bytes::from(json!({"messageId": id, "recipientId": recipient, "content": "hi"}).to_string())
}

fn setup(broker: InMemoryBroker) -> (Arc<InMemoryBroker>, Arc<SubscriptionManager>) {
    let broker = Arc::new(broker);
    let manager = Arc::new(SubscriptionManager::new(broker.clone(), GRACE));
    (broker, manager)
}

#[tokio::test]
async fn test_register_confirms_then_delivers() {
    let (broker, manager) = setup(InMemoryBroker::new());
    let (handler, seen) = recorder();

    let confirmation = manager.register("u1", handler).await.unwrap();
    assert_eq!(confirmation.recipient(), "u1");
    assert_eq!(confirmation.wait(WAIT).await, Readiness::Confirmed);
    assert!(manager.is_confirmed("u1").await);

    assert_eq!(broker.publish("u1", chat("m1", "u1")).unwrap(), 1);
    wait_for_len(&seen, 1).await;
    assert_eq!(seen.lock()[0], chat("m1", "u1").to_vec());
}

#[tokio::test]
async fn test_rapid_reregister_keeps_one_subscription() {
    let (broker, manager) = setup(InMemoryBroker::new());
    let (handler, seen) = recorder();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let manager = Arc::clone(&manager);
        let handler = Arc::clone(&handler);
        tasks.push(tokio::spawn(async move {
            manager.register("u1", handler).await.map(|_| ())
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(manager.active_count().await, 1);
    assert_eq!(broker.listener_count("u1"), 1);

    assert_eq!(broker.publish("u1", chat("m1", "u1")).unwrap(), 1);
    wait_for_len(&seen, 1).await;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(seen.lock().len(), 1);
}

#[tokio::test]
async fn test_replaced_listener_stops_receiving() {
    let (broker, manager) = setup(InMemoryBroker::new());
    let (old_handler, old_seen) = recorder();
    let (new_handler, new_seen) = recorder();

    let first = manager.register("u1", old_handler).await.unwrap();
    assert_eq!(first.wait(WAIT).await, Readiness::Confirmed);
    let second = manager.register("u1", new_handler).await.unwrap();
    assert_eq!(second.wait(WAIT).await, Readiness::Confirmed);

    broker.publish("u1", chat("m1", "u1")).unwrap();
    wait_for_len(&new_seen, 1).await;
    sleep(Duration::from_millis(30)).await;
    assert!(old_seen.lock().is_empty());
}

#[tokio::test]
async fn test_malformed_payload_does_not_stop_listener() {
    let (broker, manager) = setup(InMemoryBroker::new());
    let (handler, seen) = recorder();
    let confirmation = manager.register("u1", handler).await.unwrap();
    confirmation.wait(WAIT).await;

    broker.publish("u1", Bytes::from_static(b"{not json")).unwrap();
    broker.publish("u1", Bytes::from_static(br#"{"content":"no id"}"#)).unwrap();
    broker.publish("u1", chat("m2", "u1")).unwrap();

    wait_for_len(&seen, 1).await;
    assert_eq!(seen.lock()[0], chat("m2", "u1").to_vec());
}

#[tokio::test]
async fn test_handler_failure_does_not_stop_listener() {
    let (broker, manager) = setup(InMemoryBroker::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let handler: Arc<dyn MessageHandler> =
        Arc::new(move |payload: &[u8]| -> Result<(), DispatchError> {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                // Surface a decode failure as the handler's own error.
                serde_json::from_slice::<u64>(payload)?;
            }
            Ok(())
        });
    manager.register("u1", handler).await.unwrap().wait(WAIT).await;

    broker.publish("u1", chat("m1", "u1")).unwrap();
    broker.publish("u1", chat("m2", "u1")).unwrap();

    timeout(WAIT, async {
        while calls.load(Ordering::SeqCst) < 2 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("second payload was not handled");
}

#[tokio::test]
async fn test_unregister_is_idempotent() {
    let (broker, manager) = setup(InMemoryBroker::new());
    manager.unregister("ghost").await;

    let (handler, seen) = recorder();
    manager.register("u1", handler).await.unwrap().wait(WAIT).await;
    manager.unregister("u1").await;
    manager.unregister("u1").await;

    assert!(!manager.is_registered("u1").await);
    assert_eq!(broker.listener_count("u1"), 0);
    assert_eq!(broker.publish("u1", chat("m1", "u1")).unwrap(), 0);
    sleep(Duration::from_millis(20)).await;
    assert!(seen.lock().is_empty());
}

#[tokio::test]
async fn test_shutdown_stops_everything() {
    let (broker, manager) = setup(InMemoryBroker::new());
    let mut signal = manager.shutdown_signal();
    for recipient in ["u1", "u2"] {
        let (handler, _) = recorder();
        manager.register(recipient, handler).await.unwrap().wait(WAIT).await;
    }

    manager.shutdown().await;
    manager.shutdown().await;

    assert!(manager.is_shut_down());
    assert!(*signal.borrow_and_update());
    assert_eq!(manager.active_count().await, 0);
    assert!(broker.is_closed());

    let (handler, _) = recorder();
    let err = manager.register("u1", handler).await.unwrap_err();
    assert!(matches!(err, SubscriptionError::ShutDown));
}

#[tokio::test]
async fn test_confirmation_wait_times_out_but_subscription_survives() {
    let (broker, manager) = setup(InMemoryBroker::with_confirm_delay(Duration::from_millis(150)));
    let (handler, seen) = recorder();

    let confirmation = manager.register("u1", handler).await.unwrap();
    assert_eq!(
        confirmation.wait(Duration::from_millis(10)).await,
        Readiness::TimedOut
    );
    assert!(!manager.is_confirmed("u1").await);

    timeout(WAIT, async {
        while !manager.is_confirmed("u1").await {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscription was never confirmed");

    broker.publish("u1", chat("m1", "u1")).unwrap();
    wait_for_len(&seen, 1).await;
}

#[tokio::test]
async fn test_unregister_before_confirmation_abandons_it() {
    let (broker, manager) = setup(InMemoryBroker::with_confirm_delay(Duration::from_millis(100)));
    let (handler, _) = recorder();

    let confirmation = manager.register("u1", handler).await.unwrap();
    manager.unregister("u1").await;

    assert_eq!(confirmation.wait(WAIT).await, Readiness::Abandoned);
    sleep(Duration::from_millis(150)).await;
    assert_eq!(broker.listener_count("u1"), 0);
}
