//! Broadcast fan-out across connected proxies: delivery, filtering,
//! self-exclusion, and per-app dedup.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

mod common;

fn contact() -> serde_json::Value {
    json!({"type": "fdc3.contact", "id": {"email": "x@y"}})
}

/// A joins a user channel, B listens on its current channel for contacts;
/// A's broadcast reaches B exactly once and never loops back to A.
#[tokio::test]
async fn join_and_broadcast_fan_out() {
    common::init_tracing();
    let root = common::test_root();
    let a = common::connect(&root, "a.example.com").await;
    let b = common::connect(&root, "b.example.com").await;

    a.join_user_channel("fdc3.channel.2").await.unwrap();
    b.join_user_channel("fdc3.channel.2").await.unwrap();

    let mut b_listener = b.add_context_listener(None, Some("fdc3.contact")).await.unwrap();
    let mut a_listener = a.add_context_listener(None, Some("fdc3.contact")).await.unwrap();

    a.broadcast("fdc3.channel.2", contact()).await.unwrap();

    let delivered = timeout(Duration::from_secs(2), b_listener.next())
        .await
        .expect("B should receive the broadcast")
        .unwrap();
    assert_eq!(delivered.channel_id, "fdc3.channel.2");
    assert_eq!(&delivered.originating_app, a.identity());
    assert_eq!(delivered.context["id"]["email"], "x@y");

    // The source never appears in the recipient set.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(a_listener.try_next().is_none());
}

#[tokio::test]
async fn type_filter_and_channel_isolation() {
    common::init_tracing();
    let root = common::test_root();
    let a = common::connect(&root, "a.example.com").await;
    let b = common::connect(&root, "b.example.com").await;

    b.join_user_channel("fdc3.channel.1").await.unwrap();
    let mut contacts = b.add_context_listener(None, Some("fdc3.contact")).await.unwrap();
    let mut anything = b.add_context_listener(None, None).await.unwrap();

    // Different channel: nobody hears it.
    a.join_user_channel("fdc3.channel.4").await.unwrap();
    a.broadcast("fdc3.channel.4", contact()).await.unwrap();

    // Same channel, different type: only the any-type listener hears it.
    a.broadcast("fdc3.channel.1", json!({"type": "fdc3.instrument"}))
        .await
        .unwrap();

    let heard = timeout(Duration::from_secs(2), anything.next())
        .await
        .expect("any-type listener should hear the instrument")
        .unwrap();
    assert_eq!(heard.context["type"], "fdc3.instrument");
    assert_eq!(heard.channel_id, "fdc3.channel.1");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(contacts.try_next().is_none());
}

/// Invariant: one broadcastEvent per matching app, however many of its
/// listeners match.
#[tokio::test]
async fn fan_out_delivers_once_per_app() {
    common::init_tracing();
    let root = common::test_root();
    let a = common::connect(&root, "a.example.com").await;
    let b = common::connect(&root, "b.example.com").await;

    b.join_user_channel("fdc3.channel.2").await.unwrap();
    let _floating = b.add_context_listener(None, None).await.unwrap();
    let _bound = b
        .add_context_listener(Some("fdc3.channel.2"), Some("fdc3.contact"))
        .await
        .unwrap();

    // Count raw broadcastEvent frames on B's connection.
    let events = Arc::new(AtomicUsize::new(0));
    let counter = events.clone();
    b.connection().add_response_handler(move |frame| {
        if frame["type"] == "broadcastEvent" {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    a.broadcast("fdc3.channel.2", contact()).await.unwrap();

    common::eventually(async || events.load(Ordering::SeqCst) == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(events.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn app_channel_broadcast_reaches_bound_listeners() {
    common::init_tracing();
    let root = common::test_root();
    let a = common::connect(&root, "a.example.com").await;
    let b = common::connect(&root, "b.example.com").await;

    let channel = b.get_or_create_channel("orders").await.unwrap();
    assert_eq!(channel.id, "orders");
    let mut listener = b.add_context_listener(Some("orders"), None).await.unwrap();

    a.get_or_create_channel("orders").await.unwrap();
    a.broadcast("orders", json!({"type": "fdc3.order", "id": {"ref": "77"}}))
        .await
        .unwrap();

    let delivered = timeout(Duration::from_secs(2), listener.next())
        .await
        .expect("bound listener should hear the order")
        .unwrap();
    assert_eq!(delivered.context["id"]["ref"], "77");
}

/// The root agent is its own proxy over a loopback connection; fan-out
/// rules apply to it unchanged.
#[tokio::test]
async fn loopback_agent_participates_in_fan_out() {
    common::init_tracing();
    let root = common::test_root();
    let desk = root.loopback_agent();
    let b = common::connect(&root, "b.example.com").await;

    b.join_user_channel("fdc3.channel.3").await.unwrap();
    let mut listener = b.add_context_listener(None, None).await.unwrap();

    desk.join_user_channel("fdc3.channel.3").await.unwrap();
    desk.broadcast("fdc3.channel.3", contact()).await.unwrap();

    let delivered = timeout(Duration::from_secs(2), listener.next())
        .await
        .expect("loopback broadcast should reach B")
        .unwrap();
    assert_eq!(&delivered.originating_app, desk.identity());

    // And the loopback side receives like any proxy.
    let mut desk_listener = desk.add_context_listener(None, None).await.unwrap();
    b.broadcast("fdc3.channel.3", json!({"type": "fdc3.instrument"}))
        .await
        .unwrap();
    let heard = timeout(Duration::from_secs(2), desk_listener.next())
        .await
        .expect("B's broadcast should reach the loopback agent")
        .unwrap();
    assert_eq!(&heard.originating_app, b.identity());
}
