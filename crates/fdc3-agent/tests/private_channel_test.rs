//! Private channels: access control, lifecycle events, listener replay,
//! and membership granted through intent results.

use std::time::Duration;

use fdc3_agent::protocol::messages::{AgentEvent, PrivateChannelEventType};
use fdc3_agent::{ChannelType, Error, IntentResult, ResponseError};
use serde_json::json;
use tokio::time::timeout;

mod common;

fn contact() -> serde_json::Value {
    json!({"type": "fdc3.contact", "id": {"email": "x@y"}})
}

#[tokio::test]
async fn outsiders_are_denied_everywhere() {
    common::init_tracing();
    let root = common::test_root();
    let a = common::connect(&root, "a.example.com").await;
    let b = common::connect(&root, "b.example.com").await;

    let pc = a.create_private_channel().await.unwrap();
    assert_eq!(pc.channel_type, ChannelType::Private);

    match b.broadcast(&pc.id, contact()).await {
        Err(Error::Fdc3(ResponseError::AccessDenied)) => {}
        other => panic!("expected AccessDenied on broadcast, got {other:?}"),
    }
    match b.add_context_listener(Some(&pc.id), None).await {
        Err(Error::Fdc3(ResponseError::AccessDenied)) => {}
        other => panic!("expected AccessDenied on addContextListener, got {other:?}"),
    }
    match b.get_current_context(&pc.id, None).await {
        Err(Error::Fdc3(ResponseError::AccessDenied)) => {}
        other => panic!("expected AccessDenied on getCurrentContext, got {other:?}"),
    }
    match b
        .private_channel_add_event_listener(&pc.id, PrivateChannelEventType::Disconnect)
        .await
    {
        Err(Error::Fdc3(ResponseError::AccessDenied)) => {}
        other => panic!("expected AccessDenied on addEventListener, got {other:?}"),
    }

    // The creator is in the ACL and operates freely.
    a.broadcast(&pc.id, contact()).await.unwrap();
    let current = a.get_current_context(&pc.id, None).await.unwrap();
    assert!(current.is_some());
}

/// A private channel id can never be claimed through getOrCreateChannel,
/// not even by the channel's creator.
#[tokio::test]
async fn get_or_create_rejects_private_channel_ids() {
    common::init_tracing();
    let root = common::test_root();
    let a = common::connect(&root, "a.example.com").await;
    let b = common::connect(&root, "b.example.com").await;

    let pc = a.create_private_channel().await.unwrap();

    for proxy in [&a, &b] {
        match proxy.get_or_create_channel(&pc.id).await {
            Err(Error::Fdc3(ResponseError::AccessDenied)) => {}
            other => panic!("expected AccessDenied, got {other:?}"),
        }
    }
}

/// Registering an addContextListener event listener replays one event per
/// context listener already on the channel, in registration order.
#[tokio::test]
async fn add_context_listener_replay_in_insertion_order() {
    common::init_tracing();
    let root = common::test_root();
    let a = common::connect(&root, "a.example.com").await;

    let pc = a.create_private_channel().await.unwrap();
    let _any = a.add_context_listener(Some(&pc.id), None).await.unwrap();
    let _contacts = a
        .add_context_listener(Some(&pc.id), Some("fdc3.contact"))
        .await
        .unwrap();

    let mut events = a
        .private_channel_add_event_listener(&pc.id, PrivateChannelEventType::AddContextListener)
        .await
        .unwrap();

    let first = timeout(Duration::from_secs(2), events.next())
        .await
        .expect("first replay event")
        .unwrap();
    let second = timeout(Duration::from_secs(2), events.next())
        .await
        .expect("second replay event")
        .unwrap();

    let context_type_of = |event: &AgentEvent| match event {
        AgentEvent::PrivateChannelOnAddContextListener { payload, .. } => {
            assert_eq!(payload.private_channel_id, pc.id);
            payload.context_type.clone()
        }
        other => panic!("unexpected event: {other:?}"),
    };
    assert_eq!(context_type_of(&first), None);
    assert_eq!(context_type_of(&second), Some("fdc3.contact".to_string()));
}

/// New listeners on a private channel are announced to the other members'
/// addContextListener event listeners, never back to the subscriber.
#[tokio::test]
async fn peers_hear_new_listeners_and_unsubscribes() {
    common::init_tracing();
    let root = common::test_root();
    let a = common::connect(&root, "a.example.com").await;
    let b = common::connect(&root, "b.example.com").await;

    let pc = grant_via_intent(&a, &b).await;

    let mut a_adds = a
        .private_channel_add_event_listener(&pc, PrivateChannelEventType::AddContextListener)
        .await
        .unwrap();
    let mut a_unsubs = a
        .private_channel_add_event_listener(&pc, PrivateChannelEventType::Unsubscribe)
        .await
        .unwrap();

    let b_listener = b
        .add_context_listener(Some(&pc), Some("fdc3.contact"))
        .await
        .unwrap();

    let announced = timeout(Duration::from_secs(2), a_adds.next())
        .await
        .expect("A should hear B's new listener")
        .unwrap();
    match announced {
        AgentEvent::PrivateChannelOnAddContextListener { payload, .. } => {
            assert_eq!(payload.context_type.as_deref(), Some("fdc3.contact"));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    b.unsubscribe_context_listener(b_listener).await.unwrap();
    let gone = timeout(Duration::from_secs(2), a_unsubs.next())
        .await
        .expect("A should hear B's unsubscribe")
        .unwrap();
    match gone {
        AgentEvent::PrivateChannelOnUnsubscribe { payload, .. } => {
            assert_eq!(payload.context_type.as_deref(), Some("fdc3.contact"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

/// Disconnecting unsubscribes the departing app's listeners on its behalf,
/// then notifies each surviving disconnect listener exactly once.
#[tokio::test]
async fn disconnect_notifies_surviving_peers() {
    common::init_tracing();
    let root = common::test_root();
    let a = common::connect(&root, "a.example.com").await;
    let b = common::connect(&root, "b.example.com").await;

    let pc = grant_via_intent(&a, &b).await;

    let mut b_disconnects = b
        .private_channel_add_event_listener(&pc, PrivateChannelEventType::Disconnect)
        .await
        .unwrap();
    // A's own disconnect listener must not fire for A's departure.
    let mut a_disconnects = a
        .private_channel_add_event_listener(&pc, PrivateChannelEventType::Disconnect)
        .await
        .unwrap();
    let mut a_unsubs = a
        .private_channel_add_event_listener(&pc, PrivateChannelEventType::Unsubscribe)
        .await
        .unwrap();
    let _held = a
        .add_context_listener(Some(&pc), Some("fdc3.contact"))
        .await
        .unwrap();

    a.private_channel_disconnect(&pc).await.unwrap();

    let seen = timeout(Duration::from_secs(2), b_disconnects.next())
        .await
        .expect("B should hear the disconnect")
        .unwrap();
    match seen {
        AgentEvent::PrivateChannelOnDisconnect { payload, .. } => {
            assert_eq!(payload.private_channel_id, pc);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // A's held listener was unsubscribed on its behalf, announced to A.
    let unsub = timeout(Duration::from_secs(2), a_unsubs.next())
        .await
        .expect("A should see its listener unsubscribed")
        .unwrap();
    match unsub {
        AgentEvent::PrivateChannelOnUnsubscribe { payload, .. } => {
            assert_eq!(payload.context_type.as_deref(), Some("fdc3.contact"));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(a_disconnects.try_next().is_none());
    assert!(b_disconnects.try_next().is_none(), "exactly one disconnect event");
}

/// Hands `B`'s fresh private channel to `A` as an intent result, so both
/// ends hold membership. Returns the channel id.
async fn grant_via_intent(
    a: &fdc3_agent::proxy::DesktopAgentProxy,
    b: &fdc3_agent::proxy::DesktopAgentProxy,
) -> String {
    let mut handler = b.add_intent_listener("StartChat").await.unwrap();
    let resolution = a
        .raise_intent("StartChat", json!({"type": "fdc3.contact"}), None)
        .await
        .unwrap();

    let event = timeout(Duration::from_secs(2), handler.next())
        .await
        .expect("B should receive the intent event")
        .unwrap();

    let pc = b.create_private_channel().await.unwrap();
    b.send_intent_result(
        &event.raise_intent_request_uuid,
        IntentResult {
            context: None,
            channel: Some(pc.clone()),
        },
    )
    .await
    .unwrap();

    let result = timeout(Duration::from_secs(2), resolution.result())
        .await
        .expect("A should receive the intent result")
        .unwrap();
    assert_eq!(result.channel.as_ref().map(|c| c.id.as_str()), Some(pc.id.as_str()));
    pc.id
}
