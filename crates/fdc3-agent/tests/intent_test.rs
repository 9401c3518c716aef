//! Intent routing: raise/resolve flow, result correlation, targeting, and
//! directory-merged discovery.

use std::sync::Arc;
use std::time::Duration;

use fdc3_agent::directory::{
    AppDirectoryApplication, AppDirectoryDetails, AppDirectoryIntents, AppDirectoryInterop,
    StaticAppDirectory,
};
use fdc3_agent::{
    AgentConfig, Error, GetAgentOptions, HandshakeTarget, IntentResult, ResponseError, RootAgent,
    TargetAppIdentifier, get_agent,
};
use serde_json::json;
use tokio::time::timeout;

mod common;

#[tokio::test]
async fn raise_resolve_and_result_roundtrip() {
    common::init_tracing();
    let root = common::test_root();
    let a = common::connect(&root, "a.example.com").await;
    let b = common::connect(&root, "b.example.com").await;

    let mut handler = b.add_intent_listener("StartCall").await.unwrap();

    let resolution = a
        .raise_intent(
            "StartCall",
            json!({"type": "fdc3.contact", "id": {"email": "x@y"}}),
            None,
        )
        .await
        .unwrap();
    assert_eq!(&resolution.resolution.source, b.identity());
    assert_eq!(resolution.resolution.intent, "StartCall");

    let event = timeout(Duration::from_secs(2), handler.next())
        .await
        .expect("B should receive the intent event")
        .unwrap();
    assert_eq!(event.intent, "StartCall");
    assert_eq!(&event.originating_app, a.identity());
    assert_eq!(event.context["id"]["email"], "x@y");

    b.send_intent_result(
        &event.raise_intent_request_uuid,
        IntentResult {
            context: Some(json!({"type": "fdc3.order", "id": {"ref": "123"}})),
            channel: None,
        },
    )
    .await
    .unwrap();

    let result = timeout(Duration::from_secs(2), resolution.result())
        .await
        .expect("A should receive the result")
        .unwrap();
    assert_eq!(result.context.unwrap()["id"]["ref"], "123");
}

#[tokio::test]
async fn raise_with_no_listener_fails() {
    common::init_tracing();
    let root = common::test_root();
    let a = common::connect(&root, "a.example.com").await;

    match a
        .raise_intent("StartCall", json!({"type": "fdc3.contact"}), None)
        .await
    {
        Err(Error::Fdc3(ResponseError::NoAppsFound)) => {}
        other => panic!("expected NoAppsFound, got {other:?}"),
    }
}

#[tokio::test]
async fn ambiguity_without_a_resolver_is_an_error() {
    common::init_tracing();
    let root = common::test_root();
    let a = common::connect(&root, "a.example.com").await;
    let b = common::connect(&root, "b.example.com").await;
    let c = common::connect(&root, "c.example.com").await;

    let _b_handler = b.add_intent_listener("ViewChart").await.unwrap();
    let _c_handler = c.add_intent_listener("ViewChart").await.unwrap();

    match a
        .raise_intent("ViewChart", json!({"type": "fdc3.instrument"}), None)
        .await
    {
        Err(Error::Fdc3(ResponseError::ResolverUnavailable)) => {}
        other => panic!("expected ResolverUnavailable, got {other:?}"),
    }

    // Targeting disambiguates.
    let resolution = a
        .raise_intent(
            "ViewChart",
            json!({"type": "fdc3.instrument"}),
            Some(TargetAppIdentifier {
                app_id: "C".into(),
                instance_id: None,
            }),
        )
        .await
        .unwrap();
    assert_eq!(&resolution.resolution.source, c.identity());
}

#[tokio::test]
async fn targeting_an_absent_instance_fails() {
    common::init_tracing();
    let root = common::test_root();
    let a = common::connect(&root, "a.example.com").await;
    let b = common::connect(&root, "b.example.com").await;
    let _handler = b.add_intent_listener("StartCall").await.unwrap();

    match a
        .raise_intent(
            "StartCall",
            json!({"type": "fdc3.contact"}),
            Some(TargetAppIdentifier {
                app_id: "B".into(),
                instance_id: Some("not-a-real-instance".into()),
            }),
        )
        .await
    {
        Err(Error::Fdc3(ResponseError::TargetInstanceUnavailable)) => {}
        other => panic!("expected TargetInstanceUnavailable, got {other:?}"),
    }

    match a
        .raise_intent(
            "StartCall",
            json!({"type": "fdc3.contact"}),
            Some(TargetAppIdentifier {
                app_id: "Z".into(),
                instance_id: None,
            }),
        )
        .await
    {
        Err(Error::Fdc3(ResponseError::TargetAppUnavailable)) => {}
        other => panic!("expected TargetAppUnavailable, got {other:?}"),
    }
}

/// A pending raise whose target disconnects resolves to the raiser as a
/// delivery failure.
#[tokio::test]
async fn target_disconnect_fails_the_pending_raise() {
    common::init_tracing();
    let root = common::test_root();
    let a = common::connect(&root, "a.example.com").await;
    let b = common::connect(&root, "b.example.com").await;

    let mut handler = b.add_intent_listener("StartCall").await.unwrap();
    let resolution = a
        .raise_intent("StartCall", json!({"type": "fdc3.contact"}), None)
        .await
        .unwrap();

    // B sees the intent but departs without answering.
    let _event = timeout(Duration::from_secs(2), handler.next())
        .await
        .expect("B should receive the intent event")
        .unwrap();
    b.disconnect();

    match timeout(Duration::from_secs(2), resolution.result())
        .await
        .expect("the pending raise must resolve")
    {
        Err(Error::Fdc3(ResponseError::IntentDeliveryFailed)) => {}
        other => panic!("expected IntentDeliveryFailed, got {other:?}"),
    }
}

/// findIntent merges directory declarations with live listener instances.
#[tokio::test]
async fn find_intent_merges_directory_and_live_instances() {
    common::init_tracing();
    let dialer = AppDirectoryApplication {
        app_id: "dialer".into(),
        title: "Dialer".into(),
        description: None,
        details: Some(AppDirectoryDetails {
            url: "https://dialer.example.com/".into(),
        }),
        interop: Some(AppDirectoryInterop {
            intents: Some(AppDirectoryIntents {
                listens_for: [(
                    "StartCall".to_string(),
                    json!({"contexts": ["fdc3.contact"]}),
                )]
                .into_iter()
                .collect(),
            }),
        }),
    };
    let directory = StaticAppDirectory::new(vec![dialer])
        .with_app("A", "https://a.example.com/")
        .with_app("B", "https://b.example.com/");
    let root = RootAgent::new(AgentConfig::default(), Arc::new(directory));

    let targets: Vec<Arc<dyn HandshakeTarget>> = vec![Arc::new(root.clone())];
    let a = get_agent(
        &targets,
        GetAgentOptions::new("https://a.example.com/index.html"),
    )
    .await
    .unwrap();
    let b = get_agent(
        &targets,
        GetAgentOptions::new("https://b.example.com/index.html"),
    )
    .await
    .unwrap();

    let _handler = b.add_intent_listener("StartCall").await.unwrap();

    let found = a.find_intent("StartCall", None).await.unwrap();
    assert_eq!(found.intent.name, "StartCall");
    assert!(found.apps.iter().any(|app| app.app_id == "dialer" && app.instance_id.is_none()));
    assert!(
        found
            .apps
            .iter()
            .any(|app| app.app_id == "B"
                && app.instance_id.as_deref() == Some(b.identity().instance_id.as_str()))
    );

    // A context the declaration excludes filters the directory entry out.
    let filtered = a
        .find_intent("StartCall", Some(json!({"type": "fdc3.country"})))
        .await
        .unwrap();
    assert!(filtered.apps.iter().all(|app| app.app_id != "dialer"));

    match a.find_intent("NoSuchIntent", None).await {
        Err(Error::Fdc3(ResponseError::NoAppsFound)) => {}
        other => panic!("expected NoAppsFound, got {other:?}"),
    }
}
