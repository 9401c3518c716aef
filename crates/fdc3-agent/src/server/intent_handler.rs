// Intent message handler: listener registry, raise/resolve routing, and
// result correlation back to the raiser.

use std::collections::HashMap;

use crate::directory::AppDirectoryApplication;
use crate::protocol::envelope::{EventMeta, RequestMeta, ResponseMeta};
use crate::protocol::errors::ResponseError;
use crate::protocol::generate_uuid;
use crate::protocol::messages::{
    AddIntentListenerRequestPayload, AgentEvent, AgentResponse, FindIntentRequestPayload,
    FindIntentResponsePayload, IntentEventPayload, IntentResultRequestPayload,
    ListenerUuidPayload, ListenerUuidResponsePayload, RaiseIntentRequestPayload,
    RaiseIntentResponsePayload, RaiseIntentResultResponsePayload, VoidResponsePayload,
};
use crate::protocol::types::{
    AppIdentifier, AppIntent, AppMetadata, ChannelType, IntentMetadata, IntentResolution,
    context_type_of,
};
use crate::server::channel_handler::OutboundEvent;

/// Result of one intent operation. Beyond the usual response + events, an
/// intent result also produces a response addressed to a *different* app
/// (the original raiser) and possibly a private-channel membership grant
/// for the channel layer to apply.
#[derive(Debug, Default)]
pub struct IntentOutcome {
    pub response: Option<AgentResponse>,
    pub events: Vec<OutboundEvent>,
    pub forwards: Vec<(AgentResponse, AppIdentifier)>,
    pub acl_grants: Vec<(String, AppIdentifier)>,
}

impl IntentOutcome {
    fn respond(response: AgentResponse) -> Self {
        Self {
            response: Some(response),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
struct IntentListener {
    uuid: String,
    owner: AppIdentifier,
    intent: String,
}

#[derive(Debug, Clone)]
struct PendingRaise {
    raiser: AppIdentifier,
    target: AppIdentifier,
}

pub struct IntentMessageHandler {
    listeners: Vec<IntentListener>,
    /// Raises awaiting a result, keyed by the raise request UUID. A pending
    /// raise lives until the target answers or disconnects.
    pending: HashMap<String, PendingRaise>,
}

impl IntentMessageHandler {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
            pending: HashMap::new(),
        }
    }

    pub fn add_intent_listener(
        &mut self,
        meta: &RequestMeta,
        payload: AddIntentListenerRequestPayload,
        source: &AppIdentifier,
    ) -> IntentOutcome {
        let uuid = generate_uuid();
        self.listeners.push(IntentListener {
            uuid: uuid.clone(),
            owner: source.clone(),
            intent: payload.intent,
        });
        IntentOutcome::respond(AgentResponse::AddIntentListener {
            meta: ResponseMeta::for_request(meta.request_uuid.clone()),
            payload: ListenerUuidResponsePayload::ok(uuid),
        })
    }

    pub fn intent_listener_unsubscribe(
        &mut self,
        meta: &RequestMeta,
        payload: ListenerUuidPayload,
        source: &AppIdentifier,
    ) -> IntentOutcome {
        self.listeners
            .retain(|l| !(l.uuid == payload.listener_uuid && l.owner == *source));
        IntentOutcome::respond(AgentResponse::IntentListenerUnsubscribe {
            meta: ResponseMeta::for_request(meta.request_uuid.clone()),
            payload: VoidResponsePayload::ok(),
        })
    }

    /// Distinct apps currently listening for `intent`, optionally narrowed
    /// to a requested target app or instance.
    fn candidates(
        &self,
        intent: &str,
        target: Option<&crate::protocol::types::TargetAppIdentifier>,
    ) -> Vec<AppIdentifier> {
        let mut apps: Vec<AppIdentifier> = Vec::new();
        for listener in &self.listeners {
            if listener.intent != intent {
                continue;
            }
            let matches_target = match target {
                Some(t) => {
                    listener.owner.app_id == t.app_id
                        && t.instance_id
                            .as_deref()
                            .is_none_or(|instance| listener.owner.instance_id == instance)
                }
                None => true,
            };
            if matches_target && !apps.contains(&listener.owner) {
                apps.push(listener.owner.clone());
            }
        }
        apps
    }

    pub fn raise_intent(
        &mut self,
        meta: &RequestMeta,
        payload: RaiseIntentRequestPayload,
        source: &AppIdentifier,
    ) -> IntentOutcome {
        let response_meta = ResponseMeta::for_request(meta.request_uuid.clone());
        let respond_err = |error| {
            IntentOutcome::respond(AgentResponse::RaiseIntent {
                meta: ResponseMeta::for_request(meta.request_uuid.clone()),
                payload: RaiseIntentResponsePayload {
                    intent_resolution: None,
                    error: Some(error),
                },
            })
        };

        let candidates = self.candidates(&payload.intent, payload.app.as_ref());
        let target = match candidates.as_slice() {
            [] => {
                let error = match &payload.app {
                    Some(app) if app.instance_id.is_some() => {
                        ResponseError::TargetInstanceUnavailable
                    }
                    Some(_) => ResponseError::TargetAppUnavailable,
                    None => ResponseError::NoAppsFound,
                };
                return respond_err(error);
            }
            [only] => only.clone(),
            // Several apps could take it and there is no resolver UI to ask
            // the user.
            _ => return respond_err(ResponseError::ResolverUnavailable),
        };

        self.pending.insert(
            meta.request_uuid.clone(),
            PendingRaise {
                raiser: source.clone(),
                target: target.clone(),
            },
        );

        let mut outcome = IntentOutcome::respond(AgentResponse::RaiseIntent {
            meta: response_meta,
            payload: RaiseIntentResponsePayload {
                intent_resolution: Some(IntentResolution {
                    intent: payload.intent.clone(),
                    source: target.clone(),
                }),
                error: None,
            },
        });
        outcome.events.push(OutboundEvent {
            event: AgentEvent::Intent {
                meta: EventMeta::new(),
                payload: IntentEventPayload {
                    intent: payload.intent,
                    context: payload.context,
                    originating_app: source.clone(),
                    raise_intent_request_uuid: meta.request_uuid.clone(),
                },
            },
            targets: vec![target],
        });
        outcome
    }

    pub fn intent_result(
        &mut self,
        meta: &RequestMeta,
        payload: IntentResultRequestPayload,
        source: &AppIdentifier,
    ) -> IntentOutcome {
        let mut outcome = IntentOutcome::respond(AgentResponse::IntentResult {
            meta: ResponseMeta::for_request(meta.request_uuid.clone()),
            payload: VoidResponsePayload::ok(),
        });

        let raise_uuid = payload.raise_intent_request_uuid;
        let delivered_by_target = self
            .pending
            .get(&raise_uuid)
            .is_some_and(|p| p.target == *source);
        if !delivered_by_target {
            tracing::warn!(
                raise = %raise_uuid,
                from = %source,
                "ignoring intent result with no matching pending raise"
            );
            return outcome;
        }
        let Some(pending) = self.pending.remove(&raise_uuid) else {
            return outcome;
        };

        if let Some(channel) = &payload.intent_result.channel
            && channel.channel_type == ChannelType::Private
        {
            outcome
                .acl_grants
                .push((channel.id.clone(), pending.raiser.clone()));
        }

        outcome.forwards.push((
            AgentResponse::RaiseIntentResult {
                meta: ResponseMeta::for_request(raise_uuid),
                payload: RaiseIntentResultResponsePayload {
                    intent_result: Some(payload.intent_result),
                    error: None,
                },
            },
            pending.raiser,
        ));
        outcome
    }

    pub fn find_intent(
        &self,
        meta: &RequestMeta,
        payload: FindIntentRequestPayload,
        directory_apps: &[AppDirectoryApplication],
    ) -> IntentOutcome {
        let context_type = payload
            .context
            .as_ref()
            .and_then(|c| context_type_of(c))
            .map(str::to_string);

        let mut apps: Vec<AppMetadata> = Vec::new();
        for record in directory_apps {
            if !record.listens_for(&payload.intent) {
                continue;
            }
            if let Some(wanted) = &context_type
                && !declaration_accepts_context(record, &payload.intent, wanted)
            {
                continue;
            }
            apps.push(AppMetadata {
                app_id: record.app_id.clone(),
                instance_id: None,
                title: Some(record.title.clone()),
                description: record.description.clone(),
            });
        }
        for owner in self.candidates(&payload.intent, None) {
            apps.push(AppMetadata {
                app_id: owner.app_id,
                instance_id: Some(owner.instance_id),
                title: None,
                description: None,
            });
        }

        let payload = if apps.is_empty() {
            FindIntentResponsePayload {
                app_intent: None,
                error: Some(ResponseError::NoAppsFound),
            }
        } else {
            FindIntentResponsePayload {
                app_intent: Some(AppIntent {
                    intent: IntentMetadata {
                        name: payload.intent,
                        display_name: None,
                    },
                    apps,
                }),
                error: None,
            }
        };
        IntentOutcome::respond(AgentResponse::FindIntent {
            meta: ResponseMeta::for_request(meta.request_uuid.clone()),
            payload,
        })
    }

    /// Drops everything owned by a departed proxy. Pending raises aimed at
    /// it resolve to the raiser as delivery failures; raises it initiated
    /// are forgotten.
    pub fn cleanup_disconnected_proxy(
        &mut self,
        source: &AppIdentifier,
    ) -> Vec<(AgentResponse, AppIdentifier)> {
        self.listeners.retain(|l| l.owner != *source);

        let mut failed: Vec<(AgentResponse, AppIdentifier)> = Vec::new();
        self.pending.retain(|raise_uuid, pending| {
            if pending.raiser == *source {
                return false;
            }
            if pending.target == *source {
                failed.push((
                    AgentResponse::RaiseIntentResult {
                        meta: ResponseMeta::for_request(raise_uuid.clone()),
                        payload: RaiseIntentResultResponsePayload {
                            intent_result: None,
                            error: Some(ResponseError::IntentDeliveryFailed),
                        },
                    },
                    pending.raiser.clone(),
                ));
                return false;
            }
            true
        });
        failed
    }
}

impl Default for IntentMessageHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Checks a directory intent declaration against a context type. A
/// declaration without a `contexts` array accepts everything.
fn declaration_accepts_context(
    record: &AppDirectoryApplication,
    intent: &str,
    context_type: &str,
) -> bool {
    let declaration = record
        .interop
        .as_ref()
        .and_then(|i| i.intents.as_ref())
        .and_then(|i| i.listens_for.get(intent));
    match declaration.and_then(|d| d.get("contexts")).and_then(|c| c.as_array()) {
        Some(contexts) => contexts.iter().any(|c| c.as_str() == Some(context_type)),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::protocol::types::TargetAppIdentifier;

    fn app_a() -> AppIdentifier {
        AppIdentifier::new("A", "a1")
    }

    fn app_b() -> AppIdentifier {
        AppIdentifier::new("B", "b1")
    }

    fn meta() -> RequestMeta {
        RequestMeta::new()
    }

    fn raise(intent: &str, app: Option<TargetAppIdentifier>) -> RaiseIntentRequestPayload {
        RaiseIntentRequestPayload {
            intent: intent.to_string(),
            context: json!({"type": "fdc3.contact"}),
            app,
        }
    }

    #[test]
    fn raise_routes_to_the_single_listener() {
        let mut h = IntentMessageHandler::new();
        let (a, b) = (app_a(), app_b());
        h.add_intent_listener(
            &meta(),
            AddIntentListenerRequestPayload {
                intent: "StartCall".into(),
            },
            &b,
        );

        let request_meta = meta();
        let outcome = h.raise_intent(&request_meta, raise("StartCall", None), &a);
        match outcome.response.as_ref().unwrap() {
            AgentResponse::RaiseIntent { payload, .. } => {
                let resolution = payload.intent_resolution.as_ref().unwrap();
                assert_eq!(resolution.source, b);
            }
            other => panic!("unexpected response: {other:?}"),
        }
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].targets, vec![b.clone()]);
        match &outcome.events[0].event {
            AgentEvent::Intent { payload, .. } => {
                assert_eq!(payload.raise_intent_request_uuid, request_meta.request_uuid);
                assert_eq!(payload.originating_app, a);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn raise_error_depends_on_targeting() {
        let mut h = IntentMessageHandler::new();
        let a = app_a();

        let err_of = |outcome: IntentOutcome| match outcome.response.unwrap() {
            AgentResponse::RaiseIntent { payload, .. } => payload.error.unwrap(),
            other => panic!("unexpected response: {other:?}"),
        };

        assert_eq!(
            err_of(h.raise_intent(&meta(), raise("StartCall", None), &a)),
            ResponseError::NoAppsFound
        );
        assert_eq!(
            err_of(h.raise_intent(
                &meta(),
                raise(
                    "StartCall",
                    Some(TargetAppIdentifier {
                        app_id: "B".into(),
                        instance_id: None,
                    })
                ),
                &a
            )),
            ResponseError::TargetAppUnavailable
        );
        assert_eq!(
            err_of(h.raise_intent(
                &meta(),
                raise(
                    "StartCall",
                    Some(TargetAppIdentifier {
                        app_id: "B".into(),
                        instance_id: Some("b9".into()),
                    })
                ),
                &a
            )),
            ResponseError::TargetInstanceUnavailable
        );
    }

    #[test]
    fn ambiguous_raise_is_refused_without_a_resolver() {
        let mut h = IntentMessageHandler::new();
        h.add_intent_listener(
            &meta(),
            AddIntentListenerRequestPayload {
                intent: "StartCall".into(),
            },
            &app_b(),
        );
        h.add_intent_listener(
            &meta(),
            AddIntentListenerRequestPayload {
                intent: "StartCall".into(),
            },
            &AppIdentifier::new("C", "c1"),
        );

        let outcome = h.raise_intent(&meta(), raise("StartCall", None), &app_a());
        match outcome.response.unwrap() {
            AgentResponse::RaiseIntent { payload, .. } => {
                assert_eq!(payload.error, Some(ResponseError::ResolverUnavailable));
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn result_is_forwarded_to_the_raiser_with_private_channel_grant() {
        let mut h = IntentMessageHandler::new();
        let (a, b) = (app_a(), app_b());
        h.add_intent_listener(
            &meta(),
            AddIntentListenerRequestPayload {
                intent: "StartChat".into(),
            },
            &b,
        );

        let raise_meta = meta();
        h.raise_intent(&raise_meta, raise("StartChat", None), &a);

        let channel = crate::protocol::types::Channel::private("pc-9");
        let outcome = h.intent_result(
            &meta(),
            IntentResultRequestPayload {
                raise_intent_request_uuid: raise_meta.request_uuid.clone(),
                intent_result: crate::protocol::types::IntentResult {
                    context: None,
                    channel: Some(channel),
                },
            },
            &b,
        );

        assert_eq!(outcome.acl_grants, vec![("pc-9".to_string(), a.clone())]);
        assert_eq!(outcome.forwards.len(), 1);
        let (forwarded, to) = &outcome.forwards[0];
        assert_eq!(*to, a);
        assert_eq!(forwarded.meta().request_uuid, raise_meta.request_uuid);

        // The pending raise is consumed; a second result is ignored.
        let again = h.intent_result(
            &meta(),
            IntentResultRequestPayload {
                raise_intent_request_uuid: raise_meta.request_uuid,
                intent_result: crate::protocol::types::IntentResult::default(),
            },
            &b,
        );
        assert!(again.forwards.is_empty());
    }

    #[test]
    fn result_from_an_app_other_than_the_target_is_ignored() {
        let mut h = IntentMessageHandler::new();
        let (a, b) = (app_a(), app_b());
        h.add_intent_listener(
            &meta(),
            AddIntentListenerRequestPayload {
                intent: "StartChat".into(),
            },
            &b,
        );
        let raise_meta = meta();
        h.raise_intent(&raise_meta, raise("StartChat", None), &a);

        let outcome = h.intent_result(
            &meta(),
            IntentResultRequestPayload {
                raise_intent_request_uuid: raise_meta.request_uuid,
                intent_result: crate::protocol::types::IntentResult::default(),
            },
            &AppIdentifier::new("M", "m1"),
        );
        assert!(outcome.forwards.is_empty());
        assert!(outcome.acl_grants.is_empty());
    }

    #[test]
    fn target_disconnect_fails_pending_raises() {
        let mut h = IntentMessageHandler::new();
        let (a, b) = (app_a(), app_b());
        h.add_intent_listener(
            &meta(),
            AddIntentListenerRequestPayload {
                intent: "StartChat".into(),
            },
            &b,
        );
        let raise_meta = meta();
        h.raise_intent(&raise_meta, raise("StartChat", None), &a);

        let failed = h.cleanup_disconnected_proxy(&b);
        assert_eq!(failed.len(), 1);
        let (response, to) = &failed[0];
        assert_eq!(*to, a);
        match response {
            AgentResponse::RaiseIntentResult { meta, payload } => {
                assert_eq!(meta.request_uuid, raise_meta.request_uuid);
                assert_eq!(payload.error, Some(ResponseError::IntentDeliveryFailed));
            }
            other => panic!("unexpected response: {other:?}"),
        }

        // Nothing pending remains and the listener registry is clean.
        assert!(h.cleanup_disconnected_proxy(&b).is_empty());
        assert!(h.candidates("StartChat", None).is_empty());
    }
}
