// Typed app-to-agent / agent-to-app messages.
//
// Every frame is `{type, meta, payload}`; the unions below are tagged on
// `type`, so an unknown or misshapen frame fails into a single malformed
// branch at the dispatch layer instead of scattering partial parses.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::envelope::{EventMeta, RequestMeta, ResponseMeta};
use crate::protocol::errors::ResponseError;
use crate::protocol::types::{
    AppIdentifier, AppIntent, Channel, IntentResolution, IntentResult, TargetAppIdentifier,
};

/// Event kinds an app can subscribe to via addEventListener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventListenerKind {
    UserChannelChanged,
    AllEvents,
}

/// Lifecycle events observable on a private channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PrivateChannelEventType {
    AddContextListener,
    Unsubscribe,
    Disconnect,
}

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmptyPayload {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelIdPayload {
    pub channel_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveCurrentChannelRequestPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddContextListenerRequestPayload {
    pub channel_id: Option<String>,
    pub context_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerUuidPayload {
    #[serde(rename = "listenerUUID")]
    pub listener_uuid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddEventListenerRequestPayload {
    #[serde(rename = "type")]
    pub listener_type: EventListenerKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateChannelAddEventListenerRequestPayload {
    pub listener_type: PrivateChannelEventType,
    pub private_channel_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRequestPayload {
    pub channel_id: String,
    /// Left as raw JSON so a misshapen context can be answered with
    /// MalformedContext instead of failing the envelope parse.
    pub context: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetCurrentContextRequestPayload {
    pub channel_id: String,
    pub context_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddIntentListenerRequestPayload {
    pub intent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaiseIntentRequestPayload {
    pub intent: String,
    pub context: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<TargetAppIdentifier>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentResultRequestPayload {
    pub raise_intent_request_uuid: String,
    pub intent_result: IntentResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindIntentRequestPayload {
    pub intent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentRequest {
    #[serde(rename = "getUserChannelsRequest")]
    GetUserChannels {
        meta: RequestMeta,
        payload: EmptyPayload,
    },
    #[serde(rename = "getCurrentChannelRequest")]
    GetCurrentChannel {
        meta: RequestMeta,
        payload: EmptyPayload,
    },
    #[serde(rename = "joinUserChannelRequest")]
    JoinUserChannel {
        meta: RequestMeta,
        payload: ChannelIdPayload,
    },
    #[serde(rename = "leaveCurrentChannelRequest")]
    LeaveCurrentChannel {
        meta: RequestMeta,
        payload: LeaveCurrentChannelRequestPayload,
    },
    #[serde(rename = "createPrivateChannelRequest")]
    CreatePrivateChannel {
        meta: RequestMeta,
        payload: EmptyPayload,
    },
    #[serde(rename = "getOrCreateChannelRequest")]
    GetOrCreateChannel {
        meta: RequestMeta,
        payload: ChannelIdPayload,
    },
    #[serde(rename = "addContextListenerRequest")]
    AddContextListener {
        meta: RequestMeta,
        payload: AddContextListenerRequestPayload,
    },
    #[serde(rename = "contextListenerUnsubscribeRequest")]
    ContextListenerUnsubscribe {
        meta: RequestMeta,
        payload: ListenerUuidPayload,
    },
    #[serde(rename = "addEventListenerRequest")]
    AddEventListener {
        meta: RequestMeta,
        payload: AddEventListenerRequestPayload,
    },
    #[serde(rename = "eventListenerUnsubscribeRequest")]
    EventListenerUnsubscribe {
        meta: RequestMeta,
        payload: ListenerUuidPayload,
    },
    #[serde(rename = "privateChannelAddEventListenerRequest")]
    PrivateChannelAddEventListener {
        meta: RequestMeta,
        payload: PrivateChannelAddEventListenerRequestPayload,
    },
    #[serde(rename = "privateChannelUnsubscribeEventListenerRequest")]
    PrivateChannelUnsubscribeEventListener {
        meta: RequestMeta,
        payload: ListenerUuidPayload,
    },
    #[serde(rename = "broadcastRequest")]
    Broadcast {
        meta: RequestMeta,
        payload: BroadcastRequestPayload,
    },
    #[serde(rename = "getCurrentContextRequest")]
    GetCurrentContext {
        meta: RequestMeta,
        payload: GetCurrentContextRequestPayload,
    },
    #[serde(rename = "privateChannelDisconnectRequest")]
    PrivateChannelDisconnect {
        meta: RequestMeta,
        payload: ChannelIdPayload,
    },
    #[serde(rename = "addIntentListenerRequest")]
    AddIntentListener {
        meta: RequestMeta,
        payload: AddIntentListenerRequestPayload,
    },
    #[serde(rename = "intentListenerUnsubscribeRequest")]
    IntentListenerUnsubscribe {
        meta: RequestMeta,
        payload: ListenerUuidPayload,
    },
    #[serde(rename = "raiseIntentRequest")]
    RaiseIntent {
        meta: RequestMeta,
        payload: RaiseIntentRequestPayload,
    },
    #[serde(rename = "intentResultRequest")]
    IntentResult {
        meta: RequestMeta,
        payload: IntentResultRequestPayload,
    },
    #[serde(rename = "findIntentRequest")]
    FindIntent {
        meta: RequestMeta,
        payload: FindIntentRequestPayload,
    },
}

impl AgentRequest {
    pub fn meta(&self) -> &RequestMeta {
        match self {
            AgentRequest::GetUserChannels { meta, .. }
            | AgentRequest::GetCurrentChannel { meta, .. }
            | AgentRequest::JoinUserChannel { meta, .. }
            | AgentRequest::LeaveCurrentChannel { meta, .. }
            | AgentRequest::CreatePrivateChannel { meta, .. }
            | AgentRequest::GetOrCreateChannel { meta, .. }
            | AgentRequest::AddContextListener { meta, .. }
            | AgentRequest::ContextListenerUnsubscribe { meta, .. }
            | AgentRequest::AddEventListener { meta, .. }
            | AgentRequest::EventListenerUnsubscribe { meta, .. }
            | AgentRequest::PrivateChannelAddEventListener { meta, .. }
            | AgentRequest::PrivateChannelUnsubscribeEventListener { meta, .. }
            | AgentRequest::Broadcast { meta, .. }
            | AgentRequest::GetCurrentContext { meta, .. }
            | AgentRequest::PrivateChannelDisconnect { meta, .. }
            | AgentRequest::AddIntentListener { meta, .. }
            | AgentRequest::IntentListenerUnsubscribe { meta, .. }
            | AgentRequest::RaiseIntent { meta, .. }
            | AgentRequest::IntentResult { meta, .. }
            | AgentRequest::FindIntent { meta, .. } => meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut RequestMeta {
        match self {
            AgentRequest::GetUserChannels { meta, .. }
            | AgentRequest::GetCurrentChannel { meta, .. }
            | AgentRequest::JoinUserChannel { meta, .. }
            | AgentRequest::LeaveCurrentChannel { meta, .. }
            | AgentRequest::CreatePrivateChannel { meta, .. }
            | AgentRequest::GetOrCreateChannel { meta, .. }
            | AgentRequest::AddContextListener { meta, .. }
            | AgentRequest::ContextListenerUnsubscribe { meta, .. }
            | AgentRequest::AddEventListener { meta, .. }
            | AgentRequest::EventListenerUnsubscribe { meta, .. }
            | AgentRequest::PrivateChannelAddEventListener { meta, .. }
            | AgentRequest::PrivateChannelUnsubscribeEventListener { meta, .. }
            | AgentRequest::Broadcast { meta, .. }
            | AgentRequest::GetCurrentContext { meta, .. }
            | AgentRequest::PrivateChannelDisconnect { meta, .. }
            | AgentRequest::AddIntentListener { meta, .. }
            | AgentRequest::IntentListenerUnsubscribe { meta, .. }
            | AgentRequest::RaiseIntent { meta, .. }
            | AgentRequest::IntentResult { meta, .. }
            | AgentRequest::FindIntent { meta, .. } => meta,
        }
    }

    /// Builds the matching error response, echoing this request's UUID.
    pub fn error_response(&self, error: ResponseError) -> AgentResponse {
        let meta = ResponseMeta::for_request(self.meta().request_uuid.clone());
        match self {
            AgentRequest::GetUserChannels { .. } => AgentResponse::GetUserChannels {
                meta,
                payload: GetUserChannelsResponsePayload {
                    user_channels: None,
                    error: Some(error),
                },
            },
            AgentRequest::GetCurrentChannel { .. } => AgentResponse::GetCurrentChannel {
                meta,
                payload: GetCurrentChannelResponsePayload {
                    channel: None,
                    error: Some(error),
                },
            },
            AgentRequest::JoinUserChannel { .. } => AgentResponse::JoinUserChannel {
                meta,
                payload: VoidResponsePayload::err(error),
            },
            AgentRequest::LeaveCurrentChannel { .. } => AgentResponse::LeaveCurrentChannel {
                meta,
                payload: VoidResponsePayload::err(error),
            },
            AgentRequest::CreatePrivateChannel { .. } => AgentResponse::CreatePrivateChannel {
                meta,
                payload: CreatePrivateChannelResponsePayload {
                    private_channel: None,
                    error: Some(error),
                },
            },
            AgentRequest::GetOrCreateChannel { .. } => AgentResponse::GetOrCreateChannel {
                meta,
                payload: GetOrCreateChannelResponsePayload {
                    channel: None,
                    error: Some(error),
                },
            },
            AgentRequest::AddContextListener { .. } => AgentResponse::AddContextListener {
                meta,
                payload: ListenerUuidResponsePayload::err(error),
            },
            AgentRequest::ContextListenerUnsubscribe { .. } => {
                AgentResponse::ContextListenerUnsubscribe {
                    meta,
                    payload: VoidResponsePayload::err(error),
                }
            }
            AgentRequest::AddEventListener { .. } => AgentResponse::AddEventListener {
                meta,
                payload: ListenerUuidResponsePayload::err(error),
            },
            AgentRequest::EventListenerUnsubscribe { .. } => {
                AgentResponse::EventListenerUnsubscribe {
                    meta,
                    payload: VoidResponsePayload::err(error),
                }
            }
            AgentRequest::PrivateChannelAddEventListener { .. } => {
                AgentResponse::PrivateChannelAddEventListener {
                    meta,
                    payload: ListenerUuidResponsePayload::err(error),
                }
            }
            AgentRequest::PrivateChannelUnsubscribeEventListener { .. } => {
                AgentResponse::PrivateChannelUnsubscribeEventListener {
                    meta,
                    payload: VoidResponsePayload::err(error),
                }
            }
            AgentRequest::Broadcast { .. } => AgentResponse::Broadcast {
                meta,
                payload: VoidResponsePayload::err(error),
            },
            AgentRequest::GetCurrentContext { .. } => AgentResponse::GetCurrentContext {
                meta,
                payload: GetCurrentContextResponsePayload {
                    context: None,
                    error: Some(error),
                },
            },
            AgentRequest::PrivateChannelDisconnect { .. } => {
                AgentResponse::PrivateChannelDisconnect {
                    meta,
                    payload: VoidResponsePayload::err(error),
                }
            }
            AgentRequest::AddIntentListener { .. } => AgentResponse::AddIntentListener {
                meta,
                payload: ListenerUuidResponsePayload::err(error),
            },
            AgentRequest::IntentListenerUnsubscribe { .. } => {
                AgentResponse::IntentListenerUnsubscribe {
                    meta,
                    payload: VoidResponsePayload::err(error),
                }
            }
            AgentRequest::RaiseIntent { .. } => AgentResponse::RaiseIntent {
                meta,
                payload: RaiseIntentResponsePayload {
                    intent_resolution: None,
                    error: Some(error),
                },
            },
            AgentRequest::IntentResult { .. } => AgentResponse::IntentResult {
                meta,
                payload: VoidResponsePayload::err(error),
            },
            AgentRequest::FindIntent { .. } => AgentResponse::FindIntent {
                meta,
                payload: FindIntentResponsePayload {
                    app_intent: None,
                    error: Some(error),
                },
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Payload for responses whose happy path carries no data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoidResponsePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl VoidResponsePayload {
    pub fn ok() -> Self {
        Self { error: None }
    }

    pub fn err(error: ResponseError) -> Self {
        Self { error: Some(error) }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListenerUuidResponsePayload {
    #[serde(rename = "listenerUUID", skip_serializing_if = "Option::is_none")]
    pub listener_uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl ListenerUuidResponsePayload {
    pub fn ok(listener_uuid: impl Into<String>) -> Self {
        Self {
            listener_uuid: Some(listener_uuid.into()),
            error: None,
        }
    }

    pub fn err(error: ResponseError) -> Self {
        Self {
            listener_uuid: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetUserChannelsResponsePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_channels: Option<Vec<Channel>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

/// `channel` is always present: `null` means "not joined to any channel".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetCurrentChannelResponsePayload {
    pub channel: Option<Channel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePrivateChannelResponsePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_channel: Option<Channel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetOrCreateChannelResponsePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

/// `context` is always present: `null` means "nothing broadcast yet".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetCurrentContextResponsePayload {
    pub context: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaiseIntentResponsePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_resolution: Option<IntentResolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaiseIntentResultResponsePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_result: Option<IntentResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindIntentResponsePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_intent: Option<AppIntent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentResponse {
    #[serde(rename = "getUserChannelsResponse")]
    GetUserChannels {
        meta: ResponseMeta,
        payload: GetUserChannelsResponsePayload,
    },
    #[serde(rename = "getCurrentChannelResponse")]
    GetCurrentChannel {
        meta: ResponseMeta,
        payload: GetCurrentChannelResponsePayload,
    },
    #[serde(rename = "joinUserChannelResponse")]
    JoinUserChannel {
        meta: ResponseMeta,
        payload: VoidResponsePayload,
    },
    #[serde(rename = "leaveCurrentChannelResponse")]
    LeaveCurrentChannel {
        meta: ResponseMeta,
        payload: VoidResponsePayload,
    },
    #[serde(rename = "createPrivateChannelResponse")]
    CreatePrivateChannel {
        meta: ResponseMeta,
        payload: CreatePrivateChannelResponsePayload,
    },
    #[serde(rename = "getOrCreateChannelResponse")]
    GetOrCreateChannel {
        meta: ResponseMeta,
        payload: GetOrCreateChannelResponsePayload,
    },
    #[serde(rename = "addContextListenerResponse")]
    AddContextListener {
        meta: ResponseMeta,
        payload: ListenerUuidResponsePayload,
    },
    #[serde(rename = "contextListenerUnsubscribeResponse")]
    ContextListenerUnsubscribe {
        meta: ResponseMeta,
        payload: VoidResponsePayload,
    },
    #[serde(rename = "addEventListenerResponse")]
    AddEventListener {
        meta: ResponseMeta,
        payload: ListenerUuidResponsePayload,
    },
    #[serde(rename = "eventListenerUnsubscribeResponse")]
    EventListenerUnsubscribe {
        meta: ResponseMeta,
        payload: VoidResponsePayload,
    },
    #[serde(rename = "privateChannelAddEventListenerResponse")]
    PrivateChannelAddEventListener {
        meta: ResponseMeta,
        payload: ListenerUuidResponsePayload,
    },
    #[serde(rename = "privateChannelUnsubscribeEventListenerResponse")]
    PrivateChannelUnsubscribeEventListener {
        meta: ResponseMeta,
        payload: VoidResponsePayload,
    },
    #[serde(rename = "broadcastResponse")]
    Broadcast {
        meta: ResponseMeta,
        payload: VoidResponsePayload,
    },
    #[serde(rename = "getCurrentContextResponse")]
    GetCurrentContext {
        meta: ResponseMeta,
        payload: GetCurrentContextResponsePayload,
    },
    #[serde(rename = "privateChannelDisconnectResponse")]
    PrivateChannelDisconnect {
        meta: ResponseMeta,
        payload: VoidResponsePayload,
    },
    #[serde(rename = "addIntentListenerResponse")]
    AddIntentListener {
        meta: ResponseMeta,
        payload: ListenerUuidResponsePayload,
    },
    #[serde(rename = "intentListenerUnsubscribeResponse")]
    IntentListenerUnsubscribe {
        meta: ResponseMeta,
        payload: VoidResponsePayload,
    },
    #[serde(rename = "raiseIntentResponse")]
    RaiseIntent {
        meta: ResponseMeta,
        payload: RaiseIntentResponsePayload,
    },
    /// Second response correlated to the original raiseIntentRequest,
    /// delivered once the handler app produces (or fails to produce) a
    /// result.
    #[serde(rename = "raiseIntentResultResponse")]
    RaiseIntentResult {
        meta: ResponseMeta,
        payload: RaiseIntentResultResponsePayload,
    },
    #[serde(rename = "intentResultResponse")]
    IntentResult {
        meta: ResponseMeta,
        payload: VoidResponsePayload,
    },
    #[serde(rename = "findIntentResponse")]
    FindIntent {
        meta: ResponseMeta,
        payload: FindIntentResponsePayload,
    },
}

impl AgentResponse {
    pub fn meta(&self) -> &ResponseMeta {
        match self {
            AgentResponse::GetUserChannels { meta, .. }
            | AgentResponse::GetCurrentChannel { meta, .. }
            | AgentResponse::JoinUserChannel { meta, .. }
            | AgentResponse::LeaveCurrentChannel { meta, .. }
            | AgentResponse::CreatePrivateChannel { meta, .. }
            | AgentResponse::GetOrCreateChannel { meta, .. }
            | AgentResponse::AddContextListener { meta, .. }
            | AgentResponse::ContextListenerUnsubscribe { meta, .. }
            | AgentResponse::AddEventListener { meta, .. }
            | AgentResponse::EventListenerUnsubscribe { meta, .. }
            | AgentResponse::PrivateChannelAddEventListener { meta, .. }
            | AgentResponse::PrivateChannelUnsubscribeEventListener { meta, .. }
            | AgentResponse::Broadcast { meta, .. }
            | AgentResponse::GetCurrentContext { meta, .. }
            | AgentResponse::PrivateChannelDisconnect { meta, .. }
            | AgentResponse::AddIntentListener { meta, .. }
            | AgentResponse::IntentListenerUnsubscribe { meta, .. }
            | AgentResponse::RaiseIntent { meta, .. }
            | AgentResponse::RaiseIntentResult { meta, .. }
            | AgentResponse::IntentResult { meta, .. }
            | AgentResponse::FindIntent { meta, .. } => meta,
        }
    }
}

// ---------------------------------------------------------------------------
// Event payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastEventPayload {
    pub channel_id: String,
    pub context: Value,
    pub originating_app: AppIdentifier,
}

/// `newChannelId` is always present: `null` means "left the channel".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelChangedEventPayload {
    pub new_channel_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateChannelListenerEventPayload {
    pub private_channel_id: String,
    pub context_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateChannelDisconnectEventPayload {
    pub private_channel_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentEventPayload {
    pub intent: String,
    pub context: Value,
    pub originating_app: AppIdentifier,
    pub raise_intent_request_uuid: String,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    #[serde(rename = "broadcastEvent")]
    Broadcast {
        meta: EventMeta,
        payload: BroadcastEventPayload,
    },
    #[serde(rename = "channelChangedEvent")]
    ChannelChanged {
        meta: EventMeta,
        payload: ChannelChangedEventPayload,
    },
    #[serde(rename = "privateChannelOnAddContextListenerEvent")]
    PrivateChannelOnAddContextListener {
        meta: EventMeta,
        payload: PrivateChannelListenerEventPayload,
    },
    #[serde(rename = "privateChannelOnUnsubscribeEvent")]
    PrivateChannelOnUnsubscribe {
        meta: EventMeta,
        payload: PrivateChannelListenerEventPayload,
    },
    #[serde(rename = "privateChannelOnDisconnectEvent")]
    PrivateChannelOnDisconnect {
        meta: EventMeta,
        payload: PrivateChannelDisconnectEventPayload,
    },
    #[serde(rename = "intentEvent")]
    Intent {
        meta: EventMeta,
        payload: IntentEventPayload,
    },
}

impl AgentEvent {
    pub fn meta(&self) -> &EventMeta {
        match self {
            AgentEvent::Broadcast { meta, .. }
            | AgentEvent::ChannelChanged { meta, .. }
            | AgentEvent::PrivateChannelOnAddContextListener { meta, .. }
            | AgentEvent::PrivateChannelOnUnsubscribe { meta, .. }
            | AgentEvent::PrivateChannelOnDisconnect { meta, .. }
            | AgentEvent::Intent { meta, .. } => meta,
        }
    }
}

/// Maps a request type name to its response type name. Used to answer
/// MalformedMessage for frames whose payload failed typed parsing.
pub fn response_type_for(request_type: &str) -> Option<String> {
    request_type
        .strip_suffix("Request")
        .map(|stem| format!("{stem}Response"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_round_trips_through_tagged_union() {
        let raw = json!({
            "type": "broadcastRequest",
            "meta": {"requestUuid": "r-1", "timestamp": 1},
            "payload": {
                "channelId": "fdc3.channel.2",
                "context": {"type": "fdc3.contact", "id": {"email": "x@y"}},
            },
        });
        let parsed: AgentRequest = serde_json::from_value(raw.clone()).unwrap();
        match &parsed {
            AgentRequest::Broadcast { meta, payload } => {
                assert_eq!(meta.request_uuid, "r-1");
                assert_eq!(payload.channel_id, "fdc3.channel.2");
            }
            other => panic!("wrong variant: {other:?}"),
        }
        assert_eq!(serde_json::to_value(&parsed).unwrap(), raw);
    }

    #[test]
    fn unknown_type_is_a_single_malformed_branch() {
        let raw = json!({
            "type": "definitelyNotARequest",
            "meta": {"requestUuid": "r-1", "timestamp": 1},
            "payload": {},
        });
        assert!(serde_json::from_value::<AgentRequest>(raw).is_err());
    }

    #[test]
    fn error_response_echoes_request_uuid() {
        let request: AgentRequest = serde_json::from_value(json!({
            "type": "getOrCreateChannelRequest",
            "meta": {"requestUuid": "r-9", "timestamp": 1},
            "payload": {"channelId": "pc-1"},
        }))
        .unwrap();
        let response = request.error_response(ResponseError::AccessDenied);
        assert_eq!(response.meta().request_uuid, "r-9");
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["type"], "getOrCreateChannelResponse");
        assert_eq!(value["payload"]["error"], "AccessDenied");
    }

    #[test]
    fn listener_uuid_uses_upper_case_wire_name() {
        let payload = ListenerUuidResponsePayload::ok("l-1");
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value, json!({"listenerUUID": "l-1"}));
    }

    #[test]
    fn current_channel_response_serializes_explicit_null() {
        let response = AgentResponse::GetCurrentChannel {
            meta: ResponseMeta::for_request("r"),
            payload: GetCurrentChannelResponsePayload {
                channel: None,
                error: None,
            },
        };
        let value = serde_json::to_value(&response).unwrap();
        assert!(value["payload"].get("channel").is_some());
        assert_eq!(value["payload"]["channel"], Value::Null);
    }

    #[test]
    fn response_type_mapping() {
        assert_eq!(
            response_type_for("broadcastRequest").as_deref(),
            Some("broadcastResponse")
        );
        assert_eq!(response_type_for("broadcastEvent"), None);
    }
}
