// The typed desktop agent API an app sees, layered over a ProxyConnection.
//
// The root delivers one event per app; routing it to the right listener is
// the proxy's job, using the same matching rule the root applies (floating
// listeners resolve against the channel this proxy is currently joined to).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::protocol::envelope::{self, RequestMeta};
use crate::protocol::errors::ResponseError;
use crate::protocol::messages::{
    AddContextListenerRequestPayload, AddEventListenerRequestPayload,
    AddIntentListenerRequestPayload, AgentEvent, AgentRequest, AgentResponse,
    BroadcastEventPayload, BroadcastRequestPayload, ChannelIdPayload, EmptyPayload,
    EventListenerKind, FindIntentRequestPayload, GetCurrentContextRequestPayload,
    IntentEventPayload, IntentResultRequestPayload, LeaveCurrentChannelRequestPayload,
    ListenerUuidPayload, PrivateChannelAddEventListenerRequestPayload, PrivateChannelEventType,
    RaiseIntentRequestPayload, RaiseIntentResultResponsePayload,
};
use crate::protocol::types::{
    AppIdentifier, AppIntent, Channel, IntentResolution, IntentResult, TargetAppIdentifier,
    context_type_of,
};
use crate::proxy::connection::ProxyConnection;
use crate::protocol::wcp::WcpMessage;

#[derive(Debug)]
struct LocalContextListener {
    uuid: String,
    channel_id: Option<String>,
    context_type: Option<String>,
    tx: mpsc::UnboundedSender<BroadcastEventPayload>,
}

#[derive(Debug)]
struct LocalEventListener {
    uuid: String,
    tx: mpsc::UnboundedSender<AgentEvent>,
}

#[derive(Debug)]
struct LocalPrivateEventListener {
    uuid: String,
    channel_id: String,
    kind: PrivateChannelEventType,
    tx: mpsc::UnboundedSender<AgentEvent>,
}

#[derive(Debug)]
struct LocalIntentListener {
    uuid: String,
    intent: String,
    tx: mpsc::UnboundedSender<IntentEventPayload>,
}

#[derive(Default, Debug)]
struct RoutingState {
    current_channel: Option<String>,
    context_listeners: Vec<LocalContextListener>,
    event_listeners: Vec<LocalEventListener>,
    private_event_listeners: Vec<LocalPrivateEventListener>,
    intent_listeners: Vec<LocalIntentListener>,
    pending_intent_results: HashMap<String, oneshot::Sender<RaiseIntentResultResponsePayload>>,
}

/// A validated proxy's desktop agent.
#[derive(Debug)]
pub struct DesktopAgentProxy {
    identity: AppIdentifier,
    connection: Arc<ProxyConnection>,
    connection_attempt_uuid: String,
    routing: Arc<Mutex<RoutingState>>,
}

impl DesktopAgentProxy {
    pub fn new(
        identity: AppIdentifier,
        connection: Arc<ProxyConnection>,
        connection_attempt_uuid: String,
    ) -> Self {
        let routing: Arc<Mutex<RoutingState>> = Arc::new(Mutex::new(RoutingState::default()));
        let router = routing.clone();
        connection.add_response_handler(move |frame| route_inbound(&router, frame));
        Self {
            identity,
            connection,
            connection_attempt_uuid,
            routing,
        }
    }

    pub fn identity(&self) -> &AppIdentifier {
        &self.identity
    }

    pub fn connection(&self) -> &Arc<ProxyConnection> {
        &self.connection
    }

    async fn send(&self, request: AgentRequest) -> Result<AgentResponse> {
        let value = serde_json::to_value(&request)?;
        let response = self.connection.request(value).await?;
        Ok(serde_json::from_value(response)?)
    }

    // -- channels -----------------------------------------------------------

    pub async fn get_user_channels(&self) -> Result<Vec<Channel>> {
        match self
            .send(AgentRequest::GetUserChannels {
                meta: RequestMeta::new(),
                payload: EmptyPayload::default(),
            })
            .await?
        {
            AgentResponse::GetUserChannels { payload, .. } => {
                check(payload.error)?;
                Ok(payload.user_channels.unwrap_or_default())
            }
            other => Err(unexpected(&other)),
        }
    }

    pub async fn join_user_channel(&self, channel_id: &str) -> Result<()> {
        match self
            .send(AgentRequest::JoinUserChannel {
                meta: RequestMeta::new(),
                payload: ChannelIdPayload {
                    channel_id: channel_id.to_string(),
                },
            })
            .await?
        {
            AgentResponse::JoinUserChannel { payload, .. } => {
                check(payload.error)?;
                self.routing.lock().current_channel = Some(channel_id.to_string());
                Ok(())
            }
            other => Err(unexpected(&other)),
        }
    }

    pub async fn leave_current_channel(&self) -> Result<()> {
        let stated = self.routing.lock().current_channel.clone();
        match self
            .send(AgentRequest::LeaveCurrentChannel {
                meta: RequestMeta::new(),
                payload: LeaveCurrentChannelRequestPayload { channel_id: stated },
            })
            .await?
        {
            AgentResponse::LeaveCurrentChannel { payload, .. } => {
                check(payload.error)?;
                self.routing.lock().current_channel = None;
                Ok(())
            }
            other => Err(unexpected(&other)),
        }
    }

    pub async fn get_current_channel(&self) -> Result<Option<Channel>> {
        match self
            .send(AgentRequest::GetCurrentChannel {
                meta: RequestMeta::new(),
                payload: EmptyPayload::default(),
            })
            .await?
        {
            AgentResponse::GetCurrentChannel { payload, .. } => {
                check(payload.error)?;
                Ok(payload.channel)
            }
            other => Err(unexpected(&other)),
        }
    }

    pub async fn get_or_create_channel(&self, channel_id: &str) -> Result<Channel> {
        match self
            .send(AgentRequest::GetOrCreateChannel {
                meta: RequestMeta::new(),
                payload: ChannelIdPayload {
                    channel_id: channel_id.to_string(),
                },
            })
            .await?
        {
            AgentResponse::GetOrCreateChannel { payload, .. } => {
                check(payload.error)?;
                payload
                    .channel
                    .ok_or_else(|| Error::Protocol("getOrCreateChannelResponse without channel".into()))
            }
            other => Err(unexpected(&other)),
        }
    }

    pub async fn create_private_channel(&self) -> Result<Channel> {
        match self
            .send(AgentRequest::CreatePrivateChannel {
                meta: RequestMeta::new(),
                payload: EmptyPayload::default(),
            })
            .await?
        {
            AgentResponse::CreatePrivateChannel { payload, .. } => {
                check(payload.error)?;
                payload.private_channel.ok_or_else(|| {
                    Error::Protocol("createPrivateChannelResponse without channel".into())
                })
            }
            other => Err(unexpected(&other)),
        }
    }

    pub async fn broadcast(&self, channel_id: &str, context: Value) -> Result<()> {
        match self
            .send(AgentRequest::Broadcast {
                meta: RequestMeta::new(),
                payload: BroadcastRequestPayload {
                    channel_id: channel_id.to_string(),
                    context,
                },
            })
            .await?
        {
            AgentResponse::Broadcast { payload, .. } => check(payload.error),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn get_current_context(
        &self,
        channel_id: &str,
        context_type: Option<&str>,
    ) -> Result<Option<Value>> {
        match self
            .send(AgentRequest::GetCurrentContext {
                meta: RequestMeta::new(),
                payload: GetCurrentContextRequestPayload {
                    channel_id: channel_id.to_string(),
                    context_type: context_type.map(str::to_string),
                },
            })
            .await?
        {
            AgentResponse::GetCurrentContext { payload, .. } => {
                check(payload.error)?;
                Ok(payload.context)
            }
            other => Err(unexpected(&other)),
        }
    }

    // -- context listeners --------------------------------------------------

    pub async fn add_context_listener(
        &self,
        channel_id: Option<&str>,
        context_type: Option<&str>,
    ) -> Result<ContextListenerHandle> {
        match self
            .send(AgentRequest::AddContextListener {
                meta: RequestMeta::new(),
                payload: AddContextListenerRequestPayload {
                    channel_id: channel_id.map(str::to_string),
                    context_type: context_type.map(str::to_string),
                },
            })
            .await?
        {
            AgentResponse::AddContextListener { payload, .. } => {
                check(payload.error)?;
                let listener_uuid = payload
                    .listener_uuid
                    .ok_or_else(|| Error::Protocol("listener response without uuid".into()))?;
                let (tx, rx) = mpsc::unbounded_channel();
                self.routing.lock().context_listeners.push(LocalContextListener {
                    uuid: listener_uuid.clone(),
                    channel_id: channel_id.map(str::to_string),
                    context_type: context_type.map(str::to_string),
                    tx,
                });
                Ok(ContextListenerHandle { listener_uuid, rx })
            }
            other => Err(unexpected(&other)),
        }
    }

    pub async fn unsubscribe_context_listener(
        &self,
        handle: ContextListenerHandle,
    ) -> Result<()> {
        match self
            .send(AgentRequest::ContextListenerUnsubscribe {
                meta: RequestMeta::new(),
                payload: ListenerUuidPayload {
                    listener_uuid: handle.listener_uuid.clone(),
                },
            })
            .await?
        {
            AgentResponse::ContextListenerUnsubscribe { payload, .. } => {
                check(payload.error)?;
                self.routing
                    .lock()
                    .context_listeners
                    .retain(|l| l.uuid != handle.listener_uuid);
                Ok(())
            }
            other => Err(unexpected(&other)),
        }
    }

    // -- event listeners ----------------------------------------------------

    pub async fn add_event_listener(
        &self,
        kind: EventListenerKind,
    ) -> Result<EventListenerHandle> {
        match self
            .send(AgentRequest::AddEventListener {
                meta: RequestMeta::new(),
                payload: AddEventListenerRequestPayload {
                    listener_type: kind,
                },
            })
            .await?
        {
            AgentResponse::AddEventListener { payload, .. } => {
                check(payload.error)?;
                let listener_uuid = payload
                    .listener_uuid
                    .ok_or_else(|| Error::Protocol("listener response without uuid".into()))?;
                let (tx, rx) = mpsc::unbounded_channel();
                self.routing.lock().event_listeners.push(LocalEventListener {
                    uuid: listener_uuid.clone(),
                    tx,
                });
                Ok(EventListenerHandle { listener_uuid, rx })
            }
            other => Err(unexpected(&other)),
        }
    }

    pub async fn unsubscribe_event_listener(&self, handle: EventListenerHandle) -> Result<()> {
        match self
            .send(AgentRequest::EventListenerUnsubscribe {
                meta: RequestMeta::new(),
                payload: ListenerUuidPayload {
                    listener_uuid: handle.listener_uuid.clone(),
                },
            })
            .await?
        {
            AgentResponse::EventListenerUnsubscribe { payload, .. } => {
                check(payload.error)?;
                self.routing
                    .lock()
                    .event_listeners
                    .retain(|l| l.uuid != handle.listener_uuid);
                Ok(())
            }
            other => Err(unexpected(&other)),
        }
    }

    // -- private channels ---------------------------------------------------

    pub async fn private_channel_add_event_listener(
        &self,
        channel_id: &str,
        kind: PrivateChannelEventType,
    ) -> Result<PrivateChannelEventListenerHandle> {
        match self
            .send(AgentRequest::PrivateChannelAddEventListener {
                meta: RequestMeta::new(),
                payload: PrivateChannelAddEventListenerRequestPayload {
                    listener_type: kind,
                    private_channel_id: channel_id.to_string(),
                },
            })
            .await?
        {
            AgentResponse::PrivateChannelAddEventListener { payload, .. } => {
                check(payload.error)?;
                let listener_uuid = payload
                    .listener_uuid
                    .ok_or_else(|| Error::Protocol("listener response without uuid".into()))?;
                let (tx, rx) = mpsc::unbounded_channel();
                self.routing
                    .lock()
                    .private_event_listeners
                    .push(LocalPrivateEventListener {
                        uuid: listener_uuid.clone(),
                        channel_id: channel_id.to_string(),
                        kind,
                        tx,
                    });
                Ok(PrivateChannelEventListenerHandle { listener_uuid, rx })
            }
            other => Err(unexpected(&other)),
        }
    }

    pub async fn private_channel_unsubscribe_event_listener(
        &self,
        handle: PrivateChannelEventListenerHandle,
    ) -> Result<()> {
        match self
            .send(AgentRequest::PrivateChannelUnsubscribeEventListener {
                meta: RequestMeta::new(),
                payload: ListenerUuidPayload {
                    listener_uuid: handle.listener_uuid.clone(),
                },
            })
            .await?
        {
            AgentResponse::PrivateChannelUnsubscribeEventListener { payload, .. } => {
                check(payload.error)?;
                self.routing
                    .lock()
                    .private_event_listeners
                    .retain(|l| l.uuid != handle.listener_uuid);
                Ok(())
            }
            other => Err(unexpected(&other)),
        }
    }

    pub async fn private_channel_disconnect(&self, channel_id: &str) -> Result<()> {
        match self
            .send(AgentRequest::PrivateChannelDisconnect {
                meta: RequestMeta::new(),
                payload: ChannelIdPayload {
                    channel_id: channel_id.to_string(),
                },
            })
            .await?
        {
            AgentResponse::PrivateChannelDisconnect { payload, .. } => check(payload.error),
            other => Err(unexpected(&other)),
        }
    }

    // -- intents ------------------------------------------------------------

    pub async fn add_intent_listener(&self, intent: &str) -> Result<IntentListenerHandle> {
        match self
            .send(AgentRequest::AddIntentListener {
                meta: RequestMeta::new(),
                payload: AddIntentListenerRequestPayload {
                    intent: intent.to_string(),
                },
            })
            .await?
        {
            AgentResponse::AddIntentListener { payload, .. } => {
                check(payload.error)?;
                let listener_uuid = payload
                    .listener_uuid
                    .ok_or_else(|| Error::Protocol("listener response without uuid".into()))?;
                let (tx, rx) = mpsc::unbounded_channel();
                self.routing.lock().intent_listeners.push(LocalIntentListener {
                    uuid: listener_uuid.clone(),
                    intent: intent.to_string(),
                    tx,
                });
                Ok(IntentListenerHandle { listener_uuid, rx })
            }
            other => Err(unexpected(&other)),
        }
    }

    pub async fn unsubscribe_intent_listener(&self, handle: IntentListenerHandle) -> Result<()> {
        match self
            .send(AgentRequest::IntentListenerUnsubscribe {
                meta: RequestMeta::new(),
                payload: ListenerUuidPayload {
                    listener_uuid: handle.listener_uuid.clone(),
                },
            })
            .await?
        {
            AgentResponse::IntentListenerUnsubscribe { payload, .. } => {
                check(payload.error)?;
                self.routing
                    .lock()
                    .intent_listeners
                    .retain(|l| l.uuid != handle.listener_uuid);
                Ok(())
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Raises an intent and returns the resolution plus a handle on the
    /// eventual result. The result stays pending until the target answers
    /// or disconnects.
    pub async fn raise_intent(
        &self,
        intent: &str,
        context: Value,
        app: Option<TargetAppIdentifier>,
    ) -> Result<IntentResolutionHandle> {
        let meta = RequestMeta::new();
        let raise_uuid = meta.request_uuid.clone();
        let (tx, rx) = oneshot::channel();
        self.routing
            .lock()
            .pending_intent_results
            .insert(raise_uuid.clone(), tx);

        let sent = self
            .send(AgentRequest::RaiseIntent {
                meta,
                payload: RaiseIntentRequestPayload {
                    intent: intent.to_string(),
                    context,
                    app,
                },
            })
            .await;

        let drop_pending = |routing: &Mutex<RoutingState>| {
            routing.lock().pending_intent_results.remove(&raise_uuid);
        };
        match sent {
            Ok(AgentResponse::RaiseIntent { payload, .. }) => {
                if let Some(error) = payload.error {
                    drop_pending(&self.routing);
                    return Err(Error::Fdc3(error));
                }
                let resolution = payload.intent_resolution.ok_or_else(|| {
                    drop_pending(&self.routing);
                    Error::Protocol("raiseIntentResponse without resolution".into())
                })?;
                Ok(IntentResolutionHandle {
                    resolution,
                    result: rx,
                })
            }
            Ok(other) => {
                drop_pending(&self.routing);
                Err(unexpected(&other))
            }
            Err(e) => {
                drop_pending(&self.routing);
                Err(e)
            }
        }
    }

    /// Delivers this app's result for a previously received intent event.
    pub async fn send_intent_result(
        &self,
        raise_intent_request_uuid: &str,
        intent_result: IntentResult,
    ) -> Result<()> {
        match self
            .send(AgentRequest::IntentResult {
                meta: RequestMeta::new(),
                payload: IntentResultRequestPayload {
                    raise_intent_request_uuid: raise_intent_request_uuid.to_string(),
                    intent_result,
                },
            })
            .await?
        {
            AgentResponse::IntentResult { payload, .. } => check(payload.error),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn find_intent(&self, intent: &str, context: Option<Value>) -> Result<AppIntent> {
        match self
            .send(AgentRequest::FindIntent {
                meta: RequestMeta::new(),
                payload: FindIntentRequestPayload {
                    intent: intent.to_string(),
                    context,
                },
            })
            .await?
        {
            AgentResponse::FindIntent { payload, .. } => {
                check(payload.error)?;
                payload
                    .app_intent
                    .ok_or_else(|| Error::Protocol("findIntentResponse without appIntent".into()))
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Announces departure. The root cleans this proxy up exactly as it
    /// would on a dropped port.
    pub fn disconnect(&self) {
        let goodbye = WcpMessage::goodbye(self.connection_attempt_uuid.clone());
        if let Ok(value) = serde_json::to_value(&goodbye) {
            self.connection.post(value);
        }
    }
}

fn check(error: Option<ResponseError>) -> Result<()> {
    match error {
        Some(error) => Err(Error::Fdc3(error)),
        None => Ok(()),
    }
}

fn unexpected(response: &AgentResponse) -> Error {
    Error::Protocol(format!("unexpected response: {response:?}"))
}

fn route_inbound(routing: &Arc<Mutex<RoutingState>>, frame: &Value) {
    if envelope::is_event_message(frame) {
        let Ok(event) = serde_json::from_value::<AgentEvent>(frame.clone()) else {
            tracing::warn!("dropping unparseable event");
            return;
        };
        let state = routing.lock();
        match &event {
            AgentEvent::Broadcast { payload, .. } => {
                for listener in &state.context_listeners {
                    let channel_matches = match &listener.channel_id {
                        Some(id) => *id == payload.channel_id,
                        None => state.current_channel.as_deref() == Some(payload.channel_id.as_str()),
                    };
                    let type_matches = listener
                        .context_type
                        .as_deref()
                        .is_none_or(|t| Some(t) == context_type_of(&payload.context));
                    if channel_matches && type_matches {
                        let _ = listener.tx.send(payload.clone());
                    }
                }
            }
            AgentEvent::ChannelChanged { .. } => {
                for listener in &state.event_listeners {
                    let _ = listener.tx.send(event.clone());
                }
            }
            AgentEvent::PrivateChannelOnAddContextListener { payload, .. } => {
                route_private_event(
                    &state,
                    &payload.private_channel_id,
                    PrivateChannelEventType::AddContextListener,
                    &event,
                );
            }
            AgentEvent::PrivateChannelOnUnsubscribe { payload, .. } => {
                route_private_event(
                    &state,
                    &payload.private_channel_id,
                    PrivateChannelEventType::Unsubscribe,
                    &event,
                );
            }
            AgentEvent::PrivateChannelOnDisconnect { payload, .. } => {
                route_private_event(
                    &state,
                    &payload.private_channel_id,
                    PrivateChannelEventType::Disconnect,
                    &event,
                );
            }
            AgentEvent::Intent { payload, .. } => {
                for listener in &state.intent_listeners {
                    if listener.intent == payload.intent {
                        let _ = listener.tx.send(payload.clone());
                    }
                }
            }
        }
    } else if envelope::is_response_message(frame)
        && envelope::message_type(frame) == Some("raiseIntentResultResponse")
    {
        let Ok(AgentResponse::RaiseIntentResult { meta, payload }) =
            serde_json::from_value::<AgentResponse>(frame.clone())
        else {
            tracing::warn!("dropping unparseable raiseIntentResultResponse");
            return;
        };
        if let Some(waiter) = routing
            .lock()
            .pending_intent_results
            .remove(&meta.request_uuid)
        {
            let _ = waiter.send(payload);
        }
    }
}

fn route_private_event(
    state: &RoutingState,
    channel_id: &str,
    kind: PrivateChannelEventType,
    event: &AgentEvent,
) {
    for listener in &state.private_event_listeners {
        if listener.channel_id == channel_id && listener.kind == kind {
            let _ = listener.tx.send(event.clone());
        }
    }
}

/// Stream of broadcasts delivered to one context listener.
#[derive(Debug)]
pub struct ContextListenerHandle {
    pub listener_uuid: String,
    rx: mpsc::UnboundedReceiver<BroadcastEventPayload>,
}

impl ContextListenerHandle {
    pub async fn next(&mut self) -> Option<BroadcastEventPayload> {
        self.rx.recv().await
    }

    /// Non-blocking poll, for asserting absence of delivery.
    pub fn try_next(&mut self) -> Option<BroadcastEventPayload> {
        self.rx.try_recv().ok()
    }
}

#[derive(Debug)]
pub struct EventListenerHandle {
    pub listener_uuid: String,
    rx: mpsc::UnboundedReceiver<AgentEvent>,
}

impl EventListenerHandle {
    pub async fn next(&mut self) -> Option<AgentEvent> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<AgentEvent> {
        self.rx.try_recv().ok()
    }
}

#[derive(Debug)]
pub struct PrivateChannelEventListenerHandle {
    pub listener_uuid: String,
    rx: mpsc::UnboundedReceiver<AgentEvent>,
}

impl PrivateChannelEventListenerHandle {
    pub async fn next(&mut self) -> Option<AgentEvent> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<AgentEvent> {
        self.rx.try_recv().ok()
    }
}

pub struct IntentListenerHandle {
    pub listener_uuid: String,
    rx: mpsc::UnboundedReceiver<IntentEventPayload>,
}

impl IntentListenerHandle {
    pub async fn next(&mut self) -> Option<IntentEventPayload> {
        self.rx.recv().await
    }
}

/// Outcome of a raiseIntent: the resolution, plus the eventual result.
#[derive(Debug)]
pub struct IntentResolutionHandle {
    pub resolution: IntentResolution,
    result: oneshot::Receiver<RaiseIntentResultResponsePayload>,
}

impl IntentResolutionHandle {
    /// Awaits the handler app's result. Fails with the wire error when the
    /// handler rejects or disconnects before answering.
    pub async fn result(self) -> Result<IntentResult> {
        let payload = self.result.await.map_err(|_| Error::PortClosed)?;
        check(payload.error)?;
        Ok(payload.intent_result.unwrap_or_default())
    }
}
