// Root desktop agent: accepts connections, drives the per-port state
// machine (awaiting-validate → validated → closed), and dispatches
// validated requests to the channel and intent handlers.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::config::AgentConfig;
use crate::directory::AppDirectory;
use crate::error::{Error, Result};
use crate::protocol::envelope::{self, generate_uuid, timestamp_now};
use crate::protocol::errors::ResponseError;
use crate::protocol::messages::{AgentRequest, response_type_for};
use crate::protocol::types::{AppIdentifier, AppMetadata};
use crate::protocol::wcp::{
    ConnectionMeta, ValidateAppIdentityPayload, ValidateAppIdentityResponsePayload, WcpMessage,
};
use crate::proxy::agent::DesktopAgentProxy;
use crate::proxy::connection::ProxyConnection;
use crate::proxy::discovery::HandshakeTarget;
use crate::server::channel_handler::{ChannelMessageHandler, HandlerOutcome};
use crate::server::intent_handler::{IntentMessageHandler, IntentOutcome};
use crate::server::publisher::MessagePublisher;
use crate::transport::{MessagePort, PortReceiver, PortSender};

/// The singleton broker. Cloning is cheap and shares the agent.
#[derive(Clone)]
pub struct RootAgent {
    inner: Arc<RootInner>,
}

struct RootInner {
    config: AgentConfig,
    directory: Arc<dyn AppDirectory>,
    /// All mutable broker state. A request is fully processed (state
    /// mutation, response, event emission) inside one critical section, so
    /// observers never see a half-applied operation.
    state: Mutex<RootState>,
}

struct RootState {
    publisher: MessagePublisher,
    channels: ChannelMessageHandler,
    intents: IntentMessageHandler,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ConnectionPhase {
    AwaitingHello,
    AwaitingValidate,
    Validated,
}

impl RootAgent {
    pub fn new(config: AgentConfig, directory: Arc<dyn AppDirectory>) -> Self {
        let channels = ChannelMessageHandler::new(config.user_channels.clone());
        Self {
            inner: Arc::new(RootInner {
                config,
                directory,
                state: Mutex::new(RootState {
                    publisher: MessagePublisher::default(),
                    channels,
                    intents: IntentMessageHandler::new(),
                }),
            }),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.inner.config
    }

    /// Serves a port on which the whole WCP exchange happens in-band,
    /// starting with WCP1Hello. Used by socket transports, where there is
    /// no separate window channel to carry the hello.
    pub fn attach_port(&self, port: MessagePort) {
        let (sender, receiver) = port.split();
        tokio::spawn(serve_connection(
            self.inner.clone(),
            generate_uuid(),
            sender,
            receiver,
            ConnectionPhase::AwaitingHello,
        ));
    }

    /// Tears down a proxy by identity: listener registries, channel
    /// membership, ACLs, and history entries it sourced. Idempotent.
    pub fn cleanup_disconnected_proxy(&self, identity: &AppIdentifier) {
        let mut state = self.inner.state.lock();
        if state.publisher.unregister_identity(identity) {
            cleanup_identity(&mut state, identity.clone());
        }
    }

    /// The root agent acting as its own proxy: a pre-validated in-process
    /// connection under the agent's own app id. Routing treats it exactly
    /// like a remote proxy.
    pub fn loopback_agent(&self) -> DesktopAgentProxy {
        let (root_side, app_side) = MessagePort::pair();
        let (sender, receiver) = root_side.split();
        let connection_id = generate_uuid();
        let identity = AppIdentifier::new(self.inner.config.app_id.clone(), generate_uuid());

        self.inner.state.lock().publisher.register(
            connection_id.clone(),
            identity.clone(),
            sender.clone(),
        );
        tokio::spawn(serve_connection(
            self.inner.clone(),
            connection_id,
            sender,
            receiver,
            ConnectionPhase::Validated,
        ));

        let connection = Arc::new(ProxyConnection::new(app_side));
        let run = connection.clone();
        tokio::spawn(async move { run.run().await });
        DesktopAgentProxy::new(identity, connection, generate_uuid())
    }
}

#[async_trait]
impl HandshakeTarget for RootAgent {
    /// The in-process discovery path: answer a hello with a handshake and a
    /// fresh port, the `event.ports[0]` analogue.
    async fn hello(&self, hello: &WcpMessage) -> Result<(WcpMessage, MessagePort)> {
        let WcpMessage::Hello { meta, .. } = hello else {
            return Err(Error::Protocol("connection must open with WCP1Hello".into()));
        };
        let (root_side, app_side) = MessagePort::pair();
        let (sender, receiver) = root_side.split();
        tokio::spawn(serve_connection(
            self.inner.clone(),
            generate_uuid(),
            sender,
            receiver,
            ConnectionPhase::AwaitingValidate,
        ));
        Ok((
            WcpMessage::handshake(meta.connection_attempt_uuid.clone()),
            app_side,
        ))
    }
}

async fn serve_connection(
    inner: Arc<RootInner>,
    connection_id: String,
    sender: PortSender,
    mut receiver: PortReceiver,
    mut phase: ConnectionPhase,
) {
    while let Some(frame) = receiver.recv().await {
        if envelope::is_wcp_message(&frame) {
            match serde_json::from_value::<WcpMessage>(frame) {
                Ok(WcpMessage::Hello { meta, .. }) => {
                    if phase == ConnectionPhase::AwaitingHello {
                        post_message(&sender, &WcpMessage::handshake(meta.connection_attempt_uuid));
                        phase = ConnectionPhase::AwaitingValidate;
                    } else {
                        tracing::warn!(connection = %connection_id, "unexpected WCP1Hello ignored");
                    }
                }
                Ok(WcpMessage::ValidateAppIdentity { meta, payload }) => match phase {
                    ConnectionPhase::Validated => {
                        tracing::error!(
                            connection = %connection_id,
                            "protocol error: WCP4 on an already-validated channel"
                        );
                    }
                    ConnectionPhase::AwaitingHello => {
                        tracing::warn!(connection = %connection_id, "WCP4 before hello ignored");
                    }
                    ConnectionPhase::AwaitingValidate => {
                        if validate_identity(&inner, &connection_id, &sender, meta, payload).await {
                            phase = ConnectionPhase::Validated;
                        }
                    }
                },
                Ok(WcpMessage::Goodbye { .. }) => break,
                Ok(other) => {
                    tracing::warn!(
                        connection = %connection_id,
                        "unexpected WCP message ignored: {:?}",
                        other.meta().connection_attempt_uuid
                    );
                }
                Err(e) => {
                    tracing::warn!(connection = %connection_id, "unparseable WCP frame: {e}");
                }
            }
        } else if envelope::is_request_message(&frame) {
            if phase == ConnectionPhase::Validated {
                handle_request(&inner, &connection_id, &sender, frame).await;
            } else {
                tracing::warn!(
                    connection = %connection_id,
                    "dropping request received before identity validation"
                );
            }
        } else {
            tracing::warn!(connection = %connection_id, "dropping unroutable frame");
        }
    }

    let mut state = inner.state.lock();
    if let Some(identity) = state.publisher.unregister(&connection_id) {
        cleanup_identity(&mut state, identity);
    }
}

/// WCP4 handling. The directory fetch is the one suspension point on this
/// path and runs outside the state lock; registration and the WCP5 reply
/// share a critical section so no request can be routed ahead of them.
async fn validate_identity(
    inner: &Arc<RootInner>,
    connection_id: &str,
    sender: &PortSender,
    meta: ConnectionMeta,
    payload: ValidateAppIdentityPayload,
) -> bool {
    let record = match inner.directory.resolve_identity(&payload.identity_url).await {
        Ok(record) => record,
        Err(e) => {
            // No response is published; the proxy's discovery timeout is
            // the only failure signal it gets.
            tracing::warn!(
                identity_url = %payload.identity_url,
                "identity validation failed: {e}"
            );
            return false;
        }
    };

    let instance_id = generate_uuid();
    let identity = AppIdentifier::new(record.app_id.clone(), instance_id.clone());
    let response = WcpMessage::ValidateAppIdentityResponse {
        meta: ConnectionMeta::new(meta.connection_attempt_uuid),
        payload: ValidateAppIdentityResponsePayload {
            app_id: record.app_id.clone(),
            instance_id: instance_id.clone(),
            instance_uuid: generate_uuid(),
            implementation_metadata: inner.config.implementation_metadata(Some(AppMetadata {
                app_id: record.app_id,
                instance_id: Some(instance_id),
                title: Some(record.title),
                description: record.description,
            })),
        },
    };

    let mut state = inner.state.lock();
    state
        .publisher
        .register(connection_id.to_string(), identity.clone(), sender.clone());
    post_message(sender, &response);
    tracing::debug!(app = %identity, connection = %connection_id, "proxy validated");
    true
}

enum Dispatched {
    Channel(HandlerOutcome),
    Intent(IntentOutcome),
}

async fn handle_request(
    inner: &Arc<RootInner>,
    connection_id: &str,
    sender: &PortSender,
    frame: Value,
) {
    let request: AgentRequest = match serde_json::from_value(frame.clone()) {
        Ok(request) => request,
        Err(e) => {
            reply_malformed(sender, &frame, &e);
            return;
        }
    };

    // Directory-consulting operations fetch before taking the lock; other
    // connections keep making progress during the fetch.
    let directory_apps = match &request {
        AgentRequest::FindIntent { .. } => Some(inner.directory.applications().await),
        _ => None,
    };

    let mut state = inner.state.lock();
    let RootState {
        publisher,
        channels,
        intents,
    } = &mut *state;

    let Some(source) = publisher.identity_of(connection_id) else {
        // A cleaned-up proxy no longer resolves to an identity; every
        // further request is denied.
        let response = request.error_response(ResponseError::AccessDenied);
        post_message(sender, &response);
        return;
    };

    // Stamp the authenticated source onto the envelope; whatever the proxy
    // claimed is overwritten.
    let mut request = request;
    request.meta_mut().source = Some(source.clone());

    use AgentRequest as Req;
    let dispatched = match request {
        Req::GetUserChannels { meta, .. } => Dispatched::Channel(channels.get_user_channels(&meta)),
        Req::GetCurrentChannel { meta, .. } => {
            Dispatched::Channel(channels.get_current_channel(&meta, &source))
        }
        Req::JoinUserChannel { meta, payload } => {
            Dispatched::Channel(channels.join_user_channel(&meta, payload, &source))
        }
        Req::LeaveCurrentChannel { meta, payload } => {
            Dispatched::Channel(channels.leave_current_channel(&meta, payload, &source))
        }
        Req::CreatePrivateChannel { meta, .. } => {
            Dispatched::Channel(channels.create_private_channel(&meta, &source))
        }
        Req::GetOrCreateChannel { meta, payload } => {
            Dispatched::Channel(channels.get_or_create_channel(&meta, payload))
        }
        Req::AddContextListener { meta, payload } => {
            Dispatched::Channel(channels.add_context_listener(&meta, payload, &source))
        }
        Req::ContextListenerUnsubscribe { meta, payload } => {
            Dispatched::Channel(channels.context_listener_unsubscribe(&meta, payload, &source))
        }
        Req::AddEventListener { meta, payload } => {
            Dispatched::Channel(channels.add_event_listener(&meta, payload, &source))
        }
        Req::EventListenerUnsubscribe { meta, payload } => {
            Dispatched::Channel(channels.event_listener_unsubscribe(&meta, payload, &source))
        }
        Req::PrivateChannelAddEventListener { meta, payload } => {
            Dispatched::Channel(channels.private_channel_add_event_listener(&meta, payload, &source))
        }
        Req::PrivateChannelUnsubscribeEventListener { meta, payload } => Dispatched::Channel(
            channels.private_channel_unsubscribe_event_listener(&meta, payload, &source),
        ),
        Req::Broadcast { meta, payload } => {
            Dispatched::Channel(channels.broadcast(&meta, payload, &source))
        }
        Req::GetCurrentContext { meta, payload } => {
            Dispatched::Channel(channels.get_current_context(&meta, payload, &source))
        }
        Req::PrivateChannelDisconnect { meta, payload } => {
            Dispatched::Channel(channels.private_channel_disconnect(&meta, payload, &source))
        }
        Req::AddIntentListener { meta, payload } => {
            Dispatched::Intent(intents.add_intent_listener(&meta, payload, &source))
        }
        Req::IntentListenerUnsubscribe { meta, payload } => {
            Dispatched::Intent(intents.intent_listener_unsubscribe(&meta, payload, &source))
        }
        Req::RaiseIntent { meta, payload } => {
            Dispatched::Intent(intents.raise_intent(&meta, payload, &source))
        }
        Req::IntentResult { meta, payload } => {
            Dispatched::Intent(intents.intent_result(&meta, payload, &source))
        }
        Req::FindIntent { meta, payload } => Dispatched::Intent(intents.find_intent(
            &meta,
            payload,
            directory_apps.as_deref().unwrap_or(&[]),
        )),
    };

    match dispatched {
        Dispatched::Channel(outcome) => {
            publisher.publish_response_message(&outcome.response, &source);
            for outbound in &outcome.events {
                publisher.publish_event(&outbound.event, &outbound.targets);
            }
        }
        Dispatched::Intent(outcome) => {
            // Membership grants land before the raiser can learn about the
            // channel from the forwarded result.
            for (channel_id, app) in outcome.acl_grants {
                channels.add_to_private_channel_allowed_list(&channel_id, app);
            }
            if let Some(response) = &outcome.response {
                publisher.publish_response_message(response, &source);
            }
            for outbound in &outcome.events {
                publisher.publish_event(&outbound.event, &outbound.targets);
            }
            for (response, to) in &outcome.forwards {
                publisher.publish_response_message(response, to);
            }
        }
    }
}

fn cleanup_identity(state: &mut RootState, identity: AppIdentifier) {
    let RootState {
        publisher,
        channels,
        intents,
    } = state;
    channels.cleanup_disconnected_proxy(&identity);
    for (response, to) in intents.cleanup_disconnected_proxy(&identity) {
        publisher.publish_response_message(&response, &to);
    }
    tracing::debug!(app = %identity, "proxy cleaned up");
}

/// Answers a frame whose payload failed typed parsing. Frames without a
/// recoverable request identity are logged and dropped.
fn reply_malformed(sender: &PortSender, frame: &Value, parse_error: &serde_json::Error) {
    let (Some(request_type), Some(request_uuid)) =
        (envelope::message_type(frame), envelope::request_uuid(frame))
    else {
        tracing::error!("dropping frame with no resolvable request identity: {parse_error}");
        return;
    };
    let Some(response_type) = response_type_for(request_type) else {
        tracing::error!(
            request_type,
            "dropping malformed frame with no response counterpart: {parse_error}"
        );
        return;
    };
    tracing::warn!(request_type, "answering malformed request: {parse_error}");
    sender.post(serde_json::json!({
        "type": response_type,
        "meta": {
            "requestUuid": request_uuid,
            "responseUuid": generate_uuid(),
            "timestamp": timestamp_now(),
        },
        "payload": {"error": ResponseError::MalformedMessage},
    }));
}

fn post_message<T: serde::Serialize>(sender: &PortSender, message: &T) {
    match serde_json::to_value(message) {
        Ok(value) => sender.post(value),
        Err(e) => tracing::error!("unserializable message: {e}"),
    }
}
