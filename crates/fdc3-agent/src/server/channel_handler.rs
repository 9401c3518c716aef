// Channel message handler: user-channel membership, app channels, private
// channels with access control, per-channel context history, and the
// listener registries that drive broadcast fan-out.

use std::collections::HashMap;

use serde_json::Value;

use crate::protocol::envelope::{EventMeta, RequestMeta, ResponseMeta};
use crate::protocol::errors::ResponseError;
use crate::protocol::generate_uuid;
use crate::protocol::messages::{
    AddContextListenerRequestPayload, AddEventListenerRequestPayload, AgentEvent, AgentResponse,
    BroadcastEventPayload, BroadcastRequestPayload, ChannelChangedEventPayload, ChannelIdPayload,
    CreatePrivateChannelResponsePayload, EventListenerKind, GetCurrentChannelResponsePayload,
    GetCurrentContextRequestPayload, GetCurrentContextResponsePayload,
    GetOrCreateChannelResponsePayload, GetUserChannelsResponsePayload,
    LeaveCurrentChannelRequestPayload, ListenerUuidPayload, ListenerUuidResponsePayload,
    PrivateChannelAddEventListenerRequestPayload, PrivateChannelDisconnectEventPayload,
    PrivateChannelEventType, PrivateChannelListenerEventPayload, VoidResponsePayload,
};
use crate::protocol::types::{AppIdentifier, Channel, context_source, context_type_of};

/// An event paired with the identities it must be delivered to.
#[derive(Debug)]
pub struct OutboundEvent {
    pub event: AgentEvent,
    pub targets: Vec<AppIdentifier>,
}

/// Everything a handled request produces: the response for the source, and
/// any events to fan out. The root publishes the response first, then the
/// events, in order.
#[derive(Debug)]
pub struct HandlerOutcome {
    pub response: AgentResponse,
    pub events: Vec<OutboundEvent>,
}

impl HandlerOutcome {
    fn respond(response: AgentResponse) -> Self {
        Self {
            response,
            events: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct ContextListener {
    uuid: String,
    owner: AppIdentifier,
    /// `None` is the floating state: listen on whatever user channel the
    /// owner is joined to, resolved at broadcast time.
    channel_id: Option<String>,
    /// `None` matches every context type.
    context_type: Option<String>,
}

/// Context listener store with the three indexes fan-out and cleanup need:
/// by uuid for unsubscribe, by channel for broadcast, by owner for
/// disconnect. Per-channel order is registration order.
#[derive(Default)]
struct ContextListenerRegistry {
    by_uuid: HashMap<String, ContextListener>,
    by_channel: HashMap<String, Vec<String>>,
    floating: Vec<String>,
    by_owner: HashMap<AppIdentifier, Vec<String>>,
}

impl ContextListenerRegistry {
    fn insert(&mut self, listener: ContextListener) {
        match &listener.channel_id {
            Some(channel_id) => self
                .by_channel
                .entry(channel_id.clone())
                .or_default()
                .push(listener.uuid.clone()),
            None => self.floating.push(listener.uuid.clone()),
        }
        self.by_owner
            .entry(listener.owner.clone())
            .or_default()
            .push(listener.uuid.clone());
        self.by_uuid.insert(listener.uuid.clone(), listener);
    }

    fn get(&self, uuid: &str) -> Option<&ContextListener> {
        self.by_uuid.get(uuid)
    }

    fn remove(&mut self, uuid: &str) -> Option<ContextListener> {
        let listener = self.by_uuid.remove(uuid)?;
        match &listener.channel_id {
            Some(channel_id) => {
                if let Some(uuids) = self.by_channel.get_mut(channel_id) {
                    uuids.retain(|u| u != uuid);
                }
            }
            None => self.floating.retain(|u| u != uuid),
        }
        if let Some(uuids) = self.by_owner.get_mut(&listener.owner) {
            uuids.retain(|u| u != uuid);
        }
        Some(listener)
    }

    fn on_channel(&self, channel_id: &str) -> impl Iterator<Item = &ContextListener> {
        self.by_channel
            .get(channel_id)
            .into_iter()
            .flatten()
            .filter_map(|uuid| self.by_uuid.get(uuid))
    }

    fn floating(&self) -> impl Iterator<Item = &ContextListener> {
        self.floating.iter().filter_map(|uuid| self.by_uuid.get(uuid))
    }

    fn remove_owned_by(&mut self, owner: &AppIdentifier) -> Vec<ContextListener> {
        let uuids = self.by_owner.remove(owner).unwrap_or_default();
        uuids
            .iter()
            .filter_map(|uuid| {
                let listener = self.by_uuid.remove(uuid)?;
                match &listener.channel_id {
                    Some(channel_id) => {
                        if let Some(us) = self.by_channel.get_mut(channel_id) {
                            us.retain(|u| u != uuid);
                        }
                    }
                    None => self.floating.retain(|u| u != uuid),
                }
                Some(listener)
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
struct EventListenerEntry {
    uuid: String,
    owner: AppIdentifier,
    kind: EventListenerKind,
}

#[derive(Debug, Clone)]
struct PrivateChannelEventListener {
    uuid: String,
    owner: AppIdentifier,
    kind: PrivateChannelEventType,
}

struct PrivateChannelRecord {
    channel: Channel,
    /// Access list. Seeded with the creator; extended when the channel is
    /// handed back as an intent result.
    allowed: Vec<AppIdentifier>,
    event_listeners: Vec<PrivateChannelEventListener>,
}

/// Per-channel broadcast history: the latest context per type, plus the
/// latest context of any type.
#[derive(Default)]
struct ChannelHistory {
    latest_by_type: Vec<(String, Value)>,
    latest: Option<Value>,
}

impl ChannelHistory {
    fn record(&mut self, context_type: &str, context: Value) {
        match self
            .latest_by_type
            .iter_mut()
            .find(|(t, _)| t == context_type)
        {
            Some((_, slot)) => *slot = context.clone(),
            None => self
                .latest_by_type
                .push((context_type.to_string(), context.clone())),
        }
        self.latest = Some(context);
    }

    fn current(&self, context_type: Option<&str>) -> Option<&Value> {
        match context_type {
            Some(t) => self
                .latest_by_type
                .iter()
                .find(|(ty, _)| ty == t)
                .map(|(_, ctx)| ctx),
            None => self.latest.as_ref(),
        }
    }

    fn scrub_from(&mut self, source: &AppIdentifier) {
        self.latest_by_type
            .retain(|(_, ctx)| context_source(ctx).as_ref() != Some(source));
        if let Some(latest) = &self.latest
            && context_source(latest).as_ref() == Some(source)
        {
            self.latest = None;
        }
    }
}

enum ChannelKind {
    User,
    App,
    Private,
    Unknown,
}

pub struct ChannelMessageHandler {
    user_channels: Vec<Channel>,
    app_channels: HashMap<String, Channel>,
    private_channels: HashMap<String, PrivateChannelRecord>,
    current_user_channel: HashMap<AppIdentifier, String>,
    history: HashMap<String, ChannelHistory>,
    context_listeners: ContextListenerRegistry,
    event_listeners: Vec<EventListenerEntry>,
}

impl ChannelMessageHandler {
    pub fn new(user_channels: Vec<Channel>) -> Self {
        Self {
            user_channels,
            app_channels: HashMap::new(),
            private_channels: HashMap::new(),
            current_user_channel: HashMap::new(),
            history: HashMap::new(),
            context_listeners: ContextListenerRegistry::default(),
            event_listeners: Vec::new(),
        }
    }

    fn classify(&self, channel_id: &str) -> ChannelKind {
        if self.private_channels.contains_key(channel_id) {
            ChannelKind::Private
        } else if self.user_channels.iter().any(|c| c.id == channel_id) {
            ChannelKind::User
        } else if self.app_channels.contains_key(channel_id) {
            ChannelKind::App
        } else {
            ChannelKind::Unknown
        }
    }

    fn allowed_on_private(&self, channel_id: &str, app: &AppIdentifier) -> bool {
        self.private_channels
            .get(channel_id)
            .is_some_and(|rec| rec.allowed.contains(app))
    }

    /// True when `source` registered an event listener that covers channel
    /// membership changes.
    fn wants_channel_changed(&self, source: &AppIdentifier) -> bool {
        self.event_listeners.iter().any(|e| {
            e.owner == *source
                && matches!(
                    e.kind,
                    EventListenerKind::UserChannelChanged | EventListenerKind::AllEvents
                )
        })
    }

    fn channel_changed_event(&self, new_channel_id: Option<String>, source: &AppIdentifier) -> OutboundEvent {
        OutboundEvent {
            event: AgentEvent::ChannelChanged {
                meta: EventMeta::new(),
                payload: ChannelChangedEventPayload { new_channel_id },
            },
            targets: vec![source.clone()],
        }
    }

    /// Private-channel lifecycle event, delivered to the channel's event
    /// listeners of `kind`, excluding the acting app.
    fn private_channel_peers(
        &self,
        channel_id: &str,
        kind: PrivateChannelEventType,
        acting: &AppIdentifier,
    ) -> Vec<AppIdentifier> {
        let Some(rec) = self.private_channels.get(channel_id) else {
            return Vec::new();
        };
        let mut targets: Vec<AppIdentifier> = Vec::new();
        for listener in &rec.event_listeners {
            if listener.kind == kind
                && listener.owner != *acting
                && !targets.contains(&listener.owner)
            {
                targets.push(listener.owner.clone());
            }
        }
        targets
    }

    // -- operations ---------------------------------------------------------

    pub fn get_user_channels(&self, meta: &RequestMeta) -> HandlerOutcome {
        HandlerOutcome::respond(AgentResponse::GetUserChannels {
            meta: ResponseMeta::for_request(meta.request_uuid.clone()),
            payload: GetUserChannelsResponsePayload {
                user_channels: Some(self.user_channels.clone()),
                error: None,
            },
        })
    }

    pub fn get_current_channel(&self, meta: &RequestMeta, source: &AppIdentifier) -> HandlerOutcome {
        let channel = self
            .current_user_channel
            .get(source)
            .and_then(|id| self.user_channels.iter().find(|c| &c.id == id))
            .cloned();
        HandlerOutcome::respond(AgentResponse::GetCurrentChannel {
            meta: ResponseMeta::for_request(meta.request_uuid.clone()),
            payload: GetCurrentChannelResponsePayload {
                channel,
                error: None,
            },
        })
    }

    pub fn join_user_channel(
        &mut self,
        meta: &RequestMeta,
        payload: ChannelIdPayload,
        source: &AppIdentifier,
    ) -> HandlerOutcome {
        let response_meta = ResponseMeta::for_request(meta.request_uuid.clone());
        if !self.user_channels.iter().any(|c| c.id == payload.channel_id) {
            return HandlerOutcome::respond(AgentResponse::JoinUserChannel {
                meta: response_meta,
                payload: VoidResponsePayload::err(ResponseError::NoChannelFound),
            });
        }

        self.current_user_channel
            .insert(source.clone(), payload.channel_id.clone());

        let mut outcome = HandlerOutcome::respond(AgentResponse::JoinUserChannel {
            meta: response_meta,
            payload: VoidResponsePayload::ok(),
        });
        if self.wants_channel_changed(source) {
            outcome
                .events
                .push(self.channel_changed_event(Some(payload.channel_id), source));
        }
        outcome
    }

    pub fn leave_current_channel(
        &mut self,
        meta: &RequestMeta,
        payload: LeaveCurrentChannelRequestPayload,
        source: &AppIdentifier,
    ) -> HandlerOutcome {
        match payload.channel_id {
            // Membership is cleared only when the proxy is joined to the
            // stated channel; the changed event is emitted regardless.
            Some(stated) => {
                if self.current_user_channel.get(source) == Some(&stated) {
                    self.current_user_channel.remove(source);
                }
            }
            None => {
                self.current_user_channel.remove(source);
            }
        }

        let mut outcome = HandlerOutcome::respond(AgentResponse::LeaveCurrentChannel {
            meta: ResponseMeta::for_request(meta.request_uuid.clone()),
            payload: VoidResponsePayload::ok(),
        });
        if self.wants_channel_changed(source) {
            outcome.events.push(self.channel_changed_event(None, source));
        }
        outcome
    }

    pub fn create_private_channel(
        &mut self,
        meta: &RequestMeta,
        source: &AppIdentifier,
    ) -> HandlerOutcome {
        let channel = Channel::private(generate_uuid());
        self.private_channels.insert(
            channel.id.clone(),
            PrivateChannelRecord {
                channel: channel.clone(),
                allowed: vec![source.clone()],
                event_listeners: Vec::new(),
            },
        );
        tracing::debug!(channel = %channel.id, creator = %source, "private channel created");

        HandlerOutcome::respond(AgentResponse::CreatePrivateChannel {
            meta: ResponseMeta::for_request(meta.request_uuid.clone()),
            payload: CreatePrivateChannelResponsePayload {
                private_channel: Some(channel),
                error: None,
            },
        })
    }

    pub fn get_or_create_channel(
        &mut self,
        meta: &RequestMeta,
        payload: ChannelIdPayload,
    ) -> HandlerOutcome {
        let response_meta = ResponseMeta::for_request(meta.request_uuid.clone());
        // Channel ids are unique across all three kinds; an id already used
        // by a private or user channel cannot become an app channel.
        let payload = match self.classify(&payload.channel_id) {
            ChannelKind::Private | ChannelKind::User => GetOrCreateChannelResponsePayload {
                channel: None,
                error: Some(ResponseError::AccessDenied),
            },
            ChannelKind::App => GetOrCreateChannelResponsePayload {
                channel: self.app_channels.get(&payload.channel_id).cloned(),
                error: None,
            },
            ChannelKind::Unknown => {
                let channel = Channel::app(payload.channel_id.clone());
                self.app_channels
                    .insert(payload.channel_id, channel.clone());
                GetOrCreateChannelResponsePayload {
                    channel: Some(channel),
                    error: None,
                }
            }
        };
        HandlerOutcome::respond(AgentResponse::GetOrCreateChannel {
            meta: response_meta,
            payload,
        })
    }

    pub fn add_context_listener(
        &mut self,
        meta: &RequestMeta,
        payload: AddContextListenerRequestPayload,
        source: &AppIdentifier,
    ) -> HandlerOutcome {
        let response_meta = ResponseMeta::for_request(meta.request_uuid.clone());
        let mut private_channel = None;

        if let Some(channel_id) = &payload.channel_id {
            match self.classify(channel_id) {
                ChannelKind::Private => {
                    if !self.allowed_on_private(channel_id, source) {
                        return HandlerOutcome::respond(AgentResponse::AddContextListener {
                            meta: response_meta,
                            payload: ListenerUuidResponsePayload::err(ResponseError::AccessDenied),
                        });
                    }
                    private_channel = Some(channel_id.clone());
                }
                ChannelKind::User | ChannelKind::App => {}
                ChannelKind::Unknown => {
                    // Listening on a not-yet-created app channel brings it
                    // into existence, mirroring getOrCreateChannel.
                    self.app_channels
                        .insert(channel_id.clone(), Channel::app(channel_id.clone()));
                }
            }
        }

        let listener = ContextListener {
            uuid: generate_uuid(),
            owner: source.clone(),
            channel_id: payload.channel_id,
            context_type: payload.context_type.clone(),
        };
        let listener_uuid = listener.uuid.clone();
        self.context_listeners.insert(listener);

        let mut outcome = HandlerOutcome::respond(AgentResponse::AddContextListener {
            meta: response_meta,
            payload: ListenerUuidResponsePayload::ok(listener_uuid),
        });

        if let Some(channel_id) = private_channel {
            let targets = self.private_channel_peers(
                &channel_id,
                PrivateChannelEventType::AddContextListener,
                source,
            );
            if !targets.is_empty() {
                outcome.events.push(OutboundEvent {
                    event: AgentEvent::PrivateChannelOnAddContextListener {
                        meta: EventMeta::new(),
                        payload: PrivateChannelListenerEventPayload {
                            private_channel_id: channel_id,
                            context_type: payload.context_type,
                        },
                    },
                    targets,
                });
            }
        }
        outcome
    }

    pub fn context_listener_unsubscribe(
        &mut self,
        meta: &RequestMeta,
        payload: ListenerUuidPayload,
        source: &AppIdentifier,
    ) -> HandlerOutcome {
        let response = AgentResponse::ContextListenerUnsubscribe {
            meta: ResponseMeta::for_request(meta.request_uuid.clone()),
            payload: VoidResponsePayload::ok(),
        };

        let owned = self
            .context_listeners
            .get(&payload.listener_uuid)
            .is_some_and(|l| l.owner == *source);
        if !owned {
            // Unknown or foreign listener uuids unsubscribe nothing.
            return HandlerOutcome::respond(response);
        }
        let Some(listener) = self.context_listeners.remove(&payload.listener_uuid) else {
            return HandlerOutcome::respond(response);
        };

        let mut outcome = HandlerOutcome::respond(response);
        if let Some(channel_id) = &listener.channel_id
            && self.private_channels.contains_key(channel_id)
        {
            let targets =
                self.private_channel_peers(channel_id, PrivateChannelEventType::Unsubscribe, source);
            if !targets.is_empty() {
                outcome.events.push(OutboundEvent {
                    event: AgentEvent::PrivateChannelOnUnsubscribe {
                        meta: EventMeta::new(),
                        payload: PrivateChannelListenerEventPayload {
                            private_channel_id: channel_id.clone(),
                            context_type: listener.context_type.clone(),
                        },
                    },
                    targets,
                });
            }
        }
        outcome
    }

    pub fn add_event_listener(
        &mut self,
        meta: &RequestMeta,
        payload: AddEventListenerRequestPayload,
        source: &AppIdentifier,
    ) -> HandlerOutcome {
        let uuid = generate_uuid();
        self.event_listeners.push(EventListenerEntry {
            uuid: uuid.clone(),
            owner: source.clone(),
            kind: payload.listener_type,
        });
        HandlerOutcome::respond(AgentResponse::AddEventListener {
            meta: ResponseMeta::for_request(meta.request_uuid.clone()),
            payload: ListenerUuidResponsePayload::ok(uuid),
        })
    }

    pub fn event_listener_unsubscribe(
        &mut self,
        meta: &RequestMeta,
        payload: ListenerUuidPayload,
        source: &AppIdentifier,
    ) -> HandlerOutcome {
        self.event_listeners
            .retain(|e| !(e.uuid == payload.listener_uuid && e.owner == *source));
        HandlerOutcome::respond(AgentResponse::EventListenerUnsubscribe {
            meta: ResponseMeta::for_request(meta.request_uuid.clone()),
            payload: VoidResponsePayload::ok(),
        })
    }

    pub fn private_channel_add_event_listener(
        &mut self,
        meta: &RequestMeta,
        payload: PrivateChannelAddEventListenerRequestPayload,
        source: &AppIdentifier,
    ) -> HandlerOutcome {
        let response_meta = ResponseMeta::for_request(meta.request_uuid.clone());
        let allowed = self
            .private_channels
            .get_mut(&payload.private_channel_id)
            .filter(|rec| rec.allowed.contains(source));
        let Some(rec) = allowed else {
            return HandlerOutcome::respond(AgentResponse::PrivateChannelAddEventListener {
                meta: response_meta,
                payload: ListenerUuidResponsePayload::err(ResponseError::AccessDenied),
            });
        };

        let uuid = generate_uuid();
        rec.event_listeners.push(PrivateChannelEventListener {
            uuid: uuid.clone(),
            owner: source.clone(),
            kind: payload.listener_type,
        });

        let mut outcome = HandlerOutcome::respond(AgentResponse::PrivateChannelAddEventListener {
            meta: response_meta,
            payload: ListenerUuidResponsePayload::ok(uuid),
        });

        // A late addContextListener subscriber is caught up with one event
        // per listener already registered on the channel, in registration
        // order.
        if payload.listener_type == PrivateChannelEventType::AddContextListener {
            for listener in self.context_listeners.on_channel(&payload.private_channel_id) {
                outcome.events.push(OutboundEvent {
                    event: AgentEvent::PrivateChannelOnAddContextListener {
                        meta: EventMeta::new(),
                        payload: PrivateChannelListenerEventPayload {
                            private_channel_id: payload.private_channel_id.clone(),
                            context_type: listener.context_type.clone(),
                        },
                    },
                    targets: vec![source.clone()],
                });
            }
        }
        outcome
    }

    pub fn private_channel_unsubscribe_event_listener(
        &mut self,
        meta: &RequestMeta,
        payload: ListenerUuidPayload,
        source: &AppIdentifier,
    ) -> HandlerOutcome {
        for rec in self.private_channels.values_mut() {
            rec.event_listeners
                .retain(|l| !(l.uuid == payload.listener_uuid && l.owner == *source));
        }
        HandlerOutcome::respond(AgentResponse::PrivateChannelUnsubscribeEventListener {
            meta: ResponseMeta::for_request(meta.request_uuid.clone()),
            payload: VoidResponsePayload::ok(),
        })
    }

    pub fn broadcast(
        &mut self,
        meta: &RequestMeta,
        payload: BroadcastRequestPayload,
        source: &AppIdentifier,
    ) -> HandlerOutcome {
        let response_meta = ResponseMeta::for_request(meta.request_uuid.clone());
        let respond_err = |error| {
            HandlerOutcome::respond(AgentResponse::Broadcast {
                meta: ResponseMeta::for_request(meta.request_uuid.clone()),
                payload: VoidResponsePayload::err(error),
            })
        };

        let Some(context_type) = context_type_of(&payload.context).map(str::to_string) else {
            return respond_err(ResponseError::MalformedContext);
        };

        let is_user_channel = match self.classify(&payload.channel_id) {
            ChannelKind::Private => {
                if !self.allowed_on_private(&payload.channel_id, source) {
                    return respond_err(ResponseError::AccessDenied);
                }
                false
            }
            ChannelKind::User => true,
            ChannelKind::App => false,
            ChannelKind::Unknown => {
                self.app_channels.insert(
                    payload.channel_id.clone(),
                    Channel::app(payload.channel_id.clone()),
                );
                false
            }
        };

        self.history
            .entry(payload.channel_id.clone())
            .or_default()
            .record(&context_type, payload.context.clone());

        let targets =
            self.broadcast_targets(&payload.channel_id, &context_type, source, is_user_channel);

        let mut outcome = HandlerOutcome::respond(AgentResponse::Broadcast {
            meta: response_meta,
            payload: VoidResponsePayload::ok(),
        });
        if !targets.is_empty() {
            outcome.events.push(OutboundEvent {
                event: AgentEvent::Broadcast {
                    meta: EventMeta::new(),
                    payload: BroadcastEventPayload {
                        channel_id: payload.channel_id,
                        context: payload.context,
                        originating_app: source.clone(),
                    },
                },
                targets,
            });
        }
        outcome
    }

    /// The fan-out rule: listeners bound to the channel, plus floating
    /// listeners whose owner is joined to it (user channels only); filter
    /// by context type; never the source; one delivery per app.
    fn broadcast_targets(
        &self,
        channel_id: &str,
        context_type: &str,
        source: &AppIdentifier,
        is_user_channel: bool,
    ) -> Vec<AppIdentifier> {
        let mut targets: Vec<AppIdentifier> = Vec::new();
        let mut consider = |listener: &ContextListener, targets: &mut Vec<AppIdentifier>| {
            let type_matches = listener
                .context_type
                .as_deref()
                .is_none_or(|t| t == context_type);
            if type_matches && listener.owner != *source && !targets.contains(&listener.owner) {
                targets.push(listener.owner.clone());
            }
        };

        for listener in self.context_listeners.on_channel(channel_id) {
            consider(listener, &mut targets);
        }
        if is_user_channel {
            for listener in self.context_listeners.floating() {
                if self.current_user_channel.get(&listener.owner).map(String::as_str)
                    == Some(channel_id)
                {
                    consider(listener, &mut targets);
                }
            }
        }
        targets
    }

    pub fn get_current_context(
        &self,
        meta: &RequestMeta,
        payload: GetCurrentContextRequestPayload,
        source: &AppIdentifier,
    ) -> HandlerOutcome {
        let response_meta = ResponseMeta::for_request(meta.request_uuid.clone());
        if matches!(self.classify(&payload.channel_id), ChannelKind::Private)
            && !self.allowed_on_private(&payload.channel_id, source)
        {
            return HandlerOutcome::respond(AgentResponse::GetCurrentContext {
                meta: response_meta,
                payload: GetCurrentContextResponsePayload {
                    context: None,
                    error: Some(ResponseError::AccessDenied),
                },
            });
        }

        let context = self
            .history
            .get(&payload.channel_id)
            .and_then(|h| h.current(payload.context_type.as_deref()))
            .cloned();
        HandlerOutcome::respond(AgentResponse::GetCurrentContext {
            meta: response_meta,
            payload: GetCurrentContextResponsePayload {
                context,
                error: None,
            },
        })
    }

    pub fn private_channel_disconnect(
        &mut self,
        meta: &RequestMeta,
        payload: ChannelIdPayload,
        source: &AppIdentifier,
    ) -> HandlerOutcome {
        let mut outcome = HandlerOutcome::respond(AgentResponse::PrivateChannelDisconnect {
            meta: ResponseMeta::for_request(meta.request_uuid.clone()),
            payload: VoidResponsePayload::ok(),
        });
        if !self.private_channels.contains_key(&payload.channel_id) {
            return outcome;
        }

        // The departing app's own listeners are unsubscribed on its behalf,
        // one event each, before anything else happens.
        let departing: Vec<ContextListener> = self
            .context_listeners
            .on_channel(&payload.channel_id)
            .filter(|l| l.owner == *source)
            .cloned()
            .collect();
        for listener in &departing {
            outcome.events.push(OutboundEvent {
                event: AgentEvent::PrivateChannelOnUnsubscribe {
                    meta: EventMeta::new(),
                    payload: PrivateChannelListenerEventPayload {
                        private_channel_id: payload.channel_id.clone(),
                        context_type: listener.context_type.clone(),
                    },
                },
                targets: vec![source.clone()],
            });
        }
        for listener in &departing {
            self.context_listeners.remove(&listener.uuid);
        }

        let remove_channel = match self.private_channels.get_mut(&payload.channel_id) {
            Some(rec) => {
                rec.event_listeners.retain(|l| l.owner != *source);
                rec.allowed.retain(|a| a != source);
                rec.allowed.is_empty()
            }
            None => false,
        };

        let disconnect_targets = self.private_channel_peers(
            &payload.channel_id,
            PrivateChannelEventType::Disconnect,
            source,
        );
        if !disconnect_targets.is_empty() {
            outcome.events.push(OutboundEvent {
                event: AgentEvent::PrivateChannelOnDisconnect {
                    meta: EventMeta::new(),
                    payload: PrivateChannelDisconnectEventPayload {
                        private_channel_id: payload.channel_id.clone(),
                    },
                },
                targets: disconnect_targets,
            });
        }

        if remove_channel {
            self.private_channels.remove(&payload.channel_id);
            self.history.remove(&payload.channel_id);
            tracing::debug!(channel = %payload.channel_id, "private channel dropped, all members gone");
        }
        outcome
    }

    /// Grants `app` membership in a private channel. Called by the intent
    /// layer when the channel is handed back as an intent result.
    pub fn add_to_private_channel_allowed_list(&mut self, channel_id: &str, app: AppIdentifier) {
        if let Some(rec) = self.private_channels.get_mut(channel_id)
            && !rec.allowed.contains(&app)
        {
            tracing::debug!(channel = channel_id, app = %app, "private channel membership granted");
            rec.allowed.push(app);
        }
    }

    pub fn is_private_channel(&self, channel_id: &str) -> bool {
        self.private_channels.contains_key(channel_id)
    }

    /// Removes every trace of a disconnected proxy. Idempotent; a no-op for
    /// identities that were never registered.
    pub fn cleanup_disconnected_proxy(&mut self, source: &AppIdentifier) {
        self.current_user_channel.remove(source);
        self.context_listeners.remove_owned_by(source);
        self.event_listeners.retain(|e| e.owner != *source);

        let mut emptied: Vec<String> = Vec::new();
        for (id, rec) in self.private_channels.iter_mut() {
            rec.event_listeners.retain(|l| l.owner != *source);
            rec.allowed.retain(|a| a != source);
            if rec.allowed.is_empty() {
                emptied.push(id.clone());
            }
        }
        for id in emptied {
            self.private_channels.remove(&id);
            self.history.remove(&id);
        }

        for history in self.history.values_mut() {
            history.scrub_from(source);
        }
    }
}
