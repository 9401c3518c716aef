// Root-side message publisher: owns the connection registry and the
// identity maps, and turns handler outcomes into posted frames.

use std::collections::HashMap;

use crate::protocol::messages::{AgentEvent, AgentResponse};
use crate::protocol::types::AppIdentifier;
use crate::transport::PortSender;

struct ConnectionRecord {
    identity: AppIdentifier,
    sender: PortSender,
}

/// Maps connection ids to validated identities (and back) and publishes
/// responses and events onto the right ports. The root agent's own loopback
/// connection is registered like any other, so nothing here special-cases
/// the root identity.
#[derive(Default)]
pub struct MessagePublisher {
    connections: HashMap<String, ConnectionRecord>,
    by_identity: HashMap<AppIdentifier, String>,
}

impl MessagePublisher {
    /// Adds a validated proxy to the routing table. Until this happens the
    /// proxy's requests are not routable.
    pub fn register(&mut self, connection_id: String, identity: AppIdentifier, sender: PortSender) {
        self.by_identity
            .insert(identity.clone(), connection_id.clone());
        self.connections
            .insert(connection_id, ConnectionRecord { identity, sender });
    }

    /// Removes a connection, returning the identity it carried.
    pub fn unregister(&mut self, connection_id: &str) -> Option<AppIdentifier> {
        let record = self.connections.remove(connection_id)?;
        self.by_identity.remove(&record.identity);
        Some(record.identity)
    }

    /// Removes an identity from the routing table. The port itself may stay
    /// open; later frames on it no longer resolve to an identity and are
    /// denied.
    pub fn unregister_identity(&mut self, identity: &AppIdentifier) -> bool {
        let Some(connection_id) = self.by_identity.remove(identity) else {
            return false;
        };
        self.connections.remove(&connection_id);
        true
    }

    pub fn identity_of(&self, connection_id: &str) -> Option<AppIdentifier> {
        self.connections
            .get(connection_id)
            .map(|r| r.identity.clone())
    }

    /// Ships a response back to the app whose request produced it.
    pub fn publish_response_message(&self, response: &AgentResponse, source: &AppIdentifier) {
        let Some(sender) = self
            .by_identity
            .get(source)
            .and_then(|conn| self.connections.get(conn))
            .map(|r| &r.sender)
        else {
            tracing::warn!(target_app = %source, "dropping response for unknown app");
            return;
        };
        match serde_json::to_value(response) {
            Ok(value) => sender.post(value),
            Err(e) => tracing::error!("unserializable response: {e}"),
        }
    }

    /// Fans an event out to each target. Unknown targets are logged and
    /// skipped; the rest still receive the event.
    pub fn publish_event(&self, event: &AgentEvent, targets: &[AppIdentifier]) {
        let value = match serde_json::to_value(event) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("unserializable event: {e}");
                return;
            }
        };
        for target in targets {
            match self
                .by_identity
                .get(target)
                .and_then(|conn| self.connections.get(conn))
            {
                Some(record) => record.sender.post(value.clone()),
                None => tracing::warn!(target_app = %target, "dropping event for unknown app"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::envelope::{EventMeta, ResponseMeta};
    use crate::protocol::messages::{ChannelChangedEventPayload, VoidResponsePayload};
    use crate::transport::MessagePort;

    fn response() -> AgentResponse {
        AgentResponse::Broadcast {
            meta: ResponseMeta::for_request("r-1"),
            payload: VoidResponsePayload::ok(),
        }
    }

    #[tokio::test]
    async fn routes_response_to_the_source_connection() {
        let mut publisher = MessagePublisher::default();
        let (root_side, mut app_side) = MessagePort::pair();
        let (sender, _receiver) = root_side.split();
        let a = AppIdentifier::new("A", "a1");
        publisher.register("conn-1".into(), a.clone(), sender);

        publisher.publish_response_message(&response(), &a);
        let delivered = app_side.recv().await.unwrap();
        assert_eq!(delivered["type"], "broadcastResponse");
    }

    #[tokio::test]
    async fn unknown_event_targets_are_dropped_without_losing_the_rest() {
        let mut publisher = MessagePublisher::default();
        let (root_side, mut app_side) = MessagePort::pair();
        let (sender, _receiver) = root_side.split();
        let a = AppIdentifier::new("A", "a1");
        publisher.register("conn-1".into(), a.clone(), sender);

        let event = AgentEvent::ChannelChanged {
            meta: EventMeta::new(),
            payload: ChannelChangedEventPayload {
                new_channel_id: None,
            },
        };
        publisher.publish_event(&event, &[AppIdentifier::new("ghost", "g1"), a.clone()]);
        let delivered = app_side.recv().await.unwrap();
        assert_eq!(delivered["type"], "channelChangedEvent");
    }

    #[test]
    fn unregister_round_trip() {
        let mut publisher = MessagePublisher::default();
        let (root_side, _app_side) = MessagePort::pair();
        let (sender, _receiver) = root_side.split();
        let a = AppIdentifier::new("A", "a1");
        publisher.register("conn-1".into(), a.clone(), sender);

        assert_eq!(publisher.identity_of("conn-1"), Some(a.clone()));
        assert_eq!(publisher.unregister("conn-1"), Some(a.clone()));
        assert_eq!(publisher.identity_of("conn-1"), None);
        assert_eq!(publisher.unregister("conn-1"), None);
        assert!(!publisher.unregister_identity(&a));
    }
}
