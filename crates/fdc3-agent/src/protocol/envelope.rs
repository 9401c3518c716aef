// Message envelope building blocks: meta blocks, UUID/timestamp helpers,
// and raw-value predicates used to route frames before typed parsing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::types::AppIdentifier;

/// Meta block carried by every request message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMeta {
    pub request_uuid: String,
    pub timestamp: i64,
    /// Stamped by the root publisher once the originating proxy is known.
    /// Proxies never set this themselves.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<AppIdentifier>,
}

impl RequestMeta {
    pub fn new() -> Self {
        Self {
            request_uuid: generate_uuid(),
            timestamp: timestamp_now(),
            source: None,
        }
    }
}

impl Default for RequestMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// Meta block carried by every response message. Echoes the request UUID
/// verbatim and mints a fresh response UUID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    pub request_uuid: String,
    pub response_uuid: String,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<AppIdentifier>,
}

impl ResponseMeta {
    pub fn for_request(request_uuid: impl Into<String>) -> Self {
        Self {
            request_uuid: request_uuid.into(),
            response_uuid: generate_uuid(),
            timestamp: timestamp_now(),
            source: None,
        }
    }
}

/// Meta block carried by every event message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    pub event_uuid: String,
    pub timestamp: i64,
}

impl EventMeta {
    pub fn new() -> Self {
        Self {
            event_uuid: generate_uuid(),
            timestamp: timestamp_now(),
        }
    }
}

impl Default for EventMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// RFC 4122 v4 UUID, rendered as an opaque lowercase string.
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Wall-clock instant in milliseconds since the Unix epoch.
pub fn timestamp_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn meta_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get("meta")?.get(key)?.as_str()
}

/// Message type discriminator, when the frame has one.
pub fn message_type(value: &Value) -> Option<&str> {
    value.get("type")?.as_str()
}

/// Request UUID out of a request or response frame.
pub fn request_uuid(value: &Value) -> Option<&str> {
    meta_str(value, "requestUuid")
}

/// True for app-to-agent request frames: a `type`, a `meta.requestUuid`,
/// and no `meta.responseUuid`.
pub fn is_request_message(value: &Value) -> bool {
    message_type(value).is_some()
        && meta_str(value, "requestUuid").is_some()
        && meta_str(value, "responseUuid").is_none()
}

/// True for agent-to-app response frames: both UUIDs present.
pub fn is_response_message(value: &Value) -> bool {
    message_type(value).is_some()
        && meta_str(value, "requestUuid").is_some()
        && meta_str(value, "responseUuid").is_some()
}

/// True for agent-to-app event frames.
pub fn is_event_message(value: &Value) -> bool {
    message_type(value).is_some() && meta_str(value, "eventUuid").is_some()
}

/// True for WebConnectionProtocol frames, which carry a
/// `meta.connectionAttemptUuid` instead of request/response UUIDs.
pub fn is_wcp_message(value: &Value) -> bool {
    matches!(message_type(value), Some(t) if t.starts_with("WCP"))
        && meta_str(value, "connectionAttemptUuid").is_some()
}
