// WebConnectionProtocol: the four-message handshake (plus goodbye) that
// turns an anonymous window into a validated proxy.

use serde::{Deserialize, Serialize};

use crate::protocol::envelope::timestamp_now;
use crate::protocol::types::ImplementationMetadata;

/// Meta block shared by all WCP frames. The `connection_attempt_uuid` is
/// minted by the candidate child and echoed by the root so the child can
/// bind the right reply when racing several parents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMeta {
    pub connection_attempt_uuid: String,
    pub timestamp: i64,
}

impl ConnectionMeta {
    pub fn new(connection_attempt_uuid: impl Into<String>) -> Self {
        Self {
            connection_attempt_uuid: connection_attempt_uuid.into(),
            timestamp: timestamp_now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloPayload {
    pub actual_url: String,
    /// Defaults to `actual_url` when the app does not claim a distinct
    /// directory identity.
    pub identity_url: String,
    pub fdc3_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandshakePayload {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateAppIdentityPayload {
    pub actual_url: String,
    pub identity_url: String,
    /// Session resumption hints. Accepted on the wire but a fresh instance
    /// is minted regardless.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_uuid: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateAppIdentityResponsePayload {
    pub app_id: String,
    pub instance_id: String,
    pub instance_uuid: String,
    pub implementation_metadata: ImplementationMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoodbyePayload {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WcpMessage {
    #[serde(rename = "WCP1Hello")]
    Hello {
        meta: ConnectionMeta,
        payload: HelloPayload,
    },
    #[serde(rename = "WCP3Handshake")]
    Handshake {
        meta: ConnectionMeta,
        payload: HandshakePayload,
    },
    #[serde(rename = "WCP4ValidateAppIdentity")]
    ValidateAppIdentity {
        meta: ConnectionMeta,
        payload: ValidateAppIdentityPayload,
    },
    #[serde(rename = "WCP5ValidateAppIdentityResponse")]
    ValidateAppIdentityResponse {
        meta: ConnectionMeta,
        payload: ValidateAppIdentityResponsePayload,
    },
    #[serde(rename = "WCP6Goodbye")]
    Goodbye {
        meta: ConnectionMeta,
        payload: GoodbyePayload,
    },
}

impl WcpMessage {
    pub fn meta(&self) -> &ConnectionMeta {
        match self {
            WcpMessage::Hello { meta, .. }
            | WcpMessage::Handshake { meta, .. }
            | WcpMessage::ValidateAppIdentity { meta, .. }
            | WcpMessage::ValidateAppIdentityResponse { meta, .. }
            | WcpMessage::Goodbye { meta, .. } => meta,
        }
    }

    pub fn hello(
        connection_attempt_uuid: impl Into<String>,
        actual_url: impl Into<String>,
        identity_url: impl Into<String>,
        fdc3_version: impl Into<String>,
    ) -> Self {
        WcpMessage::Hello {
            meta: ConnectionMeta::new(connection_attempt_uuid),
            payload: HelloPayload {
                actual_url: actual_url.into(),
                identity_url: identity_url.into(),
                fdc3_version: fdc3_version.into(),
            },
        }
    }

    pub fn handshake(connection_attempt_uuid: impl Into<String>) -> Self {
        WcpMessage::Handshake {
            meta: ConnectionMeta::new(connection_attempt_uuid),
            payload: HandshakePayload::default(),
        }
    }

    pub fn goodbye(connection_attempt_uuid: impl Into<String>) -> Self {
        WcpMessage::Goodbye {
            meta: ConnectionMeta::new(connection_attempt_uuid),
            payload: GoodbyePayload::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hello_round_trips() {
        let hello = WcpMessage::hello("c-1", "https://a.example/app", "https://a.example", "2.2");
        let value = serde_json::to_value(&hello).unwrap();
        assert_eq!(value["type"], "WCP1Hello");
        assert_eq!(value["meta"]["connectionAttemptUuid"], "c-1");
        assert_eq!(value["payload"]["identityUrl"], "https://a.example");
        let parsed: WcpMessage = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.meta().connection_attempt_uuid, "c-1");
    }

    #[test]
    fn validate_parses_without_resumption_hints() {
        let raw = json!({
            "type": "WCP4ValidateAppIdentity",
            "meta": {"connectionAttemptUuid": "c-2", "timestamp": 5},
            "payload": {
                "actualUrl": "https://a.example/app",
                "identityUrl": "https://a.example",
            },
        });
        let parsed: WcpMessage = serde_json::from_value(raw).unwrap();
        match parsed {
            WcpMessage::ValidateAppIdentity { payload, .. } => {
                assert_eq!(payload.instance_id, None);
                assert_eq!(payload.instance_uuid, None);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }
}
