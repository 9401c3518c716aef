// Agent discovery: race a hello against every candidate parent, bind the
// first handshake that echoes our connection attempt, then validate
// identity on the bound port.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;

use crate::config::{DEFAULT_DISCOVERY_TIMEOUT, FDC3_VERSION};
use crate::error::{Error, Result};
use crate::protocol::envelope::generate_uuid;
use crate::protocol::types::AppIdentifier;
use crate::protocol::wcp::{ConnectionMeta, ValidateAppIdentityPayload, WcpMessage};
use crate::proxy::agent::DesktopAgentProxy;
use crate::proxy::connection::ProxyConnection;
use crate::transport::{MessagePort, websocket};

/// Something that can answer a WCP1Hello with a WCP3Handshake and a fresh
/// message port: an in-process root agent, or a socket to a remote one.
#[async_trait]
pub trait HandshakeTarget: Send + Sync {
    async fn hello(&self, hello: &WcpMessage) -> Result<(WcpMessage, MessagePort)>;
}

/// Remote desktop agent behind a WebSocket endpoint.
pub struct WsHandshakeTarget {
    url: String,
}

impl WsHandshakeTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl HandshakeTarget for WsHandshakeTarget {
    async fn hello(&self, hello: &WcpMessage) -> Result<(WcpMessage, MessagePort)> {
        let mut port = websocket::connect_ws(&self.url).await?;
        port.post(serde_json::to_value(hello)?);
        loop {
            let frame = port.recv().await.ok_or(Error::PortClosed)?;
            if let Ok(handshake @ WcpMessage::Handshake { .. }) =
                serde_json::from_value::<WcpMessage>(frame)
            {
                return Ok((handshake, port));
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct GetAgentOptions {
    pub actual_url: String,
    /// Directory identity claimed by the app; defaults to `actual_url`.
    pub identity_url: Option<String>,
    /// Single timeout spanning the whole Hello→Handshake→Validate sequence.
    pub timeout: Duration,
}

impl GetAgentOptions {
    pub fn new(actual_url: impl Into<String>) -> Self {
        Self {
            actual_url: actual_url.into(),
            identity_url: None,
            timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }

    pub fn identity_url(mut self, identity_url: impl Into<String>) -> Self {
        self.identity_url = Some(identity_url.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Connects to a desktop agent. Expiry of the discovery timeout resolves to
/// "no agent found".
pub async fn get_agent(
    targets: &[Arc<dyn HandshakeTarget>],
    options: GetAgentOptions,
) -> Result<DesktopAgentProxy> {
    let timeout = options.timeout;
    tokio::time::timeout(timeout, connect(targets, &options))
        .await
        .map_err(|_| Error::AgentNotFound(format!("no desktop agent answered within {timeout:?}")))?
}

async fn connect(
    targets: &[Arc<dyn HandshakeTarget>],
    options: &GetAgentOptions,
) -> Result<DesktopAgentProxy> {
    let connection_attempt_uuid = generate_uuid();
    let identity_url = options
        .identity_url
        .clone()
        .unwrap_or_else(|| options.actual_url.clone());
    let hello = WcpMessage::hello(
        connection_attempt_uuid.clone(),
        options.actual_url.clone(),
        identity_url.clone(),
        FDC3_VERSION,
    );

    let mut attempts: FuturesUnordered<_> = targets.iter().map(|t| t.hello(&hello)).collect();
    let mut bound = None;
    while let Some(result) = attempts.next().await {
        match result {
            Ok((WcpMessage::Handshake { meta, .. }, port))
                if meta.connection_attempt_uuid == connection_attempt_uuid =>
            {
                bound = Some(port);
                break;
            }
            Ok(_) => tracing::warn!("ignoring handshake for a different connection attempt"),
            Err(e) => tracing::debug!("candidate parent declined: {e}"),
        }
    }
    drop(attempts);
    let Some(mut port) = bound else {
        return Err(Error::AgentNotFound(
            "no candidate parent answered the hello".into(),
        ));
    };

    let validate = WcpMessage::ValidateAppIdentity {
        meta: ConnectionMeta::new(connection_attempt_uuid.clone()),
        payload: ValidateAppIdentityPayload {
            actual_url: options.actual_url.clone(),
            identity_url,
            instance_id: None,
            instance_uuid: None,
        },
    };
    port.post(serde_json::to_value(&validate)?);

    let payload = loop {
        let frame = port.recv().await.ok_or(Error::PortClosed)?;
        if let Ok(WcpMessage::ValidateAppIdentityResponse { payload, .. }) =
            serde_json::from_value::<WcpMessage>(frame)
        {
            break payload;
        }
    };

    let identity = AppIdentifier::new(payload.app_id, payload.instance_id);
    tracing::debug!(app = %identity, "connected to desktop agent");

    let connection = Arc::new(ProxyConnection::new(port));
    let run = connection.clone();
    tokio::spawn(async move { run.run().await });
    Ok(DesktopAgentProxy::new(
        identity,
        connection,
        connection_attempt_uuid,
    ))
}
