//! Proxy agent: the per-app view of the desktop agent. Connection plumbing,
//! the typed API surface, and agent discovery.

pub mod agent;
pub mod connection;
pub mod discovery;

pub use agent::{
    ContextListenerHandle, DesktopAgentProxy, EventListenerHandle, IntentListenerHandle,
    IntentResolutionHandle, PrivateChannelEventListenerHandle,
};
pub use connection::ProxyConnection;
pub use discovery::{GetAgentOptions, HandshakeTarget, WsHandshakeTarget, get_agent};
