// fdc3-agent: an FDC3 2.2 desktop agent.
//
// A single root agent brokers messages between independently connected
// apps: typed contexts over shared channels, intents with results, and
// private channels with access control. Proxies connect through the
// WebConnectionProtocol handshake, in process or over a WebSocket.
//
// # Example
//
// ```no_run
// use std::sync::Arc;
// use fdc3_agent::{
//     AgentConfig, GetAgentOptions, HandshakeTarget, RootAgent, StaticAppDirectory, get_agent,
// };
//
// #[tokio::main]
// async fn main() -> Result<(), Box<dyn std::error::Error>> {
//     let directory = StaticAppDirectory::default().with_app("chat", "https://chat.example.com/");
//     let root = RootAgent::new(AgentConfig::default(), Arc::new(directory));
//
//     let targets: Vec<Arc<dyn HandshakeTarget>> = vec![Arc::new(root.clone())];
//     let agent = get_agent(
//         &targets,
//         GetAgentOptions::new("https://chat.example.com/index.html"),
//     )
//     .await?;
//
//     agent.join_user_channel("fdc3.channel.1").await?;
//     agent
//         .broadcast(
//             "fdc3.channel.1",
//             serde_json::json!({"type": "fdc3.contact", "id": {"email": "x@y"}}),
//         )
//         .await?;
//     Ok(())
// }
// ```

pub mod config;
pub mod directory;
pub mod error;
pub mod protocol;
pub mod proxy;
pub mod server;
pub mod transport;

pub use config::{AgentConfig, recommended_user_channels};
pub use directory::{AppDirectory, AppDirectoryApplication, HttpAppDirectory, StaticAppDirectory};
pub use error::{Error, Result};
pub use protocol::{
    AppIdentifier, Channel, ChannelType, IntentResult, ResponseError, TargetAppIdentifier,
};
pub use proxy::{DesktopAgentProxy, GetAgentOptions, HandshakeTarget, WsHandshakeTarget, get_agent};
pub use server::RootAgent;
pub use server::ws::serve_ws;
pub use transport::MessagePort;
