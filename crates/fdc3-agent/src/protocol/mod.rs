//! Wire protocol: envelope shapes, typed message unions, and the
//! WebConnectionProtocol handshake frames.

pub mod envelope;
pub mod errors;
pub mod messages;
pub mod types;
pub mod wcp;

pub use envelope::{EventMeta, RequestMeta, ResponseMeta, generate_uuid, timestamp_now};
pub use errors::ResponseError;
pub use messages::{AgentEvent, AgentRequest, AgentResponse};
pub use types::{
    AppIdentifier, AppIntent, AppMetadata, Channel, ChannelType, DisplayMetadata,
    ImplementationMetadata, IntentResolution, IntentResult, TargetAppIdentifier,
};
pub use wcp::WcpMessage;
