//! Root agent internals: the per-connection state machine, the message
//! publisher, and the channel/intent message handlers.

pub mod channel_handler;
pub mod intent_handler;
pub mod publisher;
pub mod root;
pub mod ws;

pub use channel_handler::{ChannelMessageHandler, HandlerOutcome, OutboundEvent};
pub use intent_handler::{IntentMessageHandler, IntentOutcome};
pub use publisher::MessagePublisher;
pub use root::RootAgent;
