// Error types for the desktop agent

use thiserror::Error;

/// Result type alias for desktop agent operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur inside the agent library.
///
/// These are the library-level failures (transport, protocol framing,
/// handshake). Wire-level FDC3 failures travel inside response payloads as
/// [`crate::protocol::ResponseError`] values and never surface here.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level error (port or socket communication)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Protocol-level error (malformed or unexpected message)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No desktop agent answered the connection attempt
    ///
    /// Raised when the discovery timeout expires before any candidate
    /// parent replies with a matching handshake.
    #[error("No desktop agent found: {0}")]
    AgentNotFound(String),

    /// The app directory rejected or failed the lookup
    #[error("App directory error: {0}")]
    Directory(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Timeout waiting for operation
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The message port closed while a request was in flight
    #[error("Message port closed unexpectedly")]
    PortClosed,

    /// Invalid argument provided to an API call
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The agent answered with a wire-level FDC3 error
    #[error("FDC3 error: {0}")]
    Fdc3(#[from] crate::protocol::errors::ResponseError),
}
