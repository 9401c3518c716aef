// Wire-level FDC3 error values.

use serde::{Deserialize, Serialize};

/// The fixed set of error strings a failure response may carry in
/// `payload.error`.
///
/// Serialized as the bare variant name, matching the FDC3 2.2 error enums
/// (ChannelError, OpenError, ResolveError, ResultError).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseError {
    AccessDenied,
    MalformedContext,
    NoChannelFound,
    AppNotFound,
    AppTimeout,
    ApiTimeout,
    CreationFailed,
    DesktopAgentNotFound,
    ResolverUnavailable,
    ResolverTimeout,
    IntentDeliveryFailed,
    IntentHandlerRejected,
    NoAppsFound,
    NoResultReturned,
    TargetAppUnavailable,
    TargetInstanceUnavailable,
    UserCancelledResolution,
    AgentDisconnected,
    NotConnectedToBridge,
    ResponseToBridgeTimedOut,
    MalformedMessage,
    ErrorOnLaunch,
}

impl std::fmt::Display for ResponseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResponseError::AccessDenied => "AccessDenied",
            ResponseError::MalformedContext => "MalformedContext",
            ResponseError::NoChannelFound => "NoChannelFound",
            ResponseError::AppNotFound => "AppNotFound",
            ResponseError::AppTimeout => "AppTimeout",
            ResponseError::ApiTimeout => "ApiTimeout",
            ResponseError::CreationFailed => "CreationFailed",
            ResponseError::DesktopAgentNotFound => "DesktopAgentNotFound",
            ResponseError::ResolverUnavailable => "ResolverUnavailable",
            ResponseError::ResolverTimeout => "ResolverTimeout",
            ResponseError::IntentDeliveryFailed => "IntentDeliveryFailed",
            ResponseError::IntentHandlerRejected => "IntentHandlerRejected",
            ResponseError::NoAppsFound => "NoAppsFound",
            ResponseError::NoResultReturned => "NoResultReturned",
            ResponseError::TargetAppUnavailable => "TargetAppUnavailable",
            ResponseError::TargetInstanceUnavailable => "TargetInstanceUnavailable",
            ResponseError::UserCancelledResolution => "UserCancelledResolution",
            ResponseError::AgentDisconnected => "AgentDisconnected",
            ResponseError::NotConnectedToBridge => "NotConnectedToBridge",
            ResponseError::ResponseToBridgeTimedOut => "ResponseToBridgeTimedOut",
            ResponseError::MalformedMessage => "MalformedMessage",
            ResponseError::ErrorOnLaunch => "ErrorOnLaunch",
        };
        f.write_str(name)
    }
}

impl std::error::Error for ResponseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_bare_name() {
        let value = serde_json::to_value(ResponseError::AccessDenied).unwrap();
        assert_eq!(value, serde_json::json!("AccessDenied"));
        let parsed: ResponseError = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, ResponseError::AccessDenied);
    }

    #[test]
    fn display_matches_wire_string() {
        assert_eq!(
            ResponseError::TargetInstanceUnavailable.to_string(),
            "TargetInstanceUnavailable"
        );
    }
}
