// Core FDC3 data types shared by the wire protocol and the broker state.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fully-qualified identity of a running proxy.
///
/// `app_id` is assigned by the app directory; `instance_id` is minted by the
/// root agent during identity validation. The pair is the only authoritative
/// identity of a connected proxy and is used as the key in every listener
/// registry and access-control list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppIdentifier {
    pub app_id: String,
    pub instance_id: String,
}

impl AppIdentifier {
    pub fn new(app_id: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            instance_id: instance_id.into(),
        }
    }
}

impl std::fmt::Display for AppIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.app_id, self.instance_id)
    }
}

/// App reference as it appears in request payloads (e.g. a raiseIntent
/// target), where the instance half is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetAppIdentifier {
    pub app_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

/// Splits an `appId@directory` shorthand into its halves. Plain app ids pass
/// through with no directory part.
pub fn split_qualified_app_id(app_id: &str) -> (&str, Option<&str>) {
    match app_id.split_once('@') {
        Some((id, directory)) if !directory.is_empty() => (id, Some(directory)),
        _ => (app_id, None),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    User,
    App,
    Private,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DisplayMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub glyph: Option<String>,
}

/// A channel as carried on the wire and held in the broker's registries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_metadata: Option<DisplayMetadata>,
}

impl Channel {
    pub fn app(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            channel_type: ChannelType::App,
            display_metadata: None,
        }
    }

    pub fn private(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            channel_type: ChannelType::Private,
            display_metadata: None,
        }
    }
}

/// Reads the `type` discriminator of a context blob, if it has one.
///
/// Contexts are open JSON objects; the only shape the broker enforces is an
/// object with a string `type`.
pub fn context_type_of(context: &Value) -> Option<&str> {
    context.as_object()?.get("type")?.as_str()
}

/// True when the value satisfies the minimal context shape.
pub fn is_valid_context(context: &Value) -> bool {
    context_type_of(context).is_some()
}

/// Reads a context's `source` field as an app identity, when present and
/// well-formed. Used when scrubbing history after a proxy disconnects.
pub fn context_source(context: &Value) -> Option<AppIdentifier> {
    let source = context.as_object()?.get("source")?;
    serde_json::from_value(source.clone()).ok()
}

/// Features advertised in `ImplementationMetadata.optionalFeatures`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OptionalFeatures {
    #[serde(rename = "OriginatingAppMetadata")]
    pub originating_app_metadata: bool,
    #[serde(rename = "UserChannelMembershipAPIs")]
    pub user_channel_membership_apis: bool,
    #[serde(rename = "DesktopAgentBridging")]
    pub desktop_agent_bridging: bool,
}

impl Default for OptionalFeatures {
    fn default() -> Self {
        Self {
            originating_app_metadata: true,
            user_channel_membership_apis: true,
            desktop_agent_bridging: false,
        }
    }
}

/// Metadata about the validated app, echoed back in WCP5.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppMetadata {
    pub app_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImplementationMetadata {
    pub fdc3_version: String,
    pub provider: String,
    pub provider_version: String,
    pub optional_features: OptionalFeatures,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_metadata: Option<AppMetadata>,
}

/// Result handed back by an intent handler: a context, a channel, or void.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentMetadata {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Answer shape for findIntent: the intent plus the apps able to handle it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppIntent {
    pub intent: IntentMetadata,
    pub apps: Vec<AppMetadata>,
}

/// Resolution returned to a raiseIntent caller once a target is chosen.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentResolution {
    pub intent: String,
    pub source: AppIdentifier,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn qualified_app_id_splits_on_at() {
        assert_eq!(
            split_qualified_app_id("chat@apps.example.com"),
            ("chat", Some("apps.example.com"))
        );
        assert_eq!(split_qualified_app_id("chat"), ("chat", None));
        assert_eq!(split_qualified_app_id("chat@"), ("chat@", None));
    }

    #[test]
    fn channel_serializes_with_type_tag() {
        let channel = Channel::private("pc-1");
        let value = serde_json::to_value(&channel).unwrap();
        assert_eq!(value, json!({"id": "pc-1", "type": "private"}));
    }

    #[test]
    fn context_shape_validation() {
        assert!(is_valid_context(&json!({"type": "fdc3.contact"})));
        assert!(!is_valid_context(&json!("not-a-context")));
        assert!(!is_valid_context(&json!({"type": 42})));
        assert!(!is_valid_context(&json!(["fdc3.contact"])));
    }

    #[test]
    fn context_source_requires_full_identity() {
        let ctx = json!({
            "type": "fdc3.contact",
            "source": {"appId": "A", "instanceId": "a1"},
        });
        assert_eq!(context_source(&ctx), Some(AppIdentifier::new("A", "a1")));

        let partial = json!({"type": "fdc3.contact", "source": {"appId": "A"}});
        assert_eq!(context_source(&partial), None);
    }
}
