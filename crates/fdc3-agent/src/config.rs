// Agent configuration: provider identity, discovery timing, and the
// configured user channel palette.

use std::time::Duration;

use crate::protocol::types::{
    AppMetadata, Channel, ChannelType, DisplayMetadata, ImplementationMetadata, OptionalFeatures,
};

pub const FDC3_VERSION: &str = "2.2";

/// Default span of the Hello→Handshake discovery race on the proxy side.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_millis(750);

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// App id the root agent itself answers under when acting as its own
    /// proxy (the loopback connection).
    pub app_id: String,
    pub provider: String,
    pub provider_version: String,
    /// The fixed user channel palette. User channels are never created
    /// dynamically.
    pub user_channels: Vec<Channel>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            app_id: "desktop-agent".to_string(),
            provider: "fdc3-agent".to_string(),
            provider_version: env!("CARGO_PKG_VERSION").to_string(),
            user_channels: recommended_user_channels(),
        }
    }
}

impl AgentConfig {
    pub fn implementation_metadata(&self, app: Option<AppMetadata>) -> ImplementationMetadata {
        ImplementationMetadata {
            fdc3_version: FDC3_VERSION.to_string(),
            provider: self.provider.clone(),
            provider_version: self.provider_version.clone(),
            optional_features: OptionalFeatures::default(),
            app_metadata: app,
        }
    }
}

/// The eight recommended user channels, `fdc3.channel.1` through
/// `fdc3.channel.8`.
pub fn recommended_user_channels() -> Vec<Channel> {
    const PALETTE: [(&str, &str); 8] = [
        ("Channel 1", "#FF0000"),
        ("Channel 2", "#FF8C00"),
        ("Channel 3", "#FFF000"),
        ("Channel 4", "#00C94D"),
        ("Channel 5", "#00BBDD"),
        ("Channel 6", "#0093FF"),
        ("Channel 7", "#C344EA"),
        ("Channel 8", "#9648FF"),
    ];

    PALETTE
        .iter()
        .enumerate()
        .map(|(i, (name, color))| Channel {
            id: format!("fdc3.channel.{}", i + 1),
            channel_type: ChannelType::User,
            display_metadata: Some(DisplayMetadata {
                name: Some((*name).to_string()),
                color: Some((*color).to_string()),
                glyph: Some((i + 1).to_string()),
            }),
        })
        .collect()
}
