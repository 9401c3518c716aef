// App directory client. The directory is an external collaborator: the
// agent only consumes `GET {base}/v2/apps` and `GET {base}/v2/apps/{appId}`.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::types::split_qualified_app_id;

/// One application record as served by the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDirectoryApplication {
    pub app_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<AppDirectoryDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interop: Option<AppDirectoryInterop>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppDirectoryDetails {
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppDirectoryInterop {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intents: Option<AppDirectoryIntents>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDirectoryIntents {
    /// Intent name → declaration. Only the key matters for routing.
    #[serde(default)]
    pub listens_for: HashMap<String, serde_json::Value>,
}

impl AppDirectoryApplication {
    /// True when the app declares it listens for `intent`.
    pub fn listens_for(&self, intent: &str) -> bool {
        self.interop
            .as_ref()
            .and_then(|i| i.intents.as_ref())
            .is_some_and(|i| i.listens_for.contains_key(intent))
    }

    fn origin(&self) -> Option<String> {
        let url = Url::parse(&self.details.as_ref()?.url).ok()?;
        Some(url.origin().ascii_serialization())
    }
}

/// Directory seam. The root agent resolves a connecting window's
/// `identityUrl` to exactly one application record through this trait.
#[async_trait]
pub trait AppDirectory: Send + Sync {
    /// All applications the directory knows about. Failures yield an empty
    /// list (the directory contract treats any non-OK body as "no apps").
    async fn applications(&self) -> Vec<AppDirectoryApplication>;

    /// One application by id. `appId@directory` shorthand is accepted.
    async fn app(&self, app_id: &str) -> Result<AppDirectoryApplication> {
        let (bare_id, _) = split_qualified_app_id(app_id);
        self.applications()
            .await
            .into_iter()
            .find(|a| a.app_id == bare_id)
            .ok_or_else(|| Error::Directory(format!("unknown app id: {app_id}")))
    }

    /// Resolves an identity URL to the application whose registered URL
    /// shares its origin.
    async fn resolve_identity(&self, identity_url: &str) -> Result<AppDirectoryApplication> {
        let identity_origin = Url::parse(identity_url)
            .map(|u| u.origin().ascii_serialization())
            .map_err(|e| Error::Directory(format!("bad identity url {identity_url}: {e}")))?;

        self.applications()
            .await
            .into_iter()
            .find(|a| a.origin().as_deref() == Some(identity_origin.as_str()))
            .ok_or_else(|| Error::Directory(format!("no app registered for {identity_url}")))
    }
}

/// HTTP-backed directory speaking the `/v2/apps` protocol.
pub struct HttpAppDirectory {
    base: Url,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct AllApplicationsResponse {
    applications: Vec<AppDirectoryApplication>,
    message: String,
}

impl HttpAppDirectory {
    pub fn new(base: Url) -> Self {
        Self {
            base,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::Directory(format!("bad directory url: {e}")))
    }
}

#[async_trait]
impl AppDirectory for HttpAppDirectory {
    async fn applications(&self) -> Vec<AppDirectoryApplication> {
        let url = match self.endpoint("v2/apps") {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("app directory misconfigured: {e}");
                return Vec::new();
            }
        };

        let response = match self.client.get(url.clone()).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("app directory unreachable at {url}: {e}");
                return Vec::new();
            }
        };

        match response.json::<AllApplicationsResponse>().await {
            Ok(body) if body.message == "OK" => body.applications,
            Ok(body) => {
                tracing::warn!("app directory answered {:?}, treating as empty", body.message);
                Vec::new()
            }
            Err(e) => {
                tracing::warn!("app directory body unparseable: {e}");
                Vec::new()
            }
        }
    }

    async fn app(&self, app_id: &str) -> Result<AppDirectoryApplication> {
        let (bare_id, _) = split_qualified_app_id(app_id);
        let url = self.endpoint(&format!("v2/apps/{bare_id}"))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Directory(format!("app lookup failed: {e}")))?;
        response
            .json::<AppDirectoryApplication>()
            .await
            .map_err(|e| Error::Directory(format!("app record unparseable: {e}")))
    }
}

/// In-memory directory for embedding and tests.
#[derive(Default)]
pub struct StaticAppDirectory {
    applications: Vec<AppDirectoryApplication>,
}

impl StaticAppDirectory {
    pub fn new(applications: Vec<AppDirectoryApplication>) -> Self {
        Self { applications }
    }

    /// Registers a minimal app whose identity is `url`.
    pub fn with_app(mut self, app_id: &str, url: &str) -> Self {
        self.applications.push(AppDirectoryApplication {
            app_id: app_id.to_string(),
            title: app_id.to_string(),
            description: None,
            details: Some(AppDirectoryDetails {
                url: url.to_string(),
            }),
            interop: None,
        });
        self
    }
}

#[async_trait]
impl AppDirectory for StaticAppDirectory {
    async fn applications(&self) -> Vec<AppDirectoryApplication> {
        self.applications.clone()
    }
}
