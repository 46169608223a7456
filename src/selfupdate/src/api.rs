//! Release server client.
//!
//! The release server is a plain file tree:
//! - `{base_url}/{channel}.json` - latest release of a channel
//! - `{base_url}/{version}/signatures.json` - signed artifacts of a release
//! - `{base_url}/{version}/{filename}` - artifact archives

use std::time::Duration;

use reqwest::Client;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::de::DeserializeOwned;

use crate::error::{UpdateError, UpdateResult};
use crate::manifest::{ChannelManifest, SIGNATURE_MANIFEST_FILENAME, SignatureManifest};
use crate::version;

/// User-Agent sent when none is configured.
pub const DEFAULT_USER_AGENT: &str = concat!("selfupdate/", env!("CARGO_PKG_VERSION"));

/// Default timeout for manifest and artifact requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection pool idle timeout so DNS is re-resolved between checks.
pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Creates an HTTP client builder with standard configuration.
///
/// Use this when you need to customize the client further before building.
pub fn create_client_builder() -> reqwest::ClientBuilder {
    Client::builder()
        .user_agent(DEFAULT_USER_AGENT)
        .timeout(DEFAULT_TIMEOUT)
        .read_timeout(DEFAULT_TIMEOUT)
        .tcp_nodelay(true)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(2)
}

/// Client for a release server.
#[derive(Debug, Clone)]
pub struct ReleaseClient {
    client: Client,
    base_url: String,
    user_agent: String,
}

impl ReleaseClient {
    /// Create a client with the default HTTP client.
    pub fn new(base_url: impl Into<String>) -> UpdateResult<Self> {
        let client = create_client_builder().build()?;
        Ok(Self::with_client(client, base_url, DEFAULT_USER_AGENT))
    }

    /// Create a client with a custom HTTP client and User-Agent.
    pub fn with_client(
        client: Client,
        base_url: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            user_agent: user_agent.into(),
        }
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the latest release of a channel.
    pub async fn fetch_channel_manifest(&self, channel: &str) -> UpdateResult<ChannelManifest> {
        let url = format!("{}/{}.json", self.base_url, channel);
        tracing::debug!(url = %url, "Fetching channel manifest");

        let manifest: ChannelManifest = self.get_json(&url).await?;
        if !version::is_valid(&manifest.version) {
            return Err(UpdateError::InvalidVersion {
                version: manifest.version,
            });
        }

        Ok(manifest)
    }

    /// Get the signature manifest of a release.
    pub async fn fetch_signature_manifest(&self, version: &str) -> UpdateResult<SignatureManifest> {
        let url = format!(
            "{}/{}/{}",
            self.base_url, version, SIGNATURE_MANIFEST_FILENAME
        );
        tracing::debug!(url = %url, "Fetching signature manifest");

        self.get_json(&url).await
    }

    /// Download a release artifact.
    pub async fn download_artifact(&self, version: &str, filename: &str) -> UpdateResult<Vec<u8>> {
        let url = format!("{}/{}/{}", self.base_url, version, filename);
        tracing::debug!(url = %url, "Downloading artifact");

        let response = self
            .client
            .get(&url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::DownloadFailed {
                url,
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> UpdateResult<T> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(UpdateError::ManifestFetch {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|source| UpdateError::ManifestParse {
            url: url.to_string(),
            source,
        })
    }
}
