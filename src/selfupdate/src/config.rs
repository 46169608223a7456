//! Update configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{UpdateError, UpdateResult};
use crate::version;

/// Default release channel.
pub const DEFAULT_CHANNEL: &str = "stable";

/// Default seconds between automatic checks.
pub const DEFAULT_AUTOUPDATE_INTERVAL_SECS: u64 = 300;

/// Default upper bound of the random delay added to each check interval.
pub const DEFAULT_MAX_JITTER_SECS: u64 = 10;

/// Configuration of an [`Updater`](crate::Updater).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// URL of the folder containing the manifests,
    /// e.g. `https://downloads.example.com/myapp`
    #[serde(default)]
    pub base_url: String,

    /// Base64 encoded public key release artifacts are signed with
    #[serde(default)]
    pub public_key: String,

    /// Version of the running executable
    #[serde(default)]
    pub current_version: String,

    /// Release channel to follow
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Seconds between automatic checks (0 means the default of 300)
    #[serde(default = "default_interval")]
    pub autoupdate_interval_secs: u64,

    /// Upper bound of the random delay added to each interval, in seconds
    #[serde(default = "default_max_jitter")]
    pub max_jitter_secs: u64,

    /// User-Agent sent to the release server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    /// Log update lifecycle events at INFO level
    #[serde(default)]
    pub verbose: bool,

    /// Executable to replace instead of the running one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable_path: Option<PathBuf>,

    /// HTTP client to use instead of the default one
    #[serde(skip)]
    pub http_client: Option<reqwest::Client>,
}

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

fn default_interval() -> u64 {
    DEFAULT_AUTOUPDATE_INTERVAL_SECS
}

fn default_max_jitter() -> u64 {
    DEFAULT_MAX_JITTER_SECS
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            public_key: String::new(),
            current_version: String::new(),
            channel: default_channel(),
            autoupdate_interval_secs: DEFAULT_AUTOUPDATE_INTERVAL_SECS,
            max_jitter_secs: DEFAULT_MAX_JITTER_SECS,
            user_agent: None,
            verbose: false,
            executable_path: None,
            http_client: None,
        }
    }
}

impl UpdateConfig {
    /// Create a config with the required fields set.
    pub fn new(
        base_url: impl Into<String>,
        public_key: impl Into<String>,
        current_version: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            public_key: public_key.into(),
            current_version: current_version.into(),
            ..Self::default()
        }
    }

    /// Load config from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> UpdateResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| UpdateError::Config {
            message: format!("failed to read {}: {}", path.display(), e),
        })?;
        toml::from_str(&content).map_err(|e| UpdateError::Config {
            message: format!("failed to parse {}: {}", path.display(), e),
        })
    }

    /// Override fields from `SELFUPDATE_*` environment variables.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("SELFUPDATE_BASE_URL") {
            self.base_url = url;
        }

        if let Ok(key) = std::env::var("SELFUPDATE_PUBLIC_KEY") {
            self.public_key = key;
        }

        if let Ok(channel) = std::env::var("SELFUPDATE_CHANNEL") {
            self.channel = channel;
        }

        if let Ok(interval) = std::env::var("SELFUPDATE_INTERVAL_SECS") {
            match interval.parse() {
                Ok(secs) => self.autoupdate_interval_secs = secs,
                Err(_) => tracing::warn!(value = %interval, "Ignoring invalid SELFUPDATE_INTERVAL_SECS"),
            }
        }

        if let Ok(agent) = std::env::var("SELFUPDATE_USER_AGENT") {
            self.user_agent = Some(agent);
        }
    }

    /// Check that all required fields are present and well formed.
    pub fn validate(&self) -> UpdateResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(config_error("base_url is empty"));
        }
        if self.public_key.trim().is_empty() {
            return Err(config_error("public_key is empty"));
        }
        if self.current_version.trim().is_empty() {
            return Err(config_error("current_version is empty"));
        }
        if !version::is_valid(&self.current_version) {
            return Err(UpdateError::InvalidVersion {
                version: self.current_version.clone(),
            });
        }
        if self.channel.trim().is_empty() {
            return Err(config_error("channel is empty"));
        }
        Ok(())
    }

    /// Interval between automatic checks.
    pub fn autoupdate_interval(&self) -> Duration {
        match self.autoupdate_interval_secs {
            0 => Duration::from_secs(DEFAULT_AUTOUPDATE_INTERVAL_SECS),
            secs => Duration::from_secs(secs),
        }
    }

    /// Upper bound of the random delay added to each interval.
    pub fn max_jitter(&self) -> Duration {
        Duration::from_secs(self.max_jitter_secs)
    }
}

fn config_error(message: &str) -> UpdateError {
    UpdateError::Config {
        message: message.to_string(),
    }
}
