//! Updater - main API for update operations.

use std::fmt;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, watch};
use tracing::{debug, info};

use crate::api::{DEFAULT_USER_AGENT, ReleaseClient, create_client_builder};
use crate::config::UpdateConfig;
use crate::error::{UpdateError, UpdateResult};
use crate::extract::extract_artifact;
use crate::install::{UpdateWorkspace, check_write_permission, current_executable, install};
use crate::manifest::ChannelManifest;
use crate::signing::PublicKey;
use crate::verify::{platform_tag, select_artifact, verify_artifact};
use crate::version;

/// Capacity of the install notification channel.
const NOTIFICATION_CAPACITY: usize = 16;

/// Step of an update cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UpdatePhase {
    /// Nothing in progress
    #[default]
    Idle,
    /// Fetching the channel manifest
    CheckingManifest,
    /// Fetching the signature manifest and selecting the platform artifact
    FetchingSignatures,
    /// Downloading the artifact
    Downloading,
    /// Checking the artifact's signature and hash
    Verifying,
    /// Extracting the executable into the update workspace
    Extracting,
    /// Replacing the running executable
    Installing,
}

impl UpdatePhase {
    /// Get the phase as a human readable string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::CheckingManifest => "checking manifest",
            Self::FetchingSignatures => "fetching signatures",
            Self::Downloading => "downloading",
            Self::Verifying => "verifying",
            Self::Extracting => "extracting",
            Self::Installing => "installing",
        }
    }
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an update operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The new version replaced the executable
    Installed { from: String, to: String },
    /// The requested version, or a newer one, was already installed
    AlreadyInstalled { version: String },
}

/// Notification sent once per successfully installed update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateInstalled {
    /// Version now on disk
    pub version: String,
}

#[derive(Debug)]
struct Versions {
    available: String,
    installed: String,
}

/// Self-updater for the running executable.
///
/// Share it behind an `Arc` to run the background loop and trigger manual
/// checks from elsewhere in the application.
pub struct Updater {
    client: ReleaseClient,
    public_key: PublicKey,
    channel: String,
    current_version: String,
    platform: String,
    executable_path: Option<PathBuf>,
    pub(crate) autoupdate_interval: Duration,
    pub(crate) max_jitter: Duration,
    pub(crate) verbose: bool,
    versions: RwLock<Versions>,
    update_in_progress: Mutex<()>,
    phase: watch::Sender<UpdatePhase>,
    installed: broadcast::Sender<UpdateInstalled>,
}

impl Updater {
    /// Create an updater from a config.
    pub fn new(config: UpdateConfig) -> UpdateResult<Self> {
        config.validate()?;

        let public_key = PublicKey::from_base64(&config.public_key)?;
        let http_client = match config.http_client.clone() {
            Some(client) => client,
            None => create_client_builder().build()?,
        };
        let user_agent = config
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

        let (phase, _) = watch::channel(UpdatePhase::Idle);
        let (installed, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        Ok(Self {
            client: ReleaseClient::with_client(http_client, &config.base_url, user_agent),
            public_key,
            channel: config.channel.clone(),
            platform: platform_tag(),
            executable_path: config.executable_path.clone(),
            autoupdate_interval: config.autoupdate_interval(),
            max_jitter: config.max_jitter(),
            verbose: config.verbose,
            versions: RwLock::new(Versions {
                available: config.current_version.clone(),
                installed: config.current_version.clone(),
            }),
            current_version: config.current_version,
            update_in_progress: Mutex::new(()),
            phase,
            installed,
        })
    }

    /// Override the interval between automatic checks.
    pub fn with_autoupdate_interval(mut self, interval: Duration) -> Self {
        self.autoupdate_interval = interval;
        self
    }

    /// Override the upper bound of the random delay added to each interval.
    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Version the process was started with.
    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    /// Release channel followed by this updater.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Latest version seen on the channel.
    pub fn latest_version_available(&self) -> String {
        self.read_versions().available.clone()
    }

    /// Latest version written to disk.
    pub fn latest_version_installed(&self) -> String {
        self.read_versions().installed.clone()
    }

    /// Check if the channel has a version newer than the installed one.
    pub fn update_available(&self) -> bool {
        let versions = self.read_versions();
        version::is_newer(&versions.available, &versions.installed)
    }

    /// Check if a new version was installed and the process must restart to run it.
    pub fn restart_required(&self) -> bool {
        self.read_versions().installed != self.current_version
    }

    /// Current step of the update cycle.
    pub fn phase(&self) -> UpdatePhase {
        *self.phase.borrow()
    }

    /// Watch the update cycle step.
    pub fn subscribe_phase(&self) -> watch::Receiver<UpdatePhase> {
        self.phase.subscribe()
    }

    /// Receive a notification for every installed update.
    pub fn subscribe(&self) -> broadcast::Receiver<UpdateInstalled> {
        self.installed.subscribe()
    }

    /// Fetch the channel manifest and record the latest available version.
    ///
    /// Nothing is downloaded or installed.
    pub async fn check_update(&self) -> UpdateResult<ChannelManifest> {
        let _phase = CheckPhaseGuard::enter(&self.phase);
        let result = self.client.fetch_channel_manifest(&self.channel).await;

        let manifest = result.map_err(|e| e.at(UpdatePhase::CheckingManifest))?;
        self.write_versions().available = manifest.version.clone();

        Ok(manifest)
    }

    /// Download, verify and install the release described by `manifest`.
    ///
    /// Only one update runs at a time; concurrent calls wait for the running
    /// one and then return [`UpdateOutcome::AlreadyInstalled`] if it installed
    /// the same or a newer version.
    pub async fn update(&self, manifest: &ChannelManifest) -> UpdateResult<UpdateOutcome> {
        if !version::is_valid(&manifest.version) {
            return Err(UpdateError::InvalidVersion {
                version: manifest.version.clone(),
            });
        }

        let _lock = self.update_in_progress.lock().await;

        let installed = self.latest_version_installed();
        if !version::is_newer(&manifest.version, &installed) {
            debug!(
                version = %manifest.version,
                installed = %installed,
                "Release is not newer than the installed version"
            );
            return Ok(UpdateOutcome::AlreadyInstalled { version: installed });
        }

        let phase = PhaseGuard { phase: &self.phase };
        self.download_and_install(manifest, &phase).await?;

        self.write_versions().installed = manifest.version.clone();
        let _ = self.installed.send(UpdateInstalled {
            version: manifest.version.clone(),
        });

        Ok(UpdateOutcome::Installed {
            from: installed,
            to: manifest.version.clone(),
        })
    }

    async fn download_and_install(
        &self,
        manifest: &ChannelManifest,
        phase: &PhaseGuard<'_>,
    ) -> UpdateResult<()> {
        let version = manifest.version.as_str();

        let target = match &self.executable_path {
            Some(path) => path.clone(),
            None => current_executable().map_err(|e| e.at(UpdatePhase::Installing))?,
        };
        check_write_permission(&target).map_err(|e| e.at(UpdatePhase::Installing))?;

        phase.set(UpdatePhase::FetchingSignatures);
        let signatures = self
            .client
            .fetch_signature_manifest(version)
            .await
            .map_err(|e| e.at(UpdatePhase::FetchingSignatures))?;
        let entry = select_artifact(&signatures, &self.platform)
            .map_err(|e| e.at(UpdatePhase::FetchingSignatures))?
            .clone();

        phase.set(UpdatePhase::Downloading);
        let bytes = self
            .client
            .download_artifact(version, &entry.filename)
            .await
            .map_err(|e| e.at(UpdatePhase::Downloading))?;

        phase.set(UpdatePhase::Verifying);
        let artifact = verify_artifact(&self.public_key, bytes, &entry)
            .map_err(|e| e.at(UpdatePhase::Verifying))?;

        phase.set(UpdatePhase::Extracting);
        let workspace = UpdateWorkspace::create(&manifest.name, version)
            .map_err(|e| e.at(UpdatePhase::Extracting))?;
        let staged = workspace.executable_path();
        let dest = staged.clone();
        run_blocking(move || extract_artifact(&artifact, &dest))
            .await
            .map_err(|e| e.at(UpdatePhase::Extracting))?;

        phase.set(UpdatePhase::Installing);
        debug!(target = %target.display(), version, "Replacing executable");
        run_blocking(move || install(&staged, &target))
            .await
            .map_err(|e| e.at(UpdatePhase::Installing))?;

        if let Err(e) = workspace.close() {
            debug!(error = %e, "Failed to remove update workspace");
        }

        if self.verbose {
            info!(version, "New version installed");
        }

        Ok(())
    }

    fn read_versions(&self) -> RwLockReadGuard<'_, Versions> {
        self.versions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_versions(&self) -> RwLockWriteGuard<'_, Versions> {
        self.versions.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Updater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Updater")
            .field("base_url", &self.client.base_url())
            .field("channel", &self.channel)
            .field("current_version", &self.current_version)
            .field("platform", &self.platform)
            .field("versions", &*self.read_versions())
            .finish_non_exhaustive()
    }
}

/// Publishes the update step and returns to idle when dropped.
struct PhaseGuard<'a> {
    phase: &'a watch::Sender<UpdatePhase>,
}

impl PhaseGuard<'_> {
    fn set(&self, phase: UpdatePhase) {
        self.phase.send_replace(phase);
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.phase.send_replace(UpdatePhase::Idle);
    }
}

/// Marks a manifest check in the update phase, unless an update is running.
struct CheckPhaseGuard<'a> {
    phase: &'a watch::Sender<UpdatePhase>,
    entered: bool,
}

impl<'a> CheckPhaseGuard<'a> {
    fn enter(phase: &'a watch::Sender<UpdatePhase>) -> Self {
        let entered = phase.send_if_modified(|phase| {
            if *phase == UpdatePhase::Idle {
                *phase = UpdatePhase::CheckingManifest;
                true
            } else {
                false
            }
        });
        Self { phase, entered }
    }
}

impl Drop for CheckPhaseGuard<'_> {
    fn drop(&mut self) {
        if self.entered {
            self.phase.send_if_modified(|phase| {
                if *phase == UpdatePhase::CheckingManifest {
                    *phase = UpdatePhase::Idle;
                    true
                } else {
                    false
                }
            });
        }
    }
}

/// Run filesystem work on the blocking thread pool.
async fn run_blocking<T, F>(f: F) -> UpdateResult<T>
where
    F: FnOnce() -> UpdateResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| UpdateError::Io(std::io::Error::other(format!("task join error: {e}"))))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::PrivateKey;

    fn updater(current_version: &str) -> Updater {
        let key = PrivateKey::generate().public_key();
        Updater::new(UpdateConfig::new(
            "https://downloads.example.com/myapp",
            key.to_base64(),
            current_version,
        ))
        .unwrap()
    }

    fn set_versions(updater: &Updater, available: &str, installed: &str) {
        let mut versions = updater.write_versions();
        versions.available = available.to_string();
        versions.installed = installed.to_string();
    }

    #[test]
    fn test_new_updater_starts_at_current_version() {
        let updater = updater("1.1.9");

        assert_eq!(updater.current_version(), "1.1.9");
        assert_eq!(updater.latest_version_available(), "1.1.9");
        assert_eq!(updater.latest_version_installed(), "1.1.9");
        assert_eq!(updater.channel(), "stable");
        assert_eq!(updater.phase(), UpdatePhase::Idle);
        assert!(!updater.update_available());
        assert!(!updater.restart_required());
    }

    #[test]
    fn test_new_updater_rejects_bad_config() {
        let result = Updater::new(UpdateConfig::new("https://x", "not a key", "1.0.0"));
        assert!(matches!(result, Err(UpdateError::InvalidKey { .. })));

        let result = Updater::new(UpdateConfig::new("", "key", "1.0.0"));
        assert!(matches!(result, Err(UpdateError::Config { .. })));
    }

    #[test]
    fn test_update_available_is_strict() {
        let updater = updater("1.1.9");

        set_versions(&updater, "1.2.0", "1.1.9");
        assert!(updater.update_available());

        set_versions(&updater, "1.2.0", "1.2.0");
        assert!(!updater.update_available());

        set_versions(&updater, "1.1.0", "1.2.0");
        assert!(!updater.update_available());
    }

    #[test]
    fn test_restart_required_after_install() {
        let updater = updater("1.0.0");
        set_versions(&updater, "2.0.0", "2.0.0");
        assert!(updater.restart_required());
    }

    #[test]
    fn test_update_rejects_invalid_version() {
        let updater = updater("1.0.0");
        let manifest = ChannelManifest {
            name: "myapp".to_string(),
            channel: "stable".to_string(),
            version: "next".to_string(),
        };

        let result = tokio_test::block_on(updater.update(&manifest));
        assert!(matches!(result, Err(UpdateError::InvalidVersion { .. })));
        assert_eq!(updater.phase(), UpdatePhase::Idle);
    }

    #[tokio::test]
    async fn test_update_skips_installed_version() {
        let updater = updater("2.0.0");
        let manifest = ChannelManifest {
            name: "myapp".to_string(),
            channel: "stable".to_string(),
            version: "2.0.0".to_string(),
        };

        let outcome = updater.update(&manifest).await.unwrap();
        assert_eq!(
            outcome,
            UpdateOutcome::AlreadyInstalled {
                version: "2.0.0".to_string()
            }
        );
        assert!(!updater.restart_required());
    }

    #[test]
    fn test_check_phase_guard_leaves_running_update_alone() {
        let updater = updater("1.0.0");

        {
            let _check = CheckPhaseGuard::enter(&updater.phase);
            assert_eq!(updater.phase(), UpdatePhase::CheckingManifest);
        }
        assert_eq!(updater.phase(), UpdatePhase::Idle);

        updater.phase.send_replace(UpdatePhase::Downloading);
        {
            let _check = CheckPhaseGuard::enter(&updater.phase);
            assert_eq!(updater.phase(), UpdatePhase::Downloading);
        }
        assert_eq!(updater.phase(), UpdatePhase::Downloading);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(UpdatePhase::CheckingManifest.to_string(), "checking manifest");
        assert_eq!(UpdatePhase::default(), UpdatePhase::Idle);
    }
}
