//! Background update loop.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::updater::{UpdateOutcome, Updater};

/// Delay before the next check: `interval` plus a random amount below `max_jitter`.
///
/// The jitter spreads checks from many instances started at the same time.
pub fn next_delay<R: Rng>(interval: Duration, max_jitter: Duration, rng: &mut R) -> Duration {
    let max_ms = u64::try_from(max_jitter.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return interval;
    }
    interval.saturating_add(Duration::from_millis(rng.random_range(0..max_ms)))
}

impl Updater {
    /// Periodically check for and install updates until `cancel` fires.
    ///
    /// Errors are logged and the loop keeps going. Cancellation interrupts
    /// the wait and an in-flight check, but an install that already started
    /// runs to completion.
    pub async fn run_autoupdate(&self, cancel: CancellationToken) {
        let mut rng = StdRng::from_os_rng();

        debug!(
            channel = %self.channel(),
            interval_secs = self.autoupdate_interval.as_secs(),
            "Auto-update started"
        );

        loop {
            let delay = next_delay(self.autoupdate_interval, self.max_jitter, &mut rng);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            if !self.autoupdate_once(&cancel).await {
                break;
            }
        }

        debug!("Auto-update stopped");
    }

    /// Start [`run_autoupdate`](Self::run_autoupdate) on the runtime.
    pub fn spawn_autoupdate(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let updater = Arc::clone(self);
        tokio::spawn(async move { updater.run_autoupdate(cancel).await })
    }

    /// Run one check and install cycle. Returns `false` if cancelled.
    async fn autoupdate_once(&self, cancel: &CancellationToken) -> bool {
        if self.verbose {
            info!(channel = %self.channel(), "Checking for update");
        }

        let manifest = tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            result = self.check_update() => match result {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!(error = %e, "Failed to check for update");
                    return true;
                }
            },
        };

        if !self.update_available() {
            if self.verbose {
                info!(version = %self.latest_version_installed(), "No update available");
            }
            return true;
        }

        if self.verbose {
            info!(version = %manifest.version, "New version available");
        }

        match self.update(&manifest).await {
            Ok(UpdateOutcome::Installed { from, to }) => {
                if self.verbose {
                    info!(from = %from, to = %to, "Update installed, restart required");
                }
            }
            Ok(UpdateOutcome::AlreadyInstalled { version }) => {
                debug!(version = %version, "Update already installed");
            }
            Err(e) => {
                warn!(error = %e, version = %manifest.version, "Failed to install update");
            }
        }

        true
    }
}
