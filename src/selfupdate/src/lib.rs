//! Selfupdate - signed self-update for running executables
//!
//! Keeps a long-running executable up to date with a release channel:
//! - Channel and signature manifests fetched over HTTP
//! - Ed25519 signature and SHA256 verification of every artifact
//! - Single-file extraction from `.tar.gz` and `.zip` archives
//! - Atomic replacement of the executable on disk
//! - Cancellable background loop with jittered checks
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use selfupdate::{UpdateConfig, Updater};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = UpdateConfig::new(
//!     "https://downloads.example.com/myapp",
//!     "<base64 public key>",
//!     env!("CARGO_PKG_VERSION"),
//! );
//! let updater = Arc::new(Updater::new(config)?);
//!
//! let mut installed = updater.subscribe();
//! let cancel = CancellationToken::new();
//! updater.spawn_autoupdate(cancel.clone());
//!
//! while let Ok(event) = installed.recv().await {
//!     println!("{} installed, restart to apply", event.version);
//! }
//! ```

mod api;
mod autoupdate;
mod config;
mod error;
mod extract;
mod install;
mod manifest;
mod release;
mod signing;
mod updater;
mod verify;
pub mod version;

pub use api::{DEFAULT_USER_AGENT, ReleaseClient, create_client_builder};
pub use autoupdate::next_delay;
pub use config::{
    DEFAULT_AUTOUPDATE_INTERVAL_SECS, DEFAULT_CHANNEL, DEFAULT_MAX_JITTER_SECS, UpdateConfig,
};
pub use error::{UpdateError, UpdateResult};
pub use extract::{ArchiveFormat, extract_artifact, extract_single_file};
pub use install::{UpdateWorkspace, check_write_permission, current_executable, install};
pub use manifest::{ChannelManifest, SIGNATURE_MANIFEST_FILENAME, SignatureManifest, SignedFile};
pub use release::{CreateReleaseInput, Release, create_release, sign_many};
pub use signing::{PrivateKey, PublicKey, generate_keypair, sha256_digest, sign};
pub use updater::{UpdateInstalled, UpdateOutcome, UpdatePhase, Updater};
pub use verify::{VerifiedArtifact, platform_tag, select_artifact, verify_artifact};
