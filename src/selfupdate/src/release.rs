//! Release publishing.
//!
//! Builds the file tree an [`Updater`](crate::Updater) consumes:
//!
//! ```text
//! {dir}/{channel}.json
//! {dir}/{version}/signatures.json
//! {dir}/{version}/{artifact}...
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use secrecy::SecretString;

use crate::error::{UpdateError, UpdateResult};
use crate::manifest::{ChannelManifest, SIGNATURE_MANIFEST_FILENAME, SignatureManifest, SignedFile};
use crate::signing::{PrivateKey, sha256_digest};
use crate::version;

/// Parameters of a release.
#[derive(Debug)]
pub struct CreateReleaseInput {
    /// Project name, also used as the executable name on install
    pub name: String,
    /// Version being released
    pub version: String,
    /// Channel the release is published to
    pub channel: String,
    /// Artifact archives, one per platform
    pub files: Vec<PathBuf>,
    /// Encrypted private key, as produced by [`generate_keypair`](crate::generate_keypair)
    pub private_key: String,
    /// Password of the private key
    pub password: SecretString,
}

/// A signed release ready to be written out.
#[derive(Debug, Clone)]
pub struct Release {
    pub channel_manifest: ChannelManifest,
    pub signature_manifest: SignatureManifest,
    /// Artifact sources, in signature manifest order
    pub files: Vec<PathBuf>,
}

/// Sign several files, decrypting the private key once.
pub fn sign_many(
    private_key: &str,
    password: &SecretString,
    files: &[PathBuf],
) -> UpdateResult<Vec<SignedFile>> {
    let key = PrivateKey::decrypt(private_key, password)?;

    files
        .iter()
        .map(|path| {
            let content = std::fs::read(path)?;
            Ok(SignedFile {
                filename: artifact_name(path)?,
                sha256: hex::encode(sha256_digest(&content)),
                signature: key.sign(&content),
            })
        })
        .collect()
}

/// Sign the artifacts of a release and build its manifests.
pub fn create_release(input: CreateReleaseInput) -> UpdateResult<Release> {
    if !version::is_valid(&input.version) {
        return Err(UpdateError::InvalidVersion {
            version: input.version,
        });
    }
    if input.name.trim().is_empty() {
        return Err(release_error("release name is empty"));
    }
    if input.channel.trim().is_empty() {
        return Err(release_error("release channel is empty"));
    }
    if !is_plain_name(&input.channel) {
        return Err(release_error(&format!(
            "release channel must be a plain name: {}",
            input.channel
        )));
    }
    if input.files.is_empty() {
        return Err(release_error("release has no artifacts"));
    }

    let mut seen = HashSet::new();
    for path in &input.files {
        if !path.is_file() {
            return Err(release_error(&format!(
                "artifact not found: {}",
                path.display()
            )));
        }
        let name = artifact_name(path)?;
        if !seen.insert(name.clone()) {
            return Err(release_error(&format!("duplicate artifact name: {name}")));
        }
    }

    let signed = sign_many(&input.private_key, &input.password, &input.files)?;
    tracing::debug!(
        name = %input.name,
        version = %input.version,
        artifacts = signed.len(),
        "Signed release"
    );

    Ok(Release {
        channel_manifest: ChannelManifest {
            name: input.name,
            channel: input.channel,
            version: input.version.clone(),
        },
        signature_manifest: SignatureManifest::new(input.version, signed),
        files: input.files,
    })
}

impl Release {
    /// Write the manifests and copy the artifacts under `dir`.
    ///
    /// The channel manifest is written last, so a server reading `dir`
    /// never announces a version whose files are missing.
    pub fn write_to(&self, dir: &Path) -> UpdateResult<()> {
        if !is_plain_name(&self.channel_manifest.channel) {
            return Err(release_error(&format!(
                "release channel must be a plain name: {}",
                self.channel_manifest.channel
            )));
        }

        let version_dir = dir.join(&self.channel_manifest.version);
        std::fs::create_dir_all(&version_dir)?;

        for (source, entry) in self.files.iter().zip(&self.signature_manifest.files) {
            std::fs::copy(source, version_dir.join(&entry.filename))?;
        }

        let signatures = serde_json::to_vec_pretty(&self.signature_manifest)?;
        std::fs::write(version_dir.join(SIGNATURE_MANIFEST_FILENAME), signatures)?;

        let channel = serde_json::to_vec_pretty(&self.channel_manifest)?;
        std::fs::write(
            dir.join(format!("{}.json", self.channel_manifest.channel)),
            channel,
        )?;

        tracing::info!(
            dir = %dir.display(),
            channel = %self.channel_manifest.channel,
            version = %self.channel_manifest.version,
            "Release written"
        );
        Ok(())
    }
}

fn artifact_name(path: &Path) -> UpdateResult<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| release_error(&format!("invalid artifact path: {}", path.display())))
}

/// A single path component that stays inside the release directory.
fn is_plain_name(name: &str) -> bool {
    !name.contains(['/', '\\']) && name != "." && !name.contains("..")
}

fn release_error(message: &str) -> UpdateError {
    UpdateError::Config {
        message: message.to_string(),
    }
}
