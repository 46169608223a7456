//! Artifact selection and verification.

use crate::error::{UpdateError, UpdateResult};
use crate::manifest::{SignatureManifest, SignedFile};
use crate::signing::{PublicKey, sha256_digest};

/// Get the platform tag for the current system, e.g. `linux_amd64`.
///
/// Release artifacts carry this tag in their file name.
pub fn platform_tag() -> String {
    let os = if cfg!(target_os = "linux") {
        "linux"
    } else if cfg!(target_os = "macos") {
        "darwin"
    } else if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "freebsd") {
        "freebsd"
    } else {
        std::env::consts::OS
    };

    let arch = if cfg!(target_arch = "x86_64") {
        "amd64"
    } else if cfg!(target_arch = "aarch64") {
        "arm64"
    } else if cfg!(target_arch = "x86") {
        "386"
    } else if cfg!(target_arch = "arm") {
        "arm"
    } else {
        std::env::consts::ARCH
    };

    format!("{}_{}", os, arch)
}

/// Select the first artifact whose file name contains `platform`.
///
/// Matching is by substring: a `linux_arm` tag also matches a
/// `linux_arm64` artifact if that one is listed first.
pub fn select_artifact<'a>(
    manifest: &'a SignatureManifest,
    platform: &str,
) -> UpdateResult<&'a SignedFile> {
    manifest
        .files
        .iter()
        .find(|file| file.filename.contains(platform))
        .ok_or_else(|| UpdateError::NoArtifactForPlatform {
            platform: platform.to_string(),
        })
}

/// Artifact bytes whose signature and hash have been checked.
///
/// Only [`verify_artifact`] can build one, so code taking a
/// `VerifiedArtifact` never sees untrusted bytes.
#[derive(Debug)]
pub struct VerifiedArtifact {
    filename: String,
    bytes: Vec<u8>,
}

impl VerifiedArtifact {
    /// Artifact file name as listed in the signature manifest.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Verified content.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Verify downloaded bytes against their signature manifest entry.
///
/// The signature is checked over the digest of the bytes actually received,
/// then the digest is compared with the hash claimed by the manifest.
pub fn verify_artifact(
    public_key: &PublicKey,
    bytes: Vec<u8>,
    entry: &SignedFile,
) -> UpdateResult<VerifiedArtifact> {
    let digest = sha256_digest(&bytes);

    if !public_key.verify_digest(&digest, &entry.signature) {
        return Err(UpdateError::SignatureInvalid {
            filename: entry.filename.clone(),
        });
    }

    let actual = hex::encode(digest);
    // Normalize expected (remove any whitespace, lowercase)
    let expected = entry.sha256.trim().to_lowercase();
    if actual != expected {
        return Err(UpdateError::HashMismatch {
            filename: entry.filename.clone(),
            expected,
            actual,
        });
    }

    Ok(VerifiedArtifact {
        filename: entry.filename.clone(),
        bytes,
    })
}
