//! Shared fixtures for selfupdate integration tests.

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use selfupdate::{
    ChannelManifest, PrivateKey, SignatureManifest, SignedFile, UpdateConfig, Updater,
    platform_tag, sha256_digest,
};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::SimpleFileOptions;

/// A `.tar.gz` holding a single executable.
pub fn tar_gz_executable(name: &str, content: &[u8], mode: u32) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(content.len() as u64);
    header.set_mode(mode);
    builder.append_data(&mut header, name, content).unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

/// A `.zip` holding a single executable.
pub fn zip_executable(name: &str, content: &[u8]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file(name, SimpleFileOptions::default().unix_permissions(0o755))
        .unwrap();
    writer.write_all(content).unwrap();
    writer.finish().unwrap().into_inner()
}

/// Artifact file name for the platform the tests run on.
pub fn artifact_name(project: &str, extension: &str) -> String {
    format!("{}_{}.{}", project, platform_tag(), extension)
}

/// Sign `bytes` the way a release would.
pub fn signed_file(key: &PrivateKey, filename: &str, bytes: &[u8]) -> SignedFile {
    SignedFile {
        filename: filename.to_string(),
        sha256: hex::encode(sha256_digest(bytes)),
        signature: key.sign(bytes),
    }
}

/// Mock release server with a signing key.
pub struct ReleaseServer {
    pub server: MockServer,
    pub key: PrivateKey,
}

impl ReleaseServer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
            key: PrivateKey::generate(),
        }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn public_key(&self) -> String {
        self.key.public_key().to_base64()
    }

    /// Serve a channel manifest for `stable`.
    pub async fn mount_channel(&self, name: &str, version: &str) -> ChannelManifest {
        let manifest = ChannelManifest {
            name: name.to_string(),
            channel: "stable".to_string(),
            version: version.to_string(),
        };
        Mock::given(method("GET"))
            .and(path("/stable.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&manifest))
            .mount(&self.server)
            .await;
        manifest
    }

    /// Serve a signature manifest listing `files`.
    pub async fn mount_signatures(&self, version: &str, files: Vec<SignedFile>, expected_calls: u64) {
        Mock::given(method("GET"))
            .and(path(format!("/{}/signatures.json", version)))
            .respond_with(ResponseTemplate::new(200).set_body_json(SignatureManifest::new(version, files)))
            .expect(expected_calls)
            .mount(&self.server)
            .await;
    }

    /// Serve raw artifact bytes.
    pub async fn mount_artifact(&self, version: &str, filename: &str, bytes: Vec<u8>, expected_calls: u64) {
        Mock::given(method("GET"))
            .and(path(format!("/{}/{}", version, filename)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes))
            .expect(expected_calls)
            .mount(&self.server)
            .await;
    }

    /// Publish a correctly signed release of a single artifact.
    pub async fn publish(&self, name: &str, version: &str, filename: &str, bytes: Vec<u8>) -> ChannelManifest {
        let manifest = self.mount_channel(name, version).await;
        self.mount_signatures(version, vec![signed_file(&self.key, filename, &bytes)], 1)
            .await;
        self.mount_artifact(version, filename, bytes, 1).await;
        manifest
    }
}

/// Directory holding a fake installed executable.
pub struct InstalledExecutable {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl InstalledExecutable {
    pub fn new(name: &str, content: &[u8]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        Self { dir, path }
    }

    pub fn content(&self) -> Vec<u8> {
        std::fs::read(&self.path).unwrap()
    }
}

/// Updater replacing `executable` instead of the test binary.
pub fn updater(server: &ReleaseServer, current_version: &str, executable: &Path) -> Updater {
    let mut config = UpdateConfig::new(server.uri(), server.public_key(), current_version);
    config.executable_path = Some(executable.to_path_buf());
    config.verbose = true;
    Updater::new(config).unwrap()
}

/// Count leftover update workspaces of a project in the temp directory.
pub fn leftover_workspaces(project: &str) -> usize {
    let prefix = format!("{}_autoupdate_", project);
    std::fs::read_dir(std::env::temp_dir())
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
                .count()
        })
        .unwrap_or(0)
}
