//! Release manifest types.

use serde::{Deserialize, Serialize};

/// File name of the per-release signature manifest.
pub const SIGNATURE_MANIFEST_FILENAME: &str = "signatures.json";

/// Latest release published on a channel, served at `{base_url}/{channel}.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelManifest {
    /// Name of the project (e.g. `myapp`)
    pub name: String,
    /// Release channel (e.g. `stable`)
    pub channel: String,
    /// Semantic version of the latest release
    pub version: String,
}

/// Hash and signature of a single release artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedFile {
    /// Artifact file name, relative to the release directory
    pub filename: String,
    /// Hex encoded SHA256 of the artifact
    pub sha256: String,
    /// Signature over the artifact's SHA256 digest
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
}

/// Signed artifacts of a release, served at `{base_url}/{version}/signatures.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureManifest {
    /// Release version the files belong to
    #[serde(default)]
    pub version: String,
    /// One entry per platform artifact
    pub files: Vec<SignedFile>,
}

impl SignatureManifest {
    /// Build a manifest from signed files.
    pub fn new(version: impl Into<String>, files: Vec<SignedFile>) -> Self {
        Self {
            version: version.into(),
            files,
        }
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_channel_manifest() {
        let json = r#"{"name":"myapp","channel":"stable","version":"1.4.2"}"#;
        let manifest: ChannelManifest = serde_json::from_str(json).unwrap();
        assert_eq!(
            manifest,
            ChannelManifest {
                name: "myapp".to_string(),
                channel: "stable".to_string(),
                version: "1.4.2".to_string(),
            }
        );
    }

    #[test]
    fn test_signature_is_base64_in_json() {
        let manifest = SignatureManifest::new(
            "1.4.2",
            vec![SignedFile {
                filename: "myapp_1.4.2_linux_amd64.tar.gz".to_string(),
                sha256: "ab".repeat(32),
                signature: vec![0xde, 0xad, 0xbe, 0xef],
            }],
        );

        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["files"][0]["signature"], "3q2+7w==");

        let parsed: SignatureManifest = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, manifest);
    }

    #[test]
    fn test_malformed_signature_is_rejected() {
        let json = r#"{"version":"1.0.0","files":[{"filename":"a","sha256":"00","signature":"not base64!"}]}"#;
        assert!(serde_json::from_str::<SignatureManifest>(json).is_err());
    }

    #[test]
    fn test_version_field_is_optional() {
        let json = r#"{"files":[]}"#;
        let manifest: SignatureManifest = serde_json::from_str(json).unwrap();
        assert!(manifest.version.is_empty());
        assert!(manifest.files.is_empty());
    }
}
