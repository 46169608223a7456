//! Release signing keys.
//!
//! Artifacts are signed with Ed25519 over their SHA256 digest. Private keys
//! never leave disk in clear text:
//! - Argon2id key derivation from the signing password
//! - AES-256-GCM encryption of the Ed25519 seed
//! - base64 encoding of `salt || nonce || ciphertext`

use std::fmt;
use std::str::FromStr;

use aes_gcm::{
    Aes256Gcm, KeyInit, Nonce,
    aead::{Aead, OsRng, rand_core::RngCore},
};
use argon2::Argon2;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{UpdateError, UpdateResult};

/// Encryption nonce size (96 bits for AES-GCM).
const NONCE_SIZE: usize = 12;

/// Salt size for key derivation.
const SALT_SIZE: usize = 16;

/// Ed25519 seed size.
const SEED_SIZE: usize = 32;

/// Compute the SHA256 digest of some content.
pub fn sha256_digest(content: &[u8]) -> [u8; 32] {
    Sha256::digest(content).into()
}

/// Public key used to verify release artifacts.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    /// Decode a base64 encoded Ed25519 public key.
    pub fn from_base64(encoded: &str) -> UpdateResult<Self> {
        let raw = STANDARD
            .decode(encoded.trim().as_bytes())
            .map_err(|e| invalid_key(format!("public key is not valid base64: {e}")))?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| invalid_key("public key must be 32 bytes"))?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| invalid_key(format!("malformed public key: {e}")))?;
        Ok(Self(key))
    }

    /// Encode the key as base64.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0.as_bytes())
    }

    /// Check `signature` against a SHA256 digest.
    pub fn verify_digest(&self, digest: &[u8; 32], signature: &[u8]) -> bool {
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        self.0.verify(digest, &signature).is_ok()
    }
}

impl FromStr for PublicKey {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base64(s)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey").field(&self.to_base64()).finish()
    }
}

/// Decrypted signing key. Zeroized on drop.
pub struct PrivateKey(SigningKey);

impl PrivateKey {
    /// Generate a new random signing key.
    pub fn generate() -> Self {
        let mut seed = Zeroizing::new([0u8; SEED_SIZE]);
        OsRng.fill_bytes(&mut seed[..]);
        Self(SigningKey::from_bytes(&seed))
    }

    /// Public half of the key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }

    /// Sign content. The signature covers the SHA256 digest of `content`.
    pub fn sign(&self, content: &[u8]) -> Vec<u8> {
        self.sign_digest(&sha256_digest(content))
    }

    /// Sign an already computed SHA256 digest.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Vec<u8> {
        self.0.sign(digest).to_bytes().to_vec()
    }

    /// Encrypt the key with a password.
    pub fn encrypt(&self, password: &SecretString) -> UpdateResult<String> {
        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let key = derive_key(password, &salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key[..])
            .map_err(|e| signing_error(format!("cipher init failed: {e}")))?;
        let seed = Zeroizing::new(self.0.to_bytes());
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), &seed[..])
            .map_err(|e| signing_error(format!("encryption failed: {e}")))?;

        let mut encoded = Vec::with_capacity(SALT_SIZE + NONCE_SIZE + ciphertext.len());
        encoded.extend_from_slice(&salt);
        encoded.extend_from_slice(&nonce);
        encoded.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(encoded))
    }

    /// Decrypt a key produced by [`PrivateKey::encrypt`].
    pub fn decrypt(encrypted: &str, password: &SecretString) -> UpdateResult<Self> {
        let raw = STANDARD
            .decode(encrypted.trim().as_bytes())
            .map_err(|e| invalid_key(format!("private key is not valid base64: {e}")))?;
        if raw.len() <= SALT_SIZE + NONCE_SIZE {
            return Err(invalid_key("private key is too short"));
        }

        let (salt, rest) = raw.split_at(SALT_SIZE);
        let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);

        let key = derive_key(password, salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key[..])
            .map_err(|e| signing_error(format!("cipher init failed: {e}")))?;
        let seed = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| signing_error("wrong password or corrupted private key"))?,
        );
        let seed: &[u8; SEED_SIZE] = seed
            .as_slice()
            .try_into()
            .map_err(|_| invalid_key("private key must be 32 bytes"))?;

        Ok(Self(SigningKey::from_bytes(seed)))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Generate a key pair, returning the public key and the password-encrypted private key.
pub fn generate_keypair(password: &SecretString) -> UpdateResult<(PublicKey, String)> {
    let private_key = PrivateKey::generate();
    let encrypted = private_key.encrypt(password)?;
    Ok((private_key.public_key(), encrypted))
}

/// Sign `content` with a password-encrypted private key.
pub fn sign(private_key: &str, password: &SecretString, content: &[u8]) -> UpdateResult<Vec<u8>> {
    Ok(PrivateKey::decrypt(private_key, password)?.sign(content))
}

/// Derive an encryption key from a password using Argon2id.
fn derive_key(password: &SecretString, salt: &[u8]) -> UpdateResult<Zeroizing<[u8; 32]>> {
    let mut key = Zeroizing::new([0u8; 32]);
    Argon2::default()
        .hash_password_into(password.expose_secret().as_bytes(), salt, &mut key[..])
        .map_err(|e| signing_error(format!("key derivation failed: {e}")))?;
    Ok(key)
}

fn invalid_key(message: impl Into<String>) -> UpdateError {
    UpdateError::InvalidKey {
        message: message.into(),
    }
}

fn signing_error(message: impl Into<String>) -> UpdateError {
    UpdateError::Signing {
        message: message.into(),
    }
}
