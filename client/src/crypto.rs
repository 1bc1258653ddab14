//! Document encryption and hashing.
//!
//! Documents are sealed with ChaCha20-Poly1305 under a key derived from the
//! user's passphrase with Argon2id. The salt lives next to the device's other
//! local state; the key itself is never written anywhere.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Envelope algorithm identifier.
pub const ALGORITHM: &str = "chacha20-poly1305";

/// Key size in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Salt size in bytes.
pub const SALT_SIZE: usize = 16;

/// Nonce size in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Name of the salt file inside the key directory.
pub const SALT_FILE: &str = "confsync.salt";

/// Crypto errors.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("document was sealed with key {expected}, loaded key is {actual}")]
    KeyMismatch { expected: String, actual: String },

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("key storage error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Metadata stored alongside a sealed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionEnvelope {
    pub algorithm: String,
    /// Base64 nonce
    pub iv: String,
    /// Base64 Poly1305 tag
    pub auth_tag: String,
    pub key_id: String,
}

/// Output of [`Encryptor::encrypt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub envelope: EncryptionEnvelope,
    /// Base64 ciphertext without the tag
    pub ciphertext: String,
}

/// A symmetric document key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
    key_id: String,
}

impl EncryptionKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        let digest = Sha256::digest(bytes);
        let key_id = hex::encode(&digest[..8]);
        Self { bytes, key_id }
    }

    /// Public fingerprint of the key, safe to store and log.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .field("key_id", &self.key_id)
            .finish()
    }
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_cost: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_cost: 19 * 1024,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests. Not for real passphrases.
    pub fn fast() -> Self {
        Self {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }
}

/// Seals and opens documents for the sync manager.
#[async_trait]
pub trait Encryptor: Send + Sync {
    /// Derive the document key for `passphrase`, creating any per-device
    /// material (salt) on first use.
    async fn load_or_create_key(&self, passphrase: &str) -> CryptoResult<EncryptionKey>;

    fn encrypt(&self, key: &EncryptionKey, plaintext: &[u8]) -> CryptoResult<Sealed>;

    fn decrypt(
        &self,
        key: &EncryptionKey,
        envelope: &EncryptionEnvelope,
        ciphertext: &str,
    ) -> CryptoResult<Vec<u8>>;

    /// Hex SHA-256 of `bytes`.
    fn hash(&self, bytes: &[u8]) -> String {
        sha256_hex(bytes)
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Passphrase-based [`Encryptor`] keeping its salt in `key_dir`.
#[derive(Debug, Clone)]
pub struct PassphraseEncryptor {
    key_dir: PathBuf,
    kdf: KdfParams,
}

impl PassphraseEncryptor {
    pub fn new(key_dir: impl Into<PathBuf>) -> Self {
        Self {
            key_dir: key_dir.into(),
            kdf: KdfParams::default(),
        }
    }

    pub fn with_kdf_params(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn key_dir(&self) -> &Path {
        &self.key_dir
    }

    async fn load_or_create_salt(&self) -> CryptoResult<[u8; SALT_SIZE]> {
        let path = self.key_dir.join(SALT_FILE);

        match tokio::fs::read(&path).await {
            Ok(bytes) => bytes.as_slice().try_into().map_err(|_| {
                CryptoError::KeyDerivation(format!(
                    "salt file {} has {} bytes, expected {}",
                    path.display(),
                    bytes.len(),
                    SALT_SIZE
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut salt = [0u8; SALT_SIZE];
                rand::rngs::OsRng.fill_bytes(&mut salt);
                tokio::fs::create_dir_all(&self.key_dir).await?;
                tokio::fs::write(&path, salt).await?;
                tracing::debug!(path = %path.display(), "created new key salt");
                Ok(salt)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Encryptor for PassphraseEncryptor {
    async fn load_or_create_key(&self, passphrase: &str) -> CryptoResult<EncryptionKey> {
        let salt = self.load_or_create_salt().await?;
        let passphrase = Zeroizing::new(passphrase.to_owned());
        let kdf = self.kdf;

        tokio::task::spawn_blocking(move || derive_key(&passphrase, &salt, &kdf))
            .await
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?
    }

    fn encrypt(&self, key: &EncryptionKey, plaintext: &[u8]) -> CryptoResult<Sealed> {
        let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

        let mut sealed = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;
        let tag = sealed.split_off(sealed.len() - TAG_SIZE);

        Ok(Sealed {
            envelope: EncryptionEnvelope {
                algorithm: ALGORITHM.to_string(),
                iv: STANDARD.encode(nonce_bytes),
                auth_tag: STANDARD.encode(tag),
                key_id: key.key_id().to_string(),
            },
            ciphertext: STANDARD.encode(sealed),
        })
    }

    fn decrypt(
        &self,
        key: &EncryptionKey,
        envelope: &EncryptionEnvelope,
        ciphertext: &str,
    ) -> CryptoResult<Vec<u8>> {
        if envelope.algorithm != ALGORITHM {
            return Err(CryptoError::UnsupportedAlgorithm(envelope.algorithm.clone()));
        }
        if envelope.key_id != key.key_id() {
            return Err(CryptoError::KeyMismatch {
                expected: envelope.key_id.clone(),
                actual: key.key_id().to_string(),
            });
        }

        let nonce = decode_exact::<NONCE_SIZE>(&envelope.iv, "iv")?;
        let tag = decode_exact::<TAG_SIZE>(&envelope.auth_tag, "auth tag")?;
        let mut payload = STANDARD
            .decode(ciphertext)
            .map_err(|e| CryptoError::Decryption(format!("invalid base64 ciphertext: {e}")))?;
        payload.extend_from_slice(&tag);

        let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
        cipher
            .decrypt(Nonce::from_slice(&nonce), payload.as_ref())
            .map_err(|_| {
                CryptoError::Decryption("authentication failed (wrong key or tampered data)".into())
            })
    }
}

fn derive_key(passphrase: &str, salt: &[u8; SALT_SIZE], kdf: &KdfParams) -> CryptoResult<EncryptionKey> {
    let params = argon2::Params::new(kdf.memory_cost, kdf.time_cost, kdf.parallelism, Some(KEY_SIZE))
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let argon2 = argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let mut bytes = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut bytes)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let key = EncryptionKey::from_bytes(bytes);
    bytes.zeroize();
    Ok(key)
}

fn decode_exact<const N: usize>(encoded: &str, field: &str) -> CryptoResult<[u8; N]> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| CryptoError::Decryption(format!("invalid base64 {field}: {e}")))?;
    bytes.as_slice().try_into().map_err(|_| {
        CryptoError::Decryption(format!("{field} has {} bytes, expected {N}", bytes.len()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encryptor(dir: &Path) -> PassphraseEncryptor {
        PassphraseEncryptor::new(dir).with_kdf_params(KdfParams::fast())
    }

    #[tokio::test]
    async fn seal_and_open() {
        let dir = tempfile::tempdir().unwrap();
        let enc = encryptor(dir.path());
        let key = enc.load_or_create_key("correct horse").await.unwrap();

        let sealed = enc.encrypt(&key, b"{\"a\":1}").unwrap();
        assert_eq!(sealed.envelope.algorithm, ALGORITHM);
        assert_eq!(sealed.envelope.key_id, key.key_id());
        assert_ne!(sealed.ciphertext, "{\"a\":1}");

        let opened = enc
            .decrypt(&key, &sealed.envelope, &sealed.ciphertext)
            .unwrap();
        assert_eq!(opened, b"{\"a\":1}");
    }

    #[tokio::test]
    async fn same_passphrase_same_key_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let first = encryptor(dir.path()).load_or_create_key("pw").await.unwrap();
        let second = encryptor(dir.path()).load_or_create_key("pw").await.unwrap();
        assert_eq!(first.key_id(), second.key_id());

        let other = encryptor(dir.path()).load_or_create_key("other").await.unwrap();
        assert_ne!(first.key_id(), other.key_id());
    }

    #[tokio::test]
    async fn wrong_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let enc = encryptor(dir.path());
        let key = enc.load_or_create_key("pw").await.unwrap();
        let other = enc.load_or_create_key("not-pw").await.unwrap();

        let sealed = enc.encrypt(&key, b"secret").unwrap();
        let err = enc
            .decrypt(&other, &sealed.envelope, &sealed.ciphertext)
            .unwrap_err();
        assert!(matches!(err, CryptoError::KeyMismatch { .. }));
    }

    #[tokio::test]
    async fn tampered_tag_fails_authentication() {
        let dir = tempfile::tempdir().unwrap();
        let enc = encryptor(dir.path());
        let key = enc.load_or_create_key("pw").await.unwrap();

        let mut sealed = enc.encrypt(&key, b"secret").unwrap();
        sealed.envelope.auth_tag = STANDARD.encode([0u8; TAG_SIZE]);
        let err = enc
            .decrypt(&key, &sealed.envelope, &sealed.ciphertext)
            .unwrap_err();
        assert!(matches!(err, CryptoError::Decryption(_)));
    }

    #[tokio::test]
    async fn corrupt_salt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SALT_FILE), b"short").unwrap();
        let err = encryptor(dir.path())
            .load_or_create_key("pw")
            .await
            .unwrap_err();
        assert!(matches!(err, CryptoError::KeyDerivation(_)));
    }

    #[test]
    fn key_debug_is_redacted() {
        let key = EncryptionKey::from_bytes([7u8; KEY_SIZE]);
        let debug = format!("{key:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("7, 7"));
        assert_eq!(key.key_id().len(), 16);
    }

    #[test]
    fn hash_is_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
