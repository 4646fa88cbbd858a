//! AES-256-GCM envelope for values kept in persistent storage.
//!
//! Envelope format: `base64(nonce || ciphertext)`, with a fresh 12-byte random
//! nonce per encryption. The key is 32 random bytes and is exported as
//! standard base64 so it can live in session-scoped storage.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use thiserror::Error;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Encryption failed")]
    Encrypt,

    #[error("Decryption failed: {0}")]
    Decrypt(String),

    #[error("Invalid envelope encoding: {0}")]
    Encoding(#[from] base64::DecodeError),
}

/// Symmetric storage key.
#[derive(Clone)]
pub struct StorageKey([u8; KEY_LEN]);

impl StorageKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn export(&self) -> String {
        BASE64.encode(self.0)
    }

    pub fn import(encoded: &str) -> Result<Self, CryptoError> {
        let raw = BASE64.decode(encoded.trim())?;
        let bytes: [u8; KEY_LEN] = raw
            .try_into()
            .map_err(|v: Vec<u8>| CryptoError::InvalidKey(format!("expected {} bytes, got {}", KEY_LEN, v.len())))?;
        Ok(Self(bytes))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

// Never print key material.
impl std::fmt::Debug for StorageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StorageKey(..)")
    }
}

pub fn encrypt(plaintext: &str, key: &StorageKey) -> Result<String, CryptoError> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = key
        .cipher()
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| CryptoError::Encrypt)?;

    let mut envelope = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    envelope.extend_from_slice(&nonce_bytes);
    envelope.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(envelope))
}

pub fn decrypt(envelope: &str, key: &StorageKey) -> Result<String, CryptoError> {
    let raw = BASE64.decode(envelope.trim())?;
    if raw.len() < NONCE_LEN {
        return Err(CryptoError::Decrypt("envelope shorter than nonce".into()));
    }
    let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);

    let plaintext = key
        .cipher()
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| CryptoError::Decrypt("authentication failed".into()))?;

    String::from_utf8(plaintext).map_err(|e| CryptoError::Decrypt(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let key = StorageKey::generate();
        let envelope = encrypt("رسالة سرية", &key).unwrap();
        assert_eq!(decrypt(&envelope, &key).unwrap(), "رسالة سرية");
    }

    #[test]
    fn test_fresh_nonce_per_encryption() {
        let key = StorageKey::generate();
        let a = encrypt("same", &key).unwrap();
        let b = encrypt("same", &key).unwrap();
        assert_ne!(a, b);
        // nonce + ciphertext + 16-byte tag
        assert_eq!(BASE64.decode(&a).unwrap().len(), NONCE_LEN + 4 + 16);
    }

    #[test]
    fn test_wrong_key_fails() {
        let envelope = encrypt("value", &StorageKey::generate()).unwrap();
        assert!(matches!(
            decrypt(&envelope, &StorageKey::generate()),
            Err(CryptoError::Decrypt(_))
        ));
    }

    #[test]
    fn test_tampered_envelope_fails() {
        let key = StorageKey::generate();
        let mut raw = BASE64.decode(encrypt("value", &key).unwrap()).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        assert!(decrypt(&BASE64.encode(raw), &key).is_err());
        assert!(decrypt("AAAA", &key).is_err());
        assert!(matches!(decrypt("not base64!", &key), Err(CryptoError::Encoding(_))));
    }

    #[test]
    fn test_key_export_import() {
        let key = StorageKey::generate();
        let restored = StorageKey::import(&key.export()).unwrap();
        let envelope = encrypt("value", &key).unwrap();
        assert_eq!(decrypt(&envelope, &restored).unwrap(), "value");

        assert!(matches!(
            StorageKey::import(&BASE64.encode([0u8; 16])),
            Err(CryptoError::InvalidKey(_))
        ));
        assert_eq!(format!("{:?}", key), "StorageKey(..)");
    }
}
