//! Encrypted persistent storage with a plaintext fallback.
//!
//! Values are serialized to JSON and sealed with a session-scoped
//! [`StorageKey`] before they reach the persistent store, under
//! `_enc_<key>`. The key itself is exported into the session store under
//! `_sk`, so encrypted entries are readable for as long as the session lives.
//!
//! When no key can be had (crypto disabled, session store unwritable) or
//! sealing fails, the value is written in plaintext under the caller's key.
//! Crypto problems are logged and never surface as errors; only failures of
//! the stores themselves do.

use std::sync::{Arc, Mutex};

use mg_core::storage::{KeyValueStore, StorageError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::crypto::{self, StorageKey};

/// Session-store slot holding the exported storage key.
pub const SESSION_KEY_SLOT: &str = "_sk";

/// Prefix marking an encrypted entry in the persistent store.
pub const ENCRYPTED_PREFIX: &str = "_enc_";

pub fn encrypted_key(key: &str) -> String {
    format!("{}{}", ENCRYPTED_PREFIX, key)
}

pub struct SecureStorage {
    session: Arc<dyn KeyValueStore>,
    local: Arc<dyn KeyValueStore>,
    crypto_enabled: bool,
    key: Mutex<Option<StorageKey>>,
}

impl SecureStorage {
    pub fn new(session: Arc<dyn KeyValueStore>, local: Arc<dyn KeyValueStore>) -> Self {
        Self {
            session,
            local,
            crypto_enabled: true,
            key: Mutex::new(None),
        }
    }

    /// Storage that always uses the plaintext path, for contexts without a
    /// usable cipher.
    pub fn plaintext_only(session: Arc<dyn KeyValueStore>, local: Arc<dyn KeyValueStore>) -> Self {
        Self {
            crypto_enabled: false,
            ..Self::new(session, local)
        }
    }

    /// The session's storage key, loading or creating it on first use.
    fn storage_key(&self) -> Option<StorageKey> {
        if !self.crypto_enabled {
            return None;
        }
        let mut cached = self.key.lock().unwrap_or_else(|p| p.into_inner());
        match self.load_key(&mut cached) {
            Ok(Some(key)) => return Some(key),
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Cannot read session key, falling back to plaintext storage");
                return None;
            }
        }

        let key = StorageKey::generate();
        if let Err(e) = self.session.set(SESSION_KEY_SLOT, &key.export()) {
            warn!(error = %e, "Cannot persist session key, falling back to plaintext storage");
            return None;
        }
        info!("Generated session storage key");
        *cached = Some(key.clone());
        Some(key)
    }

    /// The session's storage key if one already exists. Never writes to the
    /// session store.
    fn existing_key(&self) -> Option<StorageKey> {
        if !self.crypto_enabled {
            return None;
        }
        let mut cached = self.key.lock().unwrap_or_else(|p| p.into_inner());
        self.load_key(&mut cached).unwrap_or_else(|e| {
            warn!(error = %e, "Cannot read session key");
            None
        })
    }

    fn load_key(&self, cached: &mut Option<StorageKey>) -> Result<Option<StorageKey>, StorageError> {
        if let Some(key) = cached.as_ref() {
            return Ok(Some(key.clone()));
        }
        let Some(exported) = self.session.get(SESSION_KEY_SLOT)? else {
            return Ok(None);
        };
        match StorageKey::import(&exported) {
            Ok(key) => {
                *cached = Some(key.clone());
                Ok(Some(key))
            }
            Err(e) => {
                warn!(error = %e, "Stored session key is unusable");
                Ok(None)
            }
        }
    }

    pub fn secure_store<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let json = serde_json::to_string(value)?;

        if let Some(storage_key) = self.storage_key() {
            match crypto::encrypt(&json, &storage_key) {
                Ok(envelope) => {
                    self.local.set(&encrypted_key(key), &envelope)?;
                    self.local.remove(key)?;
                    debug!(key = %key, "Stored encrypted value");
                    return Ok(());
                }
                Err(e) => warn!(key = %key, error = %e, "Encryption failed, storing in plaintext"),
            }
        }

        self.local.set(key, &json)?;
        self.local.remove(&encrypted_key(key))?;
        debug!(key = %key, "Stored plaintext value");
        Ok(())
    }

    /// Read a value back. Missing, undecryptable or malformed entries yield
    /// `None`.
    pub fn secure_retrieve<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let json = self
            .read_encrypted(key)
            .or_else(|| match self.local.get(key) {
                Ok(value) => value,
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to read stored value");
                    None
                }
            })?;

        match serde_json::from_str(&json) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "Stored value is not valid JSON for the requested type");
                None
            }
        }
    }

    fn read_encrypted(&self, key: &str) -> Option<String> {
        let envelope = match self.local.get(&encrypted_key(key)) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read encrypted value");
                return None;
            }
        };
        let Some(storage_key) = self.existing_key() else {
            warn!(key = %key, "Encrypted value present but no session key available");
            return None;
        };
        match crypto::decrypt(&envelope, &storage_key) {
            Ok(json) => Some(json),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to decrypt stored value");
                None
            }
        }
    }

    /// Remove both the encrypted and the plaintext entry.
    pub fn secure_remove(&self, key: &str) -> Result<(), StorageError> {
        self.local.remove(&encrypted_key(key))?;
        self.local.remove(key)?;
        Ok(())
    }
}

impl std::fmt::Debug for SecureStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureStorage")
            .field("crypto_enabled", &self.crypto_enabled)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mg_core::storage::{FileStore, MemoryStore};
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Preferences {
        language: String,
        favourite_shops: Vec<String>,
        visits: u32,
    }

    fn prefs() -> Preferences {
        Preferences {
            language: "ar".into(),
            favourite_shops: vec!["مقهى".into(), "Zara".into()],
            visits: 4,
        }
    }

    fn stores() -> (Arc<MemoryStore>, Arc<MemoryStore>) {
        (Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_encrypted_round_trip() {
        let (session, local) = stores();
        let storage = SecureStorage::new(session.clone(), local.clone());

        storage.secure_store("prefs", &prefs()).unwrap();

        assert_eq!(local.keys().unwrap(), vec!["_enc_prefs".to_string()]);
        let envelope = local.get("_enc_prefs").unwrap().unwrap();
        assert!(!envelope.contains("Zara"));
        assert!(session.get(SESSION_KEY_SLOT).unwrap().is_some());
        assert_eq!(storage.secure_retrieve::<Preferences>("prefs"), Some(prefs()));
    }

    #[test]
    fn test_plaintext_fallback_round_trip() {
        let (session, local) = stores();
        let storage = SecureStorage::plaintext_only(session.clone(), local.clone());

        storage.secure_store("prefs", &prefs()).unwrap();

        assert_eq!(local.keys().unwrap(), vec!["prefs".to_string()]);
        assert!(session.get(SESSION_KEY_SLOT).unwrap().is_none());
        assert_eq!(storage.secure_retrieve::<Preferences>("prefs"), Some(prefs()));
    }

    #[test]
    fn test_key_shared_across_instances_in_session() {
        let (session, local) = stores();
        SecureStorage::new(session.clone(), local.clone())
            .secure_store("prefs", &prefs())
            .unwrap();

        let reopened = SecureStorage::new(session, local);
        assert_eq!(reopened.secure_retrieve::<Preferences>("prefs"), Some(prefs()));
    }

    #[test]
    fn test_new_session_cannot_read_old_envelope() {
        let (_, local) = stores();
        SecureStorage::new(Arc::new(MemoryStore::new()), local.clone())
            .secure_store("prefs", &prefs())
            .unwrap();

        let fresh_session = Arc::new(MemoryStore::new());
        let later = SecureStorage::new(fresh_session.clone(), local);
        assert_eq!(later.secure_retrieve::<Preferences>("prefs"), None);
        assert!(fresh_session.keys().unwrap().is_empty());
    }

    #[test]
    fn test_retrieve_does_not_create_session_key() {
        let (session, local) = stores();
        local.set("visits", "3").unwrap();
        let storage = SecureStorage::new(session.clone(), local);

        assert_eq!(storage.secure_retrieve::<u32>("visits"), Some(3));
        assert_eq!(storage.secure_retrieve::<u32>("absent"), None);
        assert_eq!(session.get(SESSION_KEY_SLOT).unwrap(), None);
    }

    #[test]
    fn test_switching_modes_clears_stale_entry() {
        let (session, local) = stores();
        SecureStorage::plaintext_only(session.clone(), local.clone())
            .secure_store("visits", &1u32)
            .unwrap();
        SecureStorage::new(session.clone(), local.clone())
            .secure_store("visits", &2u32)
            .unwrap();
        assert_eq!(local.keys().unwrap(), vec!["_enc_visits".to_string()]);

        SecureStorage::plaintext_only(session, local.clone())
            .secure_store("visits", &3u32)
            .unwrap();
        assert_eq!(local.keys().unwrap(), vec!["visits".to_string()]);
    }

    #[test]
    fn test_corrupt_session_key_is_replaced() {
        let (session, local) = stores();
        session.set(SESSION_KEY_SLOT, "garbage").unwrap();
        let storage = SecureStorage::new(session.clone(), local);
        storage.secure_store("n", &7u32).unwrap();
        assert_ne!(session.get(SESSION_KEY_SLOT).unwrap().as_deref(), Some("garbage"));
        assert_eq!(storage.secure_retrieve::<u32>("n"), Some(7));
    }

    #[test]
    fn test_remove_and_missing() {
        let (session, local) = stores();
        let storage = SecureStorage::new(session, local.clone());
        assert_eq!(storage.secure_retrieve::<u32>("absent"), None);

        storage.secure_store("n", &1u32).unwrap();
        local.set("n", "1").unwrap();
        storage.secure_remove("n").unwrap();
        assert!(local.keys().unwrap().is_empty());
    }

    #[test]
    fn test_wrong_type_yields_none() {
        let (session, local) = stores();
        let storage = SecureStorage::new(session, local);
        storage.secure_store("prefs", &prefs()).unwrap();
        assert_eq!(storage.secure_retrieve::<u32>("prefs"), None);
    }

    #[test]
    fn test_file_backed_local_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("local.json");
        let session = Arc::new(MemoryStore::new());

        let storage = SecureStorage::new(session.clone(), Arc::new(FileStore::open(&path).unwrap()));
        storage.secure_store("prefs", &prefs()).unwrap();

        let reopened = SecureStorage::new(session, Arc::new(FileStore::open(&path).unwrap()));
        assert_eq!(reopened.secure_retrieve::<Preferences>("prefs"), Some(prefs()));
    }
}
