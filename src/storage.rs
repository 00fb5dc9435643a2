//! Credential Storage Module
//!
//! Durable key -> string store shared by the foreground app logic and the
//! background location task, plus the typed [`SessionStore`] view both
//! contexts actually use. One file per key; writes go through a temp file
//! plus rename so each key is updated atomically. There are no multi-key
//! transactions: callers must tolerate one key being present while another
//! is missing or stale.

use std::path::PathBuf;
use tracing::{debug, error, info};

use crate::identity::UnitProfile;

/// Persisted key names.
pub mod keys {
    /// Bearer token from the login endpoint.
    pub const AUTH_TOKEN: &str = "authToken";
    /// Cached unit profile, JSON `{unitId, unitNickname}`.
    pub const UNIT_PROFILE: &str = "unit";
    /// Bare decimal courier id, mirrored for the background task.
    pub const COURIER_ID: &str = "courierId";
    /// Duty flag: `"1"` when on shift, absent otherwise.
    pub const ON_SHIFT: &str = "onShift";
}

/// File-backed store for credentials and session flags.
#[derive(Clone)]
pub struct CredentialStore {
    storage_path: PathBuf,
}

impl CredentialStore {
    /// Create a store rooted at the platform local-data directory.
    pub fn new() -> Self {
        let storage_path = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("CourierTracker");

        if let Err(e) = std::fs::create_dir_all(&storage_path) {
            error!("Failed to create storage directory: {}", e);
        }

        debug!("Credential store initialized at: {:?}", storage_path);

        Self { storage_path }
    }

    /// Create a store rooted at an explicit directory.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let storage_path = root.into();
        if let Err(e) = std::fs::create_dir_all(&storage_path) {
            error!("Failed to create storage directory: {}", e);
        }
        Self { storage_path }
    }

    /// Read the value for a key. Read failures are logged and reported as
    /// an absent value so callers can continue best-effort.
    pub fn get(&self, key: &str) -> Option<String> {
        let file_path = self.key_path(key);

        match std::fs::read_to_string(&file_path) {
            Ok(value) => Some(value),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                error!("Failed to read key {}: {}", key, e);
                None
            }
        }
    }

    /// Write the value for a key. Atomic per key: the value lands in a temp
    /// file first and is renamed into place.
    pub fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let file_path = self.key_path(key);
        let tmp_path = file_path.with_extension("tmp");

        std::fs::write(&tmp_path, value).map_err(|e| StorageError::Io(e.to_string()))?;
        std::fs::rename(&tmp_path, &file_path).map_err(|e| StorageError::Io(e.to_string()))?;

        debug!("Stored value for key: {}", key);
        Ok(())
    }

    /// Delete a key. No-op when the key is absent.
    pub fn delete(&self, key: &str) -> Result<(), StorageError> {
        let file_path = self.key_path(key);

        if file_path.exists() {
            std::fs::remove_file(&file_path).map_err(|e| StorageError::Io(e.to_string()))?;
            info!("Deleted stored value for key: {}", key);
        }

        Ok(())
    }

    /// Check if a key exists.
    pub fn exists(&self, key: &str) -> bool {
        self.key_path(key).exists()
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.storage_path.join(format!("{}.dat", key))
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Typed view over the session keys. Every component reads and writes
/// session state through these accessors rather than raw key strings, so a
/// schema change between the foreground and background contexts fails at
/// compile time instead of surfacing as a silently dropped sample.
#[derive(Clone)]
pub struct SessionStore {
    store: CredentialStore,
}

impl SessionStore {
    pub fn new(store: CredentialStore) -> Self {
        Self { store }
    }

    pub fn auth_token(&self) -> Option<String> {
        self.store.get(keys::AUTH_TOKEN)
    }

    pub fn set_auth_token(&self, token: &str) -> Result<(), StorageError> {
        self.store.set(keys::AUTH_TOKEN, token)
    }

    pub fn clear_auth_token(&self) -> Result<(), StorageError> {
        self.store.delete(keys::AUTH_TOKEN)
    }

    /// Cached profile, absent when missing or not well-formed.
    pub fn unit_profile(&self) -> Option<UnitProfile> {
        let raw = self.store.get(keys::UNIT_PROFILE)?;
        serde_json::from_str(&raw).ok()
    }

    pub fn set_unit_profile(&self, profile: &UnitProfile) -> Result<(), StorageError> {
        let json = serde_json::to_string(profile)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.store.set(keys::UNIT_PROFILE, &json)
    }

    pub fn clear_unit_profile(&self) -> Result<(), StorageError> {
        self.store.delete(keys::UNIT_PROFILE)
    }

    /// Mirrored bare id, the background task's fast path.
    pub fn courier_id(&self) -> Option<i64> {
        self.store.get(keys::COURIER_ID)?.parse().ok()
    }

    pub fn set_courier_id(&self, id: i64) -> Result<(), StorageError> {
        self.store.set(keys::COURIER_ID, &id.to_string())
    }

    pub fn clear_courier_id(&self) -> Result<(), StorageError> {
        self.store.delete(keys::COURIER_ID)
    }

    pub fn on_shift(&self) -> bool {
        self.store
            .get(keys::ON_SHIFT)
            .is_some_and(|flag| flag == "1")
    }

    pub fn set_on_shift(&self) -> Result<(), StorageError> {
        self.store.set(keys::ON_SHIFT, "1")
    }

    pub fn clear_on_shift(&self) -> Result<(), StorageError> {
        self.store.delete(keys::ON_SHIFT)
    }
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
