//! Data key lifecycle: lazy generation, lookup by ID, rotation.

use super::cipher::KeyMaterial;
use super::master::MasterKey;
use crate::config::KeyConfig;
use crate::environment::SharedClock;
use crate::error::{AccessError, Result};
use crate::providers::KeyStore;
use crate::state::{EncryptionKey, KeyId, KeyType};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

/// Attempts at inserting a new version before giving up on a contended rotation.
const MAX_ROTATION_ATTEMPTS: usize = 3;

/// The current key for a purpose, unwrapped.
#[derive(Debug, Clone)]
pub struct ActiveKey {
    /// Key ID to record next to ciphertexts.
    pub key_id: KeyId,

    /// Purpose.
    pub key_type: KeyType,

    /// Version within the purpose.
    pub version: i32,

    /// Unwrapped material.
    pub material: KeyMaterial,
}

#[derive(Debug, Clone)]
struct CachedActive {
    key: ActiveKey,
    fetched_at: DateTime<Utc>,
}

/// Owns the master key and the per-process view of data keys.
///
/// Material is cached by key ID forever (keys are immutable); the active
/// key per type is cached for `active_key_cache_ttl` so a rotation in
/// another process is picked up within that window.
pub struct KeyManager<K> {
    store: K,
    master: MasterKey,
    clock: SharedClock,
    active_ttl: Duration,
    material_cache: RwLock<HashMap<KeyId, KeyMaterial>>,
    active_cache: Mutex<HashMap<KeyType, CachedActive>>,
}

impl<K: KeyStore> KeyManager<K> {
    /// Create a key manager.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::KeyUnavailable`] if no master key can be
    /// resolved from `config`.
    pub fn new(store: K, config: &KeyConfig, clock: SharedClock) -> Result<Self> {
        let master = MasterKey::from_config(config)?;
        Ok(Self::with_master_key(store, master, config.active_key_cache_ttl, clock))
    }

    /// Create a key manager around an explicit master key.
    #[must_use]
    pub fn with_master_key(
        store: K,
        master: MasterKey,
        active_ttl: Duration,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            master,
            clock,
            active_ttl,
            material_cache: RwLock::new(HashMap::new()),
            active_cache: Mutex::new(HashMap::new()),
        }
    }

    /// The key new ciphertexts of `key_type` must use.
    ///
    /// Generates and persists version 1 on first use. Concurrent first use
    /// across processes settles on the single row that won the
    /// `(key_type, version)` uniqueness race.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::KeyUnavailable`] if the stored key cannot be
    /// unwrapped, or a storage error.
    pub async fn active_key(&self, key_type: KeyType) -> Result<ActiveKey> {
        let now = self.clock.now();
        if let Some(cached) = self.cached_active(key_type, now)? {
            return Ok(cached);
        }

        let key = match self.store.active_key(key_type).await? {
            Some(key) => key,
            None => self.generate_first(key_type).await?,
        };

        let active = self.activate(&key)?;
        self.cache_active(&active, now)?;
        Ok(active)
    }

    /// Material for a specific key ID, active or retired.
    ///
    /// # Errors
    ///
    /// - [`AccessError::NotFound`] if no key with this ID exists
    /// - [`AccessError::KeyUnavailable`] if the key cannot be unwrapped
    pub async fn key_by_id(&self, key_id: KeyId) -> Result<KeyMaterial> {
        {
            let cache = self
                .material_cache
                .read()
                .map_err(|e| AccessError::InternalError(format!("Key cache lock poisoned: {e}")))?;
            if let Some(material) = cache.get(&key_id) {
                return Ok(material.clone());
            }
        }

        let key = self
            .store
            .key_by_id(key_id)
            .await?
            .ok_or(AccessError::not_found("encryption key"))?;

        let material = self.master.unwrap_key(&key)?;
        self.remember(key_id, &material)?;
        Ok(material)
    }

    /// Create a new version for `key_type` and retire older ones.
    ///
    /// Retired keys stay readable through [`key_by_id`](Self::key_by_id).
    ///
    /// # Returns
    ///
    /// The new version number.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::BusinessLogicError`] if concurrent rotations
    /// keep winning the version race, or a storage error.
    pub async fn rotate(&self, key_type: KeyType) -> Result<i32> {
        for _ in 0..MAX_ROTATION_ATTEMPTS {
            let version = self.store.latest_version(key_type).await? + 1;
            let (key, material) = self.new_key(key_type, version)?;

            if !self.store.insert_key(&key).await? {
                tracing::debug!(
                    key_type = key_type.as_str(),
                    version,
                    "Lost key version race, retrying rotation"
                );
                continue;
            }

            let retired = self.store.deactivate_older(key_type, version).await?;
            self.remember(key.key_id, &material)?;
            self.cache_active(
                &ActiveKey {
                    key_id: key.key_id,
                    key_type,
                    version,
                    material,
                },
                self.clock.now(),
            )?;

            metrics::counter!(
                "festival_access_key_rotations_total",
                "key_type" => key_type.as_str()
            )
            .increment(1);

            tracing::info!(
                key_id = %key.key_id,
                key_type = key_type.as_str(),
                version,
                retired,
                "Rotated data encryption key"
            );

            return Ok(version);
        }

        Err(AccessError::BusinessLogicError(format!(
            "Concurrent rotation of {} keys did not settle",
            key_type.as_str()
        )))
    }

    async fn generate_first(&self, key_type: KeyType) -> Result<EncryptionKey> {
        let version = self.store.latest_version(key_type).await? + 1;
        let (key, material) = self.new_key(key_type, version)?;

        if self.store.insert_key(&key).await? {
            self.remember(key.key_id, &material)?;
            tracing::info!(
                key_id = %key.key_id,
                key_type = key_type.as_str(),
                version,
                "Generated data encryption key"
            );
            return Ok(key);
        }

        // Another process generated it first
        self.store.active_key(key_type).await?.ok_or_else(|| {
            AccessError::KeyUnavailable(format!(
                "No active {} key after concurrent generation",
                key_type.as_str()
            ))
        })
    }

    fn new_key(&self, key_type: KeyType, version: i32) -> Result<(EncryptionKey, KeyMaterial)> {
        let key_id = KeyId::new();
        let material = KeyMaterial::generate();
        let wrapped = self.master.wrap(key_id, key_type, version, &material)?;

        Ok((
            EncryptionKey {
                key_id,
                key_type,
                version,
                wrapped_key_material: wrapped,
                is_active: true,
                created_at: self.clock.now(),
            },
            material,
        ))
    }

    fn activate(&self, key: &EncryptionKey) -> Result<ActiveKey> {
        let cached = self
            .material_cache
            .read()
            .map_err(|e| AccessError::InternalError(format!("Key cache lock poisoned: {e}")))?
            .get(&key.key_id)
            .cloned();

        let material = match cached {
            Some(material) => material,
            None => {
                let material = self.master.unwrap_key(key)?;
                self.remember(key.key_id, &material)?;
                material
            }
        };

        Ok(ActiveKey {
            key_id: key.key_id,
            key_type: key.key_type,
            version: key.version,
            material,
        })
    }

    fn remember(&self, key_id: KeyId, material: &KeyMaterial) -> Result<()> {
        self.material_cache
            .write()
            .map_err(|e| AccessError::InternalError(format!("Key cache lock poisoned: {e}")))?
            .insert(key_id, material.clone());
        Ok(())
    }

    fn cached_active(&self, key_type: KeyType, now: DateTime<Utc>) -> Result<Option<ActiveKey>> {
        let cache = self
            .active_cache
            .lock()
            .map_err(|e| AccessError::InternalError(format!("Key cache lock poisoned: {e}")))?;

        Ok(cache
            .get(&key_type)
            .filter(|entry| entry.fetched_at + self.active_ttl > now)
            .map(|entry| entry.key.clone()))
    }

    fn cache_active(&self, key: &ActiveKey, now: DateTime<Utc>) -> Result<()> {
        self.active_cache
            .lock()
            .map_err(|e| AccessError::InternalError(format!("Key cache lock poisoned: {e}")))?
            .insert(
                key.key_type,
                CachedActive {
                    key: key.clone(),
                    fetched_at: now,
                },
            );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::mocks::{FixedClock, MockStore};
    use std::sync::Arc;

    fn manager(store: MockStore) -> KeyManager<MockStore> {
        KeyManager::new(
            store,
            &KeyConfig::with_master_secret("unit-test-master-secret-0123456789"),
            Arc::new(FixedClock::new(Utc::now())),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_first_use_generates_version_one() {
        let keys = manager(MockStore::new());

        let active = keys.active_key(KeyType::Credential).await.unwrap();
        assert_eq!(active.version, 1);

        let again = keys.active_key(KeyType::Credential).await.unwrap();
        assert_eq!(again.key_id, active.key_id);
    }

    #[tokio::test]
    async fn test_key_types_are_independent() {
        let keys = manager(MockStore::new());

        let credential = keys.active_key(KeyType::Credential).await.unwrap();
        let biometric = keys.active_key(KeyType::Biometric).await.unwrap();
        assert_ne!(credential.key_id, biometric.key_id);
        assert_ne!(credential.material, biometric.material);
    }

    #[tokio::test]
    async fn test_rotation_keeps_old_keys_readable() {
        let store = MockStore::new();
        let keys = manager(store.clone());

        let v1 = keys.active_key(KeyType::Credential).await.unwrap();
        let version = keys.rotate(KeyType::Credential).await.unwrap();
        assert_eq!(version, 2);

        let v2 = keys.active_key(KeyType::Credential).await.unwrap();
        assert_eq!(v2.version, 2);
        assert_ne!(v2.key_id, v1.key_id);

        // A fresh process (empty caches) can still read v1
        let other = manager(store);
        assert_eq!(other.key_by_id(v1.key_id).await.unwrap(), v1.material);
        assert_eq!(other.active_key(KeyType::Credential).await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_two_processes_share_first_key() {
        let store = MockStore::new();
        let a = manager(store.clone());
        let b = manager(store);

        let (ka, kb) = tokio::join!(
            a.active_key(KeyType::Biometric),
            b.active_key(KeyType::Biometric)
        );
        assert_eq!(ka.unwrap().key_id, kb.unwrap().key_id);
    }

    #[tokio::test]
    async fn test_unknown_key_is_not_found() {
        let keys = manager(MockStore::new());
        assert!(matches!(
            keys.key_by_id(KeyId::new()).await,
            Err(AccessError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_foreign_master_key_is_unavailable() {
        let store = MockStore::new();
        let ours = manager(store.clone());
        let active = ours.active_key(KeyType::Credential).await.unwrap();

        let theirs = KeyManager::new(
            store,
            &KeyConfig::with_master_secret("a-completely-different-master-secret"),
            Arc::new(FixedClock::new(Utc::now())),
        )
        .unwrap();

        assert!(matches!(
            theirs.key_by_id(active.key_id).await,
            Err(AccessError::KeyUnavailable(_))
        ));
    }
}
