//! In-memory key store.

use super::MockStore;
use crate::error::Result;
use crate::providers::KeyStore;
use crate::state::{EncryptionKey, KeyId, KeyType};

impl KeyStore for MockStore {
    async fn active_key(&self, key_type: KeyType) -> Result<Option<EncryptionKey>> {
        Ok(self
            .tables()?
            .keys
            .values()
            .filter(|k| k.key_type == key_type && k.is_active)
            .max_by_key(|k| k.version)
            .cloned())
    }

    async fn key_by_id(&self, key_id: KeyId) -> Result<Option<EncryptionKey>> {
        Ok(self.tables()?.keys.get(&key_id).cloned())
    }

    async fn latest_version(&self, key_type: KeyType) -> Result<i32> {
        Ok(self
            .tables()?
            .keys
            .values()
            .filter(|k| k.key_type == key_type)
            .map(|k| k.version)
            .max()
            .unwrap_or(0))
    }

    async fn insert_key(&self, key: &EncryptionKey) -> Result<bool> {
        let mut tables = self.tables()?;

        // UNIQUE (key_type, version)
        if tables
            .keys
            .values()
            .any(|k| k.key_type == key.key_type && k.version == key.version)
        {
            return Ok(false);
        }

        tables.keys.insert(key.key_id, key.clone());
        Ok(true)
    }

    async fn deactivate_older(&self, key_type: KeyType, below_version: i32) -> Result<u64> {
        let mut count = 0;
        for key in self.tables()?.keys.values_mut() {
            if key.key_type == key_type && key.version < below_version && key.is_active {
                key.is_active = false;
                count += 1;
            }
        }
        Ok(count)
    }
}
