//! Encryption key store trait.

use crate::error::Result;
use crate::state::{EncryptionKey, KeyId, KeyType};

/// Persistent store for wrapped data encryption keys.
///
/// # Implementation Notes
///
/// - Rows are never deleted, only deactivated
/// - `(key_type, version)` must be unique so concurrent first-use
///   generation has a single winner
pub trait KeyStore: Send + Sync {
    /// Highest-version active key for a type.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn active_key(
        &self,
        key_type: KeyType,
    ) -> impl std::future::Future<Output = Result<Option<EncryptionKey>>> + Send;

    /// Key by ID, active or not.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn key_by_id(
        &self,
        key_id: KeyId,
    ) -> impl std::future::Future<Output = Result<Option<EncryptionKey>>> + Send;

    /// Highest version ever stored for a type (`0` if none).
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn latest_version(
        &self,
        key_type: KeyType,
    ) -> impl std::future::Future<Output = Result<i32>> + Send;

    /// Insert a key.
    ///
    /// # Returns
    ///
    /// `false` if a key with the same `(key_type, version)` already exists.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn insert_key(
        &self,
        key: &EncryptionKey,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Deactivate every key of a type with `version < below_version`.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn deactivate_older(
        &self,
        key_type: KeyType,
        below_version: i32,
    ) -> impl std::future::Future<Output = Result<u64>> + Send;
}
