//! Credential repository trait.

use crate::error::Result;
use crate::state::Credential;
use chrono::{DateTime, Utc};

/// Result of a conditional redemption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedeemOutcome {
    /// This caller flipped `is_used`; the updated row is returned.
    Redeemed(Credential),

    /// No credential with that token.
    NotFound,

    /// Another caller redeemed first.
    AlreadyUsed,

    /// The credential's hard TTL has passed.
    Expired,
}

/// Credential persistence with single-use state tracking.
///
/// # Security Requirements
///
/// 1. **Atomicity**: `redeem()` must flip `is_used` with a single conditional
///    update (`WHERE is_used = false AND expires_at > now`)
/// 2. **Uniqueness**: `public_token` is unique
/// 3. **Retention**: used rows are never deleted
pub trait CredentialRepository: Send + Sync {
    /// Insert a freshly issued credential.
    ///
    /// # Returns
    ///
    /// `false` if the public token collides with an existing row.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn insert_credential(
        &self,
        credential: &Credential,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Look up a credential by public token.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn find_by_token(
        &self,
        token: &str,
    ) -> impl std::future::Future<Output = Result<Option<Credential>>> + Send;

    /// Atomically mark a credential as used.
    ///
    /// When the conditional update matches no row, implementations
    /// re-read the row to report why (`NotFound`, `Expired`, `AlreadyUsed`);
    /// `Expired` wins over `AlreadyUsed`.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn redeem(
        &self,
        token: &str,
        validator_id: &str,
        location: Option<&str>,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<RedeemOutcome>> + Send;

    /// Replace the sealed fields of an unused, unexpired credential.
    ///
    /// # Returns
    ///
    /// `false` if the credential is used, expired or missing.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn update_sealed(
        &self,
        credential: &Credential,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Delete unused credentials whose `expires_at < now`.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn sweep_expired(
        &self,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u64>> + Send;
}
