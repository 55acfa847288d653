//! Biometric template store and matcher traits.

use crate::error::Result;
use crate::state::{BiometricAttempt, BiometricTemplate, BiometricType, UserId};

/// Biometric template persistence plus the attempt log.
pub trait BiometricRepository: Send + Sync {
    /// Insert a template.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::BusinessLogicError`](crate::AccessError::BusinessLogicError)
    /// if an active template of the same type exists for the user. The check
    /// and the insert must be atomic (partial unique index or mutex).
    fn insert_template(
        &self,
        template: &BiometricTemplate,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// The active template for a user and modality.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn active_template(
        &self,
        user_id: UserId,
        biometric_type: BiometricType,
    ) -> impl std::future::Future<Output = Result<Option<BiometricTemplate>>> + Send;

    /// Deactivate the active template for a user and modality.
    ///
    /// # Returns
    ///
    /// `false` if there was no active template.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn deactivate_template(
        &self,
        user_id: UserId,
        biometric_type: BiometricType,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Append a verification attempt.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn append_attempt(
        &self,
        attempt: &BiometricAttempt,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// All attempts for a user, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn attempts_for_user(
        &self,
        user_id: UserId,
    ) -> impl std::future::Future<Output = Result<Vec<BiometricAttempt>>> + Send;
}

/// Biometric matcher.
///
/// Compares a decrypted reference template with a probe sample and returns
/// a confidence in `[0, 1]`. The algorithm is deliberately pluggable.
pub trait Matcher: Send + Sync {
    /// Confidence that `probe` belongs to the owner of `reference`.
    ///
    /// # Errors
    ///
    /// Returns error if either template is malformed for this matcher.
    fn confidence(&self, reference: &[u8], probe: &[u8]) -> Result<f64>;
}
