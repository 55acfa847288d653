//! Biometric enrollment and verification.
//!
//! Reference templates are encrypted at rest under the current biometric
//! data key, bound to their owner and modality. Matching is delegated to a
//! [`Matcher`]; this module only enforces the policy around it (quality
//! floor, one active template, threshold, attempt log).

use crate::config::BiometricConfig;
use crate::constants::domains;
use crate::environment::SharedClock;
use crate::error::{AccessError, Result};
use crate::keys::{KeyManager, cipher};
use crate::providers::{BiometricRepository, KeyStore, Matcher};
use crate::state::{
    BiometricAttempt, BiometricId, BiometricTemplate, BiometricType, KeyType, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Result of a successful enrollment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentReceipt {
    /// Always `true`; failures are errors.
    pub success: bool,

    /// Stored template ID.
    pub biometric_id: BiometricId,

    /// Modality.
    pub biometric_type: BiometricType,

    /// Accepted capture quality.
    pub quality_score: f64,

    /// Enrollment timestamp.
    pub enrolled_at: DateTime<Utc>,
}

/// Result of a verification that reached the matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    /// `confidence_score >= match_threshold`.
    pub verified: bool,

    /// Matcher confidence in `[0, 1]`.
    pub confidence_score: f64,

    /// Template matched against.
    pub biometric_id: BiometricId,
}

/// Reference matcher: fraction of positions where the bytes agree.
///
/// Real deployments plug in a vendor matcher; this one makes enrollment
/// and verification usable end to end.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimilarityMatcher;

impl Matcher for SimilarityMatcher {
    fn confidence(&self, reference: &[u8], probe: &[u8]) -> Result<f64> {
        if reference.is_empty() || probe.is_empty() {
            return Err(AccessError::ValidationError(
                "Cannot match an empty template".to_string(),
            ));
        }

        let agreeing = reference
            .iter()
            .zip(probe)
            .filter(|(a, b)| a == b)
            .count();
        let longest = reference.len().max(probe.len());

        #[allow(clippy::cast_precision_loss)]
        Ok(agreeing as f64 / longest as f64)
    }
}

/// Enrolls and verifies biometric templates.
pub struct BiometricVerifier<B, K, M> {
    repo: B,
    keys: Arc<KeyManager<K>>,
    matcher: M,
    clock: SharedClock,
    config: BiometricConfig,
}

impl<B, K, M> BiometricVerifier<B, K, M>
where
    B: BiometricRepository,
    K: KeyStore,
    M: Matcher,
{
    /// Create a verifier.
    #[must_use]
    pub const fn new(
        repo: B,
        keys: Arc<KeyManager<K>>,
        matcher: M,
        clock: SharedClock,
        config: BiometricConfig,
    ) -> Self {
        Self {
            repo,
            keys,
            matcher,
            clock,
            config,
        }
    }

    /// Enroll a reference template.
    ///
    /// # Errors
    ///
    /// - [`AccessError::ValidationError`] for an unsupported modality, an
    ///   empty template, or quality below the floor
    /// - [`AccessError::BusinessLogicError`] if an active template already
    ///   exists for this user and modality
    /// - [`AccessError::KeyUnavailable`] if no biometric key is available
    pub async fn enroll(
        &self,
        user_id: UserId,
        biometric_type: BiometricType,
        template: &[u8],
        quality_score: f64,
    ) -> Result<EnrollmentReceipt> {
        if !self.config.supported_types.contains(&biometric_type) {
            return Err(AccessError::ValidationError(format!(
                "Biometric type {biometric_type} is not supported"
            )));
        }

        if template.is_empty() {
            return Err(AccessError::ValidationError(
                "Biometric template is empty".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&quality_score) || quality_score < self.config.quality_floor {
            return Err(AccessError::ValidationError(format!(
                "Template quality {quality_score} is below the required {}",
                self.config.quality_floor
            )));
        }

        let key = self.keys.active_key(KeyType::Biometric).await?;
        let sealed = cipher::seal(
            &key.material,
            &template_aad(user_id, biometric_type),
            template,
        )?;

        let now = self.clock.now();
        let stored = BiometricTemplate {
            biometric_id: BiometricId::new(),
            user_id,
            biometric_type,
            encrypted_template: sealed.combined(),
            nonce: sealed.nonce.to_vec(),
            key_id: key.key_id,
            quality_score,
            is_active: true,
            created_at: now,
        };

        self.repo.insert_template(&stored).await?;

        tracing::info!(
            user_id = %user_id,
            biometric_type = %biometric_type,
            biometric_id = %stored.biometric_id,
            quality_score,
            "Enrolled biometric template"
        );

        Ok(EnrollmentReceipt {
            success: true,
            biometric_id: stored.biometric_id,
            biometric_type,
            quality_score,
            enrolled_at: now,
        })
    }

    /// Match a probe against the user's active template.
    ///
    /// Every call appends to the attempt log, including calls that fail
    /// before matching. A failure to write the log is logged and otherwise
    /// ignored.
    ///
    /// # Errors
    ///
    /// - [`AccessError::NotFound`] if the user has no active template
    /// - [`AccessError::IntegrityError`] if the stored template fails
    ///   authentication or references an unknown key
    /// - [`AccessError::ValidationError`] if the matcher rejects the probe
    /// - [`AccessError::KeyUnavailable`] if the template key cannot be unwrapped
    pub async fn verify(
        &self,
        user_id: UserId,
        biometric_type: BiometricType,
        probe: &[u8],
    ) -> Result<VerificationOutcome> {
        let mut attempt = BiometricAttempt {
            attempt_id: uuid::Uuid::new_v4(),
            user_id,
            biometric_type,
            biometric_id: None,
            confidence_score: 0.0,
            verified: false,
            error: None,
            attempted_at: self.clock.now(),
        };

        let result = self.match_probe(&mut attempt, probe).await;

        match &result {
            Ok(outcome) => {
                attempt.confidence_score = outcome.confidence_score;
                attempt.verified = outcome.verified;
            }
            Err(e) => attempt.error = Some(e.code().to_string()),
        }

        self.record_attempt(&attempt).await;

        metrics::counter!(
            "festival_access_biometric_attempts_total",
            "verified" => if attempt.verified { "true" } else { "false" }
        )
        .increment(1);

        result
    }

    /// Deactivate the user's active template so a new one can be enrolled.
    ///
    /// # Returns
    ///
    /// `false` if there was no active template.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    pub async fn revoke(&self, user_id: UserId, biometric_type: BiometricType) -> Result<bool> {
        let revoked = self
            .repo
            .deactivate_template(user_id, biometric_type)
            .await?;

        if revoked {
            tracing::info!(
                user_id = %user_id,
                biometric_type = %biometric_type,
                "Revoked biometric template"
            );
        }

        Ok(revoked)
    }

    async fn match_probe(
        &self,
        attempt: &mut BiometricAttempt,
        probe: &[u8],
    ) -> Result<VerificationOutcome> {
        let template = self
            .repo
            .active_template(attempt.user_id, attempt.biometric_type)
            .await?
            .ok_or(AccessError::not_found("biometric template"))?;
        attempt.biometric_id = Some(template.biometric_id);

        let material = self
            .keys
            .key_by_id(template.key_id)
            .await
            .map_err(|e| match e {
                AccessError::NotFound { .. } => AccessError::IntegrityError,
                other => other,
            })?;
        let reference = cipher::open(
            &material,
            &template.nonce,
            &template_aad(attempt.user_id, attempt.biometric_type),
            &template.encrypted_template,
        )
        .inspect_err(|_| {
            tracing::error!(
                biometric_id = %template.biometric_id,
                "Stored biometric template failed authentication"
            );
        })?;

        let confidence_score = self
            .matcher
            .confidence(&reference, probe)?
            .clamp(0.0, 1.0);

        Ok(VerificationOutcome {
            verified: confidence_score >= self.config.match_threshold,
            confidence_score,
            biometric_id: template.biometric_id,
        })
    }

    async fn record_attempt(&self, attempt: &BiometricAttempt) {
        if let Err(e) = self.repo.append_attempt(attempt).await {
            tracing::warn!(
                user_id = %attempt.user_id,
                error = %e,
                "Failed to record biometric attempt"
            );
        }
    }
}

fn template_aad(user_id: UserId, biometric_type: BiometricType) -> Vec<u8> {
    let mut aad = Vec::with_capacity(domains::BIOMETRIC_TEMPLATE.len() + 16 + 12);
    aad.extend_from_slice(domains::BIOMETRIC_TEMPLATE);
    aad.extend_from_slice(user_id.0.as_bytes());
    aad.extend_from_slice(biometric_type.as_str().as_bytes());
    aad
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::config::KeyConfig;
    use crate::mocks::{FixedClock, FixedScoreMatcher, MockStore};

    fn verifier<M: Matcher>(store: &MockStore, matcher: M) -> BiometricVerifier<MockStore, MockStore, M> {
        let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
        let keys = KeyManager::new(
            store.clone(),
            &KeyConfig::with_master_secret("biometric-test-master-secret-012345"),
            Arc::clone(&clock),
        )
        .unwrap();
        BiometricVerifier::new(
            store.clone(),
            Arc::new(keys),
            matcher,
            clock,
            BiometricConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_enroll_and_verify_exact_match() {
        let store = MockStore::new();
        let verifier = verifier(&store, SimilarityMatcher);
        let user = UserId::new();

        let receipt = verifier
            .enroll(user, BiometricType::Face, b"face-vector-0001", 0.92)
            .await
            .unwrap();
        assert!(receipt.success);

        let outcome = verifier
            .verify(user, BiometricType::Face, b"face-vector-0001")
            .await
            .unwrap();
        assert!(outcome.verified);
        assert!((outcome.confidence_score - 1.0).abs() < f64::EPSILON);
        assert_eq!(outcome.biometric_id, receipt.biometric_id);
    }

    #[tokio::test]
    async fn test_template_encrypted_at_rest() {
        let store = MockStore::new();
        let verifier = verifier(&store, SimilarityMatcher);
        let user = UserId::new();
        verifier
            .enroll(user, BiometricType::Iris, b"iris-pattern-xyz", 0.8)
            .await
            .unwrap();

        let stored = store
            .active_template(user, BiometricType::Iris)
            .await
            .unwrap()
            .unwrap();
        assert!(
            !stored
                .encrypted_template
                .windows(b"iris-pattern-xyz".len())
                .any(|w| w == b"iris-pattern-xyz")
        );
    }

    #[tokio::test]
    async fn test_low_quality_rejected() {
        let store = MockStore::new();
        let verifier = verifier(&store, SimilarityMatcher);

        let result = verifier
            .enroll(UserId::new(), BiometricType::Face, b"blurry", 0.65)
            .await;
        assert!(matches!(result, Err(AccessError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_duplicate_enrollment_rejected_until_revoked() {
        let store = MockStore::new();
        let verifier = verifier(&store, SimilarityMatcher);
        let user = UserId::new();

        verifier
            .enroll(user, BiometricType::Fingerprint, b"minutiae-a", 0.9)
            .await
            .unwrap();
        let second = verifier
            .enroll(user, BiometricType::Fingerprint, b"minutiae-b", 0.9)
            .await;
        assert!(matches!(second, Err(AccessError::BusinessLogicError(_))));

        assert!(verifier.revoke(user, BiometricType::Fingerprint).await.unwrap());
        assert!(
            verifier
                .enroll(user, BiometricType::Fingerprint, b"minutiae-b", 0.9)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive() {
        let user = UserId::new();

        let store = MockStore::new();
        let at = verifier(&store, FixedScoreMatcher::new(0.85));
        at.enroll(user, BiometricType::Voice, b"voice", 0.9).await.unwrap();
        assert!(at.verify(user, BiometricType::Voice, b"probe").await.unwrap().verified);

        let store = MockStore::new();
        let below = verifier(&store, FixedScoreMatcher::new(0.84));
        below.enroll(user, BiometricType::Voice, b"voice", 0.9).await.unwrap();
        assert!(!below.verify(user, BiometricType::Voice, b"probe").await.unwrap().verified);
    }

    #[tokio::test]
    async fn test_every_attempt_logged() {
        let store = MockStore::new();
        let verifier = verifier(&store, SimilarityMatcher);
        let user = UserId::new();

        let missing = verifier.verify(user, BiometricType::Face, b"probe").await;
        assert_eq!(missing, Err(AccessError::not_found("biometric template")));

        verifier
            .enroll(user, BiometricType::Face, b"reference", 0.9)
            .await
            .unwrap();
        verifier
            .verify(user, BiometricType::Face, b"something-else")
            .await
            .unwrap();

        let attempts = store.attempts_for_user(user).await.unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].error.as_deref(), Some("NOT_FOUND"));
        assert!(attempts[0].confidence_score.abs() < f64::EPSILON);
        assert!(attempts[1].error.is_none());
        assert!(!attempts[1].verified);
    }

    #[tokio::test]
    async fn test_attempt_log_failure_does_not_mask_outcome() {
        let store = MockStore::new();
        let verifier = verifier(&store, SimilarityMatcher);
        let user = UserId::new();
        verifier
            .enroll(user, BiometricType::Face, b"reference", 0.9)
            .await
            .unwrap();

        store.fail_attempt_log(true).unwrap();
        let outcome = verifier
            .verify(user, BiometricType::Face, b"reference")
            .await
            .unwrap();
        assert!(outcome.verified);
    }

    #[test]
    fn test_similarity_matcher_partial() {
        let score = SimilarityMatcher.confidence(b"abcd", b"abxx").unwrap();
        assert!((score - 0.5).abs() < f64::EPSILON);
        assert!(SimilarityMatcher.confidence(b"", b"x").is_err());
    }
}
