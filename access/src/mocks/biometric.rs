//! In-memory biometric repository and a fixed-score matcher.

use super::MockStore;
use crate::error::{AccessError, Result};
use crate::providers::{BiometricRepository, Matcher};
use crate::state::{BiometricAttempt, BiometricTemplate, BiometricType, UserId};

impl BiometricRepository for MockStore {
    async fn insert_template(&self, template: &BiometricTemplate) -> Result<()> {
        let mut tables = self.tables()?;
        if tables.templates.iter().any(|t| {
            t.is_active && t.user_id == template.user_id && t.biometric_type == template.biometric_type
        }) {
            return Err(AccessError::BusinessLogicError(format!(
                "User already has an active {} template",
                template.biometric_type
            )));
        }
        tables.templates.push(template.clone());
        Ok(())
    }

    async fn active_template(
        &self,
        user_id: UserId,
        biometric_type: BiometricType,
    ) -> Result<Option<BiometricTemplate>> {
        Ok(self
            .tables()?
            .templates
            .iter()
            .find(|t| t.is_active && t.user_id == user_id && t.biometric_type == biometric_type)
            .cloned())
    }

    async fn deactivate_template(
        &self,
        user_id: UserId,
        biometric_type: BiometricType,
    ) -> Result<bool> {
        let mut tables = self.tables()?;
        let mut deactivated = false;
        for template in &mut tables.templates {
            if template.is_active
                && template.user_id == user_id
                && template.biometric_type == biometric_type
            {
                template.is_active = false;
                deactivated = true;
            }
        }
        Ok(deactivated)
    }

    async fn append_attempt(&self, attempt: &BiometricAttempt) -> Result<()> {
        let mut tables = self.tables()?;
        if tables.fail_attempt_log {
            return Err(AccessError::DatabaseError("attempt log unavailable".to_string()));
        }
        tables.attempts.push(attempt.clone());
        Ok(())
    }

    async fn attempts_for_user(&self, user_id: UserId) -> Result<Vec<BiometricAttempt>> {
        Ok(self
            .tables()?
            .attempts
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }
}

/// Matcher that returns the same confidence for every probe.
#[derive(Debug, Clone, Copy)]
pub struct FixedScoreMatcher {
    score: f64,
}

impl FixedScoreMatcher {
    /// Matcher always scoring `score`.
    #[must_use]
    pub const fn new(score: f64) -> Self {
        Self { score }
    }
}

impl Matcher for FixedScoreMatcher {
    fn confidence(&self, _reference: &[u8], _probe: &[u8]) -> Result<f64> {
        Ok(self.score)
    }
}
