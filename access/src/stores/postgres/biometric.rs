//! Biometric templates and the attempt log.

use super::{PostgresStore, column, db_error, is_unique_violation};
use crate::error::{AccessError, Result};
use crate::providers::BiometricRepository;
use crate::state::{BiometricAttempt, BiometricId, BiometricTemplate, BiometricType, KeyId, UserId};
use sqlx::postgres::PgRow;

fn row_to_template(row: &PgRow) -> Result<BiometricTemplate> {
    let biometric_type: String = column(row, "biometric_type")?;
    Ok(BiometricTemplate {
        biometric_id: BiometricId(column(row, "biometric_id")?),
        user_id: UserId(column(row, "user_id")?),
        biometric_type: BiometricType::parse(&biometric_type)?,
        encrypted_template: column(row, "encrypted_template")?,
        nonce: column(row, "nonce")?,
        key_id: KeyId(column(row, "key_id")?),
        quality_score: column(row, "quality_score")?,
        is_active: column(row, "is_active")?,
        created_at: column(row, "created_at")?,
    })
}

fn row_to_attempt(row: &PgRow) -> Result<BiometricAttempt> {
    let biometric_type: String = column(row, "biometric_type")?;
    let biometric_id: Option<uuid::Uuid> = column(row, "biometric_id")?;
    Ok(BiometricAttempt {
        attempt_id: column(row, "attempt_id")?,
        user_id: UserId(column(row, "user_id")?),
        biometric_type: BiometricType::parse(&biometric_type)?,
        biometric_id: biometric_id.map(BiometricId),
        confidence_score: column(row, "confidence_score")?,
        verified: column(row, "verified")?,
        error: column(row, "error")?,
        attempted_at: column(row, "attempted_at")?,
    })
}

impl BiometricRepository for PostgresStore {
    async fn insert_template(&self, template: &BiometricTemplate) -> Result<()> {
        let result = sqlx::query(
            r"
            INSERT INTO biometric_templates
                (biometric_id, user_id, biometric_type, encrypted_template, nonce,
                 key_id, quality_score, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(template.biometric_id.0)
        .bind(template.user_id.0)
        .bind(template.biometric_type.as_str())
        .bind(&template.encrypted_template)
        .bind(&template.nonce)
        .bind(template.key_id.0)
        .bind(template.quality_score)
        .bind(template.is_active)
        .bind(template.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            // uq_biometric_templates_active
            Err(e) if is_unique_violation(&e) => Err(AccessError::BusinessLogicError(format!(
                "User already has an active {} template",
                template.biometric_type
            ))),
            Err(e) => Err(db_error("insert biometric template")(e)),
        }
    }

    async fn active_template(
        &self,
        user_id: UserId,
        biometric_type: BiometricType,
    ) -> Result<Option<BiometricTemplate>> {
        sqlx::query(
            r"
            SELECT biometric_id, user_id, biometric_type, encrypted_template, nonce,
                   key_id, quality_score, is_active, created_at
            FROM biometric_templates
            WHERE user_id = $1 AND biometric_type = $2 AND is_active
            ",
        )
        .bind(user_id.0)
        .bind(biometric_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("load biometric template"))?
        .as_ref()
        .map(row_to_template)
        .transpose()
    }

    async fn deactivate_template(
        &self,
        user_id: UserId,
        biometric_type: BiometricType,
    ) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE biometric_templates
            SET is_active = FALSE
            WHERE user_id = $1 AND biometric_type = $2 AND is_active
            ",
        )
        .bind(user_id.0)
        .bind(biometric_type.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error("deactivate biometric template"))?;

        Ok(result.rows_affected() > 0)
    }

    async fn append_attempt(&self, attempt: &BiometricAttempt) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO biometric_attempts
                (attempt_id, user_id, biometric_type, biometric_id, confidence_score,
                 verified, error, attempted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(attempt.attempt_id)
        .bind(attempt.user_id.0)
        .bind(attempt.biometric_type.as_str())
        .bind(attempt.biometric_id.map(|b| b.0))
        .bind(attempt.confidence_score)
        .bind(attempt.verified)
        .bind(attempt.error.as_deref())
        .bind(attempt.attempted_at)
        .execute(&self.pool)
        .await
        .map_err(db_error("append biometric attempt"))?;
        Ok(())
    }

    async fn attempts_for_user(&self, user_id: UserId) -> Result<Vec<BiometricAttempt>> {
        let rows = sqlx::query(
            r"
            SELECT attempt_id, user_id, biometric_type, biometric_id, confidence_score,
                   verified, error, attempted_at
            FROM biometric_attempts
            WHERE user_id = $1
            ORDER BY attempted_at ASC
            ",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("load biometric attempts"))?;

        rows.iter().map(row_to_attempt).collect()
    }
}
