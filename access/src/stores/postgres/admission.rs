//! Transactional admission commit and the validation audit trail.

use super::credentials::{CREDENTIAL_COLUMNS, row_to_credential};
use super::{PostgresStore, column, db_error};
use crate::error::{AccessError, Result};
use crate::providers::{AdmissionLedger, AdmissionOutcome};
use crate::state::{SessionId, TicketId, TicketStatus, ValidationId, ValidationMethod, ValidationRecord};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;

fn row_to_record(row: &PgRow) -> Result<ValidationRecord> {
    let method: Option<String> = column(row, "method")?;
    let ticket_id: Option<uuid::Uuid> = column(row, "ticket_id")?;
    let session_id: Option<uuid::Uuid> = column(row, "proximity_session_id")?;
    Ok(ValidationRecord {
        validation_id: ValidationId(column(row, "validation_id")?),
        ticket_id: ticket_id.map(TicketId),
        credential_token: column(row, "credential_token")?,
        validated_at: column(row, "validated_at")?,
        method: method.as_deref().map(ValidationMethod::parse).transpose()?,
        biometric_confidence: column(row, "biometric_confidence")?,
        proximity_session_id: session_id.map(SessionId),
        validator_id: column(row, "validator_id")?,
        location: column(row, "location")?,
        admitted: column(row, "admitted")?,
        code: column(row, "code")?,
    })
}

async fn insert_record<'e, E>(executor: E, record: &ValidationRecord) -> Result<()>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r"
        INSERT INTO validation_records
            (validation_id, ticket_id, credential_token, validated_at, method,
             biometric_confidence, proximity_session_id, validator_id, location,
             admitted, code)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ",
    )
    .bind(record.validation_id.0)
    .bind(record.ticket_id.map(|t| t.0))
    .bind(&record.credential_token)
    .bind(record.validated_at)
    .bind(record.method.map(|m| m.as_str()))
    .bind(record.biometric_confidence)
    .bind(record.proximity_session_id.map(|s| s.0))
    .bind(&record.validator_id)
    .bind(record.location.as_deref())
    .bind(record.admitted)
    .bind(&record.code)
    .execute(executor)
    .await
    .map_err(db_error("append validation record"))?;
    Ok(())
}

impl AdmissionLedger for PostgresStore {
    async fn commit_admission(
        &self,
        ticket_id: TicketId,
        record: &ValidationRecord,
    ) -> Result<AdmissionOutcome> {
        let now = record.validated_at;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("begin admission"))?;

        // Lock the credential row so concurrent scanners serialize here.
        // Early returns drop `tx`, which rolls back.
        let locked = sqlx::query(
            r"
            SELECT is_used, expires_at
            FROM ticket_credentials
            WHERE public_token = $1 AND ticket_id = $2
            FOR UPDATE
            ",
        )
        .bind(&record.credential_token)
        .bind(ticket_id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("lock credential"))?;

        let Some(locked) = locked else {
            return Ok(AdmissionOutcome::CredentialNotFound);
        };
        let is_used: bool = column(&locked, "is_used")?;
        let expires_at: DateTime<Utc> = column(&locked, "expires_at")?;
        if expires_at <= now {
            return Ok(AdmissionOutcome::CredentialExpired);
        }
        if is_used {
            return Ok(AdmissionOutcome::CredentialAlreadyUsed);
        }

        let ticket_update = sqlx::query(
            r"UPDATE tickets SET status = 'used' WHERE ticket_id = $1 AND status = 'active'",
        )
        .bind(ticket_id.0)
        .execute(&mut *tx)
        .await
        .map_err(db_error("mark ticket used"))?;

        if ticket_update.rows_affected() == 0 {
            let status: Option<String> =
                sqlx::query_scalar(r"SELECT status FROM tickets WHERE ticket_id = $1")
                    .bind(ticket_id.0)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db_error("read ticket status"))?;
            let status = status.ok_or(AccessError::not_found("ticket"))?;
            return Ok(AdmissionOutcome::TicketNotActive(TicketStatus::parse(
                &status,
            )?));
        }

        let query = format!(
            "UPDATE ticket_credentials
             SET is_used = TRUE, used_at = $2, redeemed_by = $3, redeemed_location = $4
             WHERE public_token = $1
             RETURNING {CREDENTIAL_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(&record.credential_token)
            .bind(now)
            .bind(&record.validator_id)
            .bind(record.location.as_deref())
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error("redeem credential"))?;
        let credential = row_to_credential(&row)?;

        insert_record(&mut *tx, record).await?;

        tx.commit().await.map_err(db_error("commit admission"))?;

        tracing::info!(
            ticket_id = %ticket_id,
            validator_id = %record.validator_id,
            "Admission committed"
        );
        Ok(AdmissionOutcome::Admitted(credential))
    }

    async fn record_rejection(&self, record: &ValidationRecord) -> Result<()> {
        insert_record(&self.pool, record).await
    }

    async fn records_for_ticket(&self, ticket_id: TicketId) -> Result<Vec<ValidationRecord>> {
        let rows = sqlx::query(
            r"
            SELECT validation_id, ticket_id, credential_token, validated_at, method,
                   biometric_confidence, proximity_session_id, validator_id, location,
                   admitted, code
            FROM validation_records
            WHERE ticket_id = $1
            ORDER BY validated_at ASC
            ",
        )
        .bind(ticket_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("load validation records"))?;

        rows.iter().map(row_to_record).collect()
    }
}
