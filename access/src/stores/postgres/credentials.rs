//! Sealed credentials with single-use state.

use super::{PostgresStore, column, db_error, is_unique_violation};
use crate::error::Result;
use crate::providers::{CredentialRepository, RedeemOutcome};
use crate::state::{Credential, CredentialId, KeyId, TicketId};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;

pub(super) const CREDENTIAL_COLUMNS: &str = "credential_id, ticket_id, public_token, \
     ciphertext, auth_tag, nonce, key_id, issued_at, expires_at, \
     is_used, used_at, redeemed_by, redeemed_location";

pub(super) fn row_to_credential(row: &PgRow) -> Result<Credential> {
    Ok(Credential {
        credential_id: CredentialId(column(row, "credential_id")?),
        ticket_id: TicketId(column(row, "ticket_id")?),
        public_token: column(row, "public_token")?,
        ciphertext: column(row, "ciphertext")?,
        auth_tag: column(row, "auth_tag")?,
        nonce: column(row, "nonce")?,
        key_id: KeyId(column(row, "key_id")?),
        issued_at: column(row, "issued_at")?,
        expires_at: column(row, "expires_at")?,
        is_used: column(row, "is_used")?,
        used_at: column(row, "used_at")?,
        redeemed_by: column(row, "redeemed_by")?,
        redeemed_location: column(row, "redeemed_location")?,
    })
}

impl CredentialRepository for PostgresStore {
    async fn insert_credential(&self, credential: &Credential) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO ticket_credentials
                (credential_id, ticket_id, public_token, ciphertext, auth_tag, nonce,
                 key_id, issued_at, expires_at, is_used)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, FALSE)
            ",
        )
        .bind(credential.credential_id.0)
        .bind(credential.ticket_id.0)
        .bind(&credential.public_token)
        .bind(&credential.ciphertext)
        .bind(&credential.auth_tag)
        .bind(&credential.nonce)
        .bind(credential.key_id.0)
        .bind(credential.issued_at)
        .bind(credential.expires_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) if is_unique_violation(&e) => {
                tracing::warn!(
                    ticket_id = %credential.ticket_id,
                    "Credential token collision"
                );
                Ok(false)
            }
            Err(e) => Err(db_error("insert credential")(e)),
        }
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Credential>> {
        let query =
            format!("SELECT {CREDENTIAL_COLUMNS} FROM ticket_credentials WHERE public_token = $1");
        sqlx::query(&query)
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("load credential"))?
            .as_ref()
            .map(row_to_credential)
            .transpose()
    }

    async fn redeem(
        &self,
        token: &str,
        validator_id: &str,
        location: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome> {
        let query = format!(
            "UPDATE ticket_credentials
             SET is_used = TRUE, used_at = $2, redeemed_by = $3, redeemed_location = $4
             WHERE public_token = $1 AND is_used = FALSE AND expires_at > $2
             RETURNING {CREDENTIAL_COLUMNS}"
        );
        let redeemed = sqlx::query(&query)
            .bind(token)
            .bind(now)
            .bind(validator_id)
            .bind(location)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("redeem credential"))?;

        if let Some(row) = redeemed {
            return Ok(RedeemOutcome::Redeemed(row_to_credential(&row)?));
        }

        // The conditional update matched nothing: report why
        Ok(match self.find_by_token(token).await? {
            None => RedeemOutcome::NotFound,
            Some(c) if c.is_expired_at(now) => RedeemOutcome::Expired,
            Some(_) => RedeemOutcome::AlreadyUsed,
        })
    }

    async fn update_sealed(&self, credential: &Credential, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE ticket_credentials
            SET ciphertext = $2, auth_tag = $3, nonce = $4, key_id = $5
            WHERE public_token = $1 AND is_used = FALSE AND expires_at > $6
            ",
        )
        .bind(&credential.public_token)
        .bind(&credential.ciphertext)
        .bind(&credential.auth_tag)
        .bind(&credential.nonce)
        .bind(credential.key_id.0)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error("reseal credential"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r"DELETE FROM ticket_credentials WHERE is_used = FALSE AND expires_at < $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error("sweep credentials"))?;

        Ok(result.rows_affected())
    }
}
