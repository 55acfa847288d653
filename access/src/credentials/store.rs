//! Credential issuance, inspection and single-use redemption.

use super::codec::{CredentialCodec, CredentialPayload, SlotPolicy};
use crate::config::CredentialConfig;
use crate::constants::token::MAX_ISSUE_ATTEMPTS;
use crate::environment::SharedClock;
use crate::error::{AccessError, Result};
use crate::providers::{CredentialRepository, KeyStore, RedeemOutcome};
use crate::state::{Credential, CredentialId, Ticket};
use std::sync::Arc;

const ENTITY: &str = "credential";

/// A credential that passed every pre-admission check, with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectedCredential {
    /// Stored row.
    pub credential: Credential,

    /// Authenticated payload.
    pub payload: CredentialPayload,
}

/// Credential lifecycle on top of a [`CredentialRepository`].
///
/// # Check order
///
/// Every read path applies the same order so the reported reason is stable:
///
/// 1. existence → [`AccessError::NotFound`]
/// 2. hard TTL, whether or not the credential was used → [`AccessError::Expired`]
/// 3. single use → [`AccessError::AlreadyUsed`]
/// 4. authenticated decryption → [`AccessError::IntegrityError`]
pub struct CredentialStore<R, K> {
    repo: R,
    codec: Arc<CredentialCodec<K>>,
    clock: SharedClock,
    config: CredentialConfig,
}

impl<R, K> CredentialStore<R, K>
where
    R: CredentialRepository,
    K: KeyStore,
{
    /// Create a credential store.
    #[must_use]
    pub const fn new(
        repo: R,
        codec: Arc<CredentialCodec<K>>,
        clock: SharedClock,
        config: CredentialConfig,
    ) -> Self {
        Self {
            repo,
            codec,
            clock,
            config,
        }
    }

    /// Issue a credential for `ticket`.
    ///
    /// # Errors
    ///
    /// - [`AccessError::KeyUnavailable`] if no credential key is available
    /// - [`AccessError::InternalError`] if token generation keeps colliding
    pub async fn issue(&self, ticket: &Ticket) -> Result<Credential> {
        self.issue_with_rotation(ticket, None).await
    }

    /// Issue a credential, stamping the current rotation slot when the
    /// festival rotates credentials.
    ///
    /// # Errors
    ///
    /// Same as [`issue`](Self::issue).
    pub async fn issue_with_rotation(
        &self,
        ticket: &Ticket,
        rotation: Option<SlotPolicy>,
    ) -> Result<Credential> {
        let now = self.clock.now();
        let payload = CredentialPayload {
            ticket_id: ticket.ticket_id,
            user_id: ticket.user_id,
            festival_id: ticket.festival_id,
            issued_at: now,
            time_slot: rotation.map(|policy| policy.slot_at(now)),
        };

        for attempt in 1..=MAX_ISSUE_ATTEMPTS {
            let sealed = self.codec.seal_payload(&payload).await?;
            let credential = Credential {
                credential_id: CredentialId::new(),
                ticket_id: ticket.ticket_id,
                public_token: sealed.token,
                ciphertext: sealed.ciphertext,
                auth_tag: sealed.auth_tag,
                nonce: sealed.nonce,
                key_id: sealed.key_id,
                issued_at: now,
                expires_at: now + self.config.validity,
                is_used: false,
                used_at: None,
                redeemed_by: None,
                redeemed_location: None,
            };

            if self.repo.insert_credential(&credential).await? {
                metrics::counter!("festival_access_credentials_issued_total").increment(1);
                tracing::info!(
                    ticket_id = %ticket.ticket_id,
                    credential_id = %credential.credential_id,
                    key_id = %credential.key_id,
                    expires_at = %credential.expires_at,
                    "Issued credential"
                );
                return Ok(credential);
            }

            tracing::warn!(
                ticket_id = %ticket.ticket_id,
                attempt,
                "Public token collision, regenerating"
            );
        }

        Err(AccessError::InternalError(format!(
            "Could not mint a unique token after {MAX_ISSUE_ATTEMPTS} attempts"
        )))
    }

    /// Run every pre-admission check on `token` without consuming it.
    ///
    /// # Errors
    ///
    /// See the check order on [`CredentialStore`]. [`AccessError::KeyUnavailable`]
    /// propagates unchanged.
    pub async fn inspect(&self, token: &str) -> Result<InspectedCredential> {
        let credential = self
            .repo
            .find_by_token(token)
            .await?
            .ok_or(AccessError::not_found(ENTITY))?;

        if credential.is_expired_at(self.clock.now()) {
            return Err(AccessError::Expired { entity: ENTITY });
        }

        if credential.is_used {
            return Err(AccessError::AlreadyUsed { entity: ENTITY });
        }

        let payload = self.codec.open_payload(&credential).await?;
        Ok(InspectedCredential {
            credential,
            payload,
        })
    }

    /// Inspect and atomically consume `token`.
    ///
    /// Of any number of concurrent calls for the same token, exactly one
    /// returns `Ok`.
    ///
    /// # Errors
    ///
    /// Same as [`inspect`](Self::inspect); a lost race is
    /// [`AccessError::AlreadyUsed`].
    pub async fn redeem_once(
        &self,
        token: &str,
        validator_id: &str,
        location: Option<&str>,
    ) -> Result<Credential> {
        self.inspect(token).await?;

        match self
            .repo
            .redeem(token, validator_id, location, self.clock.now())
            .await?
        {
            RedeemOutcome::Redeemed(credential) => {
                tracing::info!(
                    ticket_id = %credential.ticket_id,
                    validator_id = %validator_id,
                    "Credential redeemed"
                );
                Ok(credential)
            }
            RedeemOutcome::NotFound => Err(AccessError::not_found(ENTITY)),
            RedeemOutcome::Expired => Err(AccessError::Expired { entity: ENTITY }),
            RedeemOutcome::AlreadyUsed => Err(AccessError::AlreadyUsed { entity: ENTITY }),
        }
    }

    /// Re-seal an unused credential into the current rotation slot.
    ///
    /// The public token is kept; nonce, ciphertext and tag are fresh and the
    /// current credential key is used.
    ///
    /// # Errors
    ///
    /// Same as [`inspect`](Self::inspect). A credential consumed between the
    /// inspection and the write is [`AccessError::AlreadyUsed`].
    pub async fn reseal(&self, token: &str, rotation: SlotPolicy) -> Result<Credential> {
        let InspectedCredential {
            credential,
            mut payload,
        } = self.inspect(token).await?;

        let now = self.clock.now();
        payload.time_slot = Some(rotation.slot_at(now));

        let sealed = self
            .codec
            .seal_with_token(
                credential.ticket_id,
                &payload.to_bytes()?,
                credential.public_token.clone(),
            )
            .await?;

        let updated = Credential {
            ciphertext: sealed.ciphertext,
            auth_tag: sealed.auth_tag,
            nonce: sealed.nonce,
            key_id: sealed.key_id,
            ..credential
        };

        if !self.repo.update_sealed(&updated, now).await? {
            return Err(AccessError::AlreadyUsed { entity: ENTITY });
        }

        tracing::debug!(
            ticket_id = %updated.ticket_id,
            time_slot = ?payload.time_slot,
            "Re-sealed credential for current slot"
        );

        Ok(updated)
    }

    /// Delete unused credentials past their TTL.
    ///
    /// Used credentials are retained for the audit trail.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let removed = self.repo.sweep_expired(self.clock.now()).await?;

        if removed > 0 {
            metrics::counter!("festival_access_credentials_swept_total").increment(removed);
            tracing::info!(removed, "Swept expired credentials");
        }

        Ok(removed)
    }
}
