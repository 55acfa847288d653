//! In-memory credential repository.

use super::MockStore;
use crate::error::Result;
use crate::providers::{CredentialRepository, RedeemOutcome};
use crate::state::Credential;
use chrono::{DateTime, Utc};

impl CredentialRepository for MockStore {
    async fn insert_credential(&self, credential: &Credential) -> Result<bool> {
        let mut tables = self.tables()?;
        if tables.credentials.contains_key(&credential.public_token) {
            return Ok(false);
        }
        tables
            .credentials
            .insert(credential.public_token.clone(), credential.clone());
        Ok(true)
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Credential>> {
        Ok(self.tables()?.credentials.get(token).cloned())
    }

    async fn redeem(
        &self,
        token: &str,
        validator_id: &str,
        location: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome> {
        let mut tables = self.tables()?;

        // Check-and-set under the mutex
        let Some(credential) = tables.credentials.get_mut(token) else {
            return Ok(RedeemOutcome::NotFound);
        };
        if credential.is_expired_at(now) {
            return Ok(RedeemOutcome::Expired);
        }
        if credential.is_used {
            return Ok(RedeemOutcome::AlreadyUsed);
        }

        credential.is_used = true;
        credential.used_at = Some(now);
        credential.redeemed_by = Some(validator_id.to_string());
        credential.redeemed_location = location.map(str::to_string);
        Ok(RedeemOutcome::Redeemed(credential.clone()))
    }

    async fn update_sealed(&self, credential: &Credential, now: DateTime<Utc>) -> Result<bool> {
        let mut tables = self.tables()?;
        match tables.credentials.get_mut(&credential.public_token) {
            Some(stored) if !stored.is_used && !stored.is_expired_at(now) => {
                stored.ciphertext.clone_from(&credential.ciphertext);
                stored.auth_tag.clone_from(&credential.auth_tag);
                stored.nonce.clone_from(&credential.nonce);
                stored.key_id = credential.key_id;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables()?;
        let before = tables.credentials.len();
        tables
            .credentials
            .retain(|_, c| c.is_used || c.expires_at >= now);
        Ok((before - tables.credentials.len()) as u64)
    }
}
