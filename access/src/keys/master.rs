//! Master key derivation and data-key wrapping.

use super::cipher::{self, KeyMaterial};
use crate::config::KeyConfig;
use crate::constants::{KEY_LEN, NONCE_LEN, domains};
use crate::error::{AccessError, Result};
use crate::state::{EncryptionKey, KeyId, KeyType};
use hkdf::Hkdf;
use sha2::Sha256;

/// Minimum length of the configured master secret.
pub const MIN_SECRET_LEN: usize = 32;

/// Key-encryption key. Data keys are persisted only wrapped under it.
#[derive(Debug, Clone)]
pub struct MasterKey {
    material: KeyMaterial,
    ephemeral: bool,
}

impl MasterKey {
    /// Resolve the master key from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::KeyUnavailable`] if no secret is configured and
    /// ephemeral keys are not allowed, or if the secret is too short.
    pub fn from_config(config: &KeyConfig) -> Result<Self> {
        match (&config.master_secret, config.allow_ephemeral_master_key) {
            (Some(secret), _) => Self::derive(secret.as_bytes()),
            (None, true) => {
                tracing::warn!(
                    risk = "ephemeral_master_key",
                    "No master secret configured; generated an ephemeral master key. \
                     Keys wrapped in this process cannot be unwrapped after restart"
                );
                Ok(Self::ephemeral())
            }
            (None, false) => Err(AccessError::KeyUnavailable(
                "FESTIVAL_MASTER_SECRET is not set".to_string(),
            )),
        }
    }

    /// Derive the master key from a secret with HKDF-SHA256.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::KeyUnavailable`] if the secret is shorter than
    /// [`MIN_SECRET_LEN`] bytes.
    pub fn derive(secret: &[u8]) -> Result<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(AccessError::KeyUnavailable(format!(
                "Master secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }

        let hkdf = Hkdf::<Sha256>::new(Some(domains::MASTER_KEY_SALT), secret);
        let mut okm = [0u8; KEY_LEN];
        hkdf.expand(domains::KEY_WRAP, &mut okm)
            .map_err(|_| AccessError::KeyUnavailable("HKDF expansion failed".to_string()))?;

        Ok(Self {
            material: KeyMaterial::from_bytes(okm),
            ephemeral: false,
        })
    }

    /// Random process-lifetime master key.
    #[must_use]
    pub fn ephemeral() -> Self {
        Self {
            material: KeyMaterial::generate(),
            ephemeral: true,
        }
    }

    /// Whether this key dies with the process.
    #[must_use]
    pub const fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Wrap data-key material as `nonce || ciphertext || tag`.
    pub(crate) fn wrap(
        &self,
        key_id: KeyId,
        key_type: KeyType,
        version: i32,
        material: &KeyMaterial,
    ) -> Result<Vec<u8>> {
        let aad = wrap_aad(key_id, key_type, version);
        let sealed = cipher::seal(&self.material, &aad, material.as_bytes())?;

        let mut out = Vec::with_capacity(NONCE_LEN + KEY_LEN + sealed.tag.len());
        out.extend_from_slice(&sealed.nonce);
        out.extend_from_slice(&sealed.combined());
        Ok(out)
    }

    /// Unwrap a stored data key.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::KeyUnavailable`] on any failure; corrupted or
    /// foreign-wrapped keys never yield material.
    pub(crate) fn unwrap_key(&self, key: &EncryptionKey) -> Result<KeyMaterial> {
        let wrapped = &key.wrapped_key_material;
        if wrapped.len() <= NONCE_LEN {
            return Err(AccessError::KeyUnavailable(format!(
                "Wrapped key {} is truncated",
                key.key_id
            )));
        }

        let (nonce, combined) = wrapped.split_at(NONCE_LEN);
        let aad = wrap_aad(key.key_id, key.key_type, key.version);

        let plain = cipher::open(&self.material, nonce, &aad, combined).map_err(|_| {
            tracing::error!(
                key_id = %key.key_id,
                key_type = key.key_type.as_str(),
                version = key.version,
                "Failed to unwrap data key under the configured master key"
            );
            AccessError::KeyUnavailable(format!("Cannot unwrap key {}", key.key_id))
        })?;

        KeyMaterial::from_slice(&plain)
    }
}

fn wrap_aad(key_id: KeyId, key_type: KeyType, version: i32) -> Vec<u8> {
    let mut aad = Vec::with_capacity(domains::KEY_WRAP.len() + 16 + 16 + 4);
    aad.extend_from_slice(domains::KEY_WRAP);
    aad.extend_from_slice(key_id.0.as_bytes());
    aad.extend_from_slice(key_type.as_str().as_bytes());
    aad.extend_from_slice(&version.to_be_bytes());
    aad
}
