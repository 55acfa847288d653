//! AES-256-GCM primitives shared by key wrapping, credentials and biometrics.

use crate::constants::{KEY_LEN, NONCE_LEN, TAG_LEN};
use crate::error::{AccessError, Result};
use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use std::fmt;

/// 256-bit symmetric key material.
///
/// Never printed; `Debug` is redacted. Equality is constant-time.
#[derive(Clone)]
pub struct KeyMaterial([u8; KEY_LEN]);

impl KeyMaterial {
    /// Wrap raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Fresh random material from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::RngCore::fill_bytes(&mut OsRng, &mut bytes);
        Self(bytes)
    }

    /// Parse from a slice of exactly [`KEY_LEN`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::KeyUnavailable`] on a length mismatch.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            AccessError::KeyUnavailable(format!(
                "Key material must be {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    pub(crate) const fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl PartialEq for KeyMaterial {
    fn eq(&self, other: &Self) -> bool {
        constant_time_eq::constant_time_eq_32(&self.0, &other.0)
    }
}

impl Eq for KeyMaterial {}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial([REDACTED])")
    }
}

/// Output of [`seal`]: the tag is split off so callers may store it apart.
#[derive(Debug, Clone)]
pub(crate) struct SealedBox {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_LEN],
}

impl SealedBox {
    /// `ciphertext || tag`, the layout `aes-gcm` decrypts.
    pub fn combined(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.ciphertext.len() + TAG_LEN);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.tag);
        out
    }
}

/// Encrypt `msg` under `key` with a fresh random nonce, binding `aad`.
///
/// # Errors
///
/// Returns [`AccessError::InternalError`] if the cipher rejects the input.
pub(crate) fn seal(key: &KeyMaterial, aad: &[u8], msg: &[u8]) -> Result<SealedBox> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut combined = key
        .cipher()
        .encrypt(&nonce, Payload { msg, aad })
        .map_err(|e| AccessError::InternalError(format!("Encryption failed: {e}")))?;

    let split = combined.len().checked_sub(TAG_LEN).ok_or_else(|| {
        AccessError::InternalError("Cipher output shorter than tag".to_string())
    })?;
    let tag: [u8; TAG_LEN] = combined[split..]
        .try_into()
        .map_err(|_| AccessError::InternalError("Malformed tag".to_string()))?;
    combined.truncate(split);

    let mut nonce_bytes = [0u8; NONCE_LEN];
    nonce_bytes.copy_from_slice(nonce.as_slice());

    Ok(SealedBox {
        nonce: nonce_bytes,
        ciphertext: combined,
        tag,
    })
}

/// Decrypt `ciphertext || tag` under `key`, checking `aad`.
///
/// Every failure (wrong nonce length, truncated input, tag mismatch) maps to
/// [`AccessError::IntegrityError`]; no partial plaintext is ever returned.
///
/// # Errors
///
/// Returns [`AccessError::IntegrityError`] as described above.
pub(crate) fn open(key: &KeyMaterial, nonce: &[u8], aad: &[u8], combined: &[u8]) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_LEN || combined.len() < TAG_LEN {
        return Err(AccessError::IntegrityError);
    }

    key.cipher()
        .decrypt(Nonce::from_slice(nonce), Payload { msg: combined, aad })
        .map_err(|_| AccessError::IntegrityError)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_seal_open_round_trip() {
        let key = KeyMaterial::generate();
        let sealed = seal(&key, b"aad", b"hello gate").unwrap();

        let plain = open(&key, &sealed.nonce, b"aad", &sealed.combined()).unwrap();
        assert_eq!(plain, b"hello gate");
    }

    #[test]
    fn test_wrong_aad_fails_integrity() {
        let key = KeyMaterial::generate();
        let sealed = seal(&key, b"ticket-a", b"payload").unwrap();

        let result = open(&key, &sealed.nonce, b"ticket-b", &sealed.combined());
        assert_eq!(result, Err(AccessError::IntegrityError));
    }

    #[test]
    fn test_nonces_are_fresh() {
        let key = KeyMaterial::generate();
        let a = seal(&key, b"", b"same").unwrap();
        let b = seal(&key, b"", b"same").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_short_inputs_are_integrity_errors() {
        let key = KeyMaterial::generate();
        assert_eq!(open(&key, &[0u8; 4], b"", &[0u8; 32]), Err(AccessError::IntegrityError));
        assert_eq!(open(&key, &[0u8; NONCE_LEN], b"", &[0u8; 3]), Err(AccessError::IntegrityError));
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = KeyMaterial::from_bytes([7u8; KEY_LEN]);
        assert_eq!(format!("{key:?}"), "KeyMaterial([REDACTED])");
    }
}
