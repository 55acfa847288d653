//! Credential sealing and public token format.
//!
//! A credential is an AES-256-GCM ciphertext held server-side plus a short
//! public token printed in the QR code. The token carries nothing
//! decryptable; it only locates the sealed row.
//!
//! # Layout
//!
//! ```text
//! token       = PREFIX "-" TIME "-" RANDOM
//! PREFIX      = first 8 hex chars of the ticket ID, uppercase
//! TIME        = issue time as base36 unix seconds, uppercase
//! RANDOM      = 10 chars of Crockford base32
//!
//! aad         = "festival-access/credential/v1" || ticket_id || key_id
//! ```

use crate::constants::{MAX_CREDENTIAL_PAYLOAD_BYTES, MAX_ROTATION_SECS, domains, token};
use crate::environment::SharedClock;
use crate::error::{AccessError, Result};
use crate::keys::{KeyManager, cipher};
use crate::providers::KeyStore;
use crate::state::{Credential, EntryPolicy, FestivalId, KeyId, KeyType, TicketId, UserId};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Output of [`CredentialCodec::seal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedCredential {
    /// Public token.
    pub token: String,

    /// Ciphertext without tag.
    pub ciphertext: Vec<u8>,

    /// 12-byte nonce, fresh per seal.
    pub nonce: Vec<u8>,

    /// 16-byte authentication tag.
    pub auth_tag: Vec<u8>,

    /// Data key used.
    pub key_id: KeyId,
}

impl From<&Credential> for SealedCredential {
    fn from(credential: &Credential) -> Self {
        Self {
            token: credential.public_token.clone(),
            ciphertext: credential.ciphertext.clone(),
            nonce: credential.nonce.clone(),
            auth_tag: credential.auth_tag.clone(),
            key_id: credential.key_id,
        }
    }
}

/// Typed plaintext sealed inside every credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPayload {
    /// Ticket the credential admits.
    pub ticket_id: TicketId,

    /// Holder at issue time.
    pub user_id: UserId,

    /// Festival.
    pub festival_id: FestivalId,

    /// Issue timestamp.
    pub issued_at: DateTime<Utc>,

    /// Rotation slot, when the festival rotates credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_slot: Option<i64>,
}

impl CredentialPayload {
    /// Serialize to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::SerializationError`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| AccessError::SerializationError(e.to_string()))
    }

    /// Parse authenticated plaintext.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::IntegrityError`] if the plaintext is not a
    /// payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            tracing::warn!(error = %e, "Authenticated credential payload failed to parse");
            AccessError::IntegrityError
        })
    }
}

/// Time-windowed rotation: a credential is only fresh for a few slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPolicy {
    /// Slot length.
    pub interval: Duration,

    /// Slots behind the current one still accepted.
    pub grace_slots: i64,
}

impl SlotPolicy {
    /// Create a slot policy. Intervals under one second are clamped to one.
    #[must_use]
    pub fn new(interval: Duration, grace_slots: i64) -> Self {
        Self {
            interval: interval.max(Duration::seconds(1)),
            grace_slots: grace_slots.max(0),
        }
    }

    /// Rotation policy for a festival, if it rotates credentials.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::ValidationError`] if the rotation interval is
    /// longer than [`MAX_ROTATION_SECS`].
    pub fn for_entry_policy(policy: &EntryPolicy, grace_slots: i64) -> Result<Option<Self>> {
        let Some(secs) = policy.credential_rotation_secs.filter(|secs| *secs > 0) else {
            return Ok(None);
        };

        Duration::try_seconds(secs)
            .filter(|_| secs <= MAX_ROTATION_SECS)
            .map(|interval| Some(Self::new(interval, grace_slots)))
            .ok_or_else(|| {
                AccessError::ValidationError(format!(
                    "Credential rotation interval out of range: {secs}s (max {MAX_ROTATION_SECS}s)"
                ))
            })
    }

    /// Slot containing `at`.
    #[must_use]
    pub fn slot_at(&self, at: DateTime<Utc>) -> i64 {
        at.timestamp().div_euclid(self.interval.num_seconds().max(1))
    }

    /// Check a sealed slot against `now`.
    ///
    /// # Errors
    ///
    /// - [`AccessError::Expired`] when the slot is older than the grace
    ///   allows
    /// - [`AccessError::ValidationError`] when the slot is more than one
    ///   ahead of the current one
    pub fn check(&self, slot: i64, now: DateTime<Utc>) -> Result<()> {
        let current = self.slot_at(now);
        if slot < current.saturating_sub(self.grace_slots) {
            return Err(AccessError::Expired {
                entity: "credential slot",
            });
        }
        if slot > current.saturating_add(1) {
            return Err(AccessError::ValidationError(format!(
                "Credential slot {slot} is ahead of current slot {current}"
            )));
        }
        Ok(())
    }
}

/// Seals and opens credential payloads under the active credential key.
pub struct CredentialCodec<K> {
    keys: Arc<KeyManager<K>>,
    clock: SharedClock,
}

impl<K: KeyStore> CredentialCodec<K> {
    /// Create a codec.
    #[must_use]
    pub const fn new(keys: Arc<KeyManager<K>>, clock: SharedClock) -> Self {
        Self { keys, clock }
    }

    /// Seal `payload` for `ticket_id` and mint a fresh public token.
    ///
    /// # Errors
    ///
    /// - [`AccessError::ValidationError`] if the payload exceeds
    ///   [`MAX_CREDENTIAL_PAYLOAD_BYTES`]
    /// - [`AccessError::KeyUnavailable`] if no credential key can be produced
    pub async fn seal(&self, ticket_id: TicketId, payload: &[u8]) -> Result<SealedCredential> {
        let token = generate_token(ticket_id, self.clock.now());
        self.seal_with_token(ticket_id, payload, token).await
    }

    /// Seal `payload` under an existing token (rotation re-seal).
    ///
    /// # Errors
    ///
    /// Same as [`seal`](Self::seal).
    pub async fn seal_with_token(
        &self,
        ticket_id: TicketId,
        payload: &[u8],
        token: String,
    ) -> Result<SealedCredential> {
        if payload.len() > MAX_CREDENTIAL_PAYLOAD_BYTES {
            return Err(AccessError::ValidationError(format!(
                "Credential payload is {} bytes (max {MAX_CREDENTIAL_PAYLOAD_BYTES})",
                payload.len()
            )));
        }

        let key = self.keys.active_key(KeyType::Credential).await?;
        let sealed = cipher::seal(
            &key.material,
            &credential_aad(ticket_id, key.key_id),
            payload,
        )?;

        Ok(SealedCredential {
            token,
            ciphertext: sealed.ciphertext,
            nonce: sealed.nonce.to_vec(),
            auth_tag: sealed.tag.to_vec(),
            key_id: key.key_id,
        })
    }

    /// Verify and decrypt a sealed credential.
    ///
    /// The tag is verified before any byte of plaintext is exposed.
    ///
    /// # Errors
    ///
    /// - [`AccessError::IntegrityError`] on tag mismatch or any malformation
    ///   (wrong ticket, truncated nonce, swapped or unknown key ID)
    /// - [`AccessError::KeyUnavailable`] if the recorded key exists but
    ///   cannot be unwrapped
    pub async fn open(&self, sealed: &SealedCredential, ticket_id: TicketId) -> Result<Vec<u8>> {
        let material = match self.keys.key_by_id(sealed.key_id).await {
            Ok(material) => material,
            Err(AccessError::NotFound { .. }) => {
                tracing::warn!(
                    ticket_id = %ticket_id,
                    key_id = %sealed.key_id,
                    token = %sealed.token,
                    "Credential references an unknown key"
                );
                return Err(AccessError::IntegrityError);
            }
            Err(e) => return Err(e),
        };

        let mut combined = Vec::with_capacity(sealed.ciphertext.len() + sealed.auth_tag.len());
        combined.extend_from_slice(&sealed.ciphertext);
        combined.extend_from_slice(&sealed.auth_tag);

        let result = if sealed.auth_tag.len() == crate::constants::TAG_LEN {
            cipher::open(
                &material,
                &sealed.nonce,
                &credential_aad(ticket_id, sealed.key_id),
                &combined,
            )
        } else {
            Err(AccessError::IntegrityError)
        };

        if result.is_err() {
            tracing::warn!(
                ticket_id = %ticket_id,
                key_id = %sealed.key_id,
                token = %sealed.token,
                "Credential integrity check failed"
            );
        }

        result
    }

    /// Seal a typed payload.
    ///
    /// # Errors
    ///
    /// Same as [`seal`](Self::seal).
    pub async fn seal_payload(&self, payload: &CredentialPayload) -> Result<SealedCredential> {
        self.seal(payload.ticket_id, &payload.to_bytes()?).await
    }

    /// Open a stored credential row into its typed payload.
    ///
    /// A payload naming a different ticket than the row is an integrity
    /// failure.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open).
    pub async fn open_payload(&self, credential: &Credential) -> Result<CredentialPayload> {
        let plain = self
            .open(&SealedCredential::from(credential), credential.ticket_id)
            .await?;
        let payload = CredentialPayload::from_bytes(&plain)?;

        if payload.ticket_id != credential.ticket_id {
            return Err(AccessError::IntegrityError);
        }

        Ok(payload)
    }
}

fn credential_aad(ticket_id: TicketId, key_id: KeyId) -> Vec<u8> {
    let mut aad = Vec::with_capacity(domains::CREDENTIAL.len() + 32);
    aad.extend_from_slice(domains::CREDENTIAL);
    aad.extend_from_slice(ticket_id.0.as_bytes());
    aad.extend_from_slice(key_id.0.as_bytes());
    aad
}

/// Mint a public token for `ticket_id` issued at `now`.
#[must_use]
pub fn generate_token(ticket_id: TicketId, now: DateTime<Utc>) -> String {
    let prefix: String = ticket_id
        .0
        .simple()
        .to_string()
        .chars()
        .take(token::TICKET_PREFIX_LEN)
        .collect::<String>()
        .to_ascii_uppercase();

    let time = to_base36(u64::try_from(now.timestamp()).unwrap_or(0));

    let mut rng = rand::rngs::OsRng;
    let random: String = (0..token::RANDOM_LEN)
        .map(|_| char::from(token::ALPHABET[rng.gen_range(0..token::ALPHABET.len())]))
        .collect();

    format!("{prefix}-{time}-{random}")
}

/// Whether `candidate` has the shape of a public token.
///
/// Scanners call this before any lookup so garbage input never reaches
/// storage.
///
/// # Examples
///
/// ```
/// # use festival_access::credentials::codec::is_well_formed_token;
/// assert!(is_well_formed_token("1A2B3C4D-SJ0KQ8-0123456789"));
/// assert!(!is_well_formed_token("not a token"));
/// ```
#[must_use]
pub fn is_well_formed_token(candidate: &str) -> bool {
    let mut parts = candidate.split('-');
    let (Some(prefix), Some(time), Some(random), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };

    prefix.len() == token::TICKET_PREFIX_LEN
        && prefix
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
        && !time.is_empty()
        && time.len() <= 13
        && time
            .bytes()
            .all(|b| b.is_ascii_digit() || b.is_ascii_uppercase())
        && random.len() == token::RANDOM_LEN
        && random.bytes().all(|b| token::ALPHABET.contains(&b))
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    if value == 0 {
        return "0".to_string();
    }

    let mut out = Vec::new();
    while value > 0 {
        #[allow(clippy::cast_possible_truncation)]
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    out.into_iter().map(char::from).collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::config::KeyConfig;
    use crate::mocks::{FixedClock, MockStore};

    fn codec() -> CredentialCodec<MockStore> {
        let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
        let keys = KeyManager::new(
            MockStore::new(),
            &KeyConfig::with_master_secret("codec-test-master-secret-0123456789"),
            Arc::clone(&clock),
        )
        .unwrap();
        CredentialCodec::new(Arc::new(keys), clock)
    }

    #[tokio::test]
    async fn test_seal_open_round_trip() {
        let codec = codec();
        let ticket = TicketId::new();

        let sealed = codec.seal(ticket, b"{\"gate\":\"north\"}").await.unwrap();
        assert_eq!(sealed.nonce.len(), 12);
        assert_eq!(sealed.auth_tag.len(), 16);
        assert!(is_well_formed_token(&sealed.token));

        let plain = codec.open(&sealed, ticket).await.unwrap();
        assert_eq!(plain, b"{\"gate\":\"north\"}");
    }

    #[tokio::test]
    async fn test_open_under_other_ticket_fails() {
        let codec = codec();
        let sealed = codec.seal(TicketId::new(), b"payload").await.unwrap();

        let result = codec.open(&sealed, TicketId::new()).await;
        assert_eq!(result, Err(AccessError::IntegrityError));
    }

    #[tokio::test]
    async fn test_tag_and_nonce_tamper_detected() {
        let codec = codec();
        let ticket = TicketId::new();
        let sealed = codec.seal(ticket, b"payload").await.unwrap();

        let mut bad_tag = sealed.clone();
        bad_tag.auth_tag[0] ^= 0x01;
        assert_eq!(codec.open(&bad_tag, ticket).await, Err(AccessError::IntegrityError));

        let mut short_nonce = sealed.clone();
        short_nonce.nonce.pop();
        assert_eq!(codec.open(&short_nonce, ticket).await, Err(AccessError::IntegrityError));

        let mut no_tag = sealed;
        no_tag.auth_tag.clear();
        assert_eq!(codec.open(&no_tag, ticket).await, Err(AccessError::IntegrityError));
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected() {
        let codec = codec();
        let payload = vec![0u8; MAX_CREDENTIAL_PAYLOAD_BYTES + 1];

        let result = codec.seal(TicketId::new(), &payload).await;
        assert!(matches!(result, Err(AccessError::ValidationError(_))));

        let at_limit = vec![0u8; MAX_CREDENTIAL_PAYLOAD_BYTES];
        assert!(codec.seal(TicketId::new(), &at_limit).await.is_ok());
    }

    #[test]
    fn test_token_shape() {
        let ticket = TicketId::new();
        let token = generate_token(ticket, Utc::now());

        assert!(is_well_formed_token(&token));
        assert_eq!(token, token.to_ascii_uppercase());
        let prefix = ticket.0.simple().to_string()[..8].to_ascii_uppercase();
        assert!(token.starts_with(&prefix));
    }

    #[test]
    fn test_tokens_do_not_repeat() {
        let ticket = TicketId::new();
        let now = Utc::now();
        assert_ne!(generate_token(ticket, now), generate_token(ticket, now));
    }

    #[test]
    fn test_malformed_tokens() {
        assert!(!is_well_formed_token(""));
        assert!(!is_well_formed_token("1A2B3C4D-SJ0KQ8"));
        assert!(!is_well_formed_token("1a2b3c4d-SJ0KQ8-0123456789"));
        assert!(!is_well_formed_token("1A2B3C4D-SJ0KQ8-012345678U"));
        assert!(!is_well_formed_token("1A2B3C4D-SJ0KQ8-0123456789-X"));
    }

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "Z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn test_slot_policy_grace() {
        let policy = SlotPolicy::new(Duration::seconds(60), 1);
        let now = DateTime::from_timestamp(6_000, 0).unwrap();
        let current = policy.slot_at(now);

        assert!(policy.check(current, now).is_ok());
        assert!(policy.check(current - 1, now).is_ok());
        assert!(matches!(
            policy.check(current - 2, now),
            Err(AccessError::Expired { .. })
        ));
        assert!(policy.check(current + 1, now).is_ok());
        assert!(matches!(
            policy.check(current + 2, now),
            Err(AccessError::ValidationError(_))
        ));
    }

    #[test]
    fn test_slot_check_at_extremes() {
        let policy = SlotPolicy::new(Duration::seconds(1), i64::MAX);
        let now = DateTime::from_timestamp(6_000, 0).unwrap();

        assert!(policy.check(0, now).is_ok());
        assert!(matches!(
            policy.check(i64::MIN, now),
            Err(AccessError::Expired { .. })
        ));
        assert!(matches!(
            policy.check(i64::MAX, now),
            Err(AccessError::ValidationError(_))
        ));
    }

    #[test]
    fn test_rotation_policy_bounds() {
        let policy = |secs| EntryPolicy {
            credential_rotation_secs: secs,
            ..EntryPolicy::default()
        };

        assert_eq!(SlotPolicy::for_entry_policy(&policy(None), 1).unwrap(), None);
        assert_eq!(SlotPolicy::for_entry_policy(&policy(Some(0)), 1).unwrap(), None);
        assert_eq!(
            SlotPolicy::for_entry_policy(&policy(Some(60)), 1).unwrap(),
            Some(SlotPolicy::new(Duration::seconds(60), 1))
        );
        assert!(SlotPolicy::for_entry_policy(&policy(Some(MAX_ROTATION_SECS)), 1).is_ok());

        for secs in [MAX_ROTATION_SECS + 1, i64::MAX] {
            assert!(matches!(
                SlotPolicy::for_entry_policy(&policy(Some(secs)), 1),
                Err(AccessError::ValidationError(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_unknown_key_id_is_integrity_failure() {
        let codec = codec();
        let ticket = TicketId::new();
        let mut sealed = codec.seal(ticket, b"payload").await.unwrap();
        sealed.key_id = KeyId::new();

        assert_eq!(codec.open(&sealed, ticket).await, Err(AccessError::IntegrityError));
    }
}
