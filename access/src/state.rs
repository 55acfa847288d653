//! Domain types for tickets, credentials, proximity sessions and biometrics.
//!
//! All types are `Clone` and serializable so they can cross the storage
//! and HTTP boundaries unchanged.

use crate::error::{AccessError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ═══════════════════════════════════════════════════════════════════════
// ID Types
// ═══════════════════════════════════════════════════════════════════════

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub uuid::Uuid);

        impl $name {
            /// Generate a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a ticket.
    TicketId
);
uuid_id!(
    /// Unique identifier for a user (ticket holder).
    UserId
);
uuid_id!(
    /// Unique identifier for a festival.
    FestivalId
);
uuid_id!(
    /// Unique identifier for an issued credential row.
    CredentialId
);
uuid_id!(
    /// Unique identifier for a proximity session.
    SessionId
);
uuid_id!(
    /// Unique identifier for a BLE beacon.
    BeaconId
);
uuid_id!(
    /// Unique identifier for a data encryption key version.
    KeyId
);
uuid_id!(
    /// Unique identifier for an enrolled biometric template.
    BiometricId
);
uuid_id!(
    /// Unique identifier for a validation record.
    ValidationId
);

/// Device identifier as reported by the holder's phone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    /// Wrap a device identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Keys
// ═══════════════════════════════════════════════════════════════════════

/// Purpose of a data encryption key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    /// Seals ticket credentials.
    Credential,

    /// Encrypts biometric templates at rest.
    Biometric,
}

impl KeyType {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Credential => "credential",
            Self::Biometric => "biometric",
        }
    }

    /// Parse from the database string representation.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::SerializationError`] for unknown values.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "credential" => Ok(Self::Credential),
            "biometric" => Ok(Self::Biometric),
            _ => Err(AccessError::SerializationError(format!("Invalid key type: {s}"))),
        }
    }
}

/// Stored data encryption key. Material is always wrapped under the master key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionKey {
    /// Key ID (recorded next to every ciphertext).
    pub key_id: KeyId,

    /// Key purpose.
    pub key_type: KeyType,

    /// Monotonic version within the key type.
    pub version: i32,

    /// `nonce(12) || AES-256-GCM(master, material) || tag(16)`.
    pub wrapped_key_material: Vec<u8>,

    /// Only active keys are candidates for new encryptions.
    pub is_active: bool,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════
// Tickets & Festivals
// ═══════════════════════════════════════════════════════════════════════

/// Ticket status.
///
/// `Active` may move to `Used` or `Cancelled`; both are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    /// Admissible.
    Active,

    /// Redeemed at entry.
    Used,

    /// Cancelled (refund, fraud, admin action).
    Cancelled,
}

impl TicketStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Used => "used",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse from the database string representation.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::SerializationError`] for unknown values.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "used" => Ok(Self::Used),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(AccessError::SerializationError(format!("Invalid ticket status: {s}"))),
        }
    }

    /// Whether `self -> next` is a permitted transition.
    ///
    /// # Examples
    ///
    /// ```
    /// # use festival_access::state::TicketStatus;
    /// assert!(TicketStatus::Active.can_transition_to(TicketStatus::Used));
    /// assert!(TicketStatus::Active.can_transition_to(TicketStatus::Active));
    /// assert!(!TicketStatus::Used.can_transition_to(TicketStatus::Active));
    /// ```
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::Active | Self::Used | Self::Cancelled)
        )
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A purchased ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket ID.
    pub ticket_id: TicketId,

    /// Current holder.
    pub user_id: UserId,

    /// Festival the ticket admits to.
    pub festival_id: FestivalId,

    /// Ticket template (tier) the ticket was sold from.
    pub template_id: uuid::Uuid,

    /// Name printed on the ticket.
    pub holder_name: String,

    /// Lifecycle status.
    pub status: TicketStatus,

    /// Earliest admission time for this ticket.
    pub valid_from: DateTime<Utc>,

    /// Latest admission time for this ticket.
    pub valid_to: DateTime<Utc>,
}

/// Entry requirements configured per festival.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntryPolicy {
    /// A validated BLE proximity session must accompany the scan.
    pub require_proximity: bool,

    /// A biometric sample must match the holder's enrolled template.
    pub require_biometric: bool,

    /// Modality used when `require_biometric` is set.
    pub biometric_type: BiometricType,

    /// Rotation interval in seconds for time-slotted credentials.
    ///
    /// `None` disables the rotation check.
    pub credential_rotation_secs: Option<i64>,
}

impl Default for EntryPolicy {
    fn default() -> Self {
        Self {
            require_proximity: false,
            require_biometric: false,
            biometric_type: BiometricType::Face,
            credential_rotation_secs: None,
        }
    }
}

/// A festival and its entry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Festival {
    /// Festival ID.
    pub festival_id: FestivalId,

    /// Display name.
    pub name: String,

    /// Gates open.
    pub starts_at: DateTime<Utc>,

    /// Gates close.
    pub ends_at: DateTime<Utc>,

    /// Entry requirements.
    pub entry_policy: EntryPolicy,
}

// ═══════════════════════════════════════════════════════════════════════
// Credentials
// ═══════════════════════════════════════════════════════════════════════

/// Server-side record backing a scannable ticket token.
///
/// Only `public_token` ever leaves the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Row ID.
    pub credential_id: CredentialId,

    /// Ticket this credential was issued for.
    pub ticket_id: TicketId,

    /// Short uppercase token encoded in the QR code.
    pub public_token: String,

    /// AES-256-GCM ciphertext (tag stripped).
    pub ciphertext: Vec<u8>,

    /// 16-byte GCM authentication tag.
    pub auth_tag: Vec<u8>,

    /// 12-byte GCM nonce.
    pub nonce: Vec<u8>,

    /// Data key that sealed the payload.
    pub key_id: KeyId,

    /// Issue timestamp.
    pub issued_at: DateTime<Utc>,

    /// Hard expiry.
    pub expires_at: DateTime<Utc>,

    /// Flips false → true exactly once.
    pub is_used: bool,

    /// Redemption timestamp.
    pub used_at: Option<DateTime<Utc>>,

    /// Scanner or staff member that redeemed the credential.
    pub redeemed_by: Option<String>,

    /// Gate or location of redemption.
    pub redeemed_location: Option<String>,
}

impl Credential {
    /// Whether the hard TTL has passed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Proximity
// ═══════════════════════════════════════════════════════════════════════

/// A fixed BLE beacon at a venue gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beacon {
    /// Beacon ID.
    pub beacon_id: BeaconId,

    /// Festival the beacon is installed at.
    pub festival_id: FestivalId,

    /// Human-readable label ("North Gate 2").
    pub name: String,

    /// Weakest accepted signal strength in dBm.
    pub min_rssi: i16,

    /// Calibrated RSSI at one metre, in dBm.
    pub tx_power: i16,

    /// Inactive beacons cannot start sessions.
    pub is_active: bool,
}

/// Proximity session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Awaiting evidence.
    Pending,

    /// Proximity proven (terminal).
    Validated,

    /// TTL elapsed before validation (terminal).
    Expired,

    /// Cancelled by the device (terminal).
    Cancelled,
}

impl SessionState {
    /// String representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validated => "validated",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Short-lived proof that a device was near a specific beacon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProximitySession {
    /// Session ID.
    pub session_id: SessionId,

    /// Opaque token handed to the device.
    pub session_token: String,

    /// Beacon the session is bound to.
    pub beacon_id: BeaconId,

    /// Ticket holder.
    pub user_id: UserId,

    /// Device the session is bound to.
    pub device_id: DeviceId,

    /// Current state.
    pub state: SessionState,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Hard TTL fixed at creation.
    pub expires_at: DateTime<Utc>,

    /// Most recent RSSI reported for this session.
    pub last_rssi: i16,

    /// When the session was validated.
    pub validated_at: Option<DateTime<Utc>>,
}

impl ProximitySession {
    /// State as observed at `now`: a pending session past its TTL reads as expired.
    ///
    /// Validated sessions past their TTL are reported as expired too, so
    /// callers never trust stale proximity.
    #[must_use]
    pub fn effective_state(&self, now: DateTime<Utc>) -> SessionState {
        match self.state {
            SessionState::Pending | SessionState::Validated if self.expires_at <= now => {
                SessionState::Expired
            }
            state => state,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Biometrics
// ═══════════════════════════════════════════════════════════════════════

/// Biometric modality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BiometricType {
    /// Face geometry.
    Face,

    /// Fingerprint minutiae.
    Fingerprint,

    /// Voice print.
    Voice,

    /// Iris pattern.
    Iris,
}

impl BiometricType {
    /// String representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Face => "face",
            Self::Fingerprint => "fingerprint",
            Self::Voice => "voice",
            Self::Iris => "iris",
        }
    }

    /// Parse a modality name.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::ValidationError`] for unsupported modalities.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "face" => Ok(Self::Face),
            "fingerprint" => Ok(Self::Fingerprint),
            "voice" => Ok(Self::Voice),
            "iris" => Ok(Self::Iris),
            _ => Err(AccessError::ValidationError(format!(
                "Unsupported biometric type: {s}"
            ))),
        }
    }
}

impl fmt::Display for BiometricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encrypted reference template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiometricTemplate {
    /// Template ID.
    pub biometric_id: BiometricId,

    /// Owner.
    pub user_id: UserId,

    /// Modality.
    pub biometric_type: BiometricType,

    /// AES-256-GCM ciphertext with appended tag.
    pub encrypted_template: Vec<u8>,

    /// 12-byte GCM nonce.
    pub nonce: Vec<u8>,

    /// Data key that encrypted the template.
    pub key_id: KeyId,

    /// Capture quality in `[0, 1]`.
    pub quality_score: f64,

    /// At most one active template per (user, modality).
    pub is_active: bool,

    /// Enrollment timestamp.
    pub created_at: DateTime<Utc>,
}

/// Append-only record of a verification attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiometricAttempt {
    /// Attempt ID.
    pub attempt_id: uuid::Uuid,

    /// User the probe was matched against.
    pub user_id: UserId,

    /// Modality.
    pub biometric_type: BiometricType,

    /// Template matched against, if one was found.
    pub biometric_id: Option<BiometricId>,

    /// Matcher confidence (zero on error).
    pub confidence_score: f64,

    /// Whether the threshold was met.
    pub verified: bool,

    /// Error code when the attempt failed before matching.
    pub error: Option<String>,

    /// Attempt timestamp.
    pub attempted_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════
// Validation Audit
// ═══════════════════════════════════════════════════════════════════════

/// Combination of factors satisfied at admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMethod {
    /// QR credential only.
    QrOnly,

    /// QR credential and BLE proximity.
    QrBle,

    /// QR credential and biometric match.
    QrBiometric,

    /// All three factors.
    QrBleBiometric,
}

impl ValidationMethod {
    /// Method for the given set of satisfied factors.
    ///
    /// # Examples
    ///
    /// ```
    /// # use festival_access::state::ValidationMethod;
    /// assert_eq!(ValidationMethod::from_factors(true, false), ValidationMethod::QrBle);
    /// assert_eq!(ValidationMethod::from_factors(true, true), ValidationMethod::QrBleBiometric);
    /// ```
    #[must_use]
    pub const fn from_factors(proximity: bool, biometric: bool) -> Self {
        match (proximity, biometric) {
            (false, false) => Self::QrOnly,
            (true, false) => Self::QrBle,
            (false, true) => Self::QrBiometric,
            (true, true) => Self::QrBleBiometric,
        }
    }

    /// String representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::QrOnly => "qr_only",
            Self::QrBle => "qr_ble",
            Self::QrBiometric => "qr_biometric",
            Self::QrBleBiometric => "qr_ble_biometric",
        }
    }

    /// Parse from the string representation.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::SerializationError`] for unknown values.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "qr_only" => Ok(Self::QrOnly),
            "qr_ble" => Ok(Self::QrBle),
            "qr_biometric" => Ok(Self::QrBiometric),
            "qr_ble_biometric" => Ok(Self::QrBleBiometric),
            _ => Err(AccessError::SerializationError(format!(
                "Invalid validation method: {s}"
            ))),
        }
    }
}

/// Append-only audit row for one redemption attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    /// Record ID.
    pub validation_id: ValidationId,

    /// Ticket, when the token resolved to one.
    pub ticket_id: Option<TicketId>,

    /// Token as scanned.
    pub credential_token: String,

    /// Attempt timestamp.
    pub validated_at: DateTime<Utc>,

    /// Factors satisfied (admissions only).
    pub method: Option<ValidationMethod>,

    /// Biometric confidence, if a match ran.
    pub biometric_confidence: Option<f64>,

    /// Proximity session consulted, if any.
    pub proximity_session_id: Option<SessionId>,

    /// Scanner or staff member.
    pub validator_id: String,

    /// Gate or location.
    pub location: Option<String>,

    /// `true` for admissions.
    pub admitted: bool,

    /// Verdict code (`VALID` for admissions).
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_ticket_status_round_trip_strings() {
        for status in [TicketStatus::Active, TicketStatus::Used, TicketStatus::Cancelled] {
            assert_eq!(TicketStatus::parse(status.as_str()), Ok(status));
        }
        assert!(TicketStatus::parse("transferred").is_err());
    }

    #[test]
    fn test_terminal_ticket_states_do_not_transition() {
        assert!(!TicketStatus::Cancelled.can_transition_to(TicketStatus::Active));
        assert!(!TicketStatus::Used.can_transition_to(TicketStatus::Cancelled));
    }

    #[test]
    fn test_effective_state_rechecks_expiry() {
        let now = Utc::now();
        let mut session = ProximitySession {
            session_id: SessionId::new(),
            session_token: "tok".to_string(),
            beacon_id: BeaconId::new(),
            user_id: UserId::new(),
            device_id: DeviceId::new("device-1"),
            state: SessionState::Validated,
            created_at: now - Duration::minutes(10),
            expires_at: now - Duration::seconds(1),
            last_rssi: -60,
            validated_at: Some(now - Duration::minutes(9)),
        };
        assert_eq!(session.effective_state(now), SessionState::Expired);

        session.state = SessionState::Cancelled;
        assert_eq!(session.effective_state(now), SessionState::Cancelled);
    }

    #[test]
    fn test_biometric_type_rejects_unknown() {
        assert!(matches!(
            BiometricType::parse("retina-scan"),
            Err(AccessError::ValidationError(_))
        ));
    }
}
