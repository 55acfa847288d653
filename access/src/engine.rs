//! Gate-side ticket validation.
//!
//! The engine composes credential inspection, ticket and festival checks,
//! proximity, and biometrics into one verdict, then commits the admission
//! atomically through the [`AdmissionLedger`].
//!
//! # Flow
//!
//! ```text
//! token ──▶ inspect credential ──▶ ticket + window ──▶ proximity ──▶ biometric ──▶ commit
//!              │                      │                   │             │            │
//!              ▼                      ▼                   ▼             ▼            ▼
//!        NOT_FOUND/USED/        NOT_STARTED/ENDED/   BLE_* codes   BIOMETRIC_*    VALID or
//!        EXPIRED/INTEGRITY      INVALID_STATUS                                 lost-race code
//! ```
//!
//! Every outcome is a [`ValidationVerdict`]. The only error returned to the
//! caller is [`AccessError::KeyUnavailable`], which is an operational fault
//! and must never look like an ordinary rejection.

use crate::biometric::BiometricVerifier;
use crate::credentials::{CredentialStore, InspectedCredential, SlotPolicy};
use crate::environment::SharedClock;
use crate::error::{AccessError, Result};
use crate::providers::{
    AdmissionLedger, AdmissionOutcome, BeaconRegistry, BiometricRepository, CredentialRepository,
    KeyStore, Matcher, ProximitySessionRepository, TicketRepository,
};
use crate::proximity::ProximitySessionManager;
use crate::state::{
    BiometricType, DeviceId, SessionId, SessionState, Ticket, TicketId, TicketStatus,
    ValidationId, ValidationMethod, ValidationRecord,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Closed set of verdict codes returned to scanners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictCode {
    /// Admitted.
    Valid,
    /// No credential for the token.
    CredentialNotFound,
    /// Credential already redeemed.
    CredentialAlreadyUsed,
    /// Credential past its TTL or rotation window.
    CredentialExpired,
    /// Sealed credential failed authentication.
    CredentialIntegrityFailed,
    /// Ticket was transferred after this credential was issued.
    CredentialSuperseded,
    /// Credential references a ticket or festival that does not exist.
    TicketNotFound,
    /// Ticket is used or cancelled.
    TicketInvalidStatus,
    /// Before the admission window.
    FestivalNotStarted,
    /// After the admission window.
    FestivalEnded,
    /// Festival requires proximity and none was presented.
    BleSessionRequired,
    /// Proximity session is not validated or not bound to this holder.
    BleValidationFailed,
    /// Festival requires a biometric sample and none was presented.
    BiometricRequired,
    /// Biometric sample did not match.
    BiometricVerificationFailed,
    /// Malformed request.
    InvalidRequest,
    /// Storage or other infrastructure failure.
    InternalError,
}

impl VerdictCode {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "VALID",
            Self::CredentialNotFound => "CREDENTIAL_NOT_FOUND",
            Self::CredentialAlreadyUsed => "CREDENTIAL_ALREADY_USED",
            Self::CredentialExpired => "CREDENTIAL_EXPIRED",
            Self::CredentialIntegrityFailed => "CREDENTIAL_INTEGRITY_FAILED",
            Self::CredentialSuperseded => "CREDENTIAL_SUPERSEDED",
            Self::TicketNotFound => "TICKET_NOT_FOUND",
            Self::TicketInvalidStatus => "TICKET_INVALID_STATUS",
            Self::FestivalNotStarted => "FESTIVAL_NOT_STARTED",
            Self::FestivalEnded => "FESTIVAL_ENDED",
            Self::BleSessionRequired => "BLE_SESSION_REQUIRED",
            Self::BleValidationFailed => "BLE_VALIDATION_FAILED",
            Self::BiometricRequired => "BIOMETRIC_REQUIRED",
            Self::BiometricVerificationFailed => "BIOMETRIC_VERIFICATION_FAILED",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Default human-readable message.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::Valid => "Entry granted",
            Self::CredentialNotFound => "Ticket credential not recognised",
            Self::CredentialAlreadyUsed => "Ticket has already been scanned",
            Self::CredentialExpired => "Ticket credential has expired",
            Self::CredentialIntegrityFailed => "Ticket credential is invalid",
            Self::CredentialSuperseded => "Ticket was transferred; a newer credential exists",
            Self::TicketNotFound => "Ticket not found",
            Self::TicketInvalidStatus => "Ticket is not active",
            Self::FestivalNotStarted => "Entry has not opened yet",
            Self::FestivalEnded => "Entry has closed",
            Self::BleSessionRequired => "Proximity check required",
            Self::BleValidationFailed => "Proximity check failed",
            Self::BiometricRequired => "Biometric check required",
            Self::BiometricVerificationFailed => "Biometric check failed",
            Self::InvalidRequest => "Invalid scan request",
            Self::InternalError => "Validation temporarily unavailable",
        }
    }
}

impl fmt::Display for VerdictCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Biometric probe captured at the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiometricSample {
    /// Modality.
    pub biometric_type: BiometricType,

    /// Probe template.
    pub template: Vec<u8>,
}

/// One scan at a gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRequest {
    /// Public token read from the QR code.
    pub token: String,

    /// Scanner or staff member.
    pub validator_id: String,

    /// Gate or location.
    pub location: Option<String>,

    /// Holder's device, checked against the proximity session.
    pub device_id: Option<DeviceId>,

    /// Proximity session presented by the holder's device.
    pub proximity_session_token: Option<String>,

    /// Biometric probe.
    pub biometric_sample: Option<BiometricSample>,
}

impl ValidationRequest {
    /// Scan with only a token.
    #[must_use]
    pub fn new(token: impl Into<String>, validator_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            validator_id: validator_id.into(),
            location: None,
            device_id: None,
            proximity_session_token: None,
            biometric_sample: None,
        }
    }

    /// Set the gate.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Attach a proximity session from `device_id`.
    #[must_use]
    pub fn with_proximity(mut self, session_token: impl Into<String>, device_id: DeviceId) -> Self {
        self.proximity_session_token = Some(session_token.into());
        self.device_id = Some(device_id);
        self
    }

    /// Attach a biometric probe.
    #[must_use]
    pub fn with_biometric(mut self, biometric_type: BiometricType, template: Vec<u8>) -> Self {
        self.biometric_sample = Some(BiometricSample {
            biometric_type,
            template,
        });
        self
    }
}

/// Outcome of a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    /// `true` only for [`VerdictCode::Valid`].
    pub valid: bool,

    /// Machine-readable outcome.
    pub code: VerdictCode,

    /// Human-readable outcome.
    pub message: String,

    /// Ticket, when the token resolved to one.
    pub ticket_id: Option<TicketId>,

    /// Name on the ticket, for the gate display.
    pub holder_name: Option<String>,

    /// Factors satisfied (admissions only).
    pub method: Option<ValidationMethod>,

    /// Biometric confidence, if a match ran.
    pub biometric_confidence: Option<f64>,

    /// Scan timestamp.
    pub validated_at: DateTime<Utc>,
}

enum Halt {
    Reject(VerdictCode, String),
    Fatal(AccessError),
}

impl Halt {
    fn reject(code: VerdictCode) -> Self {
        Self::Reject(code, code.message().to_string())
    }

    fn with_message(code: VerdictCode, message: impl Into<String>) -> Self {
        Self::Reject(code, message.into())
    }

    /// Infrastructure failure: fatal for missing keys, `INTERNAL_ERROR` otherwise.
    fn infrastructure(error: AccessError) -> Self {
        if error.is_fatal() {
            Self::Fatal(error)
        } else {
            tracing::error!(error = %error, "Validation aborted by infrastructure error");
            Self::reject(VerdictCode::InternalError)
        }
    }
}

#[derive(Debug, Default)]
struct Attempt {
    ticket_id: Option<TicketId>,
    holder_name: Option<String>,
    proximity_session_id: Option<SessionId>,
    biometric_confidence: Option<f64>,
}

type Step<T> = std::result::Result<T, Halt>;

/// Gate-side validation engine.
pub struct TicketValidationEngine<R, K, T, L, B, S, V, M> {
    credentials: Arc<CredentialStore<R, K>>,
    tickets: T,
    ledger: L,
    proximity: Arc<ProximitySessionManager<B, S>>,
    biometrics: Arc<BiometricVerifier<V, K, M>>,
    clock: SharedClock,
    rotation_grace_slots: i64,
}

impl<R, K, T, L, B, S, V, M> TicketValidationEngine<R, K, T, L, B, S, V, M>
where
    R: CredentialRepository,
    K: KeyStore,
    T: TicketRepository,
    L: AdmissionLedger,
    B: BeaconRegistry,
    S: ProximitySessionRepository,
    V: BiometricRepository,
    M: Matcher,
{
    /// Create an engine.
    #[must_use]
    pub const fn new(
        credentials: Arc<CredentialStore<R, K>>,
        tickets: T,
        ledger: L,
        proximity: Arc<ProximitySessionManager<B, S>>,
        biometrics: Arc<BiometricVerifier<V, K, M>>,
        clock: SharedClock,
        rotation_grace_slots: i64,
    ) -> Self {
        Self {
            credentials,
            tickets,
            ledger,
            proximity,
            biometrics,
            clock,
            rotation_grace_slots,
        }
    }

    /// Validate a scan and, if every check passes, admit the holder.
    ///
    /// Admission is atomic: the ticket becomes `used`, the credential is
    /// redeemed and a [`ValidationRecord`] is appended, or none of these
    /// happen. Rejections are appended to the trail on a best-effort basis.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::KeyUnavailable`] when key material cannot be
    /// produced. Every other outcome is a verdict.
    pub async fn validate(&self, request: &ValidationRequest) -> Result<ValidationVerdict> {
        let started = std::time::Instant::now();
        let now = self.clock.now();
        let mut attempt = Attempt::default();

        let outcome = self.run(request, now, &mut attempt).await;
        metrics::histogram!("festival_access_validation_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(method) => {
                metrics::counter!(
                    "festival_access_verdicts_total",
                    "code" => VerdictCode::Valid.as_str()
                )
                .increment(1);

                tracing::info!(
                    ticket_id = ?attempt.ticket_id,
                    validator_id = %request.validator_id,
                    method = method.as_str(),
                    "Ticket admitted"
                );

                Ok(ValidationVerdict {
                    valid: true,
                    code: VerdictCode::Valid,
                    message: VerdictCode::Valid.message().to_string(),
                    ticket_id: attempt.ticket_id,
                    holder_name: attempt.holder_name,
                    method: Some(method),
                    biometric_confidence: attempt.biometric_confidence,
                    validated_at: now,
                })
            }
            Err(Halt::Reject(code, message)) => {
                Ok(self.reject(request, now, attempt, code, message).await)
            }
            Err(Halt::Fatal(error)) => {
                tracing::error!(
                    error = %error,
                    validator_id = %request.validator_id,
                    "Validation cannot proceed without key material"
                );
                Err(error)
            }
        }
    }

    async fn run(
        &self,
        request: &ValidationRequest,
        now: DateTime<Utc>,
        attempt: &mut Attempt,
    ) -> Step<ValidationMethod> {
        if request.validator_id.trim().is_empty()
            || !crate::credentials::codec::is_well_formed_token(&request.token)
        {
            return Err(Halt::reject(VerdictCode::InvalidRequest));
        }

        // 1. Credential
        let InspectedCredential {
            credential,
            payload,
        } = self
            .credentials
            .inspect(&request.token)
            .await
            .map_err(credential_halt)?;
        attempt.ticket_id = Some(credential.ticket_id);

        // 2. Ticket, festival, window
        let ticket = self
            .tickets
            .get_ticket(credential.ticket_id)
            .await
            .map_err(Halt::infrastructure)?
            .ok_or_else(|| Halt::reject(VerdictCode::TicketNotFound))?;
        attempt.holder_name = Some(ticket.holder_name.clone());

        if payload.user_id != ticket.user_id {
            return Err(Halt::reject(VerdictCode::CredentialSuperseded));
        }

        if ticket.status != TicketStatus::Active {
            return Err(Halt::with_message(
                VerdictCode::TicketInvalidStatus,
                format!("Ticket is {}", ticket.status),
            ));
        }

        let festival = self
            .tickets
            .get_festival(ticket.festival_id)
            .await
            .map_err(Halt::infrastructure)?
            .ok_or_else(|| {
                Halt::with_message(VerdictCode::TicketNotFound, "Festival not found for ticket")
            })?;

        let opens_at = festival.starts_at.max(ticket.valid_from);
        let closes_at = festival.ends_at.min(ticket.valid_to);
        if now < opens_at {
            return Err(Halt::with_message(
                VerdictCode::FestivalNotStarted,
                format!("Entry opens at {opens_at}"),
            ));
        }
        if now > closes_at {
            return Err(Halt::reject(VerdictCode::FestivalEnded));
        }

        let policy = festival.entry_policy;
        let rotation = SlotPolicy::for_entry_policy(&policy, self.rotation_grace_slots)
            .map_err(Halt::infrastructure)?;
        if let Some(rotation) = rotation {
            let fresh = payload
                .time_slot
                .is_some_and(|slot| rotation.check(slot, now).is_ok());
            if !fresh {
                return Err(Halt::with_message(
                    VerdictCode::CredentialExpired,
                    "Credential rotation window has passed",
                ));
            }
        }

        // 3. Proximity
        let proximity = match &request.proximity_session_token {
            Some(session_token) => {
                self.check_proximity(session_token, request, &ticket, now, attempt)
                    .await?;
                true
            }
            None if policy.require_proximity => {
                return Err(Halt::reject(VerdictCode::BleSessionRequired));
            }
            None => false,
        };

        // 4. Biometric
        let biometric = match &request.biometric_sample {
            Some(sample) => {
                if policy.require_biometric && sample.biometric_type != policy.biometric_type {
                    return Err(Halt::with_message(
                        VerdictCode::BiometricVerificationFailed,
                        format!("Entry requires a {} sample", policy.biometric_type),
                    ));
                }
                self.check_biometric(&ticket, sample.biometric_type, &sample.template, attempt)
                    .await?;
                true
            }
            None if policy.require_biometric => {
                return Err(Halt::reject(VerdictCode::BiometricRequired));
            }
            None => false,
        };

        // 5. Commit
        let method = ValidationMethod::from_factors(proximity, biometric);
        let record = ValidationRecord {
            validation_id: ValidationId::new(),
            ticket_id: Some(ticket.ticket_id),
            credential_token: request.token.clone(),
            validated_at: now,
            method: Some(method),
            biometric_confidence: attempt.biometric_confidence,
            proximity_session_id: attempt.proximity_session_id,
            validator_id: request.validator_id.clone(),
            location: request.location.clone(),
            admitted: true,
            code: VerdictCode::Valid.as_str().to_string(),
        };

        match self
            .ledger
            .commit_admission(ticket.ticket_id, &record)
            .await
            .map_err(Halt::infrastructure)?
        {
            AdmissionOutcome::Admitted(_) => Ok(method),
            AdmissionOutcome::CredentialAlreadyUsed => {
                Err(Halt::reject(VerdictCode::CredentialAlreadyUsed))
            }
            AdmissionOutcome::CredentialExpired => Err(Halt::reject(VerdictCode::CredentialExpired)),
            AdmissionOutcome::CredentialNotFound => {
                Err(Halt::reject(VerdictCode::CredentialNotFound))
            }
            AdmissionOutcome::TicketNotActive(status) => Err(Halt::with_message(
                VerdictCode::TicketInvalidStatus,
                format!("Ticket is {status}"),
            )),
        }
    }

    async fn check_proximity(
        &self,
        session_token: &str,
        request: &ValidationRequest,
        ticket: &Ticket,
        now: DateTime<Utc>,
        attempt: &mut Attempt,
    ) -> Step<()> {
        let failed = |message: &str| Halt::with_message(VerdictCode::BleValidationFailed, message);

        let session = match self.proximity.session(session_token).await {
            Ok(session) => session,
            Err(AccessError::NotFound { .. }) => return Err(failed("Proximity session not found")),
            Err(e) => return Err(Halt::infrastructure(e)),
        };
        attempt.proximity_session_id = Some(session.session_id);

        if session.effective_state(now) != SessionState::Validated {
            return Err(Halt::with_message(
                VerdictCode::BleValidationFailed,
                format!("Proximity session is {}", session.effective_state(now).as_str()),
            ));
        }

        if session.user_id != ticket.user_id {
            return Err(failed("Proximity session belongs to another holder"));
        }

        if request
            .device_id
            .as_ref()
            .is_some_and(|device| *device != session.device_id)
        {
            return Err(failed("Proximity session was opened on another device"));
        }

        match self.proximity.beacon(session.beacon_id).await {
            Ok(beacon) if beacon.festival_id == ticket.festival_id => Ok(()),
            Ok(_) | Err(AccessError::NotFound { .. }) => {
                Err(failed("Proximity beacon is not at this festival"))
            }
            Err(e) => Err(Halt::infrastructure(e)),
        }
    }

    async fn check_biometric(
        &self,
        ticket: &Ticket,
        biometric_type: BiometricType,
        probe: &[u8],
        attempt: &mut Attempt,
    ) -> Step<()> {
        match self
            .biometrics
            .verify(ticket.user_id, biometric_type, probe)
            .await
        {
            Ok(outcome) => {
                attempt.biometric_confidence = Some(outcome.confidence_score);
                if outcome.verified {
                    Ok(())
                } else {
                    Err(Halt::reject(VerdictCode::BiometricVerificationFailed))
                }
            }
            Err(
                e @ (AccessError::DatabaseError(_)
                | AccessError::SerializationError(_)
                | AccessError::InternalError(_)
                | AccessError::KeyUnavailable(_)),
            ) => Err(Halt::infrastructure(e)),
            Err(AccessError::NotFound { .. }) => Err(Halt::with_message(
                VerdictCode::BiometricVerificationFailed,
                "No biometric enrolled for this holder",
            )),
            Err(_) => Err(Halt::reject(VerdictCode::BiometricVerificationFailed)),
        }
    }

    async fn reject(
        &self,
        request: &ValidationRequest,
        now: DateTime<Utc>,
        attempt: Attempt,
        code: VerdictCode,
        message: String,
    ) -> ValidationVerdict {
        metrics::counter!("festival_access_verdicts_total", "code" => code.as_str()).increment(1);

        if code == VerdictCode::CredentialIntegrityFailed {
            tracing::warn!(
                validator_id = %request.validator_id,
                location = ?request.location,
                code = code.as_str(),
                "Rejected tampered credential"
            );
        } else {
            tracing::info!(
                ticket_id = ?attempt.ticket_id,
                validator_id = %request.validator_id,
                code = code.as_str(),
                "Ticket rejected"
            );
        }

        let record = ValidationRecord {
            validation_id: ValidationId::new(),
            ticket_id: attempt.ticket_id,
            credential_token: request.token.clone(),
            validated_at: now,
            method: None,
            biometric_confidence: attempt.biometric_confidence,
            proximity_session_id: attempt.proximity_session_id,
            validator_id: request.validator_id.clone(),
            location: request.location.clone(),
            admitted: false,
            code: code.as_str().to_string(),
        };

        if let Err(e) = self.ledger.record_rejection(&record).await {
            tracing::warn!(error = %e, code = code.as_str(), "Failed to record rejected scan");
        }

        ValidationVerdict {
            valid: false,
            code,
            message,
            ticket_id: attempt.ticket_id,
            holder_name: attempt.holder_name,
            method: None,
            biometric_confidence: attempt.biometric_confidence,
            validated_at: now,
        }
    }
}

fn credential_halt(error: AccessError) -> Halt {
    match error {
        AccessError::NotFound { .. } => Halt::reject(VerdictCode::CredentialNotFound),
        AccessError::AlreadyUsed { .. } => Halt::reject(VerdictCode::CredentialAlreadyUsed),
        AccessError::Expired { .. } => Halt::reject(VerdictCode::CredentialExpired),
        AccessError::IntegrityError => Halt::reject(VerdictCode::CredentialIntegrityFailed),
        other => Halt::infrastructure(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_code_wire_format() {
        for code in [
            VerdictCode::Valid,
            VerdictCode::CredentialSuperseded,
            VerdictCode::BleSessionRequired,
            VerdictCode::BiometricVerificationFailed,
            VerdictCode::InternalError,
        ] {
            let json = serde_json::to_string(&code).unwrap_or_default();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn test_request_builders() {
        let request = ValidationRequest::new("TOKEN", "scanner-7")
            .with_location("north-gate")
            .with_proximity("session", DeviceId::new("phone"))
            .with_biometric(BiometricType::Face, vec![1, 2, 3]);

        assert_eq!(request.location.as_deref(), Some("north-gate"));
        assert_eq!(request.device_id, Some(DeviceId::new("phone")));
        assert_eq!(
            request.biometric_sample.map(|s| s.biometric_type),
            Some(BiometricType::Face)
        );
    }
}
