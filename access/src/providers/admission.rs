//! Admission ledger trait.

use crate::error::Result;
use crate::state::{Credential, TicketId, TicketStatus, ValidationRecord};

/// Result of an admission commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// Ticket marked used, credential redeemed, record appended.
    Admitted(Credential),

    /// No credential with the scanned token for this ticket.
    CredentialNotFound,

    /// Another scanner won the race.
    CredentialAlreadyUsed,

    /// Credential TTL passed between inspection and commit.
    CredentialExpired,

    /// Ticket left `active` between inspection and commit.
    TicketNotActive(TicketStatus),
}

/// Transactional admission commit plus the append-only validation trail.
///
/// # Security Requirements
///
/// `commit_admission()` performs three writes that commit together or
/// not at all:
///
/// 1. `UPDATE credentials SET is_used = true ... WHERE public_token = $1
///    AND ticket_id = $2 AND is_used = false AND expires_at > $now`
/// 2. `UPDATE tickets SET status = 'used' WHERE id = $2 AND status = 'active'`
/// 3. `INSERT INTO validation_records ...`
pub trait AdmissionLedger: Send + Sync {
    /// Commit an admission.
    ///
    /// `record.ticket_id` must be set; `record.credential_token`,
    /// `record.validator_id`, `record.location` and `record.validated_at`
    /// drive the credential update.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails. Lost races are
    /// reported through [`AdmissionOutcome`], not as errors.
    fn commit_admission(
        &self,
        ticket_id: TicketId,
        record: &ValidationRecord,
    ) -> impl std::future::Future<Output = Result<AdmissionOutcome>> + Send;

    /// Append a rejected attempt to the trail.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn record_rejection(
        &self,
        record: &ValidationRecord,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// All records for a ticket, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn records_for_ticket(
        &self,
        ticket_id: TicketId,
    ) -> impl std::future::Future<Output = Result<Vec<ValidationRecord>>> + Send;
}
