//! In-memory admission ledger.

use super::MockStore;
use crate::error::{AccessError, Result};
use crate::providers::{AdmissionLedger, AdmissionOutcome};
use crate::state::{TicketId, TicketStatus, ValidationRecord};

impl AdmissionLedger for MockStore {
    async fn commit_admission(
        &self,
        ticket_id: TicketId,
        record: &ValidationRecord,
    ) -> Result<AdmissionOutcome> {
        let mut tables = self.tables()?;
        let now = record.validated_at;

        // Every precondition is checked before any write, all under one lock
        let credential_state = tables
            .credentials
            .get(&record.credential_token)
            .filter(|c| c.ticket_id == ticket_id)
            .map(|c| (c.is_expired_at(now), c.is_used));
        match credential_state {
            None => return Ok(AdmissionOutcome::CredentialNotFound),
            Some((true, _)) => return Ok(AdmissionOutcome::CredentialExpired),
            Some((false, true)) => return Ok(AdmissionOutcome::CredentialAlreadyUsed),
            Some((false, false)) => {}
        }

        let status = tables
            .tickets
            .get(&ticket_id)
            .map(|t| t.status)
            .ok_or(AccessError::not_found("ticket"))?;
        if status != TicketStatus::Active {
            return Ok(AdmissionOutcome::TicketNotActive(status));
        }

        if let Some(ticket) = tables.tickets.get_mut(&ticket_id) {
            ticket.status = TicketStatus::Used;
        }

        let credential = tables
            .credentials
            .get_mut(&record.credential_token)
            .ok_or(AccessError::not_found("credential"))?;
        credential.is_used = true;
        credential.used_at = Some(now);
        credential.redeemed_by = Some(record.validator_id.clone());
        credential.redeemed_location.clone_from(&record.location);
        let redeemed = credential.clone();

        tables.records.push(record.clone());
        Ok(AdmissionOutcome::Admitted(redeemed))
    }

    async fn record_rejection(&self, record: &ValidationRecord) -> Result<()> {
        let mut tables = self.tables()?;
        if tables.fail_rejection_log {
            return Err(AccessError::DatabaseError("rejection log unavailable".to_string()));
        }
        tables.records.push(record.clone());
        Ok(())
    }

    async fn records_for_ticket(&self, ticket_id: TicketId) -> Result<Vec<ValidationRecord>> {
        Ok(self
            .tables()?
            .records
            .iter()
            .filter(|r| r.ticket_id == Some(ticket_id))
            .cloned()
            .collect())
    }
}
