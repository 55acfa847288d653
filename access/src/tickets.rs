//! Ticket lifecycle operations that surround admission.

use crate::credentials::{CredentialStore, SlotPolicy};
use crate::error::{AccessError, Result};
use crate::providers::{CredentialRepository, KeyStore, TicketRepository};
use crate::state::{Credential, Ticket, TicketId, TicketStatus, UserId};
use std::sync::Arc;

/// Issues credentials and applies cancel and transfer.
///
/// Transfers re-issue a credential for the new holder. Credentials issued
/// before the transfer still decrypt, but the validation engine rejects
/// them as superseded because their sealed holder no longer owns the ticket.
pub struct TicketService<T, R, K> {
    tickets: T,
    credentials: Arc<CredentialStore<R, K>>,
    rotation_grace_slots: i64,
}

impl<T, R, K> TicketService<T, R, K>
where
    T: TicketRepository,
    R: CredentialRepository,
    K: KeyStore,
{
    /// Create a ticket service.
    #[must_use]
    pub const fn new(
        tickets: T,
        credentials: Arc<CredentialStore<R, K>>,
        rotation_grace_slots: i64,
    ) -> Self {
        Self {
            tickets,
            credentials,
            rotation_grace_slots,
        }
    }

    /// Issue a credential for an active ticket.
    ///
    /// # Errors
    ///
    /// - [`AccessError::NotFound`] if the ticket or its festival is missing
    /// - [`AccessError::BusinessLogicError`] if the ticket is not active
    /// - [`AccessError::KeyUnavailable`] if no credential key is available
    pub async fn issue_credential(&self, ticket_id: TicketId) -> Result<Credential> {
        let ticket = self.active_ticket(ticket_id).await?;
        self.issue_for(&ticket).await
    }

    /// Cancel an active ticket.
    ///
    /// # Errors
    ///
    /// - [`AccessError::NotFound`] if the ticket is missing
    /// - [`AccessError::BusinessLogicError`] if the ticket is used or
    ///   already cancelled
    pub async fn cancel(&self, ticket_id: TicketId) -> Result<()> {
        let ticket = self.active_ticket(ticket_id).await?;

        if !self.tickets.cancel_ticket(ticket_id).await? {
            return Err(self.not_active(ticket_id).await);
        }

        tracing::info!(
            ticket_id = %ticket_id,
            user_id = %ticket.user_id,
            "Ticket cancelled"
        );
        Ok(())
    }

    /// Transfer an active ticket and issue a credential for the new holder.
    ///
    /// # Errors
    ///
    /// - [`AccessError::ValidationError`] for an empty holder name or a
    ///   transfer to the current holder
    /// - [`AccessError::NotFound`] if the ticket is missing
    /// - [`AccessError::BusinessLogicError`] if the ticket is not active
    pub async fn transfer(
        &self,
        ticket_id: TicketId,
        new_user_id: UserId,
        holder_name: &str,
    ) -> Result<Credential> {
        let holder_name = holder_name.trim();
        if holder_name.is_empty() {
            return Err(AccessError::ValidationError(
                "Holder name is required".to_string(),
            ));
        }

        let ticket = self.active_ticket(ticket_id).await?;
        if ticket.user_id == new_user_id {
            return Err(AccessError::ValidationError(
                "Ticket already belongs to this user".to_string(),
            ));
        }

        if !self
            .tickets
            .transfer_ticket(ticket_id, new_user_id, holder_name)
            .await?
        {
            return Err(self.not_active(ticket_id).await);
        }

        tracing::info!(
            ticket_id = %ticket_id,
            from_user_id = %ticket.user_id,
            to_user_id = %new_user_id,
            "Ticket transferred"
        );

        let transferred = Ticket {
            user_id: new_user_id,
            holder_name: holder_name.to_string(),
            ..ticket
        };
        self.issue_for(&transferred).await
    }

    async fn issue_for(&self, ticket: &Ticket) -> Result<Credential> {
        let festival = self
            .tickets
            .get_festival(ticket.festival_id)
            .await?
            .ok_or(AccessError::not_found("festival"))?;

        let rotation =
            SlotPolicy::for_entry_policy(&festival.entry_policy, self.rotation_grace_slots)?;
        self.credentials.issue_with_rotation(ticket, rotation).await
    }

    async fn active_ticket(&self, ticket_id: TicketId) -> Result<Ticket> {
        let ticket = self
            .tickets
            .get_ticket(ticket_id)
            .await?
            .ok_or(AccessError::not_found("ticket"))?;

        if ticket.status != TicketStatus::Active {
            return Err(AccessError::BusinessLogicError(format!(
                "Ticket is {}",
                ticket.status
            )));
        }

        Ok(ticket)
    }

    async fn not_active(&self, ticket_id: TicketId) -> AccessError {
        match self.tickets.get_ticket(ticket_id).await {
            Ok(Some(ticket)) => {
                AccessError::BusinessLogicError(format!("Ticket is {}", ticket.status))
            }
            Ok(None) => AccessError::not_found("ticket"),
            Err(e) => e,
        }
    }
}
