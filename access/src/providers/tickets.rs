//! Ticket and festival repository trait.

use crate::error::Result;
use crate::state::{Festival, FestivalId, Ticket, TicketId, UserId};

/// Ticket and festival reads plus the non-redemption status transitions.
///
/// The `active → used` transition only happens inside
/// [`AdmissionLedger::commit_admission`](super::AdmissionLedger::commit_admission).
pub trait TicketRepository: Send + Sync {
    /// Get a ticket.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn get_ticket(
        &self,
        ticket_id: TicketId,
    ) -> impl std::future::Future<Output = Result<Option<Ticket>>> + Send;

    /// Get a festival with its entry policy.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn get_festival(
        &self,
        festival_id: FestivalId,
    ) -> impl std::future::Future<Output = Result<Option<Festival>>> + Send;

    /// `active → cancelled`, conditional on the ticket being active.
    ///
    /// # Returns
    ///
    /// `false` if the ticket is missing or not active.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn cancel_ticket(
        &self,
        ticket_id: TicketId,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// `active → active` with a new holder, conditional on the ticket being active.
    ///
    /// # Returns
    ///
    /// `false` if the ticket is missing or not active.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn transfer_ticket(
        &self,
        ticket_id: TicketId,
        new_user_id: UserId,
        holder_name: &str,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;
}
