//! In-memory ticket repository.

use super::MockStore;
use crate::error::Result;
use crate::providers::TicketRepository;
use crate::state::{Festival, FestivalId, Ticket, TicketId, TicketStatus, UserId};

impl TicketRepository for MockStore {
    async fn get_ticket(&self, ticket_id: TicketId) -> Result<Option<Ticket>> {
        Ok(self.tables()?.tickets.get(&ticket_id).cloned())
    }

    async fn get_festival(&self, festival_id: FestivalId) -> Result<Option<Festival>> {
        Ok(self.tables()?.festivals.get(&festival_id).cloned())
    }

    async fn cancel_ticket(&self, ticket_id: TicketId) -> Result<bool> {
        let mut tables = self.tables()?;
        match tables.tickets.get_mut(&ticket_id) {
            Some(ticket) if ticket.status == TicketStatus::Active => {
                ticket.status = TicketStatus::Cancelled;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn transfer_ticket(
        &self,
        ticket_id: TicketId,
        new_user_id: UserId,
        holder_name: &str,
    ) -> Result<bool> {
        let mut tables = self.tables()?;
        match tables.tickets.get_mut(&ticket_id) {
            Some(ticket) if ticket.status == TicketStatus::Active => {
                ticket.user_id = new_user_id;
                ticket.holder_name = holder_name.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
