//! In-memory provider implementations for testing.
//!
//! [`MockStore`] implements every storage trait over one mutex-guarded set
//! of tables, so multi-table operations (admission commits) are atomic the
//! same way a database transaction is. Clones share the same tables.

pub mod admission;
pub mod biometric;
pub mod clock;
pub mod credentials;
pub mod keys;
pub mod proximity;
pub mod tickets;

pub use biometric::FixedScoreMatcher;
pub use clock::FixedClock;

use crate::error::{AccessError, Result};
use crate::state::{
    Beacon, BeaconId, BiometricAttempt, BiometricTemplate, Credential, EncryptionKey, Festival,
    FestivalId, KeyId, ProximitySession, Ticket, TicketId, ValidationRecord,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
pub(crate) struct Tables {
    pub keys: HashMap<KeyId, EncryptionKey>,
    pub credentials: HashMap<String, Credential>,
    pub tickets: HashMap<TicketId, Ticket>,
    pub festivals: HashMap<FestivalId, Festival>,
    pub beacons: HashMap<BeaconId, Beacon>,
    pub sessions: HashMap<String, ProximitySession>,
    pub templates: Vec<BiometricTemplate>,
    pub attempts: Vec<BiometricAttempt>,
    pub records: Vec<ValidationRecord>,
    pub fail_attempt_log: bool,
    pub fail_rejection_log: bool,
}

/// In-memory store implementing every provider trait.
#[derive(Debug, Clone, Default)]
pub struct MockStore {
    tables: Arc<Mutex<Tables>>,
}

impl MockStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|e| AccessError::InternalError(format!("Mock store lock poisoned: {e}")))
    }

    /// Seed a ticket.
    ///
    /// # Errors
    ///
    /// Returns error if the lock is poisoned.
    pub fn insert_ticket(&self, ticket: Ticket) -> Result<()> {
        self.tables()?.tickets.insert(ticket.ticket_id, ticket);
        Ok(())
    }

    /// Seed a festival.
    ///
    /// # Errors
    ///
    /// Returns error if the lock is poisoned.
    pub fn insert_festival(&self, festival: Festival) -> Result<()> {
        self.tables()?.festivals.insert(festival.festival_id, festival);
        Ok(())
    }

    /// Seed a beacon.
    ///
    /// # Errors
    ///
    /// Returns error if the lock is poisoned.
    pub fn insert_beacon(&self, beacon: Beacon) -> Result<()> {
        self.tables()?.beacons.insert(beacon.beacon_id, beacon);
        Ok(())
    }

    /// Current state of a ticket.
    ///
    /// # Errors
    ///
    /// Returns error if the lock is poisoned.
    pub fn ticket(&self, ticket_id: TicketId) -> Result<Option<Ticket>> {
        Ok(self.tables()?.tickets.get(&ticket_id).cloned())
    }

    /// Current state of a credential.
    ///
    /// # Errors
    ///
    /// Returns error if the lock is poisoned.
    pub fn credential(&self, token: &str) -> Result<Option<Credential>> {
        Ok(self.tables()?.credentials.get(token).cloned())
    }

    /// Every validation record, admitted or not, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns error if the lock is poisoned.
    pub fn validation_records(&self) -> Result<Vec<ValidationRecord>> {
        Ok(self.tables()?.records.clone())
    }

    /// Mutate a stored credential in place (simulates storage tampering).
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::NotFound`] if the token is unknown.
    pub fn tamper_credential(&self, token: &str, f: impl FnOnce(&mut Credential)) -> Result<()> {
        let mut tables = self.tables()?;
        let credential = tables
            .credentials
            .get_mut(token)
            .ok_or(AccessError::not_found("credential"))?;
        f(credential);
        Ok(())
    }

    /// Make biometric attempt logging fail.
    ///
    /// # Errors
    ///
    /// Returns error if the lock is poisoned.
    pub fn fail_attempt_log(&self, fail: bool) -> Result<()> {
        self.tables()?.fail_attempt_log = fail;
        Ok(())
    }

    /// Make rejection logging fail.
    ///
    /// # Errors
    ///
    /// Returns error if the lock is poisoned.
    pub fn fail_rejection_log(&self, fail: bool) -> Result<()> {
        self.tables()?.fail_rejection_log = fail;
        Ok(())
    }
}
