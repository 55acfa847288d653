//! Beacon registry and proximity session store traits.

use crate::error::Result;
use crate::state::{Beacon, BeaconId, ProximitySession, SessionState};
use chrono::{DateTime, Utc};

/// Registry of installed BLE beacons.
pub trait BeaconRegistry: Send + Sync {
    /// Get a beacon.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn get_beacon(
        &self,
        beacon_id: BeaconId,
    ) -> impl std::future::Future<Output = Result<Option<Beacon>>> + Send;
}

/// Proximity session store.
///
/// # Implementation Notes
///
/// - Sessions are ephemeral (minutes)
/// - **CRITICAL**: `transition()` only moves sessions out of `pending`, and
///   must do so atomically (Lua script, conditional update, or mutex)
/// - `Validated` and `Cancelled` require `expires_at > now`;
///   `Expired` requires `expires_at <= now`
pub trait ProximitySessionRepository: Send + Sync {
    /// Store a new pending session.
    ///
    /// # Errors
    ///
    /// Returns error if the session token already exists or storage fails.
    fn create_session(
        &self,
        session: &ProximitySession,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Get a session by token, in whatever state it was stored.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn get_session(
        &self,
        session_token: &str,
    ) -> impl std::future::Future<Output = Result<Option<ProximitySession>>> + Send;

    /// Move a pending session to `to`, recording `rssi` when given.
    ///
    /// # Returns
    ///
    /// The updated session if this call performed the transition, `None`
    /// if the session was missing, no longer pending, or the TTL guard for
    /// `to` did not hold.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn transition(
        &self,
        session_token: &str,
        to: SessionState,
        rssi: Option<i16>,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Option<ProximitySession>>> + Send;

    /// Mark pending sessions past their TTL as expired.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn sweep_expired(
        &self,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u64>> + Send;
}
