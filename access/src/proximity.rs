//! BLE proximity sessions.
//!
//! A device near a gate beacon opens a short-lived session and submits
//! signal evidence. Once the evidence shows the device is close enough,
//! the session is validated and can be presented alongside a credential.
//!
//! # State machine
//!
//! ```text
//!            validate (near)
//! pending ───────────────────▶ validated
//!    │  \
//!    │   \ cancel
//!    │    ▶ cancelled
//!    │ TTL
//!    ▼
//! expired
//! ```
//!
//! Only `pending` has outgoing transitions and they are performed by the
//! store atomically. Insufficient evidence leaves a session pending.

use crate::config::ProximityConfig;
use crate::environment::SharedClock;
use crate::error::{AccessError, Result};
use crate::providers::{BeaconRegistry, ProximitySessionRepository};
use crate::state::{Beacon, BeaconId, DeviceId, ProximitySession, SessionId, SessionState, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const SESSION: &str = "proximity session";

/// Signal evidence reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProximityEvidence {
    /// Received signal strength in dBm.
    pub rssi: i16,

    /// Calibrated one-metre RSSI as advertised by the beacon, if the device
    /// read it. Falls back to the registered value.
    pub tx_power: Option<i16>,
}

impl ProximityEvidence {
    /// Evidence with only an RSSI reading.
    #[must_use]
    pub const fn rssi(rssi: i16) -> Self {
        Self {
            rssi,
            tx_power: None,
        }
    }
}

/// Result of [`ProximitySessionManager::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProximityValidation {
    /// Whether proximity is proven.
    pub valid: bool,

    /// Session after the call.
    pub session: ProximitySession,
}

/// Log-distance path loss estimate in metres.
///
/// `d = 10 ^ ((tx_power - rssi) / (10 * n))`
///
/// # Examples
///
/// ```
/// # use festival_access::proximity::estimate_distance;
/// assert!((estimate_distance(-59, -59, 2.0) - 1.0).abs() < 1e-9);
/// assert!((estimate_distance(-59, -79, 2.0) - 10.0).abs() < 1e-9);
/// ```
#[must_use]
pub fn estimate_distance(tx_power: i16, rssi: i16, path_loss_exponent: f64) -> f64 {
    let exponent = (f64::from(tx_power) - f64::from(rssi)) / (10.0 * path_loss_exponent);
    10f64.powf(exponent)
}

/// Manages proximity sessions.
pub struct ProximitySessionManager<B, S> {
    beacons: B,
    sessions: S,
    clock: SharedClock,
    config: ProximityConfig,
}

impl<B, S> ProximitySessionManager<B, S>
where
    B: BeaconRegistry,
    S: ProximitySessionRepository,
{
    /// Create a session manager.
    #[must_use]
    pub const fn new(beacons: B, sessions: S, clock: SharedClock, config: ProximityConfig) -> Self {
        Self {
            beacons,
            sessions,
            clock,
            config,
        }
    }

    /// Open a pending session bound to a beacon, user and device.
    ///
    /// # Errors
    ///
    /// - [`AccessError::NotFound`] if the beacon is unknown or inactive
    /// - Storage errors
    pub async fn start(
        &self,
        beacon_id: BeaconId,
        user_id: UserId,
        device_id: DeviceId,
        evidence: ProximityEvidence,
    ) -> Result<ProximitySession> {
        self.active_beacon(beacon_id).await?;

        let now = self.clock.now();
        let session = ProximitySession {
            session_id: SessionId::new(),
            session_token: generate_session_token(),
            beacon_id,
            user_id,
            device_id,
            state: SessionState::Pending,
            created_at: now,
            expires_at: now + self.config.session_ttl,
            last_rssi: evidence.rssi,
            validated_at: None,
        };

        self.sessions.create_session(&session).await?;

        tracing::info!(
            session_id = %session.session_id,
            beacon_id = %beacon_id,
            user_id = %user_id,
            rssi = evidence.rssi,
            "Started proximity session"
        );

        Ok(session)
    }

    /// Submit evidence for a session.
    ///
    /// A validated session returns its cached result without re-checking
    /// evidence. Evidence that is too weak returns `valid: false` and the
    /// session stays pending.
    ///
    /// # Errors
    ///
    /// - [`AccessError::NotFound`] for an unknown session or a beacon that
    ///   has since been removed
    /// - [`AccessError::Expired`] once the TTL has passed
    /// - [`AccessError::AlreadyUsed`] for a cancelled session
    pub async fn validate(
        &self,
        session_token: &str,
        evidence: ProximityEvidence,
    ) -> Result<ProximityValidation> {
        let now = self.clock.now();
        let session = self.load(session_token).await?;

        if session.state != SessionState::Pending {
            return Self::settled(session, now);
        }

        if session.expires_at <= now {
            self.expire_lazily(&session, now).await?;
            return Err(AccessError::Expired { entity: SESSION });
        }

        let beacon = self.active_beacon(session.beacon_id).await?;
        if !self.is_near(&beacon, evidence) {
            tracing::debug!(
                session_id = %session.session_id,
                rssi = evidence.rssi,
                min_rssi = beacon.min_rssi,
                "Proximity evidence insufficient"
            );
            return Ok(ProximityValidation {
                valid: false,
                session,
            });
        }

        match self
            .sessions
            .transition(session_token, SessionState::Validated, Some(evidence.rssi), now)
            .await?
        {
            Some(validated) => {
                tracing::info!(
                    session_id = %validated.session_id,
                    beacon_id = %validated.beacon_id,
                    rssi = evidence.rssi,
                    "Proximity session validated"
                );
                Ok(ProximityValidation {
                    valid: true,
                    session: validated,
                })
            }
            // Another request moved it first
            None => Self::settled(self.load(session_token).await?, now),
        }
    }

    /// Cancel a pending session.
    ///
    /// # Returns
    ///
    /// `false` if the session was missing or already terminal.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    pub async fn cancel(&self, session_token: &str) -> Result<bool> {
        let now = self.clock.now();
        let cancelled = self
            .sessions
            .transition(session_token, SessionState::Cancelled, None, now)
            .await?;

        if let Some(session) = &cancelled {
            tracing::info!(session_id = %session.session_id, "Proximity session cancelled");
        }

        Ok(cancelled.is_some())
    }

    /// Read a session with its state as of now.
    ///
    /// # Errors
    ///
    /// - [`AccessError::NotFound`] for an unknown session
    /// - Storage errors
    pub async fn session(&self, session_token: &str) -> Result<ProximitySession> {
        let now = self.clock.now();
        let mut session = self.load(session_token).await?;

        if session.state == SessionState::Pending && session.expires_at <= now {
            self.expire_lazily(&session, now).await?;
        }

        session.state = session.effective_state(now);
        Ok(session)
    }

    /// An installed, active beacon.
    ///
    /// # Errors
    ///
    /// - [`AccessError::NotFound`] if the beacon is unknown or inactive
    /// - Storage errors
    pub async fn beacon(&self, beacon_id: BeaconId) -> Result<Beacon> {
        self.active_beacon(beacon_id).await
    }

    /// Mark every pending session past its TTL as expired.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let expired = self.sessions.sweep_expired(self.clock.now()).await?;
        if expired > 0 {
            metrics::counter!("festival_access_proximity_sessions_expired_total").increment(expired);
            tracing::info!(expired, "Expired stale proximity sessions");
        }
        Ok(expired)
    }

    fn is_near(&self, beacon: &Beacon, evidence: ProximityEvidence) -> bool {
        if evidence.rssi < beacon.min_rssi {
            return false;
        }

        let tx_power = evidence.tx_power.unwrap_or(beacon.tx_power);
        estimate_distance(tx_power, evidence.rssi, self.config.path_loss_exponent)
            <= self.config.max_distance_m
    }

    fn settled(session: ProximitySession, now: DateTime<Utc>) -> Result<ProximityValidation> {
        match session.effective_state(now) {
            SessionState::Validated => Ok(ProximityValidation {
                valid: true,
                session,
            }),
            SessionState::Cancelled => Err(AccessError::AlreadyUsed { entity: SESSION }),
            SessionState::Expired | SessionState::Pending => {
                Err(AccessError::Expired { entity: SESSION })
            }
        }
    }

    async fn expire_lazily(&self, session: &ProximitySession, now: DateTime<Utc>) -> Result<()> {
        if self
            .sessions
            .transition(&session.session_token, SessionState::Expired, None, now)
            .await?
            .is_some()
        {
            tracing::debug!(session_id = %session.session_id, "Proximity session expired");
        }
        Ok(())
    }

    async fn load(&self, session_token: &str) -> Result<ProximitySession> {
        self.sessions
            .get_session(session_token)
            .await?
            .ok_or(AccessError::not_found(SESSION))
    }

    async fn active_beacon(&self, beacon_id: BeaconId) -> Result<Beacon> {
        match self.beacons.get_beacon(beacon_id).await? {
            Some(beacon) if beacon.is_active => Ok(beacon),
            _ => Err(AccessError::not_found("beacon")),
        }
    }
}

/// 256-bit random session token, base64url without padding.
fn generate_session_token() -> String {
    use base64::Engine;
    use rand::RngCore;

    let mut random_bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut random_bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random_bytes)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::mocks::{FixedClock, MockStore};
    use crate::state::FestivalId;
    use chrono::Duration;
    use std::sync::Arc;

    struct Fixture {
        clock: Arc<FixedClock>,
        beacon: Beacon,
        manager: ProximitySessionManager<MockStore, MockStore>,
    }

    fn fixture() -> Fixture {
        let store = MockStore::new();
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let beacon = Beacon {
            beacon_id: BeaconId::new(),
            festival_id: FestivalId::new(),
            name: "North Gate 1".to_string(),
            min_rssi: -75,
            tx_power: -59,
            is_active: true,
        };
        store.insert_beacon(beacon.clone()).unwrap();

        let manager = ProximitySessionManager::new(
            store.clone(),
            store,
            clock.clone(),
            ProximityConfig::default(),
        );
        Fixture {
            clock,
            beacon,
            manager,
        }
    }

    async fn start(f: &Fixture) -> ProximitySession {
        f.manager
            .start(
                f.beacon.beacon_id,
                UserId::new(),
                DeviceId::new("phone-1"),
                ProximityEvidence::rssi(-80),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_unknown_beacon_rejected() {
        let f = fixture();
        let result = f
            .manager
            .start(
                BeaconId::new(),
                UserId::new(),
                DeviceId::new("phone-1"),
                ProximityEvidence::rssi(-60),
            )
            .await;
        assert_eq!(result, Err(AccessError::not_found("beacon")));
    }

    #[tokio::test]
    async fn test_weak_signal_stays_pending() {
        let f = fixture();
        let session = start(&f).await;

        let outcome = f
            .manager
            .validate(&session.session_token, ProximityEvidence::rssi(-80))
            .await
            .unwrap();
        assert!(!outcome.valid);
        assert_eq!(outcome.session.state, SessionState::Pending);
    }

    #[tokio::test]
    async fn test_min_rssi_met_but_too_far() {
        let f = fixture();
        let session = start(&f).await;

        // -74 dBm clears min_rssi but estimates ~5.6 m from a -59 dBm beacon
        let outcome = f
            .manager
            .validate(&session.session_token, ProximityEvidence::rssi(-74))
            .await
            .unwrap();
        assert!(!outcome.valid);
    }

    #[tokio::test]
    async fn test_strong_signal_validates_idempotently() {
        let f = fixture();
        let session = start(&f).await;

        let first = f
            .manager
            .validate(&session.session_token, ProximityEvidence::rssi(-62))
            .await
            .unwrap();
        assert!(first.valid);
        assert_eq!(first.session.state, SessionState::Validated);
        assert_eq!(first.session.last_rssi, -62);

        // Cached result even with weak evidence
        let second = f
            .manager
            .validate(&session.session_token, ProximityEvidence::rssi(-90))
            .await
            .unwrap();
        assert!(second.valid);
        assert_eq!(second.session.validated_at, first.session.validated_at);
    }

    #[tokio::test]
    async fn test_expired_session_transitions_lazily() {
        let f = fixture();
        let session = start(&f).await;
        f.clock.advance(Duration::minutes(6));

        let result = f
            .manager
            .validate(&session.session_token, ProximityEvidence::rssi(-60))
            .await;
        assert_eq!(result, Err(AccessError::Expired { entity: SESSION }));

        let stored = f.manager.session(&session.session_token).await.unwrap();
        assert_eq!(stored.state, SessionState::Expired);
    }

    #[tokio::test]
    async fn test_cancelled_session_cannot_validate() {
        let f = fixture();
        let session = start(&f).await;

        assert!(f.manager.cancel(&session.session_token).await.unwrap());
        assert!(!f.manager.cancel(&session.session_token).await.unwrap());

        let result = f
            .manager
            .validate(&session.session_token, ProximityEvidence::rssi(-60))
            .await;
        assert_eq!(result, Err(AccessError::AlreadyUsed { entity: SESSION }));
    }

    #[tokio::test]
    async fn test_sweep_expires_pending_only() {
        let f = fixture();
        let pending = start(&f).await;
        let validated = start(&f).await;
        f.manager
            .validate(&validated.session_token, ProximityEvidence::rssi(-60))
            .await
            .unwrap();

        f.clock.advance(Duration::minutes(6));
        assert_eq!(f.manager.sweep_expired().await.unwrap(), 1);

        let swept = f.manager.session(&pending.session_token).await.unwrap();
        assert_eq!(swept.state, SessionState::Expired);
    }

    #[test]
    fn test_tx_power_override() {
        // Same RSSI, hotter beacon: farther away
        assert!(estimate_distance(-50, -65, 2.0) > estimate_distance(-59, -65, 2.0));
    }
}
