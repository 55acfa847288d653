//! In-memory beacon registry and session store.

use super::MockStore;
use crate::error::{AccessError, Result};
use crate::providers::{BeaconRegistry, ProximitySessionRepository};
use crate::state::{Beacon, BeaconId, ProximitySession, SessionState};
use chrono::{DateTime, Utc};

impl BeaconRegistry for MockStore {
    async fn get_beacon(&self, beacon_id: BeaconId) -> Result<Option<Beacon>> {
        Ok(self.tables()?.beacons.get(&beacon_id).cloned())
    }
}

impl ProximitySessionRepository for MockStore {
    async fn create_session(&self, session: &ProximitySession) -> Result<()> {
        let mut tables = self.tables()?;
        if tables.sessions.contains_key(&session.session_token) {
            return Err(AccessError::InternalError(
                "Session token already exists".to_string(),
            ));
        }
        tables
            .sessions
            .insert(session.session_token.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, session_token: &str) -> Result<Option<ProximitySession>> {
        Ok(self.tables()?.sessions.get(session_token).cloned())
    }

    async fn transition(
        &self,
        session_token: &str,
        to: SessionState,
        rssi: Option<i16>,
        now: DateTime<Utc>,
    ) -> Result<Option<ProximitySession>> {
        let mut tables = self.tables()?;
        let Some(session) = tables.sessions.get_mut(session_token) else {
            return Ok(None);
        };

        let allowed = session.state == SessionState::Pending
            && match to {
                SessionState::Expired => session.expires_at <= now,
                SessionState::Validated | SessionState::Cancelled => session.expires_at > now,
                SessionState::Pending => false,
            };
        if !allowed {
            return Ok(None);
        }

        session.state = to;
        if let Some(rssi) = rssi {
            session.last_rssi = rssi;
        }
        if to == SessionState::Validated {
            session.validated_at = Some(now);
        }
        Ok(Some(session.clone()))
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut count = 0;
        for session in self.tables()?.sessions.values_mut() {
            if session.state == SessionState::Pending && session.expires_at <= now {
                session.state = SessionState::Expired;
                count += 1;
            }
        }
        Ok(count)
    }
}
