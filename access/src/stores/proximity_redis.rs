//! Redis-based proximity session store.
//!
//! # Architecture
//!
//! - **Session key**: `proximity_session:{token}` → bincode-serialized `ProximitySession`
//! - **Pending index**: `proximity_sessions:pending` sorted set, scored by `expires_at`
//! - **TTL**: session lifetime plus the configured retention, so terminal
//!   sessions stay readable for audits and then disappear
//!
//! # Atomicity
//!
//! Transitions are a compare-and-swap on the serialized session: the Lua
//! script only writes the new value if the key still holds the exact bytes
//! that were read as `pending`. Two scanners racing on one session cannot
//! both win.
//!
//! # Example
//!
//! ```no_run
//! use festival_access::stores::RedisProximityStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisProximityStore::new("redis://127.0.0.1:6379", chrono::Duration::hours(1)).await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{AccessError, Result};
use crate::providers::ProximitySessionRepository;
use crate::state::{ProximitySession, SessionState};
use chrono::{DateTime, Duration, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

const PENDING_INDEX_KEY: &str = "proximity_sessions:pending";

/// `SET NX` plus index registration.
const CREATE_SCRIPT: &str = r"
if redis.call('SET', KEYS[1], ARGV[1], 'NX', 'EX', ARGV[2]) then
    redis.call('ZADD', KEYS[2], ARGV[3], ARGV[4])
    return 1
end
return 0
";

/// Compare-and-swap on the serialized session.
const TRANSITION_SCRIPT: &str = r"
local current = redis.call('GET', KEYS[1])
if current ~= ARGV[1] then
    return 0
end
redis.call('SET', KEYS[1], ARGV[2], 'KEEPTTL')
redis.call('ZREM', KEYS[2], ARGV[3])
return 1
";

/// `Redis`-backed [`ProximitySessionRepository`].
#[derive(Clone)]
pub struct RedisProximityStore {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,

    /// How long sessions remain readable after their TTL.
    retention: Duration,
}

impl RedisProximityStore {
    /// Connect to `Redis`.
    ///
    /// # Errors
    ///
    /// Returns error if connection to `Redis` fails.
    pub async fn new(redis_url: &str, retention: Duration) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            AccessError::InternalError(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            AccessError::InternalError(format!("Failed to create Redis connection manager: {e}"))
        })?;

        Ok(Self {
            conn_manager,
            retention,
        })
    }

    fn session_key(session_token: &str) -> String {
        format!("proximity_session:{session_token}")
    }

    /// Key lifetime: session TTL plus retention, at least one second.
    #[allow(clippy::cast_sign_loss)]
    fn key_ttl_seconds(session: &ProximitySession, retention: Duration) -> u64 {
        let lifetime = (session.expires_at - session.created_at) + retention;
        lifetime.num_seconds().max(1) as u64
    }

    fn encode(session: &ProximitySession) -> Result<Vec<u8>> {
        bincode::serialize(session).map_err(|e| AccessError::SerializationError(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<ProximitySession> {
        bincode::deserialize(bytes).map_err(|e| AccessError::SerializationError(e.to_string()))
    }

    async fn load_raw(&self, session_token: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn_manager.clone();
        conn.get(Self::session_key(session_token))
            .await
            .map_err(|e| AccessError::InternalError(format!("Failed to get proximity session: {e}")))
    }
}

impl ProximitySessionRepository for RedisProximityStore {
    async fn create_session(&self, session: &ProximitySession) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let ttl_seconds = Self::key_ttl_seconds(session, self.retention);

        let created: i32 = redis::Script::new(CREATE_SCRIPT)
            .key(Self::session_key(&session.session_token))
            .key(PENDING_INDEX_KEY)
            .arg(Self::encode(session)?)
            .arg(ttl_seconds)
            .arg(session.expires_at.timestamp())
            .arg(&session.session_token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                AccessError::InternalError(format!("Failed to create proximity session: {e}"))
            })?;

        if created == 0 {
            return Err(AccessError::InternalError(
                "Session token already exists".to_string(),
            ));
        }

        tracing::debug!(
            session_id = %session.session_id,
            beacon_id = %session.beacon_id,
            ttl_seconds = ttl_seconds,
            "Stored proximity session in Redis"
        );
        Ok(())
    }

    async fn get_session(&self, session_token: &str) -> Result<Option<ProximitySession>> {
        self.load_raw(session_token)
            .await?
            .as_deref()
            .map(Self::decode)
            .transpose()
    }

    async fn transition(
        &self,
        session_token: &str,
        to: SessionState,
        rssi: Option<i16>,
        now: DateTime<Utc>,
    ) -> Result<Option<ProximitySession>> {
        let Some(current) = self.load_raw(session_token).await? else {
            return Ok(None);
        };
        let mut session = Self::decode(&current)?;

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

        let mut conn = self.conn_manager.clone();
        let swapped: i32 = redis::Script::new(TRANSITION_SCRIPT)
            .key(Self::session_key(session_token))
            .key(PENDING_INDEX_KEY)
            .arg(current)
            .arg(Self::encode(&session)?)
            .arg(session_token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                AccessError::InternalError(format!("Failed to transition proximity session: {e}"))
            })?;

        if swapped == 0 {
            tracing::debug!(
                session_id = %session.session_id,
                to = to.as_str(),
                "Lost proximity session transition race"
            );
            return Ok(None);
        }

        Ok(Some(session))
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut conn = self.conn_manager.clone();
        let due: Vec<String> = conn
            .zrangebyscore(PENDING_INDEX_KEY, "-inf", now.timestamp())
            .await
            .map_err(|e| {
                AccessError::InternalError(format!("Failed to scan pending sessions: {e}"))
            })?;

        let mut expired = 0;
        for token in &due {
            if self
                .transition(token, SessionState::Expired, None, now)
                .await?
                .is_some()
            {
                expired += 1;
            }
        }

        // Entries whose session key already aged out
        if !due.is_empty() {
            let _: () = conn.zrem(PENDING_INDEX_KEY, &due).await.map_err(|e| {
                AccessError::InternalError(format!("Failed to prune pending index: {e}"))
            })?;
        }

        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::state::{BeaconId, DeviceId, SessionId, UserId};

    fn pending_session(token: &str, ttl: Duration) -> ProximitySession {
        let now = Utc::now();
        ProximitySession {
            session_id: SessionId::new(),
            session_token: token.to_string(),
            beacon_id: BeaconId::new(),
            user_id: UserId::new(),
            device_id: DeviceId::new("device-1"),
            state: SessionState::Pending,
            created_at: now,
            expires_at: now + ttl,
            last_rssi: 0,
            validated_at: None,
        }
    }

    #[test]
    fn test_key_ttl_includes_retention() {
        let session = pending_session("tok", Duration::minutes(5));
        assert_eq!(
            RedisProximityStore::key_ttl_seconds(&session, Duration::hours(1)),
            3900
        );
        assert_eq!(
            RedisProximityStore::key_ttl_seconds(&session, Duration::minutes(-10)),
            1
        );
    }

    #[test]
    fn test_session_encoding_round_trips() {
        let session = pending_session("tok", Duration::minutes(5));
        let bytes = RedisProximityStore::encode(&session).unwrap();
        assert_eq!(RedisProximityStore::decode(&bytes).unwrap(), session);
        assert!(RedisProximityStore::decode(&bytes[..3]).is_err());
    }

    #[tokio::test]
    #[ignore = "Requires Redis running"]
    async fn test_concurrent_validation_has_one_winner() {
        let store = RedisProximityStore::new("redis://127.0.0.1:6379", Duration::hours(1))
            .await
            .unwrap();
        let token = format!("test-{}", uuid::Uuid::new_v4());
        let session = pending_session(&token, Duration::minutes(5));
        store.create_session(&session).await.unwrap();
        assert!(store.create_session(&session).await.is_err());

        let now = Utc::now();
        let attempts = (0..8).map(|i| {
            let store = store.clone();
            let token = token.clone();
            async move {
                store
                    .transition(&token, SessionState::Validated, Some(-50 - i), now)
                    .await
                    .unwrap()
            }
        });
        let winners = futures::future::join_all(attempts)
            .await
            .into_iter()
            .flatten()
            .count();
        assert_eq!(winners, 1);

        let stored = store.get_session(&token).await.unwrap().unwrap();
        assert_eq!(stored.state, SessionState::Validated);
        assert!(stored.validated_at.is_some());
    }

    #[tokio::test]
    #[ignore = "Requires Redis running"]
    async fn test_sweep_expires_only_overdue_sessions() {
        let store = RedisProximityStore::new("redis://127.0.0.1:6379", Duration::hours(1))
            .await
            .unwrap();
        let overdue = pending_session(&format!("test-{}", uuid::Uuid::new_v4()), Duration::seconds(1));
        let fresh = pending_session(&format!("test-{}", uuid::Uuid::new_v4()), Duration::minutes(5));
        store.create_session(&overdue).await.unwrap();
        store.create_session(&fresh).await.unwrap();

        let later = Utc::now() + Duration::seconds(2);
        assert!(store.sweep_expired(later).await.unwrap() >= 1);

        let overdue = store.get_session(&overdue.session_token).await.unwrap().unwrap();
        assert_eq!(overdue.state, SessionState::Expired);
        let fresh = store.get_session(&fresh.session_token).await.unwrap().unwrap();
        assert_eq!(fresh.state, SessionState::Pending);
    }
}
