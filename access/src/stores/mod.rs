//! Storage implementations for the access subsystem.
//!
//! - **Proximity Session Store** (Redis) - Ephemeral sessions with TTL and
//!   compare-and-swap transitions
//! - **Persistent Store** (PostgreSQL) - Keys, tickets, credentials, beacons,
//!   biometric templates and the validation audit trail

#[cfg(feature = "postgres")]
pub mod postgres;
pub mod proximity_redis;

// Re-exports
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;
pub use proximity_redis::RedisProximityStore;
