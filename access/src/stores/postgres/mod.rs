//! PostgreSQL storage implementations.
//!
//! A single [`PostgresStore`] backs every persistent provider:
//! - Wrapped data encryption keys
//! - Tickets, festivals and entry policies
//! - Sealed credentials with single-use state
//! - Beacon registry
//! - Biometric templates and the attempt log
//! - Validation audit trail
//!
//! Conditional writes (`WHERE is_used = FALSE`, `WHERE status = 'active'`)
//! carry the atomicity guarantees; the admission commit runs in one
//! transaction.
//!
//! # Example
//!
//! ```no_run
//! use festival_access::stores::postgres::PostgresStore;
//! use sqlx::PgPool;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = PgPool::connect("postgresql://localhost/festival").await?;
//! let store = PostgresStore::new(pool);
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

mod admission;
mod biometric;
mod credentials;
mod keys;
mod tickets;

use crate::error::{AccessError, Result};
use sqlx::PgPool;
use sqlx::postgres::PgRow;

/// PostgreSQL store.
#[derive(Clone)]
pub struct PostgresStore {
    /// PostgreSQL connection pool.
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns error if migrations fail.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AccessError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }
}

/// Map a driver error, naming the failed operation.
pub(crate) fn db_error(op: &'static str) -> impl Fn(sqlx::Error) -> AccessError {
    move |e| AccessError::DatabaseError(format!("Failed to {op}: {e}"))
}

/// Whether a driver error is a unique constraint violation.
pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

/// Read a column, mapping decode failures to [`AccessError::SerializationError`].
pub(crate) fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    use sqlx::Row;
    row.try_get(name)
        .map_err(|e| AccessError::SerializationError(format!("Column {name}: {e}")))
}
