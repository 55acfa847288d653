//! Wrapped data encryption keys.

use super::{PostgresStore, column, db_error, is_unique_violation};
use crate::error::Result;
use crate::providers::KeyStore;
use crate::state::{EncryptionKey, KeyId, KeyType};
use sqlx::postgres::PgRow;

const KEY_COLUMNS: &str =
    "key_id, key_type, version, wrapped_key_material, is_active, created_at";

fn row_to_key(row: &PgRow) -> Result<EncryptionKey> {
    let key_type: String = column(row, "key_type")?;
    Ok(EncryptionKey {
        key_id: KeyId(column(row, "key_id")?),
        key_type: KeyType::parse(&key_type)?,
        version: column(row, "version")?,
        wrapped_key_material: column(row, "wrapped_key_material")?,
        is_active: column(row, "is_active")?,
        created_at: column(row, "created_at")?,
    })
}

impl KeyStore for PostgresStore {
    async fn active_key(&self, key_type: KeyType) -> Result<Option<EncryptionKey>> {
        let query = format!(
            "SELECT {KEY_COLUMNS} FROM encryption_keys
             WHERE key_type = $1 AND is_active
             ORDER BY version DESC
             LIMIT 1"
        );
        sqlx::query(&query)
            .bind(key_type.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("load active key"))?
            .as_ref()
            .map(row_to_key)
            .transpose()
    }

    async fn key_by_id(&self, key_id: KeyId) -> Result<Option<EncryptionKey>> {
        let query = format!("SELECT {KEY_COLUMNS} FROM encryption_keys WHERE key_id = $1");
        sqlx::query(&query)
            .bind(key_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("load key"))?
            .as_ref()
            .map(row_to_key)
            .transpose()
    }

    async fn latest_version(&self, key_type: KeyType) -> Result<i32> {
        let version: Option<i32> = sqlx::query_scalar(
            r"SELECT MAX(version) FROM encryption_keys WHERE key_type = $1",
        )
        .bind(key_type.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("read key version"))?;

        Ok(version.unwrap_or(0))
    }

    async fn insert_key(&self, key: &EncryptionKey) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO encryption_keys
                (key_id, key_type, version, wrapped_key_material, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(key.key_id.0)
        .bind(key.key_type.as_str())
        .bind(key.version)
        .bind(&key.wrapped_key_material)
        .bind(key.is_active)
        .bind(key.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(db_error("insert key")(e)),
        }
    }

    async fn deactivate_older(&self, key_type: KeyType, below_version: i32) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE encryption_keys
            SET is_active = FALSE
            WHERE key_type = $1 AND version < $2 AND is_active
            ",
        )
        .bind(key_type.as_str())
        .bind(below_version)
        .execute(&self.pool)
        .await
        .map_err(db_error("deactivate keys"))?;

        Ok(result.rows_affected())
    }
}
