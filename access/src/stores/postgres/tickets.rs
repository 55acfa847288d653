//! Tickets, festivals and the beacon registry.

use super::{PostgresStore, column, db_error};
use crate::error::Result;
use crate::providers::{BeaconRegistry, TicketRepository};
use crate::state::{
    Beacon, BeaconId, BiometricType, EntryPolicy, Festival, FestivalId, Ticket, TicketId,
    TicketStatus, UserId,
};
use sqlx::postgres::PgRow;

fn row_to_ticket(row: &PgRow) -> Result<Ticket> {
    let status: String = column(row, "status")?;
    Ok(Ticket {
        ticket_id: TicketId(column(row, "ticket_id")?),
        user_id: UserId(column(row, "user_id")?),
        festival_id: FestivalId(column(row, "festival_id")?),
        template_id: column(row, "template_id")?,
        holder_name: column(row, "holder_name")?,
        status: TicketStatus::parse(&status)?,
        valid_from: column(row, "valid_from")?,
        valid_to: column(row, "valid_to")?,
    })
}

fn row_to_festival(row: &PgRow) -> Result<Festival> {
    let biometric_type: String = column(row, "biometric_type")?;
    Ok(Festival {
        festival_id: FestivalId(column(row, "festival_id")?),
        name: column(row, "name")?,
        starts_at: column(row, "starts_at")?,
        ends_at: column(row, "ends_at")?,
        entry_policy: EntryPolicy {
            require_proximity: column(row, "require_proximity")?,
            require_biometric: column(row, "require_biometric")?,
            biometric_type: BiometricType::parse(&biometric_type)?,
            credential_rotation_secs: column(row, "credential_rotation_secs")?,
        },
    })
}

fn row_to_beacon(row: &PgRow) -> Result<Beacon> {
    Ok(Beacon {
        beacon_id: BeaconId(column(row, "beacon_id")?),
        festival_id: FestivalId(column(row, "festival_id")?),
        name: column(row, "name")?,
        min_rssi: column(row, "min_rssi")?,
        tx_power: column(row, "tx_power")?,
        is_active: column(row, "is_active")?,
    })
}

impl PostgresStore {
    /// Insert or replace a festival and its entry policy.
    ///
    /// Festivals are provisioned by the ticket sales system; this is the
    /// seeding path for operators and tests.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    pub async fn upsert_festival(&self, festival: &Festival) -> Result<()> {
        let policy = &festival.entry_policy;
        sqlx::query(
            r"
            INSERT INTO festivals
                (festival_id, name, starts_at, ends_at, require_proximity,
                 require_biometric, biometric_type, credential_rotation_secs)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (festival_id) DO UPDATE SET
                name = EXCLUDED.name,
                starts_at = EXCLUDED.starts_at,
                ends_at = EXCLUDED.ends_at,
                require_proximity = EXCLUDED.require_proximity,
                require_biometric = EXCLUDED.require_biometric,
                biometric_type = EXCLUDED.biometric_type,
                credential_rotation_secs = EXCLUDED.credential_rotation_secs
            ",
        )
        .bind(festival.festival_id.0)
        .bind(&festival.name)
        .bind(festival.starts_at)
        .bind(festival.ends_at)
        .bind(policy.require_proximity)
        .bind(policy.require_biometric)
        .bind(policy.biometric_type.as_str())
        .bind(policy.credential_rotation_secs)
        .execute(&self.pool)
        .await
        .map_err(db_error("upsert festival"))?;
        Ok(())
    }

    /// Insert a ticket.
    ///
    /// # Errors
    ///
    /// Returns error if the ticket exists or the storage operation fails.
    pub async fn insert_ticket(&self, ticket: &Ticket) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO tickets
                (ticket_id, user_id, festival_id, template_id, holder_name,
                 status, valid_from, valid_to)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(ticket.ticket_id.0)
        .bind(ticket.user_id.0)
        .bind(ticket.festival_id.0)
        .bind(ticket.template_id)
        .bind(&ticket.holder_name)
        .bind(ticket.status.as_str())
        .bind(ticket.valid_from)
        .bind(ticket.valid_to)
        .execute(&self.pool)
        .await
        .map_err(db_error("insert ticket"))?;
        Ok(())
    }

    /// Register or update a beacon.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    pub async fn upsert_beacon(&self, beacon: &Beacon) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO beacons (beacon_id, festival_id, name, min_rssi, tx_power, is_active)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (beacon_id) DO UPDATE SET
                name = EXCLUDED.name,
                min_rssi = EXCLUDED.min_rssi,
                tx_power = EXCLUDED.tx_power,
                is_active = EXCLUDED.is_active
            ",
        )
        .bind(beacon.beacon_id.0)
        .bind(beacon.festival_id.0)
        .bind(&beacon.name)
        .bind(beacon.min_rssi)
        .bind(beacon.tx_power)
        .bind(beacon.is_active)
        .execute(&self.pool)
        .await
        .map_err(db_error("upsert beacon"))?;
        Ok(())
    }
}

impl TicketRepository for PostgresStore {
    async fn get_ticket(&self, ticket_id: TicketId) -> Result<Option<Ticket>> {
        sqlx::query(
            r"
            SELECT ticket_id, user_id, festival_id, template_id, holder_name,
                   status, valid_from, valid_to
            FROM tickets
            WHERE ticket_id = $1
            ",
        )
        .bind(ticket_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("load ticket"))?
        .as_ref()
        .map(row_to_ticket)
        .transpose()
    }

    async fn get_festival(&self, festival_id: FestivalId) -> Result<Option<Festival>> {
        sqlx::query(
            r"
            SELECT festival_id, name, starts_at, ends_at, require_proximity,
                   require_biometric, biometric_type, credential_rotation_secs
            FROM festivals
            WHERE festival_id = $1
            ",
        )
        .bind(festival_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("load festival"))?
        .as_ref()
        .map(row_to_festival)
        .transpose()
    }

    async fn cancel_ticket(&self, ticket_id: TicketId) -> Result<bool> {
        let result = sqlx::query(
            r"UPDATE tickets SET status = 'cancelled' WHERE ticket_id = $1 AND status = 'active'",
        )
        .bind(ticket_id.0)
        .execute(&self.pool)
        .await
        .map_err(db_error("cancel ticket"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn transfer_ticket(
        &self,
        ticket_id: TicketId,
        new_user_id: UserId,
        holder_name: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE tickets
            SET user_id = $2, holder_name = $3
            WHERE ticket_id = $1 AND status = 'active'
            ",
        )
        .bind(ticket_id.0)
        .bind(new_user_id.0)
        .bind(holder_name)
        .execute(&self.pool)
        .await
        .map_err(db_error("transfer ticket"))?;

        Ok(result.rows_affected() == 1)
    }
}

impl BeaconRegistry for PostgresStore {
    async fn get_beacon(&self, beacon_id: BeaconId) -> Result<Option<Beacon>> {
        sqlx::query(
            r"
            SELECT beacon_id, festival_id, name, min_rssi, tx_power, is_active
            FROM beacons
            WHERE beacon_id = $1
            ",
        )
        .bind(beacon_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("load beacon"))?
        .as_ref()
        .map(row_to_beacon)
        .transpose()
    }
}
