use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::StorageError;
use crate::schema::{SampleRow, StationId, StationIdentity};

use super::Storage;

/// Postgres allows at most 65535 bind parameters per statement;
/// each row binds five.
const MAX_ROWS_PER_STATEMENT: usize = 10_000;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS pricemonitor_stations (
        id uuid PRIMARY KEY,
        address text NOT NULL,
        geo_location text NOT NULL,
        brand text NOT NULL,
        CONSTRAINT pricemonitor_stations_identity UNIQUE (address, geo_location, brand)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pricemonitor_samples (
        id uuid NOT NULL,
        fuel_name text NOT NULL,
        price real NOT NULL,
        time timestamptz NOT NULL,
        station_id uuid NOT NULL REFERENCES pricemonitor_stations (id),
        PRIMARY KEY (id, fuel_name)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS pricemonitor_samples_station_time
        ON pricemonitor_samples (station_id, time DESC)
    "#,
];

/// Postgres-backed storage.
#[derive(Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub async fn connect(
        options: PgConnectOptions,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the tables and indexes if they are missing.
    pub async fn ensure_schema(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Storage for PgStorage {
    async fn upsert_station(&self, identity: &StationIdentity) -> Result<StationId, StorageError> {
        // DO UPDATE (not DO NOTHING) so RETURNING yields the existing row
        // when another writer won the insert race.
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO pricemonitor_stations (id, address, geo_location, brand)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (address, geo_location, brand)
                DO UPDATE SET brand = EXCLUDED.brand
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&identity.address)
        .bind(&identity.geo_location)
        .bind(identity.brand.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(StationId(id))
    }

    async fn create_samples(&self, rows: &[SampleRow]) -> Result<u64, StorageError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for chunk in rows.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO pricemonitor_samples (id, fuel_name, price, time, station_id) ",
            );
            builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.sample_id)
                    .push_bind(&row.fuel_name)
                    .push_bind(row.price)
                    .push_bind(row.time)
                    .push_bind(row.station_id.0);
            });
            builder.push(" ON CONFLICT (id, fuel_name) DO NOTHING");

            inserted += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;

        if inserted < rows.len() as u64 {
            log::warn!(
                "skipped {} duplicate sample rows",
                rows.len() as u64 - inserted
            );
        }

        Ok(inserted)
    }
}
