//! Storage backends
//!
//! The collector only talks to the `Storage` trait:
//! - `postgres`: the real time-series store (sqlx / Postgres)
//! - `demo`:     in-memory identities, rows are logged instead of written

pub mod demo;
pub mod postgres;

use crate::error::StorageError;
use crate::schema::{SampleRow, StationId, StationIdentity};

/// Persistence boundary of the ingestion pipeline.
///
/// CONTRACT:
/// - `upsert_station` is an atomic insert-or-fetch on
///   (address, geo_location, brand): repeated and concurrent calls for
///   the same identity return the same id
/// - `create_samples` is all-or-nothing for the given rows
/// - Implementations must be safe to share across tasks
///
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    async fn upsert_station(&self, identity: &StationIdentity) -> Result<StationId, StorageError>;

    /// Returns the number of rows written.
    async fn create_samples(&self, rows: &[SampleRow]) -> Result<u64, StorageError>;
}
