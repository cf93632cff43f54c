use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

use crate::error::StorageError;
use crate::schema::{SampleRow, StationId, StationIdentity};

use super::Storage;

/// Storage backend for demo mode.
///
/// - No database connection
/// - Station identities live in memory for the lifetime of the process
/// - Every row is logged as JSON instead of written
///
/// Enabled with `PRICEMONITOR_DEMO=1`.
#[derive(Default)]
pub struct DemoStorage {
    stations: Mutex<HashMap<StationIdentity, StationId>>,
    rows_written: AtomicU64,
}

impl DemoStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn station_count(&self) -> usize {
        self.stations.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl Storage for DemoStorage {
    async fn upsert_station(&self, identity: &StationIdentity) -> Result<StationId, StorageError> {
        let mut stations = self
            .stations
            .lock()
            .map_err(|_| StorageError::Unavailable("station map poisoned".to_string()))?;

        let id = *stations
            .entry(identity.clone())
            .or_insert_with(|| StationId(Uuid::new_v4()));
        Ok(id)
    }

    async fn create_samples(&self, rows: &[SampleRow]) -> Result<u64, StorageError> {
        for row in rows {
            match serde_json::to_string(row) {
                Ok(json) => log::info!("DEMO -> {json}"),
                Err(err) => log::warn!("DEMO -> unserializable row: {err}"),
            }
        }
        self.rows_written.fetch_add(rows.len() as u64, Ordering::Relaxed);
        log::info!(
            "DEMO -> {} rows logged so far for {} stations",
            self.rows_written(),
            self.station_count()
        );
        Ok(rows.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Brand;
    use std::sync::Arc;

    fn identity(address: &str) -> StationIdentity {
        StationIdentity {
            address: address.to_string(),
            geo_location: "50.984800,11.029900".to_string(),
            brand: Brand::Shell,
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let storage = DemoStorage::new();

        let first = storage.upsert_station(&identity("A")).await.unwrap();
        let second = storage.upsert_station(&identity("A")).await.unwrap();
        let other = storage.upsert_station(&identity("B")).await.unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(storage.station_count(), 2);
    }

    #[tokio::test]
    async fn concurrent_first_upserts_agree() {
        let storage = Arc::new(DemoStorage::new());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let storage = storage.clone();
                tokio::spawn(async move { storage.upsert_station(&identity("A")).await.unwrap() })
            })
            .collect();

        let ids = futures_util::future::join_all(handles).await;
        let first = ids[0].as_ref().unwrap();
        assert!(ids.iter().all(|id| id.as_ref().unwrap() == first));
        assert_eq!(storage.station_count(), 1);
    }
}
