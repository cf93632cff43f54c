use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::StorageError;
use crate::schema::{StationId, StationIdentity};
use crate::storage::Storage;

/// Maps a station's natural key to its storage id.
///
/// Owned by the collector task, so the cache needs no locking.
/// A miss goes to `Storage::upsert_station`, which is an atomic
/// insert-or-fetch; the cache only saves round-trips for stations
/// that were already resolved by this process.
pub struct StationResolver {
    storage: Arc<dyn Storage>,
    timeout: Duration,
    cache: HashMap<StationIdentity, StationId>,
}

impl StationResolver {
    pub fn new(storage: Arc<dyn Storage>, timeout: Duration) -> Self {
        Self {
            storage,
            timeout,
            cache: HashMap::new(),
        }
    }

    pub async fn resolve(&mut self, identity: StationIdentity) -> Result<StationId, StorageError> {
        if let Some(id) = self.cache.get(&identity) {
            return Ok(*id);
        }

        let id = tokio::time::timeout(self.timeout, self.storage.upsert_station(&identity))
            .await
            .map_err(|_| StorageError::Timeout(self.timeout))??;

        log::debug!(
            "resolved {} station at '{}' ({}) to {}",
            identity.brand,
            identity.address,
            identity.geo_location,
            id
        );
        self.cache.insert(identity, id);
        Ok(id)
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}
