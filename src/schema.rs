use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Station brands with a scraper implementation.
///
/// The lowercase name doubles as the identifier prefix
/// (`shell:...`, `aral:...`) and as the stored `brand` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Brand {
    Shell,
    Aral,
}

impl Brand {
    pub fn as_str(self) -> &'static str {
        match self {
            Brand::Shell => "shell",
            Brand::Aral => "aral",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "shell" => Some(Brand::Shell),
            "aral" => Some(Brand::Aral),
            _ => None,
        }
    }
}

impl fmt::Display for Brand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ------------------------------------------------------------
// Sample
// ------------------------------------------------------------
//
// One scrape result for one station.
//
// Produced by a station scraper, consumed by the batch collector,
// which flattens it into rows and drops it.
//
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    /// Generated per scrape, shared by all rows of this sample
    pub id: Uuid,

    /// Canonical fuel name -> price (EUR per litre)
    pub prices: HashMap<String, f32>,

    /// Capture time
    pub time: DateTime<Utc>,

    /// Free-text postal address as published by the vendor
    pub address: String,

    /// "lat,lng" or a vendor-specific encoding
    pub geo_location: String,

    pub brand: Brand,
}

impl Sample {
    pub fn new(
        brand: Brand,
        address: String,
        geo_location: String,
        prices: HashMap<String, f32>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            prices,
            time: Utc::now(),
            address,
            geo_location,
            brand,
        }
    }

    /// Natural key of the physical station this sample was taken at.
    pub fn identity(&self) -> StationIdentity {
        StationIdentity {
            address: self.address.clone(),
            geo_location: self.geo_location.clone(),
            brand: self.brand,
        }
    }

    /// Expands the sample into one row per fuel price.
    pub fn into_rows(self, station_id: StationId) -> impl Iterator<Item = SampleRow> {
        let Sample { id, prices, time, .. } = self;
        prices.into_iter().map(move |(fuel_name, price)| SampleRow {
            sample_id: id,
            fuel_name,
            price,
            time,
            station_id,
        })
    }
}

/// Deduplication key for stations across repeated scrapes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StationIdentity {
    pub address: String,
    pub geo_location: String,
    pub brand: Brand,
}

/// Storage-assigned station identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct StationId(pub Uuid);

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Flattened persistence unit: one fuel price at one resolved station.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleRow {
    pub sample_id: Uuid,
    pub fuel_name: String,
    pub price: f32,
    pub time: DateTime<Utc>,
    pub station_id: StationId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn into_rows_expands_every_price() {
        let sample = Sample::new(
            Brand::Aral,
            "Ensheimer Strasse 152, 66386 St. Ingbert".to_string(),
            "49.27,7.12".to_string(),
            HashMap::from([
                ("Super E10".to_string(), 1.739),
                ("Diesel".to_string(), 1.659),
            ]),
        );
        let sample_id = sample.id;
        let station = StationId(Uuid::new_v4());

        let mut rows: Vec<SampleRow> = sample.into_rows(station).collect();
        rows.sort_by(|a, b| a.fuel_name.cmp(&b.fuel_name));

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].fuel_name, "Diesel");
        assert_eq!(rows[1].fuel_name, "Super E10");
        assert!(rows.iter().all(|r| r.sample_id == sample_id && r.station_id == station));
        assert_eq!(rows[0].time, rows[1].time);
    }

    #[test]
    fn identity_ignores_prices_and_time() {
        let a = Sample::new(Brand::Shell, "A".into(), "1,2".into(), HashMap::new());
        let b = Sample::new(
            Brand::Shell,
            "A".into(),
            "1,2".into(),
            HashMap::from([("Diesel".to_string(), 1.5)]),
        );
        assert_ne!(a.id, b.id);
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn brand_prefix_round_trips() {
        for brand in [Brand::Shell, Brand::Aral] {
            assert_eq!(Brand::from_prefix(brand.as_str()), Some(brand));
        }
        assert_eq!(Brand::from_prefix("esso"), None);
    }
}
