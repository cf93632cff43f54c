use crate::error::ScrapeError;
use crate::schema::{Brand, Sample};

/// Station is the abstraction layer between:
/// - The generic dispatcher runtime
/// - Brand-specific station pages and price APIs
///
/// Each brand implementation must:
/// - Fetch whatever pages / endpoints the brand requires
/// - Extract address, geo-location and prices
/// - Normalize everything into a `Sample`
///
/// DESIGN GOALS:
/// - Zero brand-specific logic outside the brand modules
/// - One implementation per brand
/// - Uniform output format across all brands
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - Station instances are shared with the worker tasks of every tick
/// - Safe to call repeatedly; different stations are scraped concurrently
///
#[async_trait::async_trait]
pub trait Station: Send + Sync {
    /// Brand this station belongs to.
    fn brand(&self) -> Brand;

    /// The configured identifier, including the brand prefix.
    ///
    /// Used for logging only; storage identity comes from the
    /// scraped address / geo-location instead.
    fn identifier(&self) -> &str;

    /// Scrapes the current prices of this station.
    ///
    /// IMPORTANT:
    /// - Must never panic on unexpected markup
    /// - Every failure is reported as a `ScrapeError`
    ///
    async fn scrape_prices(&self) -> Result<Sample, ScrapeError>;
}
