use std::time::Duration;

use thiserror::Error;

// ------------------------------------------------------------
// Error taxonomy
// ------------------------------------------------------------
//
// Each pipeline stage owns its error type:
// - ScrapeError:  one station, one round; logged, never fatal
// - StorageError: identity resolution or flush; logged, never fatal
// - ConfigError:  startup only; fatal
//

/// Failure while scraping a single station.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("scrape did not finish within {0:?}")]
    Timeout(Duration),

    #[error("scraper panicked: {0}")]
    Panicked(String),

    #[error("could not find {0} in station page")]
    MissingElement(&'static str),

    #[error("could not parse {what}: {detail}")]
    Parse { what: &'static str, detail: String },

    #[error("could not decode {what}: {source}")]
    Json {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure talking to the storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage call did not finish within {0:?}")]
    Timeout(Duration),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Invalid startup configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "identifier '{0}' does not match the format ('brand:station-identifier'), \
         i.e. shell:10027720-erfurt-bei-den-froschackern-2 \
         or aral:st-ingbert/ensheimer-strasse-152/18111200"
    )]
    InvalidIdentifier(String),

    #[error("unknown brand '{0}'")]
    UnknownBrand(String),

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// The collector side of the funnel is gone.
#[derive(Debug, Error)]
#[error("funnel closed, collector is no longer receiving")]
pub struct FunnelClosed;
