//! Station scraper registry and factory
//!
//! This module provides:
//! - Validation of configured station identifiers (`brand:id`)
//! - A factory resolving identifiers to brand scrapers
//! - The HTTP plumbing shared by all scrapers
//!
//! All brand-specific page knowledge must live in dedicated modules.
//! The rest of the application interacts exclusively through
//! the `Station` trait.

pub mod adapter;
mod aral;
mod shell;

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ConfigError, ScrapeError};
use crate::schema::Brand;
use adapter::Station;

static SHELL_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]+-[0-9A-Za-z-]+$").expect("valid shell id regex"));

static ARAL_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z-]+/[A-Za-z0-9-]+/[0-9]+$").expect("valid aral id regex")
});

/// HTTP clients handed to the scrapers.
///
/// Shell's station finder is served with a certificate chain that
/// fails verification, so it gets a separate client.
#[derive(Clone)]
pub struct HttpClients {
    pub standard: reqwest::Client,
    pub insecure: reqwest::Client,
}

impl HttpClients {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let standard = reqwest::Client::builder().timeout(timeout).build()?;
        let insecure = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self { standard, insecure })
    }
}

/// Resolves one configured identifier into a station scraper.
///
/// Accepted formats:
/// - shell:<number>-<slug>          e.g. shell:10027720-erfurt-bei-den-froschackern-2
/// - aral:<city>/<street>/<number>  e.g. aral:st-ingbert/ensheimer-strasse-152/18111200
///
/// Surrounding whitespace is ignored. Anything else is a `ConfigError`,
/// so typos surface at startup rather than on the first tick.
///
pub fn parse_station(
    identifier: &str,
    clients: &HttpClients,
) -> Result<Arc<dyn Station>, ConfigError> {
    let identifier = identifier.trim();

    let Some((prefix, id)) = identifier.split_once(':') else {
        return Err(ConfigError::InvalidIdentifier(identifier.to_string()));
    };

    let Some(brand) = Brand::from_prefix(prefix) else {
        return Err(ConfigError::UnknownBrand(prefix.to_string()));
    };

    match brand {
        Brand::Shell => {
            if !SHELL_ID.is_match(id) {
                return Err(ConfigError::InvalidIdentifier(identifier.to_string()));
            }
            Ok(Arc::new(shell::ShellStation::new(
                identifier,
                id,
                clients.insecure.clone(),
            )))
        }
        Brand::Aral => {
            if !ARAL_ID.is_match(id) {
                return Err(ConfigError::InvalidIdentifier(identifier.to_string()));
            }
            Ok(Arc::new(aral::AralStation::new(
                identifier,
                id,
                clients.standard.clone(),
            )))
        }
    }
}

/// Parses a comma-separated identifier list.
///
/// Empty entries (e.g. a trailing comma) are skipped.
/// The first malformed identifier aborts the whole list.
pub fn parse_station_list(
    raw: &str,
    clients: &HttpClients,
) -> Result<Vec<Arc<dyn Station>>, ConfigError> {
    raw.split(',')
        .filter(|entry| !entry.trim().is_empty())
        .map(|entry| parse_station(entry, clients))
        .collect()
}

/// GET `url` and return the body as text, treating non-2xx as failure.
pub(crate) async fn fetch_text(client: &reqwest::Client, url: &str) -> Result<String, ScrapeError> {
    let resp = client.get(url).send().await.map_err(|source| ScrapeError::Http {
        url: url.to_string(),
        source,
    })?;

    let status = resp.status();
    if !status.is_success() {
        return Err(ScrapeError::Status {
            url: url.to_string(),
            status,
        });
    }

    resp.text().await.map_err(|source| ScrapeError::Http {
        url: url.to_string(),
        source,
    })
}
