use std::collections::HashMap;

use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::ScrapeError,
    schema::{Brand, Sample},
    util,
};

use super::adapter::Station;

const PAGE_URL: &str = "https://tankstelle.aral.de/";
const API_URL: &str = "https://api.tankstelle.aral.de/api/v3/stations/";

// Header layout of the station page; the two paragraphs hold
// street and postcode/city respectively.
const ADDRESS_STREET_SELECTOR: &str = "main > header > div > div > div > div:nth-of-type(2) \
     > div:nth-of-type(2) > div:nth-of-type(1) > p:nth-of-type(1)";
const ADDRESS_CITY_SELECTOR: &str = "main > header > div > div > div > div:nth-of-type(2) \
     > div:nth-of-type(2) > div:nth-of-type(1) > p:nth-of-type(2)";
const DIRECTIONS_SELECTOR: &str = "main header a[href*=\"destination=\"]";
const SCRIPT_SELECTOR: &str = "head script";

const FUELS_MARKER: &str = "window.FUELS = ";
const DESTINATION_MARKER: &str = "destination=";

/// Aral station scraper
///
/// Aral splits the data over two requests:
/// - the public station page (address, directions link, fuel code -> name table)
/// - the price API (fuel code -> price in cents)
///
/// Fuels the API reports without a price, or with a zero price,
/// are skipped.
pub struct AralStation {
    identifier: String,
    page_url: String,
    api_url: String,
    client: reqwest::Client,
}

impl AralStation {
    /// `id` is `<city>/<street>/<number>`; the trailing number is the
    /// station id used by the price API.
    pub fn new(identifier: &str, id: &str, client: reqwest::Client) -> Self {
        let station_number = id.rsplit('/').next().unwrap_or(id);
        Self {
            identifier: identifier.to_string(),
            page_url: format!("{PAGE_URL}{id}"),
            api_url: format!("{API_URL}{station_number}/prices"),
            client,
        }
    }
}

#[async_trait::async_trait]
impl Station for AralStation {
    fn brand(&self) -> Brand {
        Brand::Aral
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn scrape_prices(&self) -> Result<Sample, ScrapeError> {
        let html = super::fetch_text(&self.client, &self.page_url).await?;
        let page = parse_station_page(&html)?;

        let body = super::fetch_text(&self.client, &self.api_url).await?;
        let prices = parse_prices(&page.fuel_names, &body)?;

        Ok(Sample::new(Brand::Aral, page.address, page.geo_location, prices))
    }
}

#[derive(Debug)]
struct StationPage {
    address: String,
    geo_location: String,
    /// Fuel code -> display name
    fuel_names: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    data: PriceData,
}

#[derive(Debug, Deserialize)]
struct PriceData {
    /// Fuel code -> cents, usually as string
    #[serde(default)]
    prices: HashMap<String, Value>,
}

fn selector(css: &'static str) -> Result<Selector, ScrapeError> {
    Selector::parse(css).map_err(|err| ScrapeError::Parse {
        what: "css selector",
        detail: err.to_string(),
    })
}

fn select_text(document: &Html, css: &'static str, what: &'static str) -> Result<String, ScrapeError> {
    let text = document
        .select(&selector(css)?)
        .next()
        .map(|el| util::collapse_whitespace(&el.text().collect::<String>()))
        .ok_or(ScrapeError::MissingElement(what))?;
    Ok(text)
}

fn parse_station_page(html: &str) -> Result<StationPage, ScrapeError> {
    let document = Html::parse_document(html);

    let street = select_text(&document, ADDRESS_STREET_SELECTOR, "first part of address")?;
    let city = select_text(&document, ADDRESS_CITY_SELECTOR, "second part of address")?;

    let href = document
        .select(&selector(DIRECTIONS_SELECTOR)?)
        .find_map(|el| el.value().attr("href"))
        .ok_or(ScrapeError::MissingElement("geolocation"))?;
    let geo_location = href
        .split_once(DESTINATION_MARKER)
        .map(|(_, rest)| rest.split('&').next().unwrap_or(rest).to_string())
        .filter(|dest| !dest.is_empty())
        .ok_or(ScrapeError::MissingElement("geolocation"))?;

    let script = document
        .select(&selector(SCRIPT_SELECTOR)?)
        .map(|el| el.text().collect::<String>())
        .find(|text| text.contains(FUELS_MARKER))
        .ok_or(ScrapeError::MissingElement("fuel names script"))?;

    let fuels_json = script
        .split(';')
        .find_map(|stmt| stmt.split_once(FUELS_MARKER).map(|(_, json)| json.trim()))
        .ok_or(ScrapeError::MissingElement("fuel names script"))?;

    let fuel_names: HashMap<String, String> =
        serde_json::from_str(fuels_json).map_err(|source| ScrapeError::Json {
            what: "fuel name resolution map",
            source,
        })?;

    Ok(StationPage {
        address: format!("{street}, {city}"),
        geo_location,
        fuel_names,
    })
}

fn parse_prices(
    fuel_names: &HashMap<String, String>,
    body: &str,
) -> Result<HashMap<String, f32>, ScrapeError> {
    let response: PriceResponse = serde_json::from_str(body).map_err(|source| ScrapeError::Json {
        what: "price data",
        source,
    })?;

    let prices = fuel_names
        .iter()
        .filter_map(|(code, name)| {
            let price = match response.data.prices.get(code)? {
                Value::String(raw) => util::cents_to_price(raw)?,
                Value::Number(raw) => util::cents_to_price(&raw.to_string())?,
                _ => return None,
            };
            Some((name.clone(), price))
        })
        .collect();

    Ok(prices)
}
