use std::collections::HashMap;

use scraper::{Html, Selector};
use serde::Deserialize;

use crate::{
    error::ScrapeError,
    schema::{Brand, Sample},
    util,
};

use super::adapter::Station;

const STATION_URL: &str = "https://find.shell.com/de/fuel/";

/// Preferred locale for fuel names; everything else falls back to `other`.
const FUEL_NAME_LOCALE: &str = "DE";

/// Shell station finder scraper
///
/// Shell renders each station page server-side and embeds the full
/// page state as JSON in a `data-react-props` attribute. Everything
/// we need (address, coordinates, prices, localized fuel names) lives
/// in that one blob, so a single GET is enough.
pub struct ShellStation {
    identifier: String,
    url: String,
    client: reqwest::Client,
}

impl ShellStation {
    pub fn new(identifier: &str, id: &str, client: reqwest::Client) -> Self {
        Self {
            identifier: identifier.to_string(),
            url: format!("{STATION_URL}{id}"),
            client,
        }
    }
}

#[async_trait::async_trait]
impl Station for ShellStation {
    fn brand(&self) -> Brand {
        Brand::Shell
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn scrape_prices(&self) -> Result<Sample, ScrapeError> {
        let html = super::fetch_text(&self.client, &self.url).await?;
        parse_station_page(&html)
    }
}

// ------------------------------------------------------------
// data-react-props payload
// ------------------------------------------------------------
//
// Only the handful of fields we read are modelled; serde skips
// the rest of the (very large) page state.
//
#[derive(Debug, Deserialize)]
struct ReactProps {
    config: PropsConfig,
    location: PropsLocation,
}

#[derive(Debug, Deserialize)]
struct PropsConfig {
    #[serde(rename = "intlData")]
    intl_data: IntlData,
}

#[derive(Debug, Deserialize)]
struct IntlData {
    messages: Messages,
}

#[derive(Debug, Deserialize)]
struct Messages {
    info_window: InfoWindow,
}

#[derive(Debug, Deserialize)]
struct InfoWindow {
    sections: InfoSections,
}

#[derive(Debug, Deserialize)]
struct InfoSections {
    fuels: FuelsSection,
}

#[derive(Debug, Deserialize)]
struct FuelsSection {
    /// Fuel code -> ICU select message keyed by country code
    #[serde(default)]
    fuel_local_names: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PropsLocation {
    formatted_address: String,
    lat: f64,
    lng: f64,
    #[serde(default)]
    fuel_pricing: FuelPricing,
}

#[derive(Debug, Default, Deserialize)]
struct FuelPricing {
    #[serde(default)]
    prices: HashMap<String, f64>,
}

fn parse_station_page(html: &str) -> Result<Sample, ScrapeError> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("[data-react-props]").map_err(|err| ScrapeError::Parse {
        what: "react props selector",
        detail: err.to_string(),
    })?;

    let props = document
        .select(&selector)
        .find_map(|el| el.value().attr("data-react-props"))
        .ok_or(ScrapeError::MissingElement("data-react-props"))?;

    let props: ReactProps = serde_json::from_str(props).map_err(|source| ScrapeError::Json {
        what: "react props",
        source,
    })?;

    let local_names = &props.config.intl_data.messages.info_window.sections.fuels.fuel_local_names;

    let prices = props
        .location
        .fuel_pricing
        .prices
        .iter()
        .map(|(code, price)| {
            let name = local_names
                .get(code)
                .and_then(|message| localized_fuel_name(message))
                .unwrap_or_else(|| code.clone());
            (name, *price as f32)
        })
        .collect();

    Ok(Sample::new(
        Brand::Shell,
        props.location.formatted_address.trim().to_string(),
        util::format_lat_lng(props.location.lat, props.location.lng),
        prices,
    ))
}

/// Picks the German fuel name out of an ICU select message.
///
/// Input looks like:
///     {countryCode, select, DE {Shell FuelSave Diesel} other {Shell Diesel}}
///
/// Falls back to the `other` branch when the German branch is missing
/// or blank. A message that is not a select expression is used as is.
fn localized_fuel_name(message: &str) -> Option<String> {
    let message = message.trim();

    let Some(branches) = parse_select_branches(message) else {
        return (!message.is_empty()).then(|| message.to_string());
    };

    [FUEL_NAME_LOCALE, "other"]
        .iter()
        .filter_map(|key| branches.get(*key))
        .map(|name| name.trim())
        .find(|name| !name.is_empty())
        .map(str::to_string)
}

fn parse_select_branches(message: &str) -> Option<HashMap<String, String>> {
    let body = message
        .strip_prefix('{')?
        .strip_suffix('}')?
        .trim_start()
        .strip_prefix("countryCode")?
        .trim_start()
        .strip_prefix(',')?
        .trim_start()
        .strip_prefix("select")?
        .trim_start()
        .strip_prefix(',')?;

    let mut branches = HashMap::new();
    let mut rest = body.trim_start();

    while !rest.is_empty() {
        let open = rest.find('{')?;
        let key = rest[..open].trim();
        let close = open + rest[open..].find('}')?;
        branches.insert(key.to_string(), rest[open + 1..close].to_string());
        rest = rest[close + 1..].trim_start();
    }

    Some(branches)
}
