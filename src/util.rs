/// Utility helpers shared by the station scrapers.
///
/// This module contains:
/// - Text normalization for values lifted out of HTML
/// - Price conversion helpers
/// - Geo-location formatting
///
/// IMPORTANT:
/// - No brand-specific page knowledge should live here.
/// - Helpers must stay pure and deterministic.
///

/// Collapse runs of whitespace (including newlines from HTML markup)
/// into single spaces and trim the ends.
///
/// Examples:
/// - "  Ensheimer Strasse 152\n  " -> "Ensheimer Strasse 152"
/// - "66386   St. Ingbert"        -> "66386 St. Ingbert"
///
pub fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Convert a price given in cents (as published by some vendor APIs)
/// into a price per unit.
///
/// Returns `None` for unparsable or zero prices; vendors use both to
/// mark a fuel that is currently not sold.
///
/// Examples:
/// - "173.9" -> Some(1.739)
/// - "0"     -> None
/// - ""      -> None
///
pub fn cents_to_price(raw: &str) -> Option<f32> {
    let cents = raw.trim().parse::<f64>().ok()?;
    if cents == 0.0 || !cents.is_finite() {
        return None;
    }
    Some((cents / 100.0) as f32)
}

/// Canonical "lat,lng" rendering with six decimals.
pub fn format_lat_lng(lat: f64, lng: f64) -> String {
    format!("{lat:.6},{lng:.6}")
}
