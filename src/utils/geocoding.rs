use std::time::Duration;

use tracing::debug;

use crate::config::ReverseGeocodingConfig;
use crate::error::{AppError, AppResult};
use crate::models::Coordinate;

pub async fn reverse_geocode(
    config: &ReverseGeocodingConfig,
    coordinate: &Coordinate,
) -> AppResult<Option<String>> {
    if !config.enabled {
        return Ok(None);
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds))
        .user_agent(&config.user_agent)
        .build()?;

    let latitude = coordinate.latitude.to_string();
    let longitude = coordinate.longitude.to_string();
    let response = client
        .get(&config.base_url)
        .query(&[
            ("format", "json"),
            ("lat", latitude.as_str()),
            ("lon", longitude.as_str()),
            ("zoom", "18"),
            ("addressdetails", "1"),
        ])
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(AppError::Http {
            status: status.as_u16(),
            message: "reverse geocoding request failed".to_string(),
        });
    }

    let json: serde_json::Value = response.json().await?;
    let label = address_label(&json);
    debug!(
        "Reverse geocoded {},{} -> {:?}",
        coordinate.latitude, coordinate.longitude, label
    );
    Ok(label)
}

/// `display_name` when present, otherwise the most useful address parts.
pub fn address_label(json: &serde_json::Value) -> Option<String> {
    if let Some(name) = json
        .get("display_name")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
    {
        return Some(name.to_string());
    }

    let address = json.get("address")?;
    let part = |keys: &[&str]| {
        keys.iter()
            .find_map(|key| address.get(*key).and_then(|v| v.as_str()))
            .map(|s| s.to_string())
    };

    let street = match (part(&["house_number"]), part(&["road"])) {
        (Some(number), Some(road)) => Some(format!("{} {}", number, road)),
        (_, road) => road,
    };

    let parts: Vec<String> = [
        street,
        part(&["suburb", "quarter", "city_district"]),
        part(&["city", "town", "village", "state"]),
        part(&["country"]),
    ]
    .into_iter()
    .flatten()
    .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}
