//! Nominatim / `OpenStreetMap` geocoder client.
//!
//! Free-form search only — the fallback resolver builds queries of
//! decreasing specificity and each one goes through here. Nominatim has
//! strict fair-use limits; the pacing gate in front of this client is
//! what keeps the pipeline from being throttled or banned.
//!
//! See <https://nominatim.org/release-docs/develop/api/Search/>

use std::time::Duration;

use geo_enrich_models::{Coordinates, Resolution};

use crate::LookupError;

/// Geocodes a free-form query, returning the best match's coordinates.
///
/// # Errors
///
/// Returns [`LookupError`] if the HTTP request or response parsing fails.
pub async fn search(
    client: &reqwest::Client,
    base_url: &str,
    query: &str,
    timeout: Duration,
) -> Result<Resolution<Coordinates>, LookupError> {
    let resp = client
        .get(base_url)
        .query(&[("q", query), ("format", "json"), ("limit", "1")])
        .timeout(timeout)
        .send()
        .await?;

    if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(LookupError::RateLimited);
    }
    if !resp.status().is_success() {
        return Err(LookupError::Status(resp.status().as_u16()));
    }

    let body: serde_json::Value = resp.json().await?;
    parse_response(&body)
}

/// Parses a Nominatim search response. An empty result array is a
/// confirmed negative.
fn parse_response(body: &serde_json::Value) -> Result<Resolution<Coordinates>, LookupError> {
    let results = body.as_array().ok_or_else(|| LookupError::Parse {
        message: "Nominatim response is not an array".to_string(),
    })?;

    let Some(first) = results.first() else {
        return Ok(Resolution::NotFound);
    };

    let latitude = first["lat"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| LookupError::Parse {
            message: "missing lat in Nominatim response".to_string(),
        })?;

    let longitude = first["lon"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| LookupError::Parse {
            message: "missing lon in Nominatim response".to_string(),
        })?;

    Ok(Resolution::Found(Coordinates {
        latitude,
        longitude,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_result() {
        let body = serde_json::json!([{
            "lat": "-23.5613",
            "lon": "-46.6565",
            "display_name": "Avenida Paulista, São Paulo, Brasil"
        }]);
        let coords = parse_response(&body).unwrap().found().unwrap();
        assert!((coords.latitude - -23.5613).abs() < 1e-4);
        assert!((coords.longitude - -46.6565).abs() < 1e-4);
    }

    #[test]
    fn empty_array_is_not_found() {
        assert_eq!(
            parse_response(&serde_json::json!([])).unwrap(),
            Resolution::NotFound
        );
    }

    #[test]
    fn malformed_body_is_a_parse_error() {
        let err = parse_response(&serde_json::json!({"weird": 1})).unwrap_err();
        assert!(matches!(err, LookupError::Parse { .. }));
    }

    #[test]
    fn missing_coordinates_is_a_parse_error() {
        let err = parse_response(&serde_json::json!([{"display_name": "x"}])).unwrap_err();
        assert!(matches!(err, LookupError::Parse { .. }));
    }
}
