//! ViaCEP postal directory client.
//!
//! Two endpoints are used:
//!
//! - CEP lookup: `GET {base}/{cep}/json/` — returns a locality record,
//!   or `{"erro": true}` for a well-formed code with no directory entry.
//! - Street search: `GET {base}/{uf}/{city}/{street}/json/` — returns an
//!   array of candidate records; used to recover a correct CEP when the
//!   source's code is confirmed absent.
//!
//! Both endpoints belong to the same external service, so callers route
//! both through the same pacing gate.
//!
//! See <https://viacep.com.br/>

use std::fmt::Write as _;
use std::time::Duration;

use geo_enrich_models::{CepRecord, Resolution};

use crate::LookupError;

/// Length of a normalized CEP (digits only).
pub const CEP_DIGITS: usize = 8;

/// Normalizes a raw postal-code value to its digits.
///
/// Returns `None` unless exactly [`CEP_DIGITS`] digits remain — invalid
/// lengths are rejected before any network call is made.
#[must_use]
pub fn normalize_cep(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    (digits.len() == CEP_DIGITS).then_some(digits)
}

/// Formats normalized CEP digits as `XXXXX-XXX`. Input that is not
/// exactly eight digits is returned unchanged.
#[must_use]
pub fn format_cep(digits: &str) -> String {
    if digits.len() == CEP_DIGITS && digits.chars().all(|c| c.is_ascii_digit()) {
        format!("{}-{}", &digits[..5], &digits[5..])
    } else {
        digits.to_string()
    }
}

/// Looks up a normalized CEP in the directory.
///
/// # Errors
///
/// Returns [`LookupError`] if the HTTP request or response parsing fails.
pub async fn lookup_cep(
    client: &reqwest::Client,
    base_url: &str,
    cep: &str,
    timeout: Duration,
) -> Result<Resolution<CepRecord>, LookupError> {
    let url = format!("{base_url}/{cep}/json/");
    let resp = client.get(&url).timeout(timeout).send().await?;

    if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(LookupError::RateLimited);
    }
    if !resp.status().is_success() {
        return Err(LookupError::Status(resp.status().as_u16()));
    }

    let body: serde_json::Value = resp.json().await?;
    parse_cep_response(&body)
}

/// Searches the directory by street, returning the first candidate
/// record (the directory ranks matches itself).
///
/// # Errors
///
/// Returns [`LookupError`] if the HTTP request or response parsing fails.
pub async fn search_street(
    client: &reqwest::Client,
    base_url: &str,
    region: &str,
    city: &str,
    street: &str,
    timeout: Duration,
) -> Result<Resolution<CepRecord>, LookupError> {
    let url = format!(
        "{base_url}/{}/{}/{}/json/",
        encode_path_segment(region),
        encode_path_segment(city),
        encode_path_segment(street),
    );
    let resp = client.get(&url).timeout(timeout).send().await?;

    if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(LookupError::RateLimited);
    }
    if !resp.status().is_success() {
        return Err(LookupError::Status(resp.status().as_u16()));
    }

    let body: serde_json::Value = resp.json().await?;
    parse_street_response(&body)
}

/// Parses a CEP lookup response.
fn parse_cep_response(body: &serde_json::Value) -> Result<Resolution<CepRecord>, LookupError> {
    // The directory signals "no such code" inside a 200 response.
    if is_erro(body) {
        return Ok(Resolution::NotFound);
    }

    let record: CepRecord =
        serde_json::from_value(body.clone()).map_err(|e| LookupError::Parse {
            message: format!("malformed directory record: {e}"),
        })?;
    Ok(Resolution::Found(record))
}

/// Parses a street-search response (array of candidate records).
fn parse_street_response(body: &serde_json::Value) -> Result<Resolution<CepRecord>, LookupError> {
    let candidates = body.as_array().ok_or_else(|| LookupError::Parse {
        message: "street search response is not an array".to_string(),
    })?;

    let Some(first) = candidates.first() else {
        return Ok(Resolution::NotFound);
    };

    let record: CepRecord =
        serde_json::from_value(first.clone()).map_err(|e| LookupError::Parse {
            message: format!("malformed street search record: {e}"),
        })?;
    Ok(Resolution::Found(record))
}

/// `true` if the response body carries the directory's `erro` marker
/// (observed both as a boolean and as the string `"true"`).
fn is_erro(body: &serde_json::Value) -> bool {
    match body.get("erro") {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => s == "true",
        _ => false,
    }
}

/// Percent-encodes a URL path segment.
fn encode_path_segment(segment: &str) -> String {
    let mut encoded = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            _ => {
                let _ = write!(encoded, "%{byte:02X}");
            }
        }
    }
    encoded
}
