#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared row, lookup, and statistics types for the enrichment pipeline.

use serde::{Deserialize, Serialize};

/// A single source row: its position in the input file plus the raw cell
/// values, in header order.
///
/// The `index` is assigned by the reader and preserved through the worker
/// pool so that output can be reassembled in source order regardless of
/// completion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// Zero-based position in the source file (excluding the header).
    pub index: u64,
    /// Cell values in header order.
    pub values: Vec<String>,
}

/// A batch of rows produced by the chunk reader.
pub type RowBatch = Vec<Row>;

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude (WGS84).
    pub latitude: f64,
    /// Longitude (WGS84).
    pub longitude: f64,
}

/// A locality record returned by the postal directory service.
///
/// Field names follow the ViaCEP wire format (`logradouro`, `bairro`,
/// `localidade`, `uf`) but are exposed under neutral names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CepRecord {
    /// Formatted postal code (`"01310-100"`).
    #[serde(default)]
    pub cep: String,
    /// Street name.
    #[serde(rename = "logradouro", default)]
    pub street: String,
    /// Neighborhood.
    #[serde(rename = "bairro", default)]
    pub neighborhood: String,
    /// City.
    #[serde(rename = "localidade", default)]
    pub city: String,
    /// Two-letter region (state) code.
    #[serde(rename = "uf", default)]
    pub region: String,
}

/// An address lookup query, from most to least specific depending on which
/// fields are populated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressQuery {
    /// Street name (may be empty).
    pub street: String,
    /// Neighborhood (may be empty).
    pub neighborhood: String,
    /// City (may be empty).
    pub city: String,
    /// Region (state) code or name (may be empty).
    pub region: String,
}

impl AddressQuery {
    /// Builds the free-form query string sent to the geocoding service:
    /// the non-empty parts joined by `", "`.
    #[must_use]
    pub fn to_query_string(&self) -> String {
        [
            self.street.as_str(),
            self.neighborhood.as_str(),
            self.city.as_str(),
            self.region.as_str(),
        ]
        .iter()
        .filter(|part| !part.trim().is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(", ")
    }

    /// `true` if no field carries any usable text.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_query_string().is_empty()
    }
}

/// Outcome of a completed external lookup.
///
/// A transient failure (timeout, transport error, exhausted retries) is not
/// a resolution — it is carried as the `Err` arm of the surrounding
/// `Result`, so that confirmed negatives and unknown-due-to-error outcomes
/// can never be conflated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<T> {
    /// The service returned a match.
    Found(T),
    /// The service explicitly reported no match (a confirmed negative).
    NotFound,
}

impl<T> Resolution<T> {
    /// Maps the `Found` payload, preserving `NotFound`.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resolution<U> {
        match self {
            Self::Found(value) => Resolution::Found(f(value)),
            Self::NotFound => Resolution::NotFound,
        }
    }

    /// Returns the `Found` payload, if any.
    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            Self::NotFound => None,
        }
    }
}

/// Category of a per-row enrichment error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The postal code failed format validation (wrong length or
    /// non-numeric); no network call was made.
    PostalFormat,
    /// The postal lookup failed transiently after exhausting retries.
    PostalLookup,
    /// Every geocoding candidate failed or was a negative, with at least
    /// one transient failure among them.
    GeoLookup,
    /// A single geocoding candidate failed transiently; a broader
    /// candidate may still have resolved the row.
    GeoCandidate,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::PostalFormat => "postal_format",
            Self::PostalLookup => "postal_lookup",
            Self::GeoLookup => "geo_lookup",
            Self::GeoCandidate => "geo_candidate",
        };
        f.write_str(name)
    }
}

/// A per-row enrichment error, kept for the final statistics snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    /// Index of the affected row.
    pub row_index: u64,
    /// Error category.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
}

/// Immutable statistics snapshot for a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Total rows consumed from the source.
    pub total_rows: u64,
    /// Rows whose postal code was corrected or confirmed against the
    /// directory service.
    pub corrected_postal: u64,
    /// Rows that ended up with a resolved coordinate pair.
    pub resolved_coordinates: u64,
    /// Per-row errors, ordered by row index.
    pub errors: Vec<RowError>,
}

/// Names of the columns the pipeline appends to every output row, in
/// output order. Original columns are never overwritten.
pub const OUTPUT_COLUMNS: [&str; 7] = [
    "corrected_postal_code",
    "corrected_street",
    "corrected_neighborhood",
    "corrected_city",
    "corrected_region",
    "latitude",
    "longitude",
];

/// The values the pipeline resolved for one row, destined for the
/// [`OUTPUT_COLUMNS`] appended to the output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enrichment {
    /// Validated or recovered postal code (digits only).
    pub corrected_postal_code: Option<String>,
    /// Street name from the directory record (or normalized original).
    pub corrected_street: Option<String>,
    /// Neighborhood from the directory record (or normalized original).
    pub corrected_neighborhood: Option<String>,
    /// City from the directory record (or original).
    pub corrected_city: Option<String>,
    /// Region code from the directory record (or original).
    pub corrected_region: Option<String>,
    /// Resolved coordinates, if any candidate matched.
    pub coordinates: Option<Coordinates>,
}

impl Enrichment {
    /// Renders the enrichment as output cells matching [`OUTPUT_COLUMNS`].
    /// Unresolved fields render as empty strings.
    #[must_use]
    pub fn to_cells(&self) -> [String; 7] {
        let opt = |value: &Option<String>| value.clone().unwrap_or_default();
        [
            opt(&self.corrected_postal_code),
            opt(&self.corrected_street),
            opt(&self.corrected_neighborhood),
            opt(&self.corrected_city),
            opt(&self.corrected_region),
            self.coordinates
                .map(|c| c.latitude.to_string())
                .unwrap_or_default(),
            self.coordinates
                .map(|c| c.longitude.to_string())
                .unwrap_or_default(),
        ]
    }
}

/// A source row paired with its resolved enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRow {
    /// The original row, values untouched.
    pub row: Row,
    /// The appended enrichment fields.
    pub enrichment: Enrichment,
}
