#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! External lookup clients for address enrichment.
//!
//! Two collaborating services, both reachable only over the network and
//! both rate-limited by us, not by API keys:
//!
//! 1. **ViaCEP** — Brazilian postal directory. Resolves a CEP to a
//!    locality record, and a street+city+region triple to candidate
//!    CEPs. Tolerates a tight pace (100 ms between calls).
//! 2. **Nominatim / `OpenStreetMap`** — free-form geocoding. Enforces a
//!    strict fair-use pace; we default to one request per 2 seconds.
//!
//! Each service gets one [`pacing::PacingGate`] shared by every caller —
//! the external services rate-limit by source, not by query, so the gate
//! is a single serialization point per service, never per worker.
//! Service endpoints and pacing defaults are defined in TOML files under
//! `services/`, embedded at compile time via the [`registry`].

pub mod client;
pub mod nominatim;
pub mod normalize;
pub mod pacing;
pub mod registry;
pub mod viacep;

use thiserror::Error;

/// Errors from a single external lookup attempt.
///
/// Every variant is transient from the pipeline's point of view: the
/// wrapping [`client::RateLimitedClient`] retries within its attempt
/// budget and returns [`LookupError::Exhausted`] when the budget runs
/// out. A well-formed "not found" response is **not** an error — it is
/// [`geo_enrich_models::Resolution::NotFound`].
#[derive(Debug, Error)]
pub enum LookupError {
    /// HTTP transport failure or timeout.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response parsing failed.
    #[error("parse error: {message}")]
    Parse {
        /// Description of the parsing failure.
        message: String,
    },

    /// The service told us to slow down (HTTP 429).
    #[error("rate limit exceeded")]
    RateLimited,

    /// Unexpected HTTP status.
    #[error("unexpected status {0}")]
    Status(u16),

    /// The retry budget is spent; the row-level outcome is `Failed`.
    #[error("lookup failed after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made before giving up.
        attempts: u32,
        /// The final attempt's error.
        #[source]
        last: Box<LookupError>,
    },
}
