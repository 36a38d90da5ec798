//! Compile-time registry of external lookup service definitions.
//!
//! Each service (endpoint, pacing interval, timeout, retry budget) is
//! defined in a TOML file under `services/`, embedded at compile time.
//! The geocoding service's pace is much stricter than the directory's —
//! its operator enforces a fair-use policy on the public instance.

use serde::Deserialize;

/// An external lookup service definition loaded from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct LookupService {
    /// Unique identifier (`"viacep"`, `"nominatim"`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Endpoint and pacing configuration.
    pub service: ServiceConfig,
}

/// Endpoint and pacing configuration for one service.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// API base URL.
    pub base_url: String,
    /// Minimum delay between requests, in milliseconds. Enforced by a
    /// single shared pacing gate per service.
    pub rate_limit_ms: u64,
    /// Per-call timeout, in seconds.
    pub timeout_secs: u64,
    /// Retry budget per lookup (total attempts, including the first).
    pub max_attempts: u32,
    /// Fixed delay between attempts, in milliseconds.
    pub retry_delay_ms: u64,
}

// ── Compile-time embedded TOML files ────────────────────────────────

const SERVICE_TOMLS: &[(&str, &str)] = &[
    ("viacep", include_str!("../services/viacep.toml")),
    ("nominatim", include_str!("../services/nominatim.toml")),
];

/// Returns all lookup service definitions.
///
/// # Panics
///
/// Panics if any TOML config is malformed (a compile-time guarantee
/// since the configs are embedded).
#[must_use]
pub fn all_services() -> Vec<LookupService> {
    SERVICE_TOMLS
        .iter()
        .map(|(name, toml_str)| {
            toml::de::from_str(toml_str)
                .unwrap_or_else(|e| panic!("Failed to parse lookup service '{name}': {e}"))
        })
        .collect()
}

/// Returns the service definition with the given id.
#[must_use]
pub fn service(id: &str) -> Option<LookupService> {
    all_services().into_iter().find(|s| s.id == id)
}
