#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! The enrichment pipeline: fallback resolution, worker pool, and run
//! statistics.
//!
//! Composition, inside out:
//!
//! 1. [`resolvers`] — the [`resolvers::PostalLookup`] and
//!    [`resolvers::GeoLookup`] seams, with production implementations
//!    that put the durable cache in front of the rate-limited clients.
//! 2. [`fallback`] — the ranked multi-strategy geocoding chain.
//! 3. [`pool`] — bounded-concurrency workers over a shared row queue,
//!    order-preserving output, per-row partial-failure records.
//! 4. [`stats`] — thread-safe counters finalized into an immutable
//!    snapshot.
//!
//! A run always completes and returns its sink output plus statistics,
//! even if every lookup failed; failures are enumerated per row, never
//! silently dropped.

mod enrich;

pub mod cancel;
pub mod fallback;
pub mod pool;
pub mod progress;
pub mod resolvers;
pub mod stats;

use std::sync::Arc;

use geo_enrich_cache::LookupCache;
use geo_enrich_reader::ReadError;

pub use cancel::StopSignal;
pub use pool::{DEFAULT_WORKERS, EnrichmentWorkerPool};
pub use progress::{NullProgress, ProgressCallback, null_progress};
pub use resolvers::{CachedGeo, CachedPostal, DirectoryResolver, GeocodeResolver};
pub use stats::StatsAccumulator;

/// Errors that abort an enrichment run.
///
/// Lookup failures never appear here — they are per-row records in the
/// statistics. Only source, sink, and task-level faults are fatal.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The source failed while streaming (the fail-fast header check
    /// happens before the pool ever starts).
    #[error("read error: {0}")]
    Read(#[from] ReadError),

    /// The sink rejected an enriched row.
    #[error("sink error: {message}")]
    Sink {
        /// Description of the sink failure.
        message: String,
    },

    /// A worker or feeder task panicked.
    #[error("worker task failed: {0}")]
    Task(String),
}

/// The production pool type: cache-fronted ViaCEP and Nominatim
/// resolvers.
pub type ProductionPool =
    EnrichmentWorkerPool<CachedPostal<DirectoryResolver>, CachedGeo<GeocodeResolver>>;

/// Builds the production pool: shared HTTP client, durable cache in
/// front of both rate-limited service clients.
#[must_use]
pub fn production_pool(
    http: reqwest::Client,
    cache: Arc<LookupCache>,
    workers: usize,
) -> ProductionPool {
    let postal = CachedPostal::new(DirectoryResolver::new(http.clone()), Arc::clone(&cache));
    let geo = CachedGeo::new(GeocodeResolver::new(http), cache);
    EnrichmentWorkerPool::new(Arc::new(postal), Arc::new(geo), workers)
}
