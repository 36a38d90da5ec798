//! Lookup seams and their production implementations.
//!
//! [`PostalLookup`] and [`GeoLookup`] are the two per-row resolution
//! pipelines the worker pool drives. Production composition is
//! cache-in-front-of-client: [`CachedPostal`]/[`CachedGeo`] consult the
//! durable [`LookupCache`] first, delegate misses to the raw
//! [`DirectoryResolver`]/[`GeocodeResolver`] (rate-limited network
//! clients), and write confirmed results — positive *and* negative —
//! back. Transient failures are never cached.
//!
//! A cache-store fault degrades that key's resolution to a plain miss
//! and is logged once per run, not per row.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use geo_enrich_cache::{CacheError, CacheKind, LookupCache};
use geo_enrich_lookup::client::RateLimitedClient;
use geo_enrich_lookup::registry::LookupService;
use geo_enrich_lookup::{LookupError, nominatim, normalize, registry, viacep};
use geo_enrich_models::{AddressQuery, CepRecord, Coordinates, Resolution};

/// Postal directory resolution seam.
#[async_trait]
pub trait PostalLookup: Send + Sync {
    /// Resolves a normalized (digits-only) postal code to its directory
    /// record.
    async fn resolve_code(&self, cep: &str) -> Result<Resolution<CepRecord>, LookupError>;

    /// Searches the directory by street+city+region to recover a postal
    /// code for a row whose own code is confirmed absent.
    async fn search_by_address(
        &self,
        street: &str,
        city: &str,
        region: &str,
    ) -> Result<Resolution<CepRecord>, LookupError>;
}

/// Geocoding resolution seam.
#[async_trait]
pub trait GeoLookup: Send + Sync {
    /// Resolves one address query to coordinates.
    async fn resolve(&self, query: &AddressQuery) -> Result<Resolution<Coordinates>, LookupError>;
}

// ── Raw network resolvers ───────────────────────────────────────────

/// ViaCEP-backed [`PostalLookup`] (no caching).
pub struct DirectoryResolver {
    http: reqwest::Client,
    base_url: String,
    client: RateLimitedClient,
}

impl DirectoryResolver {
    /// Creates the resolver from the embedded `viacep` service
    /// definition.
    ///
    /// # Panics
    ///
    /// Panics if the embedded registry is missing the `viacep` entry
    /// (a compile-time invariant of this crate's service TOMLs).
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        let service = registry::service("viacep")
            .expect("embedded registry is missing the viacep service");
        Self::with_service(http, &service)
    }

    /// Creates the resolver from an explicit service definition
    /// (tests and self-hosted mirrors).
    #[must_use]
    pub fn with_service(http: reqwest::Client, service: &LookupService) -> Self {
        Self {
            http,
            base_url: service.service.base_url.clone(),
            client: RateLimitedClient::from_service(&service.service, "viacep"),
        }
    }
}

#[async_trait]
impl PostalLookup for DirectoryResolver {
    async fn resolve_code(&self, cep: &str) -> Result<Resolution<CepRecord>, LookupError> {
        self.client
            .run(|| viacep::lookup_cep(&self.http, &self.base_url, cep, self.client.timeout()))
            .await
    }

    async fn search_by_address(
        &self,
        street: &str,
        city: &str,
        region: &str,
    ) -> Result<Resolution<CepRecord>, LookupError> {
        // Same external service as the code lookup, so the same pacing
        // gate and retry budget apply.
        self.client
            .run(|| {
                viacep::search_street(
                    &self.http,
                    &self.base_url,
                    region,
                    city,
                    street,
                    self.client.timeout(),
                )
            })
            .await
    }
}

/// Nominatim-backed [`GeoLookup`] (no caching).
pub struct GeocodeResolver {
    http: reqwest::Client,
    base_url: String,
    client: RateLimitedClient,
}

impl GeocodeResolver {
    /// Creates the resolver from the embedded `nominatim` service
    /// definition.
    ///
    /// # Panics
    ///
    /// Panics if the embedded registry is missing the `nominatim` entry
    /// (a compile-time invariant of this crate's service TOMLs).
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        let service = registry::service("nominatim")
            .expect("embedded registry is missing the nominatim service");
        Self::with_service(http, &service)
    }

    /// Creates the resolver from an explicit service definition.
    #[must_use]
    pub fn with_service(http: reqwest::Client, service: &LookupService) -> Self {
        Self {
            http,
            base_url: service.service.base_url.clone(),
            client: RateLimitedClient::from_service(&service.service, "nominatim"),
        }
    }
}

#[async_trait]
impl GeoLookup for GeocodeResolver {
    async fn resolve(&self, query: &AddressQuery) -> Result<Resolution<Coordinates>, LookupError> {
        let text = query.to_query_string();
        if text.len() < 3 {
            // Too short to mean anything to the geocoder.
            return Ok(Resolution::NotFound);
        }
        self.client
            .run(|| nominatim::search(&self.http, &self.base_url, &text, self.client.timeout()))
            .await
    }
}

// ── Cache-in-front composition ──────────────────────────────────────

/// Logs the first cache fault of a run, then stays quiet.
#[derive(Default)]
struct CacheFault {
    reported: AtomicBool,
}

impl CacheFault {
    fn report(&self, op: &str, e: &CacheError) {
        if !self.reported.swap(true, Ordering::Relaxed) {
            log::error!("lookup cache degraded ({op}): {e}; continuing without cache");
        }
    }
}

/// [`PostalLookup`] decorator that consults the durable cache before
/// delegating to the inner resolver.
pub struct CachedPostal<P> {
    inner: P,
    cache: Arc<LookupCache>,
    fault: CacheFault,
}

impl<P> CachedPostal<P> {
    /// Wraps `inner` with the given cache.
    pub fn new(inner: P, cache: Arc<LookupCache>) -> Self {
        Self {
            inner,
            cache,
            fault: CacheFault::default(),
        }
    }

    /// The wrapped resolver.
    pub const fn inner(&self) -> &P {
        &self.inner
    }

    /// Reads a cached payload; store faults and unparseable payloads
    /// degrade to a miss.
    fn cached_payload(&self, kind: CacheKind, key: &str) -> Option<Option<serde_json::Value>> {
        match self.cache.get(kind, key) {
            Ok(Some(entry)) => Some(entry.payload),
            Ok(None) => None,
            Err(e) => {
                self.fault.report("get", &e);
                None
            }
        }
    }

    fn write_back(&self, kind: CacheKind, key: &str, payload: Option<&serde_json::Value>) {
        if let Err(e) = self.cache.put(kind, key, payload) {
            self.fault.report("put", &e);
        }
    }
}

#[async_trait]
impl<P: PostalLookup> PostalLookup for CachedPostal<P> {
    async fn resolve_code(&self, cep: &str) -> Result<Resolution<CepRecord>, LookupError> {
        if let Some(payload) = self.cached_payload(CacheKind::Postal, cep) {
            match payload {
                Some(value) => {
                    if let Ok(record) = serde_json::from_value::<CepRecord>(value) {
                        return Ok(Resolution::Found(record));
                    }
                    // Unparseable entry: fall through to the network.
                    log::warn!("discarding malformed postal cache entry for {cep}");
                }
                None => return Ok(Resolution::NotFound),
            }
        }

        let result = self.inner.resolve_code(cep).await?;
        match &result {
            Resolution::Found(record) => {
                if let Ok(value) = serde_json::to_value(record) {
                    self.write_back(CacheKind::Postal, cep, Some(&value));
                }
            }
            Resolution::NotFound => self.write_back(CacheKind::Postal, cep, None),
        }
        Ok(result)
    }

    async fn search_by_address(
        &self,
        street: &str,
        city: &str,
        region: &str,
    ) -> Result<Resolution<CepRecord>, LookupError> {
        // Street searches are not cached: they only run for codes the
        // directory already confirmed absent, which the postal namespace
        // records.
        self.inner.search_by_address(street, city, region).await
    }
}

/// [`GeoLookup`] decorator that consults the durable cache before
/// delegating to the inner resolver.
pub struct CachedGeo<G> {
    inner: G,
    cache: Arc<LookupCache>,
    fault: CacheFault,
}

impl<G> CachedGeo<G> {
    /// Wraps `inner` with the given cache.
    pub fn new(inner: G, cache: Arc<LookupCache>) -> Self {
        Self {
            inner,
            cache,
            fault: CacheFault::default(),
        }
    }

    /// The wrapped resolver.
    pub const fn inner(&self) -> &G {
        &self.inner
    }
}

#[async_trait]
impl<G: GeoLookup> GeoLookup for CachedGeo<G> {
    async fn resolve(&self, query: &AddressQuery) -> Result<Resolution<Coordinates>, LookupError> {
        let key = normalize::geo_cache_key(query);

        match self.cache.get(CacheKind::Geo, &key) {
            Ok(Some(entry)) => match entry.payload {
                Some(value) => {
                    if let Ok(coords) = serde_json::from_value::<Coordinates>(value) {
                        return Ok(Resolution::Found(coords));
                    }
                    log::warn!("discarding malformed geo cache entry for {key}");
                }
                None => return Ok(Resolution::NotFound),
            },
            Ok(None) => {}
            Err(e) => self.fault.report("get", &e),
        }

        let result = self.inner.resolve(query).await?;
        match &result {
            Resolution::Found(coords) => {
                if let Ok(value) = serde_json::to_value(coords)
                    && let Err(e) = self.cache.put(CacheKind::Geo, &key, Some(&value))
                {
                    self.fault.report("put", &e);
                }
            }
            Resolution::NotFound => {
                if let Err(e) = self.cache.put(CacheKind::Geo, &key, None) {
                    self.fault.report("put", &e);
                }
            }
        }
        Ok(result)
    }
}
