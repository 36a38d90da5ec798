//! Bounded-concurrency enrichment worker pool.
//!
//! Rows (not whole batches) flow through a shared queue, so the
//! concurrency knob is independent of the read chunk size. A blocking
//! feeder task drains the chunk reader; N workers pull rows and resolve
//! them; the collector reassembles output in source order through an
//! index-keyed pending buffer bounded by the in-flight window.
//!
//! Worker count mostly matters while the postal and geocoding services
//! have different latencies: pacing is one global gate per service, so
//! workers beyond what the gates can serve only queue — they never raise
//! throughput.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use geo_enrich_models::{EnrichedRow, Row, RowBatch, Stats};
use geo_enrich_reader::{ColumnMap, ReadError};
use tokio::sync::{Mutex, mpsc};

use crate::PipelineError;
use crate::cancel::StopSignal;
use crate::enrich;
use crate::progress::ProgressCallback;
use crate::resolvers::{GeoLookup, PostalLookup};
use crate::stats::StatsAccumulator;

/// Default worker count — low on purpose, to respect the geocoding
/// service's global pacing.
pub const DEFAULT_WORKERS: usize = 3;

/// Applies cache→client→fallback resolution to every row of a source,
/// under bounded concurrency, preserving source order in the output.
pub struct EnrichmentWorkerPool<P, G> {
    postal: Arc<P>,
    geo: Arc<G>,
    workers: usize,
}

impl<P, G> EnrichmentWorkerPool<P, G>
where
    P: PostalLookup + 'static,
    G: GeoLookup + 'static,
{
    /// Creates a pool over the two resolution seams. A zero `workers`
    /// is treated as 1.
    #[must_use]
    pub fn new(postal: Arc<P>, geo: Arc<G>, workers: usize) -> Self {
        Self {
            postal,
            geo,
            workers: workers.max(1),
        }
    }

    /// Runs the pool over `batches`, sending enriched rows to `sink` in
    /// source order, and returns the final statistics snapshot.
    ///
    /// `batches` must yield rows with contiguous ascending indices
    /// starting at zero, as the chunk reader produces them. The progress
    /// callback is invoked once per completed row; `total_rows`, when
    /// known, is forwarded to it up front.
    ///
    /// Cancellation via `stop` is cooperative: workers finish the row in
    /// hand (the network call completes or times out), already-emitted
    /// rows and cache entries stay valid.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the source errors mid-stream, the
    /// sink rejects a row, or a worker task panics. Lookup failures are
    /// never errors here — they are per-row records in the statistics.
    pub async fn run<I>(
        &self,
        batches: I,
        columns: ColumnMap,
        total_rows: Option<u64>,
        progress: Arc<dyn ProgressCallback>,
        stop: StopSignal,
        mut sink: impl FnMut(EnrichedRow) -> Result<(), PipelineError>,
    ) -> Result<Stats, PipelineError>
    where
        I: Iterator<Item = Result<RowBatch, ReadError>> + Send + 'static,
    {
        let stats = Arc::new(StatsAccumulator::new());
        if let Some(total) = total_rows {
            progress.set_total(total);
        }

        let (row_tx, row_rx) = mpsc::channel::<Row>(self.workers * 2);
        let (out_tx, mut out_rx) = mpsc::channel::<EnrichedRow>(self.workers * 2);
        let row_rx = Arc::new(Mutex::new(row_rx));

        // Feeder: drains the (blocking) reader into the row queue.
        let feeder_stop = stop.clone();
        let feeder = tokio::task::spawn_blocking(move || -> Result<(), ReadError> {
            for batch in batches {
                if feeder_stop.is_stopped() {
                    break;
                }
                for row in batch? {
                    if row_tx.blocking_send(row).is_err() {
                        // All workers are gone; nothing left to feed.
                        return Ok(());
                    }
                }
            }
            Ok(())
        });

        // Workers: pull rows, resolve, emit.
        let mut handles = Vec::with_capacity(self.workers);
        for _ in 0..self.workers {
            let rx = Arc::clone(&row_rx);
            let out = out_tx.clone();
            let postal = Arc::clone(&self.postal);
            let geo = Arc::clone(&self.geo);
            let stats = Arc::clone(&stats);
            let stop = stop.clone();
            let columns = columns.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    if stop.is_stopped() {
                        break;
                    }
                    let row = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    let Some(row) = row else { break };

                    let enrichment = enrich::enrich_row(
                        &row,
                        &columns,
                        postal.as_ref(),
                        geo.as_ref(),
                        stats.as_ref(),
                    )
                    .await;

                    if out.send(EnrichedRow { row, enrichment }).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(out_tx);

        // Collector: reassemble source order and drive the sink.
        let mut pending: BTreeMap<u64, EnrichedRow> = BTreeMap::new();
        let mut next_index: u64 = 0;
        while let Some(enriched) = out_rx.recv().await {
            progress.inc(1);
            pending.insert(enriched.row.index, enriched);
            while let Some(ready) = pending.remove(&next_index) {
                sink(ready)?;
                next_index += 1;
            }
        }

        // A cancelled run can leave an index gap; flush what completed,
        // still in ascending order.
        for (_, ready) in std::mem::take(&mut pending) {
            sink(ready)?;
        }

        for join in join_all(handles).await {
            join.map_err(|e| PipelineError::Task(e.to_string()))?;
        }
        feeder
            .await
            .map_err(|e| PipelineError::Task(e.to_string()))??;

        Ok(stats.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::null_progress;
    use crate::resolvers::{CachedGeo, CachedPostal};
    use async_trait::async_trait;
    use geo_enrich_cache::LookupCache;
    use geo_enrich_lookup::LookupError;
    use geo_enrich_models::{AddressQuery, CepRecord, Coordinates, ErrorKind, Resolution};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Postal stub: one canned record, call counter.
    struct StubPostal {
        calls: AtomicU32,
        records: BTreeMap<String, CepRecord>,
    }

    impl StubPostal {
        fn with_record(cep_digits: &str, record: CepRecord) -> Self {
            let mut records = BTreeMap::new();
            records.insert(cep_digits.to_string(), record);
            Self {
                calls: AtomicU32::new(0),
                records,
            }
        }

        fn empty() -> Self {
            Self {
                calls: AtomicU32::new(0),
                records: BTreeMap::new(),
            }
        }
    }

    #[async_trait]
    impl PostalLookup for StubPostal {
        async fn resolve_code(&self, cep: &str) -> Result<Resolution<CepRecord>, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .records
                .get(cep)
                .cloned()
                .map_or(Resolution::NotFound, Resolution::Found))
        }

        async fn search_by_address(
            &self,
            _street: &str,
            _city: &str,
            _region: &str,
        ) -> Result<Resolution<CepRecord>, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Resolution::NotFound)
        }
    }

    /// Geo stub: always found, with a per-row latency derived from the
    /// street field so completion order can be engineered.
    struct StubGeo {
        calls: AtomicU32,
        latency_for: fn(&AddressQuery) -> Duration,
    }

    impl StubGeo {
        fn instant() -> Self {
            Self {
                calls: AtomicU32::new(0),
                latency_for: |_| Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl GeoLookup for StubGeo {
        async fn resolve(
            &self,
            query: &AddressQuery,
        ) -> Result<Resolution<Coordinates>, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = (self.latency_for)(query);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(Resolution::Found(Coordinates {
                latitude: -23.0,
                longitude: -46.0,
            }))
        }
    }

    fn sample_record() -> CepRecord {
        CepRecord {
            cep: "01310-100".to_string(),
            street: "Avenida Paulista".to_string(),
            neighborhood: "Bela Vista".to_string(),
            city: "São Paulo".to_string(),
            region: "SP".to_string(),
        }
    }

    fn address_header() -> Vec<String> {
        ["postal_code", "street", "city", "state"]
            .iter()
            .map(|s| (*s).to_string())
            .collect()
    }

    fn make_rows(cells: &[[&str; 4]]) -> Vec<RowBatch> {
        let rows: Vec<Row> = cells
            .iter()
            .enumerate()
            .map(|(i, row)| Row {
                index: i as u64,
                values: row.iter().map(|s| (*s).to_string()).collect(),
            })
            .collect();
        vec![rows]
    }

    fn run_pool<P, G>(
        postal: Arc<P>,
        geo: Arc<G>,
        workers: usize,
        batches: Vec<RowBatch>,
        columns: ColumnMap,
    ) -> (Vec<EnrichedRow>, Stats)
    where
        P: PostalLookup + 'static,
        G: GeoLookup + 'static,
    {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .build()
            .unwrap();
        let pool = EnrichmentWorkerPool::new(postal, geo, workers);
        let mut emitted = Vec::new();
        let stats = runtime
            .block_on(pool.run(
                batches.into_iter().map(Ok),
                columns,
                None,
                null_progress(),
                StopSignal::new(),
                |row| {
                    emitted.push(row);
                    Ok(())
                },
            ))
            .unwrap();
        (emitted, stats)
    }

    #[test]
    fn validated_postal_code_populates_corrected_fields_and_coordinates() {
        let postal = Arc::new(StubPostal::with_record("01310100", sample_record()));
        let geo = Arc::new(StubGeo::instant());
        let columns = ColumnMap::resolve(&address_header());

        let batches = make_rows(&[["01310-100", "", "São Paulo", "SP"]]);
        let (rows, stats) = run_pool(postal, geo, 2, batches, columns);

        assert_eq!(rows.len(), 1);
        let enrichment = &rows[0].enrichment;
        assert_eq!(enrichment.corrected_postal_code.as_deref(), Some("01310100"));
        assert_eq!(enrichment.corrected_street.as_deref(), Some("Avenida Paulista"));
        assert!(enrichment.coordinates.is_some());
        assert_eq!(stats.total_rows, 1);
        assert_eq!(stats.resolved_coordinates, 1);
        assert!(stats.errors.is_empty());
    }

    #[test]
    fn malformed_postal_code_never_reaches_the_network() {
        let postal = Arc::new(StubPostal::empty());
        let geo = Arc::new(StubGeo::instant());
        let columns = ColumnMap::resolve(&address_header());

        // 11 digits survive the digit filter but fail the length check.
        let batches = make_rows(&[["12345678901", "", "", ""]]);
        let (rows, stats) = run_pool(Arc::clone(&postal), geo, 2, batches, columns);

        assert_eq!(postal.calls.load(Ordering::SeqCst), 0);
        assert_eq!(stats.errors.len(), 1);
        assert_eq!(stats.errors[0].kind, ErrorKind::PostalFormat);
        // Row passes through unchanged.
        assert_eq!(rows[0].enrichment.corrected_postal_code, None);
        assert!(rows[0].enrichment.coordinates.is_none());
    }

    #[test]
    fn output_preserves_source_order_under_adversarial_latencies() {
        const ROWS: usize = 100;

        let postal = Arc::new(StubPostal::empty());
        // Later rows resolve faster than earlier ones.
        let geo = Arc::new(StubGeo {
            calls: AtomicU32::new(0),
            latency_for: |query| {
                let id: u64 = query
                    .street
                    .split_whitespace()
                    .last()
                    .and_then(|n| n.parse().ok())
                    .unwrap_or(0);
                Duration::from_millis((ROWS as u64).saturating_sub(id) / 4)
            },
        });

        let cells: Vec<[String; 4]> = (0..ROWS)
            .map(|i| {
                [
                    String::new(),
                    format!("Rua {i}"),
                    "Cidade".to_string(),
                    "SP".to_string(),
                ]
            })
            .collect();
        let rows: Vec<Row> = cells
            .iter()
            .enumerate()
            .map(|(i, c)| Row {
                index: i as u64,
                values: c.to_vec(),
            })
            .collect();

        let columns = ColumnMap::resolve(&address_header());
        let (emitted, stats) = run_pool(postal, geo, 8, vec![rows], columns);

        let indices: Vec<u64> = emitted.iter().map(|r| r.row.index).collect();
        let expected: Vec<u64> = (0..ROWS as u64).collect();
        assert_eq!(indices, expected);
        assert_eq!(stats.total_rows, ROWS as u64);
    }

    #[test]
    fn warm_cache_run_makes_zero_external_calls_and_identical_output() {
        let cache = Arc::new(LookupCache::open_in_memory().unwrap());
        let postal_stub = Arc::new(CachedPostal::new(
            StubPostal::with_record("01310100", sample_record()),
            Arc::clone(&cache),
        ));
        let geo_stub = Arc::new(CachedGeo::new(StubGeo::instant(), Arc::clone(&cache)));
        let columns = ColumnMap::resolve(&address_header());

        let cells = [
            ["01310-100", "", "São Paulo", "SP"],
            ["01310-100", "", "São Paulo", "SP"],
        ];

        let (first_rows, _) = run_pool(
            Arc::clone(&postal_stub),
            Arc::clone(&geo_stub),
            1,
            make_rows(&cells),
            columns.clone(),
        );

        // Two rows, one unique code: exactly one directory call.
        let cold_postal_calls = postal_stub.inner().calls.load(Ordering::SeqCst);
        assert_eq!(cold_postal_calls, 1);
        let cold_geo_calls = geo_stub.inner().calls.load(Ordering::SeqCst);

        let (second_rows, _) = run_pool(
            Arc::clone(&postal_stub),
            Arc::clone(&geo_stub),
            1,
            make_rows(&cells),
            columns,
        );

        // Warm cache: zero additional external calls, identical output.
        assert_eq!(postal_stub.inner().calls.load(Ordering::SeqCst), cold_postal_calls);
        assert_eq!(geo_stub.inner().calls.load(Ordering::SeqCst), cold_geo_calls);
        assert_eq!(first_rows, second_rows);
    }

    #[test]
    fn cancelled_run_emits_nothing_but_returns_cleanly() {
        let postal = Arc::new(StubPostal::empty());
        let geo = Arc::new(StubGeo::instant());
        let columns = ColumnMap::resolve(&address_header());

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .build()
            .unwrap();
        let pool = EnrichmentWorkerPool::new(postal, geo, 2);
        let stop = StopSignal::new();
        stop.stop();

        let batches = make_rows(&[["01310-100", "", "São Paulo", "SP"]]);
        let mut emitted = Vec::new();
        let stats = runtime
            .block_on(pool.run(
                batches.into_iter().map(Ok),
                columns,
                None,
                null_progress(),
                stop,
                |row| {
                    emitted.push(row);
                    Ok(())
                },
            ))
            .unwrap();

        assert!(emitted.is_empty());
        assert_eq!(stats.total_rows, 0);
    }

    #[test]
    fn source_rows_with_coordinates_skip_geocoding() {
        let postal = Arc::new(StubPostal::empty());
        let geo = Arc::new(StubGeo::instant());
        let header: Vec<String> = ["street", "city", "state", "latitude", "longitude"]
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        let columns = ColumnMap::resolve(&header);

        let rows = vec![Row {
            index: 0,
            values: vec![
                "Avenida Paulista".to_string(),
                "São Paulo".to_string(),
                "SP".to_string(),
                "-23.56".to_string(),
                "-46.65".to_string(),
            ],
        }];

        let (emitted, stats) = run_pool(postal, Arc::clone(&geo), 1, vec![rows], columns);

        assert_eq!(geo.calls.load(Ordering::SeqCst), 0);
        assert!(emitted[0].enrichment.coordinates.is_none());
        assert_eq!(stats.resolved_coordinates, 0);
    }
}
