//! Per-row enrichment: the two independent resolution pipelines.
//!
//! Each row gets (1) postal-code validation/recovery through the
//! directory service and (2) coordinate resolution through the geocoding
//! fallback chain. A failed lookup never drops the row — the original
//! values pass through and the failure lands in the statistics.

use geo_enrich_lookup::normalize::normalize_street_name;
use geo_enrich_lookup::viacep::normalize_cep;
use geo_enrich_models::{CepRecord, Enrichment, ErrorKind, Resolution, Row};
use geo_enrich_reader::{ColumnMap, ColumnRole};

use crate::fallback::{self, FallbackOutcome};
use crate::resolvers::{GeoLookup, PostalLookup};
use crate::stats::StatsAccumulator;

/// The row's address fields, as resolved by the column map.
struct SourceFields<'a> {
    street: &'a str,
    neighborhood: &'a str,
    city: &'a str,
    region: &'a str,
}

impl<'a> SourceFields<'a> {
    fn of(columns: &ColumnMap, values: &'a [String]) -> Self {
        Self {
            street: columns.value(ColumnRole::Street, values),
            neighborhood: columns.value(ColumnRole::Neighborhood, values),
            city: columns.value(ColumnRole::City, values),
            region: columns.value(ColumnRole::Region, values),
        }
    }
}

/// Resolves one row against both lookup pipelines, recording counters
/// and errors into `stats`.
pub(crate) async fn enrich_row<P, G>(
    row: &Row,
    columns: &ColumnMap,
    postal: &P,
    geo: &G,
    stats: &StatsAccumulator,
) -> Enrichment
where
    P: PostalLookup + ?Sized,
    G: GeoLookup + ?Sized,
{
    stats.record_row();

    let fields = SourceFields::of(columns, &row.values);
    let mut enrichment = Enrichment::default();

    let record = resolve_postal(row, columns, postal, stats, &mut enrichment, &fields).await;
    fill_corrected_fields(&mut enrichment, record.as_ref(), &fields);

    if has_source_coordinates(columns, &row.values) {
        // The source already carries coordinates; nothing to resolve.
        return enrichment;
    }

    resolve_coordinates(row, geo, stats, &mut enrichment, &fields).await;
    enrichment
}

/// Postal pipeline: validate the source code, look it up, and fall back
/// to a street search when the directory confirms the code absent.
async fn resolve_postal<P>(
    row: &Row,
    columns: &ColumnMap,
    postal: &P,
    stats: &StatsAccumulator,
    enrichment: &mut Enrichment,
    fields: &SourceFields<'_>,
) -> Option<CepRecord>
where
    P: PostalLookup + ?Sized,
{
    let raw = columns.value(ColumnRole::PostalCode, &row.values);
    if raw.is_empty() {
        return None;
    }

    let Some(digits) = normalize_cep(raw) else {
        stats.record_error(
            row.index,
            ErrorKind::PostalFormat,
            format!("postal code {raw:?} is not an 8-digit CEP"),
        );
        return None;
    };

    match postal.resolve_code(&digits).await {
        Ok(Resolution::Found(record)) => {
            enrichment.corrected_postal_code = Some(digits);
            Some(record)
        }
        Ok(Resolution::NotFound) => {
            recover_postal_by_address(row, postal, stats, enrichment, fields).await
        }
        Err(e) => {
            stats.record_error(row.index, ErrorKind::PostalLookup, e.to_string());
            None
        }
    }
}

/// Directory street search, used when a well-formed code has no
/// directory entry. A recovered code counts as a correction.
async fn recover_postal_by_address<P>(
    row: &Row,
    postal: &P,
    stats: &StatsAccumulator,
    enrichment: &mut Enrichment,
    fields: &SourceFields<'_>,
) -> Option<CepRecord>
where
    P: PostalLookup + ?Sized,
{
    if fields.street.is_empty() || fields.city.is_empty() || fields.region.is_empty() {
        return None;
    }

    match postal
        .search_by_address(fields.street, fields.city, fields.region)
        .await
    {
        Ok(Resolution::Found(record)) => {
            let recovered = normalize_cep(&record.cep)?;
            log::debug!("row {}: recovered postal code {recovered}", row.index);
            enrichment.corrected_postal_code = Some(recovered);
            stats.record_corrected_postal();
            Some(record)
        }
        Ok(Resolution::NotFound) => None,
        Err(e) => {
            stats.record_error(
                row.index,
                ErrorKind::PostalLookup,
                format!("street search failed: {e}"),
            );
            None
        }
    }
}

/// Populates the corrected output fields: directory values win, original
/// values back-fill, street/neighborhood get normalized either way.
fn fill_corrected_fields(
    enrichment: &mut Enrichment,
    record: Option<&CepRecord>,
    fields: &SourceFields<'_>,
) {
    let pick = |from_record: Option<&str>, original: &str| -> Option<String> {
        let chosen = from_record
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(original)
            .trim();
        (!chosen.is_empty()).then(|| chosen.to_string())
    };

    enrichment.corrected_street = pick(record.map(|r| r.street.as_str()), fields.street)
        .map(|value| normalize_street_name(&value));
    enrichment.corrected_neighborhood =
        pick(record.map(|r| r.neighborhood.as_str()), fields.neighborhood)
            .map(|value| normalize_street_name(&value));
    enrichment.corrected_city = pick(record.map(|r| r.city.as_str()), fields.city);
    enrichment.corrected_region = pick(record.map(|r| r.region.as_str()), fields.region);
}

/// `true` when the source row already has a parseable coordinate pair.
fn has_source_coordinates(columns: &ColumnMap, values: &[String]) -> bool {
    let parse = |role| {
        let cell = columns.value(role, values);
        !cell.is_empty() && cell.parse::<f64>().is_ok()
    };
    parse(ColumnRole::Latitude) && parse(ColumnRole::Longitude)
}

/// Geocoding pipeline: ranked fallback chain over the corrected-else-
/// original address fields.
async fn resolve_coordinates<G>(
    row: &Row,
    geo: &G,
    stats: &StatsAccumulator,
    enrichment: &mut Enrichment,
    fields: &SourceFields<'_>,
) where
    G: GeoLookup + ?Sized,
{
    let corrected_or = |corrected: &Option<String>, original: &str| -> String {
        corrected
            .as_deref()
            .filter(|value| !value.is_empty())
            .unwrap_or(original)
            .to_string()
    };

    let candidates = fallback::build_candidates(
        enrichment.corrected_postal_code.as_deref(),
        &corrected_or(&enrichment.corrected_street, fields.street),
        &corrected_or(&enrichment.corrected_neighborhood, fields.neighborhood),
        &corrected_or(&enrichment.corrected_city, fields.city),
        &corrected_or(&enrichment.corrected_region, fields.region),
    );
    if candidates.is_empty() {
        return;
    }

    let candidate_count = candidates.len();
    let result =
        fallback::try_in_order(candidates, |query| async move { geo.resolve(&query).await }).await;

    match result.outcome {
        FallbackOutcome::Found {
            coordinates,
            strategy,
        } => {
            log::debug!("row {}: coordinates via '{strategy}'", row.index);
            enrichment.coordinates = Some(coordinates);
            stats.record_resolved_coordinates();
            // Keep the diagnostic trail of narrower candidates that
            // failed before the winning one.
            for failure in &result.failures {
                stats.record_error(
                    row.index,
                    ErrorKind::GeoCandidate,
                    format!("candidate '{}' failed: {}", failure.label, failure.error),
                );
            }
        }
        FallbackOutcome::NotFound => {}
        FallbackOutcome::Failed => {
            let last = result
                .failures
                .last()
                .map_or_else(String::new, |f| format!("; last error: {}", f.error));
            stats.record_error(
                row.index,
                ErrorKind::GeoLookup,
                format!("all {candidate_count} geocode candidates failed or were not found{last}"),
            );
        }
    }
}
