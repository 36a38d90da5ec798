//! Multi-strategy geocoding fallback.
//!
//! A row's address fields yield a ranked sequence of query candidates,
//! most to least specific; the first `Found` wins and later candidates
//! are never attempted. Adding a strategy means appending a builder to
//! the list, not adding branch logic.
//!
//! Outcome classification is the key invariant of the whole pipeline:
//! `NotFound` is reported only when **every** candidate is a confirmed
//! negative. One transient failure anywhere (without a later `Found`)
//! makes the overall result `Failed`, so the row is retried on a future
//! run instead of being silently accepted as "no coordinates".

use std::future::Future;

use geo_enrich_lookup::LookupError;
use geo_enrich_lookup::viacep::format_cep;
use geo_enrich_models::{AddressQuery, Coordinates, Resolution};

/// One geocoding query candidate, labeled for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Strategy name, used in error messages.
    pub label: &'static str,
    /// The query to resolve.
    pub query: AddressQuery,
}

/// Builds the ranked candidate list for a row's address fields.
///
/// Candidates whose required fields are missing are skipped at build
/// time; consecutive duplicates (e.g., when the neighborhood is empty)
/// collapse into one.
#[must_use]
pub fn build_candidates(
    postal_code: Option<&str>,
    street: &str,
    neighborhood: &str,
    city: &str,
    region: &str,
) -> Vec<Candidate> {
    let mut candidates = Vec::new();

    // Postal code + city, scoped to the country. The code goes in the
    // street slot of the free-form query.
    if let Some(code) = postal_code
        && !city.is_empty()
    {
        candidates.push(Candidate {
            label: "postal_city",
            query: AddressQuery {
                street: format_cep(code),
                neighborhood: String::new(),
                city: city.to_string(),
                region: "BR".to_string(),
            },
        });
    }

    if !street.is_empty() && !city.is_empty() {
        candidates.push(Candidate {
            label: "street_neighborhood_city",
            query: AddressQuery {
                street: street.to_string(),
                neighborhood: neighborhood.to_string(),
                city: city.to_string(),
                region: region.to_string(),
            },
        });
        candidates.push(Candidate {
            label: "street_city",
            query: AddressQuery {
                street: street.to_string(),
                neighborhood: String::new(),
                city: city.to_string(),
                region: region.to_string(),
            },
        });
    }

    if !neighborhood.is_empty() && !city.is_empty() {
        candidates.push(Candidate {
            label: "neighborhood_city",
            query: AddressQuery {
                street: String::new(),
                neighborhood: neighborhood.to_string(),
                city: city.to_string(),
                region: region.to_string(),
            },
        });
    }

    // City centroid, the broadest fallback.
    if !city.is_empty() && !region.is_empty() {
        candidates.push(Candidate {
            label: "city_region",
            query: AddressQuery {
                street: String::new(),
                neighborhood: String::new(),
                city: city.to_string(),
                region: region.to_string(),
            },
        });
    }

    candidates.dedup_by(|a, b| a.query == b.query);
    candidates
}

/// A candidate that failed transiently during the fallback chain.
#[derive(Debug)]
pub struct CandidateFailure {
    /// Strategy name of the failed candidate.
    pub label: &'static str,
    /// The failure.
    pub error: LookupError,
}

/// Overall outcome of the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FallbackOutcome {
    /// Some candidate matched; the chain stopped there.
    Found {
        /// Winning coordinates.
        coordinates: Coordinates,
        /// Winning strategy label.
        strategy: &'static str,
    },
    /// Every candidate was a confirmed negative.
    NotFound,
    /// At least one candidate failed transiently and none matched.
    Failed,
}

/// Result of a fallback chain: the outcome plus the diagnostic trail of
/// transient sub-candidate failures (kept even when a broader candidate
/// later succeeded).
#[derive(Debug)]
pub struct FallbackResult {
    /// Overall classification.
    pub outcome: FallbackOutcome,
    /// Transient failures encountered along the way.
    pub failures: Vec<CandidateFailure>,
}

/// Tries candidates in order through `resolve`, classifying the overall
/// outcome per the confirmed-absent vs. unknown-due-to-error rule.
///
/// A transient failure of a narrow query does not block trying a broader
/// one.
pub async fn try_in_order<F, Fut>(candidates: Vec<Candidate>, mut resolve: F) -> FallbackResult
where
    F: FnMut(AddressQuery) -> Fut,
    Fut: Future<Output = Result<Resolution<Coordinates>, LookupError>>,
{
    let mut failures = Vec::new();

    for candidate in candidates {
        match resolve(candidate.query).await {
            Ok(Resolution::Found(coordinates)) => {
                return FallbackResult {
                    outcome: FallbackOutcome::Found {
                        coordinates,
                        strategy: candidate.label,
                    },
                    failures,
                };
            }
            Ok(Resolution::NotFound) => {}
            Err(error) => {
                log::debug!("geocode candidate '{}' failed: {error}", candidate.label);
                failures.push(CandidateFailure {
                    label: candidate.label,
                    error,
                });
            }
        }
    }

    let outcome = if failures.is_empty() {
        FallbackOutcome::NotFound
    } else {
        FallbackOutcome::Failed
    };
    FallbackResult { outcome, failures }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn coords() -> Coordinates {
        Coordinates {
            latitude: -23.56,
            longitude: -46.65,
        }
    }

    #[test]
    fn full_row_builds_all_strategies_in_rank_order() {
        let candidates = build_candidates(
            Some("01310100"),
            "Avenida Paulista",
            "Bela Vista",
            "São Paulo",
            "SP",
        );
        let labels: Vec<&str> = candidates.iter().map(|c| c.label).collect();
        assert_eq!(
            labels,
            vec![
                "postal_city",
                "street_neighborhood_city",
                "street_city",
                "neighborhood_city",
                "city_region",
            ]
        );
        assert_eq!(candidates[0].query.street, "01310-100");
    }

    #[test]
    fn missing_fields_skip_strategies() {
        let candidates = build_candidates(None, "", "", "São Paulo", "SP");
        let labels: Vec<&str> = candidates.iter().map(|c| c.label).collect();
        assert_eq!(labels, vec!["city_region"]);
    }

    #[test]
    fn empty_neighborhood_collapses_duplicate_street_queries() {
        let candidates = build_candidates(None, "Avenida Paulista", "", "São Paulo", "SP");
        let labels: Vec<&str> = candidates.iter().map(|c| c.label).collect();
        assert_eq!(labels, vec!["street_neighborhood_city", "city_region"]);
    }

    #[tokio::test]
    async fn first_found_wins_and_stops_the_chain() {
        let calls = AtomicU32::new(0);
        let candidates = build_candidates(None, "Rua A", "B", "Cidade", "SP");
        assert!(candidates.len() >= 3);

        let result = try_in_order(candidates, |_query| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 1 {
                    Ok(Resolution::Found(coords()))
                } else {
                    Ok(Resolution::NotFound)
                }
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(
            result.outcome,
            FallbackOutcome::Found { strategy: "street_city", .. }
        ));
        assert!(result.failures.is_empty());
    }

    #[tokio::test]
    async fn all_confirmed_negatives_are_not_found() {
        let candidates = build_candidates(None, "Rua A", "", "Cidade", "SP");
        let result = try_in_order(candidates, |_query| async { Ok(Resolution::NotFound) }).await;
        assert_eq!(result.outcome, FallbackOutcome::NotFound);
        assert!(result.failures.is_empty());
    }

    #[tokio::test]
    async fn one_failure_without_a_match_is_failed() {
        let calls = AtomicU32::new(0);
        let candidates = build_candidates(None, "Rua A", "", "Cidade", "SP");

        let result = try_in_order(candidates, |_query| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(LookupError::Status(503))
                } else {
                    Ok(Resolution::NotFound)
                }
            }
        })
        .await;

        assert_eq!(result.outcome, FallbackOutcome::Failed);
        assert_eq!(result.failures.len(), 1);
    }

    #[tokio::test]
    async fn failure_then_broader_match_is_found_with_diagnostic_trail() {
        let calls = AtomicU32::new(0);
        let candidates = build_candidates(None, "Rua A", "", "Cidade", "SP");

        let result = try_in_order(candidates, |_query| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(LookupError::Status(503))
                } else {
                    Ok(Resolution::Found(coords()))
                }
            }
        })
        .await;

        assert!(matches!(result.outcome, FallbackOutcome::Found { .. }));
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].label, "street_neighborhood_city");
    }
}
