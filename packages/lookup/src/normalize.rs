//! Address text normalization.
//!
//! Two distinct pipelines share the helpers here:
//!
//! - **Cache keys**: [`normalize_component`] + [`geo_cache_key`] produce a
//!   deterministic, diacritics-insensitive form so that "São Paulo" and
//!   "SAO PAULO" hash to the same geo cache key.
//! - **Output fields**: [`normalize_street_name`] standardizes corrected
//!   street/neighborhood text for the enriched table (abbreviation
//!   expansion, Portuguese title-casing).

use geo_enrich_models::AddressQuery;
use regex::Regex;
use sha2::{Digest as _, Sha256};
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization as _;
use unicode_normalization::char::is_combining_mark;

/// Regex to collapse runs of whitespace into a single space.
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s{2,}").expect("valid regex"));

/// Regex to strip non-word punctuation at the start/end of a value.
static EDGE_PUNCT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\w\s]+|[^\w\s]+$").expect("valid regex"));

/// Street-type abbreviations expanded in corrected output fields.
/// Tokens are matched uppercase, with any trailing dot removed.
static STREET_TYPE_EXPANSIONS: &[(&str, &str)] = &[
    ("R", "Rua"),
    ("RUA", "Rua"),
    ("AV", "Avenida"),
    ("AVDA", "Avenida"),
    ("AVENIDA", "Avenida"),
    ("ALM", "Alameda"),
    ("ALAMEDA", "Alameda"),
    ("TRAV", "Travessa"),
    ("TRAVESSA", "Travessa"),
    ("PÇ", "Praça"),
    ("PC", "Praça"),
    ("PRACA", "Praça"),
    ("PRAÇA", "Praça"),
    ("ROD", "Rodovia"),
    ("RODOVIA", "Rodovia"),
    ("EST", "Estrada"),
    ("ESTRADA", "Estrada"),
    ("LGO", "Largo"),
    ("LARGO", "Largo"),
    ("CONJ", "Conjunto"),
    ("CONJUNTO", "Conjunto"),
];

/// Connective words kept lowercase in Portuguese title case.
static LOWERCASE_WORDS: &[&str] = &["de", "da", "do", "das", "dos", "e", "a", "o"];

/// Strips combining marks after NFD decomposition ("São" → "Sao").
#[must_use]
pub fn fold_diacritics(input: &str) -> String {
    input.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Normalizes one address component for cache keying: trim, collapse
/// whitespace, fold diacritics, lowercase.
#[must_use]
pub fn normalize_component(input: &str) -> String {
    let collapsed = WHITESPACE_RE.replace_all(input.trim(), " ");
    fold_diacritics(&collapsed).to_lowercase()
}

/// Hashes a normalized address query into the geo cache key.
///
/// The key is the SHA-256 of the normalized components joined by `|`,
/// hex-encoded. Field positions are fixed, so an empty neighborhood and
/// an empty street cannot collide.
#[must_use]
pub fn geo_cache_key(query: &AddressQuery) -> String {
    let canonical = [
        normalize_component(&query.street),
        normalize_component(&query.neighborhood),
        normalize_component(&query.city),
        normalize_component(&query.region),
    ]
    .join("|");

    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}

/// Standardizes a street or neighborhood name for the corrected output
/// fields: collapse whitespace, strip stray edge punctuation, expand
/// street-type abbreviations, Portuguese title case.
#[must_use]
pub fn normalize_street_name(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let collapsed = WHITESPACE_RE.replace_all(trimmed, " ");
    let stripped = EDGE_PUNCT_RE.replace_all(&collapsed, "");

    let expanded: Vec<String> = stripped
        .split_whitespace()
        .map(|token| {
            let bare = token.trim_end_matches('.').to_uppercase();
            STREET_TYPE_EXPANSIONS
                .iter()
                .find(|(abbr, _)| *abbr == bare)
                .map_or_else(|| token.to_string(), |(_, full)| (*full).to_string())
        })
        .collect();

    title_case_pt(&expanded.join(" "))
}

/// Title-cases Portuguese text, keeping connective words lowercase
/// (except in first position).
fn title_case_pt(input: &str) -> String {
    input
        .split_whitespace()
        .enumerate()
        .map(|(i, word)| {
            let lower = word.to_lowercase();
            if i > 0 && LOWERCASE_WORDS.contains(&lower.as_str()) {
                lower
            } else {
                capitalize(&lower)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().collect::<String>() + chars.as_str()
    })
}
