//! Thread-safe run statistics.
//!
//! Counters are incremented exactly once per row per category by the
//! workers; [`StatsAccumulator::snapshot`] finalizes everything into an
//! immutable [`Stats`] for the caller, with errors ordered by row index.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use geo_enrich_models::{ErrorKind, RowError, Stats};

/// Accumulates counters and per-row errors across concurrent workers.
#[derive(Debug, Default)]
pub struct StatsAccumulator {
    total_rows: AtomicU64,
    corrected_postal: AtomicU64,
    resolved_coordinates: AtomicU64,
    errors: Mutex<Vec<RowError>>,
}

impl StatsAccumulator {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one consumed row.
    pub fn record_row(&self) {
        self.total_rows.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one postal-code correction.
    pub fn record_corrected_postal(&self) {
        self.corrected_postal.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one resolved coordinate pair.
    pub fn record_resolved_coordinates(&self) {
        self.resolved_coordinates.fetch_add(1, Ordering::Relaxed);
    }

    /// Appends a per-row error record.
    pub fn record_error(&self, row_index: u64, kind: ErrorKind, message: impl Into<String>) {
        let mut errors = self
            .errors
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        errors.push(RowError {
            row_index,
            kind,
            message: message.into(),
        });
    }

    /// Rows consumed so far.
    #[must_use]
    pub fn total_rows(&self) -> u64 {
        self.total_rows.load(Ordering::Relaxed)
    }

    /// Finalizes into an immutable snapshot, errors sorted by row index.
    #[must_use]
    pub fn snapshot(&self) -> Stats {
        let mut errors = self
            .errors
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        errors.sort_by_key(|e| e.row_index);

        Stats {
            total_rows: self.total_rows.load(Ordering::Relaxed),
            corrected_postal: self.corrected_postal.load(Ordering::Relaxed),
            resolved_coordinates: self.resolved_coordinates.load(Ordering::Relaxed),
            errors,
        }
    }
}
