#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Durable lookup cache backed by a single-file `DuckDB` store.
//!
//! Maps a normalized lookup key (postal code, or a hashed address query)
//! to a previously resolved result, so repeat lookups across runs never
//! touch the network. Two logical namespaces share one table:
//! `postal` for directory lookups and `geo` for geocoding.
//!
//! Confirmed negatives are cached too — a `NULL` payload records that the
//! service explicitly reported no match. Transient failures are never
//! written, so they are retried on a future run.
//!
//! Entries never expire. If an upstream service later gains data for a
//! previously-missing key, the cache will not discover it without a
//! manual [`LookupCache::clear`]; this staleness trade-off is deliberate.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use duckdb::Connection;

/// Logical namespace of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    /// Postal-code directory lookups.
    Postal,
    /// Address geocoding lookups.
    Geo,
}

impl CacheKind {
    /// The namespace string stored in the backing table.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Postal => "postal",
            Self::Geo => "geo",
        }
    }
}

/// A cached lookup result.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Normalized lookup key.
    pub key: String,
    /// Namespace the entry belongs to.
    pub kind: CacheKind,
    /// Resolved payload; `None` records a confirmed negative.
    pub payload: Option<serde_json::Value>,
    /// When the entry was first written.
    pub created_at: DateTime<Utc>,
}

/// Entry counts per namespace, for maintenance commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries in the `postal` namespace.
    pub postal_entries: u64,
    /// Entries in the `geo` namespace.
    pub geo_entries: u64,
}

/// Errors from the cache store.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Underlying store error (connection, schema, query).
    #[error("cache store error: {0}")]
    Store(#[from] duckdb::Error),

    /// Payload serialization failed.
    #[error("cache payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// The parent directory for the store file could not be created.
    #[error("cache path error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable key→value store for lookup results.
///
/// The `DuckDB` connection is `Send` but not `Sync`, so calls serialize
/// through a short-lived lock; each statement runs as its own store
/// transaction, which gives the per-key atomicity the callers rely on.
pub struct LookupCache {
    conn: Mutex<Connection>,
}

impl LookupCache {
    /// Opens (or creates) the cache at `path`. A missing file is not an
    /// error — it is created empty, parent directories included.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the directory, connection, or schema
    /// creation fails.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens a transient in-memory cache (used by tests and `--no-cache`
    /// runs, where cross-run durability is not wanted).
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the connection or schema creation fails.
    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Looks up an entry by namespace and key.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the query fails.
    pub fn get(&self, kind: CacheKind, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT payload, created_at FROM lookup_cache
             WHERE namespace = ? AND key = ?",
        )?;

        stmt.raw_bind_parameter(1, kind.as_str())?;
        stmt.raw_bind_parameter(2, key)?;
        stmt.raw_execute()?;

        let mut rows = stmt.raw_query();
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let payload_text: Option<String> = row.get(0)?;
        let created_text: String = row.get(1)?;

        let payload = match payload_text {
            Some(text) => Some(serde_json::from_str(&text)?),
            None => None,
        };
        let created_at = DateTime::parse_from_rfc3339(&created_text)
            .map_or_else(|_| Utc::now(), |ts| ts.with_timezone(&Utc));

        Ok(Some(CacheEntry {
            key: key.to_string(),
            kind,
            payload,
            created_at,
        }))
    }

    /// Writes an entry, overwriting any previous payload for the same
    /// key (last writer wins — lookups are deterministic per key, so a
    /// divergent payload indicates an upstream data correction).
    /// Re-inserting an identical payload is a harmless no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if serialization or the insert fails.
    pub fn put(
        &self,
        kind: CacheKind,
        key: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<(), CacheError> {
        let payload_text = payload.map(serde_json::to_string).transpose()?;
        let created_at = Utc::now().to_rfc3339();

        let conn = self.conn();
        conn.execute(
            "INSERT INTO lookup_cache (namespace, key, payload, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (namespace, key)
             DO UPDATE SET payload = excluded.payload",
            duckdb::params![kind.as_str(), key, payload_text, created_at],
        )?;
        Ok(())
    }

    /// Entry counts per namespace.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the query fails.
    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT namespace, COUNT(*) FROM lookup_cache GROUP BY namespace",
        )?;
        stmt.raw_execute()?;

        let mut stats = CacheStats::default();
        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next()? {
            let namespace: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            let count = u64::try_from(count).unwrap_or(0);
            match namespace.as_str() {
                "postal" => stats.postal_entries = count,
                "geo" => stats.geo_entries = count,
                other => log::warn!("unknown cache namespace: {other}"),
            }
        }
        Ok(stats)
    }

    /// Deletes every entry in both namespaces. The manual escape hatch
    /// for negative-entry staleness.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the delete fails.
    pub fn clear(&self) -> Result<(), CacheError> {
        let conn = self.conn();
        conn.execute("DELETE FROM lookup_cache", [])?;
        Ok(())
    }
}

fn create_schema(conn: &Connection) -> Result<(), duckdb::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS lookup_cache (
            namespace TEXT NOT NULL,
            key TEXT NOT NULL,
            payload TEXT,
            created_at TEXT NOT NULL,
            PRIMARY KEY (namespace, key)
        );",
    )?;
    Ok(())
}
