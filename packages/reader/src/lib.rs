#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Chunked ingestion of large tabular address files.
//!
//! [`ChunkReader`] streams a CSV source as bounded-size batches of
//! [`Row`]s without ever holding more than one chunk in memory. The
//! header is validated (and column roles resolved) before the first
//! batch is yielded, so a source missing the minimal column set fails
//! fast instead of after partial processing.
//!
//! The reader is restartable: every call to [`ChunkReader::open`]
//! re-opens the file from the start. It is not resumable mid-stream.

pub mod columns;

use std::fs::File;
use std::path::{Path, PathBuf};

use geo_enrich_models::{Row, RowBatch};

pub use columns::{ColumnMap, ColumnRole};

/// Errors from reading a tabular source.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// Filesystem error opening or reading the source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed CSV that the parser could not recover from.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The header lacks the minimal column set required downstream.
    #[error("missing required columns: need a postal-code column or street+city+region (absent: {missing})")]
    MissingColumns {
        /// Comma-separated names of the absent roles.
        missing: String,
    },
}

/// Streams a CSV file as batches of at most `chunk_size` rows.
#[derive(Debug, Clone)]
pub struct ChunkReader {
    path: PathBuf,
    chunk_size: usize,
    delimiter: u8,
}

impl ChunkReader {
    /// Creates a reader for `path` producing batches of at most
    /// `chunk_size` rows. A zero `chunk_size` is treated as 1.
    #[must_use]
    pub fn new(path: impl AsRef<Path>, chunk_size: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            chunk_size: chunk_size.max(1),
            delimiter: b',',
        }
    }

    /// Sets the field delimiter (default: comma).
    #[must_use]
    pub const fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Opens the source, reads and validates the header, and returns the
    /// batch iterator positioned at the first data row.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::MissingColumns`] if the header lacks both a
    /// postal-code column and the street+city+region triple, or an I/O /
    /// CSV error if the file cannot be read.
    pub fn open(&self) -> Result<Batches, ReadError> {
        let file = File::open(&self.path)?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .trim(csv::Trim::Headers)
            .flexible(true)
            .from_reader(file);

        let header: Vec<String> = reader
            .headers()?
            .iter()
            .map(std::string::ToString::to_string)
            .collect();

        let column_map = ColumnMap::resolve(&header);
        if let Err(missing) = column_map.validate() {
            return Err(ReadError::MissingColumns {
                missing: missing.join(", "),
            });
        }

        Ok(Batches {
            reader,
            header,
            column_map,
            chunk_size: self.chunk_size,
            next_index: 0,
            done: false,
        })
    }

    /// Counts the data rows in the source (header excluded) without
    /// retaining them, for progress totals.
    ///
    /// # Errors
    ///
    /// Returns an I/O or CSV error if the file cannot be read.
    pub fn count_rows(&self) -> Result<u64, ReadError> {
        let file = File::open(&self.path)?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .flexible(true)
            .from_reader(file);

        let mut count: u64 = 0;
        let mut record = csv::StringRecord::new();
        while reader.read_record(&mut record)? {
            count += 1;
        }
        Ok(count)
    }
}

/// Iterator over row batches for one pass through the source.
pub struct Batches {
    reader: csv::Reader<File>,
    header: Vec<String>,
    column_map: ColumnMap,
    chunk_size: usize,
    next_index: u64,
    done: bool,
}

impl std::fmt::Debug for Batches {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batches")
            .field("header", &self.header)
            .field("column_map", &self.column_map)
            .field("chunk_size", &self.chunk_size)
            .field("next_index", &self.next_index)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl Batches {
    /// The source header, in file order.
    #[must_use]
    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// The resolved column-role mapping for this source.
    #[must_use]
    pub const fn column_map(&self) -> &ColumnMap {
        &self.column_map
    }

    fn read_row(&mut self) -> Result<Option<Row>, ReadError> {
        let mut record = csv::StringRecord::new();
        if !self.reader.read_record(&mut record)? {
            return Ok(None);
        }

        let mut values: Vec<String> = record
            .iter()
            .map(std::string::ToString::to_string)
            .collect();

        // Ragged rows are tolerated: short rows are padded, long rows
        // truncated to the header width.
        if values.len() != self.header.len() {
            log::warn!(
                "row {} has {} fields, header has {}",
                self.next_index,
                values.len(),
                self.header.len()
            );
            values.resize(self.header.len(), String::new());
        }

        let row = Row {
            index: self.next_index,
            values,
        };
        self.next_index += 1;
        Ok(Some(row))
    }
}

impl Iterator for Batches {
    type Item = Result<RowBatch, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut batch = Vec::with_capacity(self.chunk_size);
        while batch.len() < self.chunk_size {
            match self.read_row() {
                Ok(Some(row)) => batch.push(row),
                Ok(None) => {
                    self.done = true;
                    break;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }

        if batch.is_empty() {
            None
        } else {
            Some(Ok(batch))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_csv(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const SAMPLE: &str = "\
CD_CEP,NM_LOGRADOURO,NM_MUNICIPIO,NM_UF
01310-100,Avenida Paulista,São Paulo,SP
20040-020,Rua da Assembleia,Rio de Janeiro,RJ
30130-010,Avenida Afonso Pena,Belo Horizonte,MG
";

    #[test]
    fn batches_respect_chunk_size_and_order() {
        let file = write_csv(SAMPLE);
        let reader = ChunkReader::new(file.path(), 2);

        let batches: Vec<RowBatch> = reader.open().unwrap().map(Result::unwrap).collect();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].len(), 1);

        let indices: Vec<u64> = batches
            .iter()
            .flatten()
            .map(|row| row.index)
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(batches[1][0].values[1], "Avenida Afonso Pena");
    }

    #[test]
    fn missing_columns_fail_before_any_data() {
        let file = write_csv("name,notes\na,b\n");
        let reader = ChunkReader::new(file.path(), 10);
        let err = reader.open().unwrap_err();
        assert!(matches!(err, ReadError::MissingColumns { .. }));
    }

    #[test]
    fn reopening_restarts_from_the_beginning() {
        let file = write_csv(SAMPLE);
        let reader = ChunkReader::new(file.path(), 10);

        let first: Vec<RowBatch> = reader.open().unwrap().map(Result::unwrap).collect();
        let second: Vec<RowBatch> = reader.open().unwrap().map(Result::unwrap).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn counts_rows_without_header() {
        let file = write_csv(SAMPLE);
        let reader = ChunkReader::new(file.path(), 10);
        assert_eq!(reader.count_rows().unwrap(), 3);
    }

    #[test]
    fn ragged_rows_are_padded() {
        let file = write_csv("cep,street,city,state\n01310-100,Paulista\n");
        let reader = ChunkReader::new(file.path(), 10);
        let batch = reader.open().unwrap().next().unwrap().unwrap();
        assert_eq!(batch[0].values.len(), 4);
        assert_eq!(batch[0].values[2], "");
    }

    #[test]
    fn semicolon_delimiter() {
        let file = write_csv("cep;street;city;state\n01310-100;Paulista;SP;SP\n");
        let reader = ChunkReader::new(file.path(), 10).with_delimiter(b';');
        let batch = reader.open().unwrap().next().unwrap().unwrap();
        assert_eq!(batch[0].values[0], "01310-100");
    }

    #[test]
    fn zero_chunk_size_is_clamped() {
        let file = write_csv(SAMPLE);
        let reader = ChunkReader::new(file.path(), 0);
        let batches: Vec<RowBatch> = reader.open().unwrap().map(Result::unwrap).collect();
        assert_eq!(batches.len(), 3);
    }
}
