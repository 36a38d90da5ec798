//! Enriched-row sinks: CSV and JSON output.
//!
//! The sink receives rows already reassembled in source order by the
//! worker pool. Original columns are written untouched; the enrichment
//! lands in the appended [`OUTPUT_COLUMNS`].

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use geo_enrich_models::{EnrichedRow, OUTPUT_COLUMNS};

/// Output format for enriched rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// CSV with the source header plus the appended enrichment columns.
    Csv,
    /// A JSON array of per-row objects.
    Json,
}

/// Errors from writing enriched rows.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// CSV serialization error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A sink for in-order enriched rows.
pub enum RowSink {
    /// CSV writer.
    Csv(csv::Writer<Box<dyn Write + Send>>),
    /// Streaming JSON array writer.
    Json {
        /// Output stream.
        out: Box<dyn Write + Send>,
        /// Source header, for per-row object keys.
        header: Vec<String>,
        /// Whether any row has been written yet.
        first: bool,
    },
}

impl RowSink {
    /// Creates a sink writing to `output` (or stdout when `None`), with
    /// the output header emitted up front for CSV.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the output file cannot be created or the
    /// header cannot be written.
    pub fn create(
        format: OutputFormat,
        output: Option<&Path>,
        header: &[String],
    ) -> Result<Self, SinkError> {
        let out: Box<dyn Write + Send> = match output {
            Some(path) => Box::new(BufWriter::new(File::create(path)?)),
            None => Box::new(io::stdout()),
        };

        match format {
            OutputFormat::Csv => {
                let mut writer = csv::Writer::from_writer(out);
                let full_header: Vec<&str> = header
                    .iter()
                    .map(String::as_str)
                    .chain(OUTPUT_COLUMNS)
                    .collect();
                writer.write_record(&full_header)?;
                Ok(Self::Csv(writer))
            }
            OutputFormat::Json => {
                let mut out = out;
                out.write_all(b"[")?;
                Ok(Self::Json {
                    out,
                    header: header.to_vec(),
                    first: true,
                })
            }
        }
    }

    /// Writes one enriched row.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if serialization or the write fails.
    pub fn write(&mut self, row: &EnrichedRow) -> Result<(), SinkError> {
        match self {
            Self::Csv(writer) => {
                let cells = row.enrichment.to_cells();
                let record: Vec<&str> = row
                    .row
                    .values
                    .iter()
                    .map(String::as_str)
                    .chain(cells.iter().map(String::as_str))
                    .collect();
                writer.write_record(&record)?;
                Ok(())
            }
            Self::Json { out, header, first } => {
                let mut object = serde_json::Map::new();
                for (name, value) in header.iter().zip(&row.row.values) {
                    object.insert(name.clone(), serde_json::Value::String(value.clone()));
                }

                let enrichment = &row.enrichment;
                let text = |value: &Option<String>| {
                    value
                        .clone()
                        .map_or(serde_json::Value::Null, serde_json::Value::String)
                };
                object.insert("corrected_postal_code".to_string(), text(&enrichment.corrected_postal_code));
                object.insert("corrected_street".to_string(), text(&enrichment.corrected_street));
                object.insert(
                    "corrected_neighborhood".to_string(),
                    text(&enrichment.corrected_neighborhood),
                );
                object.insert("corrected_city".to_string(), text(&enrichment.corrected_city));
                object.insert("corrected_region".to_string(), text(&enrichment.corrected_region));
                let coordinate = |value: Option<f64>| {
                    value
                        .and_then(serde_json::Number::from_f64)
                        .map_or(serde_json::Value::Null, serde_json::Value::Number)
                };
                object.insert(
                    "latitude".to_string(),
                    coordinate(enrichment.coordinates.map(|c| c.latitude)),
                );
                object.insert(
                    "longitude".to_string(),
                    coordinate(enrichment.coordinates.map(|c| c.longitude)),
                );

                if *first {
                    *first = false;
                    out.write_all(b"\n")?;
                } else {
                    out.write_all(b",\n")?;
                }
                serde_json::to_writer(&mut *out, &serde_json::Value::Object(object))?;
                Ok(())
            }
        }
    }

    /// Flushes and closes the sink.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the final write or flush fails.
    pub fn finish(self) -> Result<(), SinkError> {
        match self {
            Self::Csv(mut writer) => {
                writer.flush()?;
                Ok(())
            }
            Self::Json { mut out, .. } => {
                out.write_all(b"\n]\n")?;
                out.flush()?;
                Ok(())
            }
        }
    }
}
