#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the address enrichment tool.

mod progress;
mod sink;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use geo_enrich_cache::LookupCache;
use geo_enrich_models::Stats;
use geo_enrich_pipeline::{PipelineError, StopSignal, production_pool};
use geo_enrich_reader::ChunkReader;
use indicatif::MultiProgress;

use crate::progress::IndicatifProgress;
use crate::sink::{OutputFormat, RowSink};

/// User agent sent to both external services; the geocoding service's
/// fair-use policy requires an identifying value.
const USER_AGENT: &str = "geo-enrich/0.1 (address enrichment tool)";

#[derive(Parser)]
#[command(name = "geo_enrich", about = "Tabular address enrichment tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enrich a CSV file with corrected postal data and coordinates
    Run {
        /// Input CSV file
        input: PathBuf,
        /// Output file (stdout if omitted)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Output format
        #[arg(long, value_enum, default_value = "csv")]
        format: OutputFormat,
        /// Rows per read chunk
        #[arg(long, default_value = "1000")]
        chunk_size: usize,
        /// Concurrent enrichment workers. Pacing is global per service,
        /// so extra workers only help while the two services' latencies
        /// differ.
        #[arg(long, default_value = "3")]
        workers: usize,
        /// Lookup cache database
        #[arg(long, default_value = "cache.db")]
        cache_db: PathBuf,
        /// Skip the durable cache for this run
        #[arg(long)]
        no_cache: bool,
        /// Field delimiter
        #[arg(long, default_value = ",")]
        delimiter: String,
    },
    /// Show lookup cache entry counts
    CacheStats {
        /// Lookup cache database
        #[arg(long, default_value = "cache.db")]
        cache_db: PathBuf,
    },
    /// Delete every cached lookup result (positive and negative)
    CacheClear {
        /// Lookup cache database
        #[arg(long, default_value = "cache.db")]
        cache_db: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = progress::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input,
            output,
            format,
            chunk_size,
            workers,
            cache_db,
            no_cache,
            delimiter,
        } => {
            run_enrich(
                &multi, &input, output, format, chunk_size, workers, &cache_db, no_cache,
                &delimiter,
            )
            .await?;
        }
        Commands::CacheStats { cache_db } => {
            let cache = LookupCache::open(&cache_db)?;
            let stats = cache.stats()?;
            println!("{:<20} COUNT", "NAMESPACE");
            println!("{}", "-".repeat(30));
            println!("{:<20} {}", "postal", stats.postal_entries);
            println!("{:<20} {}", "geo", stats.geo_entries);
        }
        Commands::CacheClear { cache_db } => {
            let cache = LookupCache::open(&cache_db)?;
            cache.clear()?;
            log::info!("Lookup cache cleared: {}", cache_db.display());
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_enrich(
    multi: &MultiProgress,
    input: &Path,
    output: Option<PathBuf>,
    format: OutputFormat,
    chunk_size: usize,
    workers: usize,
    cache_db: &Path,
    no_cache: bool,
    delimiter: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();

    let delimiter = *delimiter
        .as_bytes()
        .first()
        .ok_or("delimiter must not be empty")?;
    let reader = ChunkReader::new(input, chunk_size).with_delimiter(delimiter);

    let total_rows = reader.count_rows()?;
    log::info!("{}: {total_rows} rows", input.display());

    // Header validation happens here, before any row is processed.
    let batches = reader.open()?;
    let header = batches.header().to_vec();
    let columns = batches.column_map().clone();

    let cache = Arc::new(if no_cache {
        LookupCache::open_in_memory()?
    } else {
        LookupCache::open(cache_db)?
    });

    let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
    let pool = production_pool(http, cache, workers);

    let stop = StopSignal::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("interrupt received; finishing rows in flight");
                stop.stop();
            }
        });
    }

    let progress = IndicatifProgress::rows_bar(multi, "Enriching rows...");
    let mut sink = RowSink::create(format, output.as_deref(), &header)?;

    let stats = pool
        .run(
            batches,
            columns,
            Some(total_rows),
            Arc::clone(&progress),
            stop,
            |row| {
                sink.write(&row).map_err(|e| PipelineError::Sink {
                    message: e.to_string(),
                })
            },
        )
        .await?;

    sink.finish()?;
    progress.finish(format!(
        "Enriched {} rows in {:.1}s",
        stats.total_rows,
        start.elapsed().as_secs_f64()
    ));

    print_summary(&stats);
    Ok(())
}

fn print_summary(stats: &Stats) {
    println!();
    println!("{:<24} {}", "Total rows", stats.total_rows);
    println!("{:<24} {}", "Corrected postal codes", stats.corrected_postal);
    println!("{:<24} {}", "Resolved coordinates", stats.resolved_coordinates);
    println!("{:<24} {}", "Row errors", stats.errors.len());

    for error in stats.errors.iter().take(10) {
        println!("  row {:>6} [{}] {}", error.row_index, error.kind, error.message);
    }
    if stats.errors.len() > 10 {
        println!("  ... and {} more", stats.errors.len() - 10);
    }
}
