//! Submission intake binary for the Roster record database.
//!
//! Reads submissions as newline-delimited JSON on stdin, runs each through
//! the submission pipeline against `PostgreSQL` and `Dragonfly`, and writes
//! one JSON report per submission to stdout. Logs go to stderr.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `ROSTER_CONFIG` (default `roster-config.yaml`)
//! 2. Initialize structured logging (tracing)
//! 3. Connect to `PostgreSQL` and run migrations
//! 4. Seed the `fields` table from configuration and load the field registry
//! 5. Install unique indexes on matching fields, if enabled
//! 6. Connect to `Dragonfly` and reset the record cache
//! 7. Assemble and check the submission pipeline
//! 8. Process stdin until end of input
//! 9. Log the summary and close connections

mod error;
mod intake;

use std::path::PathBuf;
use std::sync::Arc;

use roster_core::{RecordCache, RosterConfig, StaticFieldRegistry, SubmissionPipeline};
use roster_db::{CacheBackend, DragonflyPool, PostgresConfig, PostgresPool, RecordStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::IntakeError;

/// Environment variable naming the configuration file.
const CONFIG_ENV: &str = "ROSTER_CONFIG";

/// Configuration file used when [`CONFIG_ENV`] is unset.
const DEFAULT_CONFIG_PATH: &str = "roster-config.yaml";

/// Application entry point for the intake binary.
///
/// # Errors
///
/// Returns an error if any startup step fails or the submission stream
/// cannot be read or written.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration. Logging is configured from it, so nothing is
    //    logged before this succeeds.
    let (config, from_file) = load_config()?;

    // 2. Initialize structured logging.
    init_logging(&config);
    info!(from_file, "roster-intake starting");

    serve(&config).await?;
    Ok(())
}

/// Steps 3 to 9: connect, prepare, and process the submission stream.
async fn serve(config: &RosterConfig) -> Result<(), IntakeError> {
    // 3. Connect to PostgreSQL.
    let pg_config = PostgresConfig::new(&config.infrastructure.postgres_url)
        .with_max_connections(config.infrastructure.max_connections)
        .with_application_name("roster-intake");
    let pool = PostgresPool::connect(&pg_config).await?;
    pool.run_migrations().await?;

    // 4. Field registry.
    let field_store = pool.field_store();
    if !config.fields.is_empty() {
        field_store.upsert_fields(&config.fields).await?;
        info!(count = config.fields.len(), "Seeded field definitions");
    }
    let registry = StaticFieldRegistry::load(&field_store).await?;

    // 5. Unique indexes on matching fields.
    let record_store = pool.record_store();
    if config.matching.enforce_unique {
        for field in &config.matching.fields {
            record_store.ensure_unique_index(field).await?;
        }
    }
    let store: Arc<dyn RecordStore> = Arc::new(record_store);

    // 6. Dragonfly and the record cache. Field definitions may have changed
    //    since the last run, so every cached window is dropped.
    let dragonfly = DragonflyPool::connect(&config.infrastructure.dragonfly_url).await?;
    let cache = Arc::new(RecordCache::new(
        Arc::clone(&store),
        Arc::new(dragonfly) as Arc<dyn CacheBackend>,
        config.cache.clone(),
    ));
    cache.invalidate_all().await?;

    // 7. Pipeline.
    let pipeline = SubmissionPipeline::new(
        Arc::new(registry),
        store,
        cache,
        config.private_id.clone(),
    )?;
    pipeline.check_configuration()?;
    info!(
        policy = ?config.matching.policy,
        matching_fields = ?config.matching.fields,
        "Submission pipeline ready"
    );

    // 8. Process stdin.
    let default_matching = config.matching.to_matching_config();
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let summary = intake::run(&pipeline, &default_matching, stdin, tokio::io::stdout()).await?;

    // 9. Summary and shutdown.
    let stats = pipeline.cache().stats();
    info!(
        written = summary.written,
        skipped = summary.skipped,
        invalid = summary.invalid,
        failed = summary.failed,
        cache_hits = stats.hits,
        cache_misses = stats.misses,
        "Intake finished"
    );
    pool.close().await;

    Ok(())
}

/// Load configuration from the path in [`CONFIG_ENV`], or the default path.
///
/// A missing file yields the defaults; the second value says whether a file
/// was read.
fn load_config() -> Result<(RosterConfig, bool), IntakeError> {
    let path = std::env::var(CONFIG_ENV)
        .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    if path.exists() {
        Ok((RosterConfig::from_file(&path)?, true))
    } else {
        Ok((RosterConfig::parse("")?, false))
    }
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level. Output goes to stderr; stdout carries reports.
fn init_logging(config: &RosterConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
