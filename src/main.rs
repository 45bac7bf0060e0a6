//! acadmetrics - scholarly-output reconciliation and metrics pipeline
//!
//! Aggregates publication records from a citation index and a bibliographic
//! API, reconciles them into canonical entities, classifies each publication
//! with a hosted language model, and exports per-author and per-department
//! metrics.
//!
//! ## Usage
//!
//! ```bash
//! acadmetrics run "State University" --from-year 2023 --to-year 2024 \
//!     --llm-base-url https://api.openai.com/v1
//! ```

use acadmetrics::aggregate::{Aggregator, RuleDirectory};
use acadmetrics::classify::{Classifier, ClassifierConfig, HttpModelClient, ModelConfig};
use acadmetrics::export;
use acadmetrics::fetch::{batch_stream, bibliographic::BiblioClient, citation_index};
use acadmetrics::pipeline::Pipeline;
use acadmetrics::resolve::ResolverConfig;
use acadmetrics::store::JsonStore;
use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Scholarly-output reconciliation and metrics pipeline
#[derive(Parser)]
#[command(name = "acadmetrics")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, reconcile, classify, and export metrics for an affiliation
    Run {
        /// Affiliation to report on (e.g., "State University")
        affiliation: String,

        /// Providers to ingest: citation-index, bibliographic, or both
        #[arg(long, default_value = "both", value_parser = ["citation-index", "bibliographic", "both"])]
        providers: String,

        /// Citation-index search query (defaults to the affiliation)
        #[arg(long)]
        query: Option<String>,

        /// First publication year to include (default: five years back)
        #[arg(long)]
        from_year: Option<i32>,

        /// Last publication year to include (default: current year)
        #[arg(long)]
        to_year: Option<i32>,

        /// Citation-index page range (e.g., "1", "1-10")
        #[arg(long, default_value = "1")]
        pages: String,

        /// Proxy URL for the citation index (e.g., http://127.0.0.1:7890)
        #[arg(long)]
        proxy: Option<String>,

        /// Mirror site URL for the citation index
        #[arg(long)]
        mirror: Option<String>,

        /// Publication store file (default: ~/.acadmetrics_store.json)
        #[arg(long)]
        store: Option<PathBuf>,

        /// Department directory rule file (JSON)
        #[arg(long)]
        directory_file: Option<PathBuf>,

        /// Output directory
        #[arg(short, long, default_value = "./output")]
        output: PathBuf,

        // === Classification ===
        /// LLM API base URL (e.g., https://api.openai.com/v1); env: LLM_BASE_URL
        #[arg(long)]
        llm_base_url: Option<String>,

        /// LLM API key; env: LLM_API_KEY
        #[arg(long)]
        llm_key: Option<String>,

        /// LLM model name
        #[arg(long, default_value = "gpt-4o-mini")]
        llm_model: String,

        /// Classification attempts before degrading to unclassified
        #[arg(long, default_value_t = acadmetrics::classify::DEFAULT_MAX_ATTEMPTS)]
        classify_attempts: u32,

        /// Minimum accepted classification confidence
        #[arg(long, default_value_t = acadmetrics::classify::DEFAULT_CONFIDENCE_FLOOR)]
        confidence_floor: f64,

        /// Fuzzy title-similarity threshold for identity resolution
        #[arg(long, default_value_t = acadmetrics::resolve::DEFAULT_FUZZY_THRESHOLD)]
        fuzzy_threshold: f64,
    },

    /// Manage the publication store
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },
}

#[derive(Subcommand)]
enum StoreAction {
    /// Show the store file path
    Path,
    /// Delete the store file
    Clear,
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    match cli.command {
        Commands::Run {
            affiliation,
            providers,
            query,
            from_year,
            to_year,
            pages,
            proxy,
            mirror,
            store,
            directory_file,
            output,
            llm_base_url,
            llm_key,
            llm_model,
            classify_attempts,
            confidence_floor,
            fuzzy_threshold,
        } => {
            run_pipeline(RunArgs {
                affiliation,
                providers,
                query,
                from_year,
                to_year,
                pages,
                proxy,
                mirror,
                store,
                directory_file,
                output,
                llm_base_url,
                llm_key,
                llm_model,
                classify_attempts,
                confidence_floor,
                fuzzy_threshold,
            })
            .await
        }
        Commands::Store { action } => handle_store(action),
    }
}

// ============================================================================
// Run Pipeline
// ============================================================================

struct RunArgs {
    affiliation: String,
    providers: String,
    query: Option<String>,
    from_year: Option<i32>,
    to_year: Option<i32>,
    pages: String,
    proxy: Option<String>,
    mirror: Option<String>,
    store: Option<PathBuf>,
    directory_file: Option<PathBuf>,
    output: PathBuf,
    llm_base_url: Option<String>,
    llm_key: Option<String>,
    llm_model: String,
    classify_attempts: u32,
    confidence_floor: f64,
    fuzzy_threshold: f64,
}

async fn run_pipeline(args: RunArgs) -> Result<()> {
    let current_year: i32 = Local::now().format("%Y").to_string().parse().unwrap_or(2026);
    let to_year = args.to_year.unwrap_or(current_year);
    let from_year = args.from_year.unwrap_or(to_year - 5);
    if from_year > to_year {
        anyhow::bail!("--from-year {} is after --to-year {}", from_year, to_year);
    }

    // Classification endpoint: flags first, then environment.
    let llm_base_url = args
        .llm_base_url
        .or_else(|| std::env::var("LLM_BASE_URL").ok())
        .context("LLM base URL required (--llm-base-url or LLM_BASE_URL)")?;
    let llm_key = args
        .llm_key
        .or_else(|| std::env::var("LLM_API_KEY").ok())
        .context("LLM API key required (--llm-key or LLM_API_KEY)")?;

    let model_client = HttpModelClient::new(ModelConfig {
        base_url: llm_base_url,
        api_key: llm_key,
        model: args.llm_model.clone(),
    })?;
    let classifier = Classifier::new(
        model_client,
        ClassifierConfig {
            max_attempts: args.classify_attempts,
            confidence_floor: args.confidence_floor,
        },
    );

    let store = match args.store {
        Some(path) => JsonStore::open(path)?,
        None => JsonStore::open_default()?,
    };
    info!(path = %store.path().display(), entities = store.len(), "Opened publication store");

    let directory = match args.directory_file {
        Some(path) => RuleDirectory::from_file(&path)?,
        None => RuleDirectory::default(),
    };

    let resolver_config = ResolverConfig {
        fuzzy_title_threshold: args.fuzzy_threshold,
        ..ResolverConfig::default()
    };

    let mut pipeline = Pipeline::new(
        store,
        classifier,
        Aggregator::new(directory),
        resolver_config,
    );
    pipeline
        .seed(from_year, to_year)
        .await
        .context("Seeding from the publication store failed")?;

    // ===========================================
    // Fetch provider streams (concurrently)
    // ===========================================
    let fetch_biblio = args.providers == "both" || args.providers == "bibliographic";
    let fetch_citation = args.providers == "both" || args.providers == "citation-index";

    let biblio_task = async {
        if !fetch_biblio {
            return Vec::new();
        }
        println!("--- Fetching bibliographic works ---");
        match BiblioClient::new() {
            Ok(client) => match client
                .fetch_works(&args.affiliation, from_year, to_year)
                .await
            {
                Ok(records) => records,
                Err(e) => {
                    error!(error = %e, "Bibliographic fetch failed");
                    Vec::new()
                }
            },
            Err(e) => {
                error!(error = %e, "Bibliographic client setup failed");
                Vec::new()
            }
        }
    };

    let citation_task = async {
        if !fetch_citation {
            return Vec::new();
        }
        println!("--- Fetching citation-index results ---");
        let pages = match parse_pages(&args.pages) {
            Ok(pages) => pages,
            Err(e) => {
                error!(error = %e, "Invalid --pages format");
                return Vec::new();
            }
        };
        let options = citation_index::SearchOptions {
            proxy: args.proxy.clone(),
            pages,
            year_lo: Some(from_year),
            base_url: args.mirror.clone(),
        };
        let query = args.query.clone().unwrap_or_else(|| args.affiliation.clone());
        match citation_index::fetch_records(&query, &options).await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "Citation-index fetch failed");
                Vec::new()
            }
        }
    };

    let (biblio_records, citation_records) = tokio::join!(biblio_task, citation_task);
    println!(
        "Fetched {} bibliographic + {} citation-index records.",
        biblio_records.len(),
        citation_records.len()
    );

    // ===========================================
    // Reconcile, classify, aggregate
    // ===========================================
    println!("--- Reconciling records ---");
    pipeline.ingest(batch_stream(biblio_records)).await;
    pipeline.ingest(batch_stream(citation_records)).await;

    let stats = pipeline.finish();
    if stats.entities_unioned > 0 {
        // Unions change entity shapes after their first fold; bring the
        // accumulators back in line before exporting.
        pipeline.rebuild_aggregates();
    }

    // ===========================================
    // Export
    // ===========================================
    let folder = export::create_run_folder(&args.output, &args.affiliation)?;
    export::export_all(
        &folder,
        &pipeline.aggregator().author_snapshots(),
        &pipeline.aggregator().department_snapshots(),
        &stats,
    )?;

    println!(
        "\nProcessed {} records: {} new entities, {} merged, {} unioned, {} malformed, {} unclassified, {} failed.",
        stats.records_processed,
        stats.entities_created,
        stats.records_merged,
        stats.entities_unioned,
        stats.malformed_skipped,
        stats.classification_degraded,
        stats.record_failures
    );
    println!("✓ Metrics written to: {}", folder.display());
    Ok(())
}

/// Parse page range string (e.g., "1", "1-10")
fn parse_pages(pages_str: &str) -> Result<Vec<i32>> {
    if pages_str.contains('-') {
        let parts: Vec<&str> = pages_str.split('-').collect();
        if parts.len() != 2 {
            anyhow::bail!("Invalid page range format");
        }
        let start: i32 = parts[0].parse().context("Invalid start page")?;
        let end: i32 = parts[1].parse().context("Invalid end page")?;
        Ok((start..=end).collect())
    } else {
        let page: i32 = pages_str.parse().context("Invalid page number")?;
        Ok(vec![page])
    }
}

// ============================================================================
// Store Management
// ============================================================================

fn handle_store(action: StoreAction) -> Result<()> {
    let store = JsonStore::open_default()?;

    match action {
        StoreAction::Path => {
            println!("Store file: {}", store.path().display());
            println!("Entities: {}", store.len());
        }
        StoreAction::Clear => {
            store.clear()?;
            println!("Store cleared.");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pages_single() {
        assert_eq!(parse_pages("3").expect("parses"), vec![3]);
    }

    #[test]
    fn test_parse_pages_range() {
        assert_eq!(parse_pages("1-4").expect("parses"), vec![1, 2, 3, 4]);
        assert!(parse_pages("1-2-3").is_err());
        assert!(parse_pages("abc").is_err());
    }
}
