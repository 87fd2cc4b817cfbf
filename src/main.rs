//! Book Search Cache Warmer
//!
//! Reads a list of author names, submits them as one warming job and drains
//! the queue until every subject reaches a terminal state or Ctrl-C is
//! pressed.
//!
//! # Usage
//! ```bash
//! book-search-warmer --config warmer.yaml --subjects authors.txt --source authors.csv
//! ```

use anyhow::Context;
use book_search_warmer::{
    DedupLedger, DiskLedger, HttpTransport, JobOrchestrator, JsonlDeadLetterFile, MemoryLedger,
    MemoryQueue, RateGovernor, RateLimitedFetcher, SearchClient, TieredCacheStore, WarmerConfig,
    WarmingConsumer, WarmingMetrics, WarmingPipeline,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "book-search-warmer", version, about = "Warm the book search cache for a list of authors")]
struct CliArgs {
    /// Path to the YAML configuration file
    #[arg(long, env = "WARMER_CONFIG", value_name = "PATH")]
    config: PathBuf,

    /// File with one author name per line
    #[arg(long, value_name = "PATH")]
    subjects: PathBuf,

    /// Label recorded as the source of every message in the job
    #[arg(long, default_value = "cli")]
    source: String,

    /// Print the Prometheus text exposition after the run
    #[arg(long)]
    print_metrics: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    let args = CliArgs::parse();

    info!("Loading configuration from: {}", args.config.display());
    let config = WarmerConfig::from_file(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    info!(
        "  - Edge TTL: {}s, KV TTL: {}s, cold TTL: {}s",
        config.cache.edge_ttl_secs, config.cache.kv_ttl_secs, config.cache.cold_ttl_secs
    );
    info!("  - Provider min interval: {}ms", config.fetcher.min_interval_ms);
    info!(
        "  - Batches: {} x {} (intra-batch concurrency {})",
        config.consumer.max_concurrent_batches, config.consumer.batch_size, config.consumer.intra_batch_concurrency
    );

    let subjects = tokio::fs::read_to_string(&args.subjects)
        .await
        .with_context(|| format!("failed to read {}", args.subjects.display()))?;

    let store = Arc::new(TieredCacheStore::from_config(&config.cache).await?);

    let ledger: Arc<dyn DedupLedger> = match &config.ledger.dir {
        Some(dir) => Arc::new(DiskLedger::open(dir, config.ledger.retention()).await?),
        None => {
            warn!("No ledger directory configured, dedup state lasts for this run only");
            Arc::new(MemoryLedger::new(config.ledger.retention()))
        }
    };

    let transport = Arc::new(HttpTransport::from_config(&config.fetcher)?);
    let governor = Arc::new(RateGovernor::new(Duration::from_millis(config.fetcher.min_interval_ms)));
    let fetcher = RateLimitedFetcher::from_config(transport, governor, &config.fetcher);
    let client = Arc::new(SearchClient::new(
        fetcher,
        config.fetcher.author_result_limit,
        config.fetcher.title_max_results,
    ));

    let queue = Arc::new(MemoryQueue::new());
    let dead_letters = Arc::new(JsonlDeadLetterFile::open(&config.dead_letter_path).await?);
    let metrics = WarmingMetrics::new()?;

    let receipt = JobOrchestrator::new(queue.clone())
        .submit(subjects.lines(), &args.source)
        .await?;
    info!(
        "Job {} queued {} subjects ({} dropped)",
        receipt.job_id, receipt.enqueued, receipt.dropped
    );

    let consumer = Arc::new(WarmingConsumer::new(
        config.consumer.clone(),
        config.cache.write_policy,
        WarmingPipeline {
            client,
            store: store.clone(),
            ledger,
            queue: queue.clone(),
            dead_letters,
            metrics: metrics.clone(),
        },
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received, finishing subjects in progress");
            let _ = shutdown_tx.send(true);
        }
    });

    let report = consumer.run(shutdown_rx).await;
    let depth = queue.depth().await;

    println!("job:                 {}", receipt.job_id);
    println!("completed:           {}", report.completed);
    println!("partially completed: {}", report.partially_completed);
    println!("skipped:             {}", report.skipped);
    println!("dead-lettered:       {}", report.dead_lettered);
    println!("titles warmed:       {}", report.titles_warmed);
    println!("titles skipped:      {}", report.titles_skipped);
    if depth.ready + depth.delayed > 0 {
        println!("left in queue:       {}", depth.ready + depth.delayed);
    }
    info!("Cache stats: {:?}", store.stats());

    if args.print_metrics {
        print!("{}", metrics.render());
    }

    Ok(())
}
