//! Replay a historical transactions/labels pair as a live feed.
//!
//! Both datasets are loaded from JSON or JSON Lines files, normalized, paired
//! by position and pushed batch by batch to the ingestion platform (or to
//! stdout with `--dry-run`). Every timestamp is shifted by the wall-clock
//! second at which the replay starts. Ctrl-C stops the replay at the next
//! step boundary.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use feed_records::{Dataset, PairedDataset};
use feed_replay::{
    CancellationToken, ProgressObserver, ReplayCoordinator, ReplayReport, ReplaySettings, Sink,
};
use feed_transport_http::{HttpSink, PlatformClient, PlatformConfig};
use feed_transport_stdio::JsonLinesSink;
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(author, version, about = "Replay historical transactions and labels as a live feed")]
struct Args {
    /// TOML configuration file with [replay], [sources] and [platform] tables.
    /// Relative [sources] paths resolve against the file's directory.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Transactions dataset (.json array or .jsonl).
    #[arg(long, value_name = "FILE")]
    transactions: Option<PathBuf>,

    /// Labels dataset, row-aligned with the transactions.
    #[arg(long, value_name = "FILE")]
    labels: Option<PathBuf>,

    /// Rows per batch.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Wait between batches, e.g. `100ms` or `2s`.
    #[arg(long, value_parser = humantime::parse_duration)]
    delay: Option<Duration>,

    /// Replay only the first N rows of each dataset.
    #[arg(long, value_name = "N")]
    limit: Option<usize>,

    /// Destination name for transaction batches.
    #[arg(long)]
    transactions_dataset: Option<String>,

    /// Destination name for label batches.
    #[arg(long)]
    labels_dataset: Option<String>,

    #[arg(long, env = "FEED_BACKEND_URL")]
    backend_url: Option<String>,

    #[arg(long, env = "FEED_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Write batches to stdout as JSON lines instead of uploading them.
    #[arg(long)]
    dry_run: bool,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON.
    #[arg(long)]
    log_json: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FeedConfig {
    replay: ReplaySettings,
    sources: Sources,
    platform: PlatformSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Sources {
    transactions: Option<PathBuf>,
    labels: Option<PathBuf>,
    limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlatformSection {
    backend_url: Option<String>,
    api_key: Option<String>,
    request_timeout_ms: Option<u64>,
}

impl Sources {
    fn resolve_against(&mut self, base: &Path) {
        for source in [&mut self.transactions, &mut self.labels].into_iter().flatten() {
            if source.is_relative() {
                *source = base.join(&*source);
            }
        }
    }
}

/// Logs an info line each time another tenth of the rows has been delivered.
#[derive(Debug, Default)]
struct LogProgress {
    last_decile: AtomicUsize,
}

impl ProgressObserver for LogProgress {
    fn on_progress(&self, processed: usize, total: usize) {
        if total == 0 {
            return;
        }
        let decile = processed.saturating_mul(10) / total;
        if decile > self.last_decile.swap(decile, Ordering::Relaxed) {
            info!(processed, total, percent = decile * 10, "replay progress");
        }
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

fn load_config(path: &Path) -> Result<FeedConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    let mut config: FeedConfig =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    if let Some(base) = path.parent() {
        config.sources.resolve_against(base);
    }
    Ok(config)
}

fn resolve_settings(args: &Args, mut settings: ReplaySettings) -> ReplaySettings {
    if let Some(batch_size) = args.batch_size {
        settings.batch_size = batch_size;
    }
    if let Some(delay) = args.delay {
        settings.delay = delay;
    }
    if let Some(name) = &args.transactions_dataset {
        settings.destinations.transactions = name.clone();
    }
    if let Some(name) = &args.labels_dataset {
        settings.destinations.labels = name.clone();
    }
    settings
}

fn resolve_platform(args: &Args, section: PlatformSection) -> Result<PlatformConfig> {
    let backend_url = args
        .backend_url
        .clone()
        .or(section.backend_url)
        .context("backend URL missing: pass --backend-url, set FEED_BACKEND_URL or [platform].backend_url")?;
    let api_key = args
        .api_key
        .clone()
        .or(section.api_key)
        .context("API key missing: pass --api-key, set FEED_API_KEY or [platform].api_key")?;
    let mut config = PlatformConfig::new(backend_url, api_key);
    if let Some(timeout) = section.request_timeout_ms {
        config.request_timeout_ms = timeout;
    }
    Ok(config)
}

fn load_datasets(args: &Args, sources: Sources) -> Result<PairedDataset> {
    let transactions_path = args
        .transactions
        .clone()
        .or(sources.transactions)
        .context("--transactions or [sources].transactions must be provided")?;
    let labels_path = args
        .labels
        .clone()
        .or(sources.labels)
        .context("--labels or [sources].labels must be provided")?;

    info!(
        transactions = %transactions_path.display(),
        labels = %labels_path.display(),
        "loading datasets"
    );
    let mut transactions = Dataset::load(&transactions_path)
        .with_context(|| format!("loading transactions from {}", transactions_path.display()))?;
    let mut labels = Dataset::load(&labels_path)
        .with_context(|| format!("loading labels from {}", labels_path.display()))?;
    transactions.normalize();
    labels.normalize();

    let datasets =
        PairedDataset::new(transactions, labels).context("pairing transactions with labels")?;
    Ok(match args.limit.or(sources.limit) {
        Some(limit) => {
            info!(limit, "subsampling datasets");
            datasets.head(limit)
        }
        None => datasets,
    })
}

async fn replay<S: Sink + ?Sized>(
    settings: ReplaySettings,
    sink: Arc<S>,
    datasets: &PairedDataset,
    cancel: CancellationToken,
) -> Result<ReplayReport> {
    let coordinator = ReplayCoordinator::new(settings, sink)?
        .with_observer(Arc::new(LogProgress::default()))
        .with_cancellation(cancel);
    let report = coordinator.coordinate(datasets).await?;
    Ok(report)
}

async fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => FeedConfig::default(),
    };
    let settings = resolve_settings(&args, config.replay);
    let datasets = load_datasets(&args, config.sources)?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping after the current step");
                cancel.cancel();
            }
        }
    });

    let report = if args.dry_run {
        let sink = Arc::new(JsonLinesSink::stdout());
        replay(settings, sink, &datasets, cancel).await?
    } else {
        let platform = resolve_platform(&args, config.platform)?;
        let client = Arc::new(PlatformClient::connect(&platform)?);
        let sink = Arc::new(HttpSink::new(Arc::clone(&client)));
        let outcome = replay(settings, sink, &datasets, cancel).await;
        if let Ok(client) = Arc::try_unwrap(client) {
            client.close();
        }
        outcome?
    };

    info!(
        session_id = %report.session_id,
        time_offset = report.time_offset,
        steps = report.steps,
        records = report.records,
        cancelled = report.cancelled,
        "replay finished"
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(&args.log_level, args.log_json);
    if let Err(err) = run(args).await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
