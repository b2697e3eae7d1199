#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use watchdog_lite::config::SummarizerConfig;
use watchdog_lite::gateway::{ChatGateway, ProviderGateway, TracingUsageSink};
use watchdog_lite::ingest::{self, NerdGraphClient, DEFAULT_FETCH_LIMIT};
use watchdog_lite::notify::SlackNotifier;
use watchdog_lite::store::{ClusterStore, EventStore, SqliteStore};
use watchdog_lite::summarize::{RunOutcome, Summarizer};
use watchdog_lite::timeline;
use watchdog_lite::types::{ClusterId, EventId, SYSTEM_OWNER};

#[derive(Parser)]
#[command(name = "watchdog", version, about = "Cluster application logs into actionable issues")]
struct Cli {
    /// SQLite database (defaults to $WATCHDOG_DB or .watchdog.sqlite)
    #[arg(long, global = true, env = "WATCHDOG_DB")]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a JSON array of log entries as a new event
    Upload {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value = SYSTEM_OWNER)]
        owner: String,
        /// Summarize the event right after storing it
        #[arg(long)]
        summarize: bool,
    },
    /// Pull recent logs from New Relic and store them as a new event
    FetchLogs {
        #[arg(long, default_value_t = 30)]
        window_minutes: u64,
        #[arg(long, default_value_t = DEFAULT_FETCH_LIMIT)]
        limit: u32,
        #[arg(long)]
        summarize: bool,
    },
    /// Cluster a stored event with the model (LLM calls)
    Summarize {
        #[arg(long)]
        event: EventId,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        prompt: Option<String>,
    },
    /// List the clusters stored for an event
    Clusters {
        #[arg(long)]
        event: EventId,
    },
    /// Print a stored event
    Event {
        #[arg(long)]
        id: EventId,
    },
    /// List recent events
    Events {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Send a Slack alert for a stored cluster
    Notify {
        #[arg(long)]
        cluster: ClusterId,
    },
    /// Per-minute ERROR/CRITICAL counts for an event
    Timeline {
        #[arg(long)]
        event: EventId,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = Arc::new(SqliteStore::new(
        cli.db.unwrap_or_else(SqliteStore::default_path),
    )?);

    match cli.command {
        Commands::Upload {
            file,
            owner,
            summarize,
        } => {
            let raw = std::fs::read(&file)?;
            let entries = ingest::parse_upload(&raw)?;
            let event_id = ingest::ingest_events(store.as_ref(), entries, &owner).await?;
            print_json(&serde_json::json!({ "success": true, "eventId": event_id }))?;
            if summarize {
                summarize_after_ingest(&store, event_id).await;
            }
        }
        Commands::FetchLogs {
            window_minutes,
            limit,
            summarize,
        } => {
            let client = NerdGraphClient::from_env()?;
            let entries = client
                .fetch_recent(Duration::from_secs(window_minutes * 60), limit)
                .await?;
            if entries.is_empty() {
                print_json(&serde_json::json!({ "success": true, "fetched": 0 }))?;
                return Ok(());
            }
            let fetched = entries.len();
            let event_id = ingest::ingest_events(store.as_ref(), entries, SYSTEM_OWNER).await?;
            print_json(&serde_json::json!({
                "success": true,
                "fetched": fetched,
                "eventId": event_id,
            }))?;
            if summarize {
                summarize_after_ingest(&store, event_id).await;
            }
        }
        Commands::Summarize {
            event,
            batch_size,
            workers,
            model,
            prompt,
        } => {
            let mut config = SummarizerConfig::from_env()?;
            if let Some(size) = batch_size {
                config.batch_size = size;
            }
            if let Some(workers) = workers {
                config.workers = workers;
            }
            if let Some(model) = model {
                config.model = model;
            }
            if let Some(prompt) = prompt {
                config.prompt_slug = prompt;
            }
            let outcome = run_summarizer(&store, config, event).await?;
            print_json(&outcome)?;
        }
        Commands::Clusters { event } => {
            let clusters = store.list_clusters(event).await?;
            print_json(&clusters)?;
        }
        Commands::Event { id } => {
            let record = store
                .get_event(id)
                .await?
                .ok_or_else(|| format!("event {id} not found"))?;
            print_json(&record)?;
        }
        Commands::Events { limit } => {
            let events = store.list_events(limit).await?;
            print_json(&events)?;
        }
        Commands::Notify { cluster } => {
            let summary = store
                .get_cluster(cluster)
                .await?
                .ok_or_else(|| format!("cluster {cluster} not found"))?;
            SlackNotifier::from_env()?.notify(&summary).await?;
            print_json(&serde_json::json!({ "success": true }))?;
        }
        Commands::Timeline { event } => {
            let record = store
                .get_event(event)
                .await?
                .ok_or_else(|| format!("event {event} not found"))?;
            let points = timeline::error_timeline(&record.events);
            print_json(&serde_json::json!({
                "eventId": event,
                "totalErrors": timeline::total_errors(&points),
                "points": points,
            }))?;
        }
    }

    Ok(())
}

async fn run_summarizer(
    store: &Arc<SqliteStore>,
    config: SummarizerConfig,
    event_id: EventId,
) -> Result<RunOutcome, Box<dyn std::error::Error>> {
    let gateway: Arc<dyn ChatGateway> =
        Arc::new(ProviderGateway::from_env(Arc::new(TracingUsageSink))?);
    let events: Arc<dyn EventStore> = store.clone();
    let clusters: Arc<dyn ClusterStore> = store.clone();
    let summarizer = Summarizer::new(config, gateway, events, clusters)?;

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling");
                cancel.store(true, Ordering::Relaxed);
            }
        });
    }

    Ok(summarizer.run(event_id, Some(cancel.as_ref())).await?)
}

/// Ingestion already succeeded; a summarization failure here is only logged.
async fn summarize_after_ingest(store: &Arc<SqliteStore>, event_id: EventId) {
    let outcome = match SummarizerConfig::from_env() {
        Ok(config) => run_summarizer(store, config, event_id).await,
        Err(err) => Err(err.into()),
    };
    match outcome {
        Ok(outcome) => {
            if let Err(err) = print_json(&outcome) {
                tracing::warn!(error = %err, "failed to print summarization outcome");
            }
        }
        Err(err) => {
            tracing::warn!(%event_id, error = %err, "summarization after ingest failed");
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
