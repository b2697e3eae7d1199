//! Summarization runs: event → batches → model → validated clusters → store.
//!
//! A run is replayable from its EventRecord and keeps no intermediate state.
//! Only three things abort it: an unknown event (or an unreadable event
//! store), invalid configuration, and cancellation. Model and parse failures
//! cost the affected batch its clusters and nothing more; a failed bulk insert
//! is reported in the outcome next to the computed cluster count.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::aggregate::ClusterAggregator;
use crate::batcher::{Batch, Batcher};
use crate::config::{ConfigError, SummarizerConfig};
use crate::gateway::{Attribution, ChatGateway};
use crate::model::{ModelClient, ModelError};
use crate::parse::{parse_clusters, MalformedResponse, ParsedBatch};
use crate::prompts::{prompt_by_slug, PromptError, PromptTemplate};
use crate::store::{persist_clusters, ClusterStore, EventStore, StoreError};
use crate::types::{EventId, LogEntry};

/// How often a running batch phase checks the cancel flag.
const CANCEL_POLL: Duration = Duration::from_millis(25);

// =============================================================================
// Errors and outcome
// =============================================================================

/// Fatal run failures. Everything else is absorbed into the outcome.
#[derive(Debug, thiserror::Error)]
pub enum SummarizeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("event {0} not found")]
    EventNotFound(EventId),
    #[error("failed to load event: {0}")]
    EventStore(#[source] StoreError),
    #[error("run cancelled")]
    Cancelled,
}

/// Why one batch contributed no clusters.
#[derive(Debug, thiserror::Error)]
pub enum BatchFailure {
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Malformed(#[from] MalformedResponse),
}

impl BatchFailure {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Prompt(_) => "prompt_encode",
            Self::Model(e) => e.code(),
            Self::Malformed(_) => "malformed_response",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub index: usize,
    pub entries: usize,
    pub clusters: usize,
    /// Elements dropped by validation.
    pub rejected: usize,
    /// Failure code when the whole batch was discarded.
    pub failure: Option<String>,
}

/// Result of the terminal bulk insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum PersistOutcome {
    Inserted { rows: usize },
    Failed { reason: String },
}

/// Outcome of a run that was not fatally aborted.
///
/// `cluster_count` is what the run computed; `persisted` says whether those
/// rows actually landed. Callers must not read one as the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub success: bool,
    pub event_id: EventId,
    pub cluster_count: usize,
    pub persisted: PersistOutcome,
    pub batches: Vec<BatchReport>,
}

impl RunOutcome {
    pub fn persisted_rows(&self) -> usize {
        match self.persisted {
            PersistOutcome::Inserted { rows } => rows,
            PersistOutcome::Failed { .. } => 0,
        }
    }

    pub fn failed_batches(&self) -> usize {
        self.batches.iter().filter(|b| b.failure.is_some()).count()
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

pub struct Summarizer {
    events: Arc<dyn EventStore>,
    clusters: Arc<dyn ClusterStore>,
    model: ModelClient,
    batcher: Batcher,
    template: PromptTemplate,
    workers: usize,
}

impl Summarizer {
    pub fn new(
        config: SummarizerConfig,
        gateway: Arc<dyn ChatGateway>,
        events: Arc<dyn EventStore>,
        clusters: Arc<dyn ClusterStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let template = prompt_by_slug(&config.prompt_slug)
            .ok_or_else(|| ConfigError::UnknownPrompt(config.prompt_slug.clone()))?;
        Ok(Self {
            events,
            clusters,
            model: ModelClient::new(gateway, &config),
            batcher: Batcher::new(config.batch_size)?,
            template,
            workers: config.workers,
        })
    }

    /// Run the full pipeline for one event.
    ///
    /// Setting `cancel_flag` abandons in-flight model calls and returns
    /// [`SummarizeError::Cancelled`]; nothing is written unless the run
    /// reaches the persist step before the flag is observed.
    pub async fn run(
        &self,
        event_id: EventId,
        cancel_flag: Option<&AtomicBool>,
    ) -> Result<RunOutcome, SummarizeError> {
        if is_cancelled(cancel_flag) {
            return Err(SummarizeError::Cancelled);
        }

        // Loading
        let record = self
            .events
            .get_event(event_id)
            .await
            .map_err(SummarizeError::EventStore)?
            .ok_or(SummarizeError::EventNotFound(event_id))?;

        // Batching
        let batches = self.batcher.split(&record.events);
        info!(
            %event_id,
            entries = record.events.len(),
            batches = batches.len(),
            workers = self.workers,
            model = self.model.model(),
            "summarization started"
        );

        // Per batch
        let per_batch = stream::iter(
            batches
                .into_iter()
                .map(|batch| self.summarize_batch(event_id, batch)),
        )
        .buffer_unordered(self.workers)
        .collect::<Vec<_>>();

        let results = tokio::select! {
            biased;
            _ = wait_for_cancel(cancel_flag) => {
                warn!(%event_id, "summarization cancelled during model calls");
                return Err(SummarizeError::Cancelled);
            }
            results = per_batch => results,
        };

        if is_cancelled(cancel_flag) {
            return Err(SummarizeError::Cancelled);
        }

        // Aggregating
        let mut aggregator = ClusterAggregator::new(event_id, record.owner_id.clone());
        let mut reports = Vec::with_capacity(results.len());
        for (batch_index, entries, result) in results {
            let report = match result {
                Ok(parsed) => {
                    let report = BatchReport {
                        index: batch_index,
                        entries,
                        clusters: parsed.clusters.len(),
                        rejected: parsed.rejected.len(),
                        failure: None,
                    };
                    aggregator.push_batch(batch_index, parsed.clusters);
                    report
                }
                Err(failure) => BatchReport {
                    index: batch_index,
                    entries,
                    clusters: 0,
                    rejected: 0,
                    failure: Some(failure.code().to_string()),
                },
            };
            reports.push(report);
        }
        reports.sort_by_key(|r| r.index);

        let records = aggregator.finish();
        let cluster_count = records.len();

        // Persisting
        let persisted = match persist_clusters(self.clusters.as_ref(), records).await {
            Ok(rows) => PersistOutcome::Inserted { rows },
            Err(err) => {
                warn!(%event_id, attempted = err.attempted, error = %err, "cluster insert failed");
                PersistOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        };

        let outcome = RunOutcome {
            success: true,
            event_id,
            cluster_count,
            persisted,
            batches: reports,
        };
        info!(
            %event_id,
            clusters = outcome.cluster_count,
            persisted = outcome.persisted_rows(),
            failed_batches = outcome.failed_batches(),
            "summarization finished"
        );
        Ok(outcome)
    }

    /// Prompt → model → parse for one batch. Never fails the run.
    async fn summarize_batch(
        &self,
        event_id: EventId,
        batch: Batch<'_, LogEntry>,
    ) -> (usize, usize, Result<ParsedBatch, BatchFailure>) {
        let index = batch.index;
        let entries = batch.len();
        let result = self.try_batch(event_id, batch).await;
        match &result {
            Ok(parsed) => debug!(
                %event_id,
                batch = index,
                clusters = parsed.clusters.len(),
                rejected = parsed.rejected.len(),
                "batch summarized"
            ),
            Err(failure) => warn!(
                %event_id,
                batch = index,
                code = failure.code(),
                error = %failure,
                "batch discarded"
            ),
        }
        (index, entries, result)
    }

    async fn try_batch(
        &self,
        event_id: EventId,
        batch: Batch<'_, LogEntry>,
    ) -> Result<ParsedBatch, BatchFailure> {
        let prompt = self.template.render(batch.items)?;
        let attribution = Attribution::new("summarize::batch")
            .with_event(event_id)
            .with_batch(batch.index);
        let raw = self.model.complete(&prompt, attribution).await?;
        Ok(parse_clusters(&raw)?)
    }
}

fn is_cancelled(flag: Option<&AtomicBool>) -> bool {
    flag.is_some_and(|f| f.load(Ordering::Relaxed))
}

/// Resolves once the flag is set; never resolves without a flag.
async fn wait_for_cancel(flag: Option<&AtomicBool>) {
    let Some(flag) = flag else {
        return std::future::pending().await;
    };
    while !flag.load(Ordering::Relaxed) {
        tokio::time::sleep(CANCEL_POLL).await;
    }
}
