//! Crawl orchestration - one task from parameters to persisted fares
//!
//! This module contains the executor the scheduler runs for every task:
//! - Validating task parameters into a route
//! - Querying the outbound leg and extracting partial fares
//! - Querying the inbound leg once per search identifier (round trips)
//! - Pairing both legs and handing the result to the sink
//!
//! It also wires the whole crawl together in `run_crawl`.

use crate::config::{Config, CrawlerConfig, EmptyResultPolicy};
use crate::crawler::extractor::{ExtractError, Extraction, ExtractorConfig, ResponseExtractor};
use crate::crawler::gateway::{ApiGateway, HttpGateway};
use crate::crawler::payload::{inbound_payload, outbound_payload, QueryPayload, RouteQuery};
use crate::crawler::scheduler::{TaskExecutor, TaskScheduler};
use crate::model::{CrawlTask, FareRecord, PartialFareRecord, TaskId};
use crate::output::RunSummary;
use crate::storage::{open_storage, RunStatus, Sink};
use crate::{FailureKind, FareError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Span;

/// A batch the sink refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkFailure {
    pub task: TaskId,
    pub records: usize,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Runs the two-phase fare query for a task
pub struct CrawlOrchestrator {
    gateway: Arc<dyn ApiGateway>,
    extractor: ResponseExtractor,
    sink: Arc<dyn Sink>,
    empty_results: EmptyResultPolicy,
    sink_failures: Mutex<Vec<SinkFailure>>,
    span: Span,
}

impl CrawlOrchestrator {
    pub fn new(
        gateway: Arc<dyn ApiGateway>,
        extractor: ResponseExtractor,
        sink: Arc<dyn Sink>,
    ) -> Self {
        Self {
            gateway,
            extractor,
            sink,
            empty_results: EmptyResultPolicy::default(),
            sink_failures: Mutex::new(Vec::new()),
            span: tracing::info_span!("orchestrator"),
        }
    }

    /// Creates an orchestrator using the crawler section of the config
    pub fn from_config(
        config: &CrawlerConfig,
        gateway: Arc<dyn ApiGateway>,
        sink: Arc<dyn Sink>,
    ) -> Self {
        let extractor = ResponseExtractor::new(ExtractorConfig {
            date_format: config.date_format.clone(),
        });
        Self::new(gateway, extractor, sink).with_empty_results(config.empty_results)
    }

    pub fn with_empty_results(mut self, policy: EmptyResultPolicy) -> Self {
        self.empty_results = policy;
        self
    }

    /// Logs under `span` instead of the default `orchestrator` span
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Batches the sink rejected so far
    pub async fn sink_failures(&self) -> Vec<SinkFailure> {
        self.sink_failures.lock().await.clone()
    }

    /// Fetches and pairs the fares of one task without persisting them
    ///
    /// # Errors
    ///
    /// * `InvalidParameters` - the task parameters do not describe a route
    /// * `Transient`, `Authentication`, `Rejected`, `Parse` - from the gateway
    /// * `Parse` - the response envelope is malformed
    /// * `NoResults` - the provider returned nothing usable
    pub async fn crawl(&self, task: &CrawlTask) -> Result<Vec<FareRecord>, FailureKind> {
        let route = RouteQuery::from_params(&task.params)?;

        tracing::debug!(
            parent: &self.span,
            task = %task.id,
            origin = %route.origin,
            destination = %route.destination,
            trip = route.trip_type.as_str(),
            "Querying outbound leg"
        );

        let payload = outbound_payload(&route, self.extractor.date_format());
        let response = self.send(&payload).await?;
        let outbound = self
            .extractor
            .extract_outbound(&response)
            .map_err(classify_extract_error)?;
        self.log_skipped(&task.id, "outbound", &outbound);

        if outbound.is_empty_response() {
            return Err(FailureKind::NoResults("empty flight list".to_string()));
        }
        if outbound.records.is_empty() {
            return Err(FailureKind::NoResults(format!(
                "all {} itineraries were unusable",
                outbound.total
            )));
        }

        let records = if route.is_round_trip() {
            self.pair_inbound(task, &route, outbound.records).await?
        } else {
            outbound
                .records
                .into_iter()
                .map(PartialFareRecord::into_one_way)
                .collect()
        };

        if records.is_empty() {
            return Err(FailureKind::NoResults(
                "no outbound itinerary could be paired with a return".to_string(),
            ));
        }

        Ok(records)
    }

    /// Queries the return leg once per distinct search id and pairs the legs
    async fn pair_inbound(
        &self,
        task: &CrawlTask,
        route: &RouteQuery,
        partials: Vec<PartialFareRecord>,
    ) -> Result<Vec<FareRecord>, FailureKind> {
        let mut groups: Vec<(String, Vec<PartialFareRecord>)> = Vec::new();
        let mut unpaired = 0;

        for partial in partials {
            let Some(search_id) = partial.search_id.clone() else {
                unpaired += 1;
                continue;
            };
            match groups.iter_mut().find(|(id, _)| *id == search_id) {
                Some((_, group)) => group.push(partial),
                None => groups.push((search_id, vec![partial])),
            }
        }

        if unpaired > 0 {
            tracing::warn!(
                parent: &self.span,
                task = %task.id,
                unpaired,
                "Dropping outbound itineraries without a search id"
            );
        }

        let mut records = Vec::new();
        for (search_id, group) in &groups {
            let payload = inbound_payload(route, search_id, self.extractor.date_format());
            let response = self.send(&payload).await?;

            let inbound = match self.extractor.extract_inbound(&response, group) {
                Ok(inbound) => inbound,
                Err(ExtractError::Remote(message)) => {
                    tracing::warn!(
                        parent: &self.span,
                        task = %task.id,
                        search_id = %search_id,
                        "Return leg unavailable: {}",
                        message
                    );
                    continue;
                }
                Err(e) => return Err(classify_extract_error(e)),
            };
            self.log_skipped(&task.id, "inbound", &inbound);

            if inbound.records.is_empty() {
                tracing::debug!(
                    parent: &self.span,
                    task = %task.id,
                    search_id = %search_id,
                    "No return itinerary matched"
                );
            }
            records.extend(inbound.records);
        }

        Ok(records)
    }

    async fn send(&self, payload: &QueryPayload) -> Result<Value, FailureKind> {
        self.gateway.send(payload).await.map_err(FailureKind::from)
    }

    fn log_skipped<T>(&self, task: &TaskId, leg: &str, extraction: &Extraction<T>) {
        for skipped in &extraction.skipped {
            tracing::warn!(
                parent: &self.span,
                task = %task,
                leg,
                index = skipped.index,
                "Skipping itinerary: {}",
                skipped.reason
            );
        }
    }

    /// Hands records to the sink; a sink error never fails the task
    async fn deliver(&self, task: &TaskId, records: &[FareRecord]) {
        match self.sink.persist(records).await {
            Ok(written) => {
                tracing::debug!(parent: &self.span, task = %task, written, "Fares persisted");
            }
            Err(e) => {
                tracing::error!(parent: &self.span, task = %task, "Sink failed: {}", e);
                self.sink_failures.lock().await.push(SinkFailure {
                    task: task.clone(),
                    records: records.len(),
                    message: e.to_string(),
                    at: Utc::now(),
                });
            }
        }
    }
}

#[async_trait]
impl TaskExecutor for CrawlOrchestrator {
    async fn execute(&self, task: CrawlTask) -> Result<Vec<FareRecord>, FailureKind> {
        match self.crawl(&task).await {
            Ok(records) => {
                self.deliver(&task.id, &records).await;
                Ok(records)
            }
            Err(kind) if kind.is_empty_outcome() => {
                if self.empty_results == EmptyResultPolicy::Persist {
                    self.deliver(&task.id, &[]).await;
                }
                Err(kind)
            }
            Err(kind) => Err(kind),
        }
    }
}

fn classify_extract_error(err: ExtractError) -> FailureKind {
    match err {
        ExtractError::Remote(message) => FailureKind::NoResults(message),
        ExtractError::Malformed(path) => FailureKind::Parse(format!("missing {}", path)),
    }
}

/// Runs every configured route against `sink`
///
/// Cancelling `shutdown` stops the crawl: queued tasks are cancelled and
/// in-flight ones finish.
pub async fn crawl_with_sink(
    config: &Config,
    sink: Arc<dyn Sink>,
    shutdown: CancellationToken,
) -> Result<RunSummary, FareError> {
    let gateway = Arc::new(HttpGateway::new(&config.api)?);
    let orchestrator = Arc::new(CrawlOrchestrator::from_config(
        &config.crawler,
        gateway,
        sink,
    ));

    let scheduler = Arc::new(TaskScheduler::from_config(&config.crawler));
    scheduler.register_executor(orchestrator.clone()).await;

    for route in &config.routes {
        scheduler.enqueue(route.to_task()).await?;
    }
    tracing::info!("Queued {} routes", config.routes.len());

    let watcher = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move {
            shutdown.cancelled().await;
            scheduler.shutdown().await;
        })
    };

    let summary = scheduler.run_all(config.crawler.max_concurrency).await;
    watcher.abort();

    let mut summary = summary?;
    summary.sink_failures = orchestrator.sink_failures().await.len();
    Ok(summary)
}

/// Runs a complete crawl into the configured SQLite database
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Open the database and start a run
/// 2. Build the HTTP gateway
/// 3. Schedule one task per configured route
/// 4. Run them to completion
/// 5. Record how the run ended
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `config_hash` - Hash of the configuration file, stored on the run
/// * `shutdown` - Cancelled to interrupt the crawl
///
/// # Returns
///
/// * `Ok(RunSummary)` - Crawl completed
/// * `Err(FareError)` - Crawl failed
pub async fn run_crawl(
    config: Config,
    config_hash: &str,
    shutdown: CancellationToken,
) -> Result<RunSummary, FareError> {
    let sink = Arc::new(open_storage(
        Path::new(&config.output.database_path),
        config_hash,
    )?);
    if let Some(run_id) = sink.run_id() {
        tracing::info!("Recording into run {}", run_id);
    }

    let outcome = crawl_with_sink(&config, sink.clone(), shutdown).await;

    let status = match &outcome {
        Ok(summary) if summary.cancelled > 0 => RunStatus::Interrupted,
        Ok(_) => RunStatus::Completed,
        Err(_) => RunStatus::Failed,
    };
    sink.finish_run(status)?;

    outcome
}
