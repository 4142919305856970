//! Run summaries and statistics from the fare database
//!
//! This module provides the in-memory summary of a finished scheduler run
//! and the statistics shown by `--stats`.

use crate::model::{CrawlTask, FareRecord};
use crate::state::TaskStatus;
use crate::storage::{RunRecord, SqliteSink, StorageResult};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::time::Duration;

/// Outcome of one scheduler run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Tasks known to the scheduler
    pub total: usize,

    pub succeeded: usize,

    /// Succeeded tasks that found no fares
    pub empty: usize,

    pub failed: usize,

    /// Failed tasks that were cancelled by a shutdown
    pub cancelled: usize,

    /// Executor invocations across all tasks
    pub attempts: u64,

    /// Fare records produced by succeeded tasks
    pub records: usize,

    /// Failed tasks per failure label
    pub failures_by_kind: BTreeMap<&'static str, usize>,

    pub peak_running: usize,

    /// Batches the sink refused
    pub sink_failures: usize,

    /// Lowest fare found, before tax
    pub cheapest_net: Option<Decimal>,

    pub elapsed: Duration,
}

impl RunSummary {
    /// Tallies the final state of every task
    pub fn from_tasks(tasks: &[CrawlTask], peak_running: usize, elapsed: Duration) -> Self {
        let mut summary = Self {
            total: tasks.len(),
            peak_running,
            elapsed,
            ..Self::default()
        };

        for task in tasks {
            summary.attempts += u64::from(task.attempts);

            match task.status {
                TaskStatus::Succeeded => {
                    summary.succeeded += 1;
                    summary.records += task.result.len();
                    let cheapest = task.result.iter().map(FareRecord::net_price).min();
                    summary.cheapest_net = match (summary.cheapest_net, cheapest) {
                        (Some(a), Some(b)) => Some(a.min(b)),
                        (a, b) => a.or(b),
                    };
                    if task.result.is_empty() {
                        summary.empty += 1;
                    }
                }
                TaskStatus::Failed => {
                    summary.failed += 1;
                    if let Some(error) = &task.error {
                        *summary
                            .failures_by_kind
                            .entry(error.kind.label())
                            .or_insert(0) += 1;
                        if error.kind.label() == "cancelled" {
                            summary.cancelled += 1;
                        }
                    }
                }
                TaskStatus::Queued | TaskStatus::Running | TaskStatus::Retrying => {}
            }
        }

        summary
    }

    /// Share of tasks that succeeded, as a percentage
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.succeeded as f64 / self.total as f64) * 100.0
        }
    }
}

/// Prints a run summary to stdout
pub fn print_run_summary(summary: &RunSummary) {
    println!("=== Crawl Summary ===\n");
    println!("  Tasks: {}", summary.total);
    println!(
        "  Succeeded: {} ({} without fares)",
        summary.succeeded, summary.empty
    );
    println!("  Failed: {}", summary.failed);
    for (kind, count) in &summary.failures_by_kind {
        println!("    {}: {}", kind, count);
    }
    println!("  Attempts: {}", summary.attempts);
    println!("  Fares: {}", summary.records);
    if let Some(net) = summary.cheapest_net {
        println!("  Cheapest fare before tax: {}", net);
    }
    println!("  Peak concurrency: {}", summary.peak_running);
    if summary.sink_failures > 0 {
        println!("  Sink failures: {}", summary.sink_failures);
    }
    println!("  Elapsed: {:.1}s", summary.elapsed.as_secs_f64());
    println!("\nSuccess Rate: {:.1}%", summary.success_rate());
}

/// Statistics over the fare database
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    pub total_runs: u64,
    pub latest_run: Option<RunRecord>,
    pub total_fares: u64,
    pub round_trips: u64,
    pub total_segments: u64,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The SQLite sink to query
///
/// # Returns
///
/// * `Ok(CrawlStatistics)` - Successfully loaded statistics
/// * `Err(StorageError)` - Failed to query statistics
pub fn load_statistics(storage: &SqliteSink) -> StorageResult<CrawlStatistics> {
    let totals = storage.fare_totals()?;

    Ok(CrawlStatistics {
        total_runs: storage.count_runs()?,
        latest_run: storage.latest_run()?,
        total_fares: totals.fares,
        round_trips: totals.round_trips,
        total_segments: totals.segments,
        min_price: totals.min_price,
        max_price: totals.max_price,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Fare Statistics ===\n");

    println!("Overview:");
    println!("  Runs recorded: {}", stats.total_runs);
    if let Some(run) = &stats.latest_run {
        println!(
            "  Latest run: #{} started {} ({})",
            run.id,
            run.started_at,
            run.status.to_db_string()
        );
    }
    println!();

    println!("Fares:");
    println!("  Total fares: {}", stats.total_fares);
    println!("  Round trips: {}", stats.round_trips);
    println!(
        "  One-way: {}",
        stats.total_fares.saturating_sub(stats.round_trips)
    );
    println!("  Flight segments: {}", stats.total_segments);

    match (stats.min_price, stats.max_price) {
        (Some(min), Some(max)) => println!("  Price range: {} - {}", min, max),
        _ => println!("  Price range: n/a"),
    }
}
