//! Output module for run summaries and fare statistics
//!
//! This module handles:
//! - Summarizing the outcome of a scheduler run
//! - Reporting statistics over the fare database

pub mod stats;

pub use stats::{load_statistics, print_run_summary, print_statistics, CrawlStatistics, RunSummary};
