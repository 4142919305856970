//! Configuration module for Fare-Ripple
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use fare_ripple::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("fares.toml")).unwrap();
//! println!("Crawler will run {} workers", config.crawler.max_concurrency);
//! ```

mod parser;
mod routes;
mod types;
mod validation;

// Re-export types
pub use types::{ApiConfig, Config, CrawlerConfig, EmptyResultPolicy, OutputConfig, RouteEntry};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use routes::route_params;
