use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Fare-Ripple
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    pub api: ApiConfig,
    pub output: OutputConfig,
    #[serde(default, rename = "route")]
    pub routes: Vec<RouteEntry>,
}

/// What to do with a task that completed with zero fares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmptyResultPolicy {
    /// Do not call the sink at all
    #[default]
    Skip,

    /// Call the sink with an empty batch so the attempt is recorded
    Persist,
}

/// Scheduler and extraction behavior
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Number of concurrent workers
    #[serde(rename = "max-concurrency", default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Executions per task before a transient failure becomes terminal
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds); doubles per retry
    #[serde(rename = "backoff-base-ms", default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound for any single backoff (milliseconds)
    #[serde(rename = "backoff-cap-ms", default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// chrono format of dates in provider responses
    #[serde(rename = "date-format", default = "default_date_format")]
    pub date_format: String,

    #[serde(rename = "empty-results", default)]
    pub empty_results: EmptyResultPolicy,
}

impl CrawlerConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            date_format: default_date_format(),
            empty_results: EmptyResultPolicy::default(),
        }
    }
}

/// Remote GraphQL endpoint settings
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// GraphQL endpoint URL
    pub endpoint: String,

    /// Per-request timeout (seconds)
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Connection timeout (seconds)
    #[serde(rename = "connect-timeout-secs", default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// One route to crawl
#[derive(Debug, Clone, Deserialize)]
pub struct RouteEntry {
    /// Optional task identifier; generated when absent
    pub id: Option<String>,

    /// IATA code of the departure airport
    pub origin: String,

    /// IATA code of the arrival airport
    pub destination: String,

    /// Departure date, `YYYY-MM-DD`
    #[serde(rename = "departure-date")]
    pub departure_date: String,

    /// Return date, `YYYY-MM-DD`; absent for one-way routes
    #[serde(rename = "return-date")]
    pub return_date: Option<String>,

    /// `round-trip` or `one-way`; inferred from `return-date` when absent
    #[serde(rename = "trip-type")]
    pub trip_type: Option<String>,

    pub cabin: Option<String>,

    pub adults: Option<u8>,
}

fn default_max_concurrency() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_cap_ms() -> u64 {
    30_000
}

fn default_date_format() -> String {
    "%Y%m%d".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    format!("FareRipple/{}", env!("CARGO_PKG_VERSION"))
}
