//! Crawler module for fare querying and task execution
//!
//! This module contains the core crawling logic, including:
//! - The bounded-concurrency task scheduler with retry
//! - HTTP access to the provider's GraphQL endpoint
//! - Query payload construction for both legs of a trip
//! - Fare extraction and outbound/inbound pairing
//! - Overall crawl orchestration

mod coordinator;
pub mod extractor;
pub mod gateway;
pub mod payload;
mod retry;
mod scheduler;

pub use coordinator::{crawl_with_sink, run_crawl, CrawlOrchestrator, SinkFailure};
pub use extractor::{
    ExtractError, Extraction, ExtractorConfig, ResponseExtractor, SkipReason, SkippedItinerary,
};
pub use gateway::{build_http_client, ApiGateway, GatewayError, HttpGateway};
pub use payload::{inbound_payload, outbound_payload, QueryPayload, RouteQuery, TripType};
pub use retry::RetryPolicy;
pub use scheduler::{TaskExecutor, TaskScheduler};
