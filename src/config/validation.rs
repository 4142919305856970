use crate::config::types::{ApiConfig, Config, CrawlerConfig, OutputConfig, RouteEntry};
use crate::ConfigError;
use chrono::NaiveDate;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_api_config(&config.api)?;
    validate_output_config(&config.output)?;
    validate_routes(&config.routes)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.max_concurrency < 1 || config.max_concurrency > 64 {
        return Err(ConfigError::Validation(format!(
            "max_concurrency must be between 1 and 64, got {}",
            config.max_concurrency
        )));
    }

    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.backoff_base_ms == 0 {
        return Err(ConfigError::Validation(
            "backoff_base_ms must be > 0".to_string(),
        ));
    }

    if config.backoff_cap_ms < config.backoff_base_ms {
        return Err(ConfigError::Validation(format!(
            "backoff_cap_ms ({}) must be >= backoff_base_ms ({})",
            config.backoff_cap_ms, config.backoff_base_ms
        )));
    }

    validate_date_format(&config.date_format)?;

    Ok(())
}

/// A date format is usable if a known date survives format -> parse
fn validate_date_format(format: &str) -> Result<(), ConfigError> {
    if format.trim().is_empty() {
        return Err(ConfigError::Validation(
            "date_format cannot be empty".to_string(),
        ));
    }

    let probe = NaiveDate::from_ymd_opt(2024, 6, 1)
        .ok_or_else(|| ConfigError::Validation("invalid probe date".to_string()))?;

    let mut rendered = String::new();
    if std::fmt::write(&mut rendered, format_args!("{}", probe.format(format))).is_err() {
        return Err(ConfigError::Validation(format!(
            "date_format '{}' is not a valid chrono format",
            format
        )));
    }

    match NaiveDate::parse_from_str(&rendered, format) {
        Ok(parsed) if parsed == probe => Ok(()),
        _ => Err(ConfigError::Validation(format!(
            "date_format '{}' does not round-trip a full calendar date",
            format
        ))),
    }
}

/// Validates API configuration
fn validate_api_config(config: &ApiConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.endpoint)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid endpoint: {}", e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "Endpoint '{}' must use http or https",
            config.endpoint
        )));
    }

    if config.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeout_secs must be > 0".to_string(),
        ));
    }

    if config.connect_timeout_secs == 0 || config.connect_timeout_secs > config.timeout_secs {
        return Err(ConfigError::Validation(format!(
            "connect_timeout_secs must be between 1 and timeout_secs ({}), got {}",
            config.timeout_secs, config.connect_timeout_secs
        )));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates route entries
///
/// Only the shape is checked here; the orchestrator re-validates the task
/// parameters it receives, since tasks can also be enqueued programmatically.
fn validate_routes(routes: &[RouteEntry]) -> Result<(), ConfigError> {
    let mut seen_ids = HashSet::new();

    for route in routes {
        validate_airport(&route.origin)?;
        validate_airport(&route.destination)?;

        if route.origin.eq_ignore_ascii_case(&route.destination) {
            return Err(ConfigError::InvalidRoute(format!(
                "origin and destination are both '{}'",
                route.origin
            )));
        }

        let departs = parse_route_date(&route.departure_date)?;
        if let Some(return_date) = &route.return_date {
            let returns = parse_route_date(return_date)?;
            if returns < departs {
                return Err(ConfigError::InvalidRoute(format!(
                    "{}-{}: return date {} precedes departure date {}",
                    route.origin, route.destination, returns, departs
                )));
            }
        }

        if let Some(trip_type) = &route.trip_type {
            match trip_type.as_str() {
                "round-trip" if route.return_date.is_none() => {
                    return Err(ConfigError::InvalidRoute(format!(
                        "{}-{}: round-trip route needs a return-date",
                        route.origin, route.destination
                    )));
                }
                "round-trip" | "one-way" => {}
                other => {
                    return Err(ConfigError::InvalidRoute(format!(
                        "unknown trip-type '{}'",
                        other
                    )));
                }
            }
        }

        if let Some(adults) = route.adults {
            if !(1..=9).contains(&adults) {
                return Err(ConfigError::InvalidRoute(format!(
                    "adults must be between 1 and 9, got {}",
                    adults
                )));
            }
        }

        if let Some(id) = &route.id {
            if !seen_ids.insert(id.as_str()) {
                return Err(ConfigError::InvalidRoute(format!(
                    "duplicate route id '{}'",
                    id
                )));
            }
        }
    }

    Ok(())
}

/// Validates an IATA airport code: three ASCII letters
fn validate_airport(code: &str) -> Result<(), ConfigError> {
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ConfigError::InvalidRoute(format!(
            "'{}' is not a three-letter airport code",
            code
        )));
    }
    Ok(())
}

fn parse_route_date(value: &str) -> Result<NaiveDate, ConfigError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| ConfigError::InvalidRoute(format!("invalid date '{}': {}", value, e)))
}
