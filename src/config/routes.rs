//! Conversion of configured routes into crawl tasks

use crate::config::types::RouteEntry;
use crate::model::{CrawlTask, TaskParams};

/// Builds the task parameters for a configured route
pub fn route_params(route: &RouteEntry) -> TaskParams {
    let mut params = TaskParams::new()
        .with("origin", route.origin.to_ascii_uppercase())
        .with("destination", route.destination.to_ascii_uppercase())
        .with("departure_date", route.departure_date.as_str());

    if let Some(return_date) = &route.return_date {
        params.insert("return_date", return_date.as_str());
    }
    if let Some(trip_type) = &route.trip_type {
        params.insert("trip_type", trip_type.as_str());
    }
    if let Some(cabin) = &route.cabin {
        params.insert("cabin", cabin.as_str());
    }
    if let Some(adults) = route.adults {
        params.insert("adults", adults.to_string());
    }

    params
}

impl RouteEntry {
    /// Converts the route into a queued task, generating an id if none is configured
    pub fn to_task(&self) -> CrawlTask {
        let params = route_params(self);
        match &self.id {
            Some(id) => CrawlTask::new(id.as_str(), params),
            None => CrawlTask::with_generated_id(params),
        }
    }
}
