//! Value types shared by the scheduler, extractor and sinks
//!
//! - `FlightSegment`, `PartialFareRecord`, `FareRecord`: extracted fare data
//! - `TaskId`, `TaskParams`, `CrawlTask`: the unit of work the scheduler owns

mod fare;
mod task;

pub use fare::{FareRecord, FlightSegment, PartialFareRecord, RecordError};
pub use task::{AttemptRecord, CrawlTask, TaskError, TaskId, TaskParams};
