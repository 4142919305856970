//! State module for tracking task progress
//!
//! # Components
//!
//! - `TaskStatus`: the lifecycle status of a crawl task and its legal transitions

mod task_status;

// Re-export main types
pub use task_status::TaskStatus;
