//! Execution Monitoring Module
//!
//! - [`ExecutionTimeline`]: Job start/end timing for durations and Gantt charts

pub mod timeline;

pub use timeline::{EventType, ExecutionTimeline, TimelineEvent};
