//! Build Execution Module
//!
//! Runs the stale jobs of a build on a bounded worker pool.
//!
//! # Architecture
//!
//! - [`engine`]: Main engine orchestrating a build
//! - [`action`]: Running a single job
//! - [`report`]: Per-job outcomes of a build

pub mod action;
pub mod engine;
pub mod report;

pub use engine::Engine;
pub use report::{ExecutionReport, JobOutcome, JobReport};
