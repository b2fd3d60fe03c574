//! Rule and Job Graph Module
//!
//! Declares rules, resolves targets into jobs and decides which jobs are
//! out of date.
//!
//! # Structure
//!
//! - [`pattern`]: Wildcard patterns, matching and rendering
//! - [`rule`]: Rule declarations (inputs, outputs, actions)
//! - [`registry`]: The set of rules and target lookup
//! - [`builder`]: Target resolution into a [`Dag`]
//! - [`staleness`]: Out-of-date checks and the execution [`Plan`]
//! - [`state`]: Persisted fingerprints of produced outputs
//! - [`planner`]: Ready-queue and thread bookkeeping during execution

pub mod builder;
pub mod dag;
pub mod pattern;
pub mod planner;
pub mod registry;
pub mod rule;
pub mod staleness;
pub mod state;

pub use builder::{DagBuilder, MAX_RESOLUTION_DEPTH};
pub use dag::{Dag, Job, JobId};
pub use pattern::{expand, has_wildcards, Pattern, Wildcards};
pub use planner::{ExecutionPlanner, JobStatus};
pub use registry::{CompiledRule, Registry, RuleMatch};
pub use rule::{Action, ActionFn, InputFn, InputSpec, InputValue, JobContext, Rule};
pub use staleness::{Plan, StaleReason, StalenessOracle};
pub use state::{FingerprintRecord, FingerprintStore, STATE_DIR};
