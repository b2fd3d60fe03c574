//! RuleRunner - Rule-Based Build Engine
//!
//! Rules declare how output files are produced from input files, using
//! named wildcards such as `sorted/{sample}.txt`. Requesting a target
//! resolves it against the rules into a graph of jobs; jobs whose outputs
//! are missing or out of date run in dependency order on a bounded pool of
//! worker threads.
//!
//! # Architecture
//!
//! The library is organized into three main modules:
//!
//! - [`workflow`]: Rules, wildcard patterns, graph building and staleness
//! - [`execution`]: Engine, worker pool and execution reports
//! - [`monitoring`]: Execution timeline
//!
//! # Example
//!
//! ```rust,no_run
//! use rulerunner::{expand, BuildConfig, Engine, Registry, Rule};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     rulerunner::init_logging(false);
//!
//!     let mut registry = Registry::new();
//!     registry.register(
//!         Rule::new("count")
//!             .output("counts/{sample}.txt")
//!             .input("reads/{sample}.fq")
//!             .shell("wc -l < {input} > {output}"),
//!     )?;
//!     registry.register(
//!         Rule::new("all")
//!             .inputs(expand("counts/{sample}.txt", &[("sample", &["a", "b"])])?),
//!     )?;
//!
//!     let config = BuildConfig::new().with_working_dir("/data/analysis");
//!     let report = Engine::new(&registry, config).build(&["all"])?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod execution;
pub mod logging;
pub mod monitoring;
pub mod workflow;

// Re-export commonly used types
pub use config::BuildConfig;
pub use error::{BuildError, Result};
pub use execution::{Engine, ExecutionReport, JobOutcome, JobReport};
pub use logging::init_logging;
pub use workflow::{
    expand, Action, InputValue, JobContext, JobId, Pattern, Registry, Rule, StaleReason,
    Wildcards,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "RuleRunner";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "RuleRunner");
    }

    #[test]
    fn test_module_exports_rule() {
        let rule = Rule::new("test").output("{x}.txt").shell("touch {output}");
        assert_eq!(rule.name(), "test");
    }

    #[test]
    fn test_module_exports_registry() {
        let registry = Registry::new();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_version_format() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert!(parts.len() >= 2, "Version should have at least major.minor");
        for part in parts {
            assert!(part.parse::<u32>().is_ok(), "Version components should be numeric");
        }
    }
}
