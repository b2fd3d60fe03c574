//! Build Errors
//!
//! Every failure the engine can report. Graph-building errors abort a build
//! before anything runs; `ActionFailure` is recorded per job in the
//! execution report.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while declaring rules, resolving targets or running jobs.
#[derive(Debug, Error)]
pub enum BuildError {
    /// More than one rule can produce the target.
    #[error("ambiguous rule for target '{target}': produced by rules {}", .rules.join(", "))]
    AmbiguousRule { target: String, rules: Vec<String> },

    /// No rule produces the target and no such file exists.
    #[error("no rule produces target '{target}'{}", required_suffix(.required_by))]
    NoRuleFound {
        target: String,
        required_by: Option<String>,
    },

    /// A target depends, directly or transitively, on itself.
    #[error("cyclic dependency in rule '{rule}' for target '{target}': {}", .chain.join(" -> "))]
    CyclicDependency {
        target: String,
        rule: String,
        chain: Vec<String>,
    },

    /// An input template refers to a wildcard the binding does not define.
    #[error("rule '{rule}', target '{target}': input '{template}' uses undefined wildcard '{{{wildcard}}}'")]
    WildcardMismatch {
        rule: String,
        target: String,
        template: String,
        wildcard: String,
    },

    /// A job's action failed.
    #[error("rule '{rule}' failed for target '{target}': {message}")]
    ActionFailure {
        rule: String,
        target: String,
        message: String,
    },

    #[error("rule '{name}' is already registered")]
    DuplicateRule { name: String },

    #[error("rule '{rule}': {message}")]
    InvalidRule { rule: String, message: String },

    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// Two rules declare output patterns with the same literal structure.
    #[error("rule '{rule}': output pattern '{pattern}' collides with rule '{existing}'")]
    PatternCollision {
        rule: String,
        existing: String,
        pattern: String,
    },

    #[error("resolving '{target}' via rule '{rule}' exceeded the depth limit of {limit}")]
    ResolutionDepthExceeded {
        target: String,
        rule: String,
        limit: usize,
    },

    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fingerprint store error: {0}")]
    Store(#[from] serde_json::Error),
}

impl BuildError {
    /// Builds an [`BuildError::Io`] for the given path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true for errors caused by an input nobody can provide.
    pub fn is_missing_input(&self) -> bool {
        matches!(self, Self::NoRuleFound { .. })
    }
}

fn required_suffix(required_by: &Option<String>) -> String {
    match required_by {
        Some(rule) => format!(" (required by rule '{}')", rule),
        None => String::new(),
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BuildError>;
