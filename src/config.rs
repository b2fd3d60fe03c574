//! Build Configuration
//!
//! Settings for one [`Engine`](crate::Engine). Hosts construct the
//! configuration in code; every field has a default so partial JSON
//! documents also deserialize.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Options controlling graph evaluation and execution.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BuildConfig {
    /// Thread budget shared by all running jobs
    pub cores: usize,
    /// Print the plan without running any action
    pub dry_run: bool,
    /// Rerun the jobs producing the requested targets
    pub force: bool,
    /// Rerun every job in the graph
    pub force_all: bool,
    /// Keep running independent jobs after a failure
    pub keep_going: bool,
    /// Remove the outputs of failed jobs
    pub delete_failed_outputs: bool,
    /// Shell used for shell actions
    pub shell: String,
    /// Directory that relative paths resolve against
    pub working_dir: PathBuf,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            cores: num_cpus::get(),
            dry_run: false,
            force: false,
            force_all: false,
            keep_going: true,
            delete_failed_outputs: true,
            shell: "bash".to_string(),
            working_dir: PathBuf::from("."),
        }
    }
}

impl BuildConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the thread budget (at least 1).
    pub fn with_cores(mut self, cores: usize) -> Self {
        self.cores = cores.max(1);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_force_all(mut self, force_all: bool) -> Self {
        self.force_all = force_all;
        self
    }

    pub fn with_keep_going(mut self, keep_going: bool) -> Self {
        self.keep_going = keep_going;
        self
    }

    pub fn with_delete_failed_outputs(mut self, delete: bool) -> Self {
        self.delete_failed_outputs = delete;
        self
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }
}
