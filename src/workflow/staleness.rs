//! Staleness Oracle
//!
//! Decides which jobs must run. A job is stale when:
//! - an output is missing
//! - an output was left behind by a failed run
//! - an input is newer than the oldest output
//! - the rule's action or its input list changed since the outputs were
//!   recorded in the [`FingerprintStore`]
//! - a job it depends on is going to run
//!
//! Output-less rules that run a command are always stale. Output-less
//! rules without an action only run when a dependency does.
//!
//! Forcing bypasses all checks.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{debug, info};

use super::builder::resolve_in;
use super::dag::{Dag, Job, JobId};
use super::rule::Action;
use super::state::FingerprintStore;
use crate::error::Result;

/// Why a job has to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    Forced,
    /// Rules without outputs that run a command do so every time.
    NoOutputs,
    MissingOutput(String),
    Incomplete { output: String },
    UpdatedInput { input: String, output: String },
    CodeChanged { output: String },
    InputSetChanged { output: String },
    UpdatedDependency(JobId),
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaleReason::Forced => write!(f, "forced execution"),
            StaleReason::NoOutputs => write!(f, "rule has no output files"),
            StaleReason::MissingOutput(path) => write!(f, "missing output files: {}", path),
            StaleReason::Incomplete { output } => {
                write!(f, "incomplete output files from a failed job: {}", output)
            }
            StaleReason::UpdatedInput { input, output } => {
                write!(f, "updated input files: {} is newer than {}", input, output)
            }
            StaleReason::CodeChanged { output } => {
                write!(f, "code has changed since last execution of {}", output)
            }
            StaleReason::InputSetChanged { output } => {
                write!(f, "set of input files has changed since last execution of {}", output)
            }
            StaleReason::UpdatedDependency(id) => {
                write!(f, "input files updated by another job ({})", id)
            }
        }
    }
}

/// The jobs that must run, with their reasons, and the order to run them in.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    needed: BTreeMap<JobId, Vec<StaleReason>>,
    order: Vec<JobId>,
}

impl Plan {
    pub fn is_needed(&self, id: JobId) -> bool {
        self.needed.contains_key(&id)
    }

    /// Reasons for a needed job; empty for jobs that are up to date.
    pub fn reasons(&self, id: JobId) -> &[StaleReason] {
        self.needed.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Needed jobs in topological order.
    pub fn jobs(&self) -> impl Iterator<Item = JobId> + '_ {
        self.order.iter().copied().filter(|id| self.needed.contains_key(id))
    }

    pub fn needed(&self) -> BTreeSet<JobId> {
        self.needed.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.needed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.needed.is_empty()
    }
}

/// Checks jobs against the filesystem and the fingerprint store.
pub struct StalenessOracle<'a> {
    working_dir: PathBuf,
    store: &'a FingerprintStore,
    force_all: bool,
    forced: BTreeSet<JobId>,
}

impl<'a> StalenessOracle<'a> {
    pub fn new(working_dir: impl Into<PathBuf>, store: &'a FingerprintStore) -> Self {
        Self {
            working_dir: working_dir.into(),
            store,
            force_all: false,
            forced: BTreeSet::new(),
        }
    }

    /// Treat every job as stale.
    pub fn force_all(mut self, force_all: bool) -> Self {
        self.force_all = force_all;
        self
    }

    /// Treat the given jobs as stale.
    pub fn force_jobs(mut self, jobs: impl IntoIterator<Item = JobId>) -> Self {
        self.forced.extend(jobs);
        self
    }

    pub fn is_stale(&self, job: &Job) -> bool {
        !self.reasons(job).is_empty()
    }

    /// Every reason `job` must run, ignoring its dependencies.
    pub fn reasons(&self, job: &Job) -> Vec<StaleReason> {
        if self.force_all || self.forced.contains(&job.id) {
            return vec![StaleReason::Forced];
        }
        if job.outputs.is_empty() {
            return match job.action {
                Action::Noop => Vec::new(),
                _ => vec![StaleReason::NoOutputs],
            };
        }

        let mut reasons = Vec::new();
        let mut oldest_output: Option<(SystemTime, &str)> = None;
        for output in &job.outputs {
            match modified(&resolve_in(&self.working_dir, output)) {
                Some(time) => {
                    if oldest_output.map_or(true, |(oldest, _)| time < oldest) {
                        oldest_output = Some((time, output));
                    }
                }
                None => reasons.push(StaleReason::MissingOutput(output.clone())),
            }
        }
        if !reasons.is_empty() {
            return reasons;
        }

        reasons.extend(
            job.outputs
                .iter()
                .filter(|output| self.store.get(output).map_or(false, |record| record.incomplete))
                .map(|output| StaleReason::Incomplete {
                    output: output.clone(),
                }),
        );
        if !reasons.is_empty() {
            return reasons;
        }

        if let Some((oldest, output)) = oldest_output {
            for input in &job.inputs {
                // Inputs that do not exist yet are covered by UpdatedDependency
                let Some(time) = modified(&resolve_in(&self.working_dir, input)) else {
                    continue;
                };
                if time > oldest {
                    reasons.push(StaleReason::UpdatedInput {
                        input: input.clone(),
                        output: output.to_string(),
                    });
                }
            }
        }

        for output in &job.outputs {
            let Some(record) = self.store.get(output) else {
                continue;
            };
            if record.code_hash != job.code_hash {
                reasons.push(StaleReason::CodeChanged {
                    output: output.clone(),
                });
            }
            if record.inputs != job.inputs {
                reasons.push(StaleReason::InputSetChanged {
                    output: output.clone(),
                });
            }
        }

        reasons
    }

    /// Evaluates the whole graph, propagating staleness to dependents.
    pub fn evaluate(&self, dag: &Dag) -> Result<Plan> {
        let order = dag.topological_order()?;
        let mut needed: BTreeMap<JobId, Vec<StaleReason>> = BTreeMap::new();

        for &id in &order {
            let job = dag.job(id);
            let mut reasons = self.reasons(job);
            reasons.extend(
                job.dependencies
                    .iter()
                    .filter(|dep| needed.contains_key(dep))
                    .map(|&dep| StaleReason::UpdatedDependency(dep)),
            );

            if reasons.is_empty() {
                debug!("{} is up to date", job.label());
            } else {
                debug!(
                    "{} must run: {}",
                    job.label(),
                    reasons
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join("; ")
                );
                needed.insert(id, reasons);
            }
        }

        info!("{} of {} jobs need to run", needed.len(), order.len());
        Ok(Plan { needed, order })
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::dag::tests::{dag_of, job};
    use std::fs::File;
    use std::time::Duration;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str, age_secs: u64) {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        let time = SystemTime::now() - Duration::from_secs(age_secs);
        file.set_modified(time).unwrap();
    }

    fn job_with_input(id: usize, name: &str, input: &str) -> Job {
        let mut j = job(id, name, &[]);
        j.inputs = vec![input.to_string()];
        j
    }

    #[test]
    fn test_missing_output_is_stale() {
        let dir = tempdir().unwrap();
        let store = FingerprintStore::new(dir.path());
        let oracle = StalenessOracle::new(dir.path(), &store);

        let reasons = oracle.reasons(&job(0, "a", &[]));
        assert_eq!(reasons, vec![StaleReason::MissingOutput("a.out".to_string())]);
    }

    #[test]
    fn test_newer_input_is_stale() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "in.txt", 10);
        touch(dir.path(), "a.out", 100);
        let store = FingerprintStore::new(dir.path());
        let oracle = StalenessOracle::new(dir.path(), &store);

        let reasons = oracle.reasons(&job_with_input(0, "a", "in.txt"));
        assert_eq!(
            reasons,
            vec![StaleReason::UpdatedInput {
                input: "in.txt".to_string(),
                output: "a.out".to_string(),
            }]
        );
    }

    #[test]
    fn test_fresh_output_is_up_to_date() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "in.txt", 100);
        touch(dir.path(), "a.out", 10);
        let store = FingerprintStore::new(dir.path());
        let oracle = StalenessOracle::new(dir.path(), &store);

        assert!(!oracle.is_stale(&job_with_input(0, "a", "in.txt")));
    }

    #[test]
    fn test_code_change_is_stale_with_fresh_mtimes() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "in.txt", 100);
        touch(dir.path(), "a.out", 10);

        let mut j = job_with_input(0, "a", "in.txt");
        let mut store = FingerprintStore::new(dir.path());
        store.record(&j);

        j.action = Action::Shell("cp in.txt a.out".to_string());
        j.code_hash = j.action.code_hash();
        let oracle = StalenessOracle::new(dir.path(), &store);
        assert_eq!(
            oracle.reasons(&j),
            vec![StaleReason::CodeChanged {
                output: "a.out".to_string()
            }]
        );
    }

    #[test]
    fn test_input_set_change_is_stale() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "in.txt", 100);
        touch(dir.path(), "extra.txt", 100);
        touch(dir.path(), "a.out", 10);

        let mut j = job_with_input(0, "a", "in.txt");
        let mut store = FingerprintStore::new(dir.path());
        store.record(&j);
        j.inputs.push("extra.txt".to_string());

        let oracle = StalenessOracle::new(dir.path(), &store);
        assert_eq!(
            oracle.reasons(&j),
            vec![StaleReason::InputSetChanged {
                output: "a.out".to_string()
            }]
        );
    }

    #[test]
    fn test_forced_and_output_less_jobs() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "a.out", 10);
        let store = FingerprintStore::new(dir.path());

        let oracle = StalenessOracle::new(dir.path(), &store).force_jobs([JobId(0)]);
        assert_eq!(oracle.reasons(&job(0, "a", &[])), vec![StaleReason::Forced]);

        let mut all = job(1, "all", &[]);
        all.outputs.clear();
        assert!(oracle.reasons(&all).is_empty());

        let mut report = job(3, "report", &[]);
        report.outputs.clear();
        report.action = Action::Shell("echo done".to_string());
        assert_eq!(oracle.reasons(&report), vec![StaleReason::NoOutputs]);

        let everything = StalenessOracle::new(dir.path(), &store).force_all(true);
        assert!(everything.is_stale(&job(2, "b", &[])));
    }

    #[test]
    fn test_evaluate_propagates_to_dependents() {
        // a (missing) <- b (fresh) <- c (fresh); d (fresh) is independent
        let dir = tempdir().unwrap();
        for name in ["b.out", "c.out", "d.out"] {
            touch(dir.path(), name, 10);
        }
        let dag = dag_of(vec![
            job(0, "a", &[]),
            job(1, "b", &[0]),
            job(2, "c", &[1]),
            job(3, "d", &[]),
        ]);
        let store = FingerprintStore::new(dir.path());
        let plan = StalenessOracle::new(dir.path(), &store).evaluate(&dag).unwrap();

        assert_eq!(plan.len(), 3);
        assert!(!plan.is_needed(JobId(3)));
        assert_eq!(plan.reasons(JobId(1)), &[StaleReason::UpdatedDependency(JobId(0))]);
        assert_eq!(plan.reasons(JobId(2)), &[StaleReason::UpdatedDependency(JobId(1))]);
        assert_eq!(
            plan.jobs().collect::<Vec<_>>(),
            vec![JobId(0), JobId(1), JobId(2)]
        );
        assert!(plan.reasons(JobId(3)).is_empty());
    }

    #[test]
    fn test_output_less_target_follows_its_dependencies() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "a.out", 10);
        let mut all = job(1, "all", &[0]);
        all.outputs.clear();
        all.inputs = vec!["a.out".to_string()];
        let dag = dag_of(vec![job(0, "a", &[]), all]);
        let store = FingerprintStore::new(dir.path());

        let plan = StalenessOracle::new(dir.path(), &store).evaluate(&dag).unwrap();
        assert!(plan.is_empty());

        fs::remove_file(dir.path().join("a.out")).unwrap();
        let plan = StalenessOracle::new(dir.path(), &store).evaluate(&dag).unwrap();
        assert_eq!(plan.reasons(JobId(1)), &[StaleReason::UpdatedDependency(JobId(0))]);
    }

    #[test]
    fn test_output_of_failed_job_is_stale() {
        // The partial output is newer than its input and the code is unchanged
        let dir = tempdir().unwrap();
        touch(dir.path(), "in.txt", 100);
        touch(dir.path(), "a.out", 10);
        let j = job_with_input(0, "a", "in.txt");

        let mut store = FingerprintStore::new(dir.path());
        store.record(&j);
        store.mark_incomplete(&j);
        let oracle = StalenessOracle::new(dir.path(), &store);
        assert_eq!(
            oracle.reasons(&j),
            vec![StaleReason::Incomplete {
                output: "a.out".to_string()
            }]
        );

        store.record(&j);
        let oracle = StalenessOracle::new(dir.path(), &store);
        assert!(!oracle.is_stale(&j));
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(
            StaleReason::MissingOutput("x".to_string()).to_string(),
            "missing output files: x"
        );
        assert_eq!(
            StaleReason::UpdatedDependency(JobId(4)).to_string(),
            "input files updated by another job (#4)"
        );
        assert_eq!(
            StaleReason::Incomplete {
                output: "x".to_string()
            }
            .to_string(),
            "incomplete output files from a failed job: x"
        );
    }
}
