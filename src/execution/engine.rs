//! Build Execution Engine
//!
//! Orchestrates one build:
//! - Resolves the requested targets into a job graph
//! - Evaluates staleness against the filesystem and the fingerprint store
//! - Runs stale jobs on a bounded worker pool in dependency order
//! - Records fingerprints after every successful job
//!
//! The coordinating thread owns all scheduling state. Workers receive job
//! ids over a shared channel and send results back over a second one.

use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use colored::Colorize;
use log::{debug, error, info, warn};

use crate::config::BuildConfig;
use crate::error::{BuildError, Result};
use crate::monitoring::{EventType, ExecutionTimeline};
use crate::workflow::{
    Dag, DagBuilder, ExecutionPlanner, FingerprintStore, JobId, JobStatus, Plan, Registry,
    StalenessOracle,
};

use super::action::execute_job;
use super::report::{ExecutionReport, JobOutcome, JobReport};

type Completion = (JobId, Result<()>);

/// Build engine over a registry of rules.
///
/// # Example
///
/// ```rust,no_run
/// use rulerunner::{BuildConfig, Engine, Registry, Rule};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut registry = Registry::new();
///     registry.register(
///         Rule::new("sort")
///             .output("sorted/{sample}.txt")
///             .input("raw/{sample}.txt")
///             .shell("sort {input} > {output}"),
///     )?;
///
///     let config = BuildConfig::new().with_cores(4).with_working_dir("/data/analysis");
///     let report = Engine::new(&registry, config).build(&["sorted/a.txt"])?;
///     println!("{}", report.summary());
///     Ok(())
/// }
/// ```
pub struct Engine<'r> {
    registry: &'r Registry,
    config: BuildConfig,
}

impl<'r> Engine<'r> {
    pub fn new(registry: &'r Registry, config: BuildConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Resolves targets into the job graph without evaluating staleness.
    pub fn resolve<S: AsRef<str>>(&self, targets: &[S]) -> Result<Dag> {
        DagBuilder::new(self.registry, &self.config.working_dir).build(targets)
    }

    /// Resolves targets and decides which jobs must run.
    pub fn plan<S: AsRef<str>>(&self, targets: &[S]) -> Result<(Dag, Plan)> {
        let store = FingerprintStore::open(&self.config.working_dir);
        self.plan_with(targets, &store)
    }

    fn plan_with<S: AsRef<str>>(&self, targets: &[S], store: &FingerprintStore) -> Result<(Dag, Plan)> {
        let dag = self.resolve(targets)?;

        let forced: Vec<JobId> = if self.config.force {
            dag.targets().iter().filter_map(|(_, job)| *job).collect()
        } else {
            Vec::new()
        };
        let plan = StalenessOracle::new(&self.config.working_dir, store)
            .force_all(self.config.force_all)
            .force_jobs(forced)
            .evaluate(&dag)?;

        Ok((dag, plan))
    }

    /// Builds the requested targets.
    ///
    /// # Returns
    ///
    /// * `Ok(report)` - The graph was built; the report tells which jobs
    ///   completed, failed, were skipped or cancelled
    /// * `Err` - Graph building failed and nothing was run
    pub fn build<S: AsRef<str>>(&self, targets: &[S]) -> Result<ExecutionReport> {
        let start_time = Instant::now();
        let mut store = FingerprintStore::open(&self.config.working_dir);
        let (dag, plan) = self.plan_with(targets, &store)?;

        let mut report = ExecutionReport {
            jobs: Vec::new(),
            total_jobs: dag.len(),
            elapsed: start_time.elapsed(),
            dry_run: self.config.dry_run,
        };

        if self.config.dry_run {
            self.print_plan(&dag, &plan);
            report.jobs = plan
                .jobs()
                .map(|id| job_report(&dag, &plan, id, JobOutcome::Planned, None))
                .collect();
            return Ok(report);
        }

        if plan.is_empty() {
            info!("Nothing to be done: all {} jobs are up to date", dag.len());
            return Ok(report);
        }

        info!(
            "Starting execution ({} of {} jobs, {} cores)",
            plan.len(),
            dag.len(),
            self.config.cores
        );

        let mut timeline = ExecutionTimeline::new();
        let (statuses, mut errors) = self.execute(&dag, &plan, &mut store, &mut timeline);

        report.jobs = plan
            .jobs()
            .map(|id| {
                let outcome = match statuses.get(&id) {
                    Some(JobStatus::Completed) => JobOutcome::Completed,
                    Some(JobStatus::Failed(message)) => JobOutcome::Failed(
                        errors.remove(&id).unwrap_or_else(|| BuildError::ActionFailure {
                            rule: dag.job(id).rule.clone(),
                            target: dag.job(id).target().to_string(),
                            message: message.clone(),
                        }),
                    ),
                    Some(JobStatus::Skipped { failed_dependency }) => JobOutcome::Skipped {
                        failed_dependency: *failed_dependency,
                    },
                    _ => JobOutcome::Cancelled,
                };
                job_report(&dag, &plan, id, outcome, timeline.duration_of(id))
            })
            .collect();
        report.elapsed = start_time.elapsed();

        debug!("{}", timeline.gantt_chart());
        if report.is_success() {
            info!("{}", report.summary());
        } else {
            warn!("{}", report.summary());
        }
        Ok(report)
    }

    /// Runs the planned jobs and returns the final status of each, plus the
    /// error of every failed job.
    fn execute(
        &self,
        dag: &Dag,
        plan: &Plan,
        store: &mut FingerprintStore,
        timeline: &mut ExecutionTimeline,
    ) -> (BTreeMap<JobId, JobStatus>, HashMap<JobId, BuildError>) {
        let mut planner = ExecutionPlanner::new(dag, plan, self.config.cores);
        let mut errors: HashMap<JobId, BuildError> = HashMap::new();
        let workers = self.config.cores.max(1).min(plan.len());

        let (job_tx, job_rx): (Sender<JobId>, Receiver<JobId>) = channel();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (done_tx, done_rx): (Sender<Completion>, Receiver<Completion>) = channel();

        thread::scope(|scope| {
            for worker in 0..workers {
                let job_rx = Arc::clone(&job_rx);
                let done_tx = done_tx.clone();
                let config = &self.config;
                scope.spawn(move || loop {
                    let next = match job_rx.lock() {
                        Ok(receiver) => receiver.recv(),
                        Err(_) => break,
                    };
                    let Ok(id) = next else { break };
                    debug!("Worker {} picked up job {}", worker, id);
                    let result = execute_job(dag.job(id), config);
                    if let Err(e) = done_tx.send((id, result)) {
                        error!("Failed to send completion signal: {}", e);
                        break;
                    }
                });
            }
            drop(done_tx);

            let mut halted = false;
            loop {
                if !halted {
                    for id in planner.get_ready_jobs() {
                        let job = dag.job(id);
                        info!("Starting job {}: {}", id, job.label());
                        timeline.add_event(id, job.label(), EventType::Started);
                        planner.mark_running(id);
                        if job_tx.send(id).is_err() {
                            error!("No worker available for job {}", id);
                            planner.mark_failed(id, "worker pool stopped".to_string());
                        }
                    }
                }

                if !planner.has_running() {
                    break;
                }

                let Ok((id, result)) = done_rx.recv() else {
                    error!("All workers stopped before the build finished");
                    break;
                };
                let job = dag.job(id);

                match result {
                    Ok(()) => {
                        timeline.add_event(id, job.label(), EventType::Completed);
                        planner.mark_completed(id);
                        store.record(job);
                        if let Err(e) = store.save() {
                            error!("Could not save fingerprints: {}", e);
                        }
                        let (done, total) = planner.progress();
                        info!("[{}/{}] Finished job {}: {}", done, total, id, job.label());
                    }
                    Err(e) => {
                        error!("Job {} failed: {}", job.label(), e);
                        timeline.add_event(id, job.label(), EventType::Failed);
                        planner.mark_failed(id, e.to_string());
                        errors.insert(id, e);

                        store.mark_incomplete(job);
                        if let Err(e) = store.save() {
                            error!("Could not save fingerprints: {}", e);
                        }
                        if !self.config.keep_going && !halted {
                            halted = true;
                            let cancelled = planner.halt();
                            warn!(
                                "Stopping after failure; {} jobs will not be started",
                                cancelled.len()
                            );
                        }
                    }
                }
            }

            // Workers exit once the job channel closes
            drop(job_tx);
        });

        let leftover = planner.halt();
        if !leftover.is_empty() {
            warn!("{} jobs could not be scheduled", leftover.len());
        }
        (planner.statuses().clone(), errors)
    }

    /// Prints the jobs a build would run, in execution order.
    fn print_plan(&self, dag: &Dag, plan: &Plan) {
        if plan.is_empty() {
            println!("{}", "Nothing to be done.".green());
            return;
        }

        for id in plan.jobs() {
            let job = dag.job(id);
            println!();
            println!("{} Job {}: {}", "[DRY RUN]".cyan().bold(), id, job.label().bold());
            println!("  Input: {}", job.inputs.join(", "));
            println!("  Output: {}", job.outputs.join(", "));
            println!("  Threads: {}", job.threads.clamp(1, self.config.cores.max(1)));
            for reason in plan.reasons(id) {
                println!("  Reason: {}", reason.to_string().yellow());
            }
        }
        println!();
        println!("{} of {} jobs would run", plan.len(), dag.len());
    }
}

fn job_report(
    dag: &Dag,
    plan: &Plan,
    id: JobId,
    outcome: JobOutcome,
    duration: Option<std::time::Duration>,
) -> JobReport {
    let job = dag.job(id);
    JobReport {
        id,
        rule: job.rule.clone(),
        wildcards: job.wildcards.clone(),
        outputs: job.outputs.clone(),
        reasons: plan.reasons(id).to_vec(),
        outcome,
        duration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::Rule;
    use std::fs;
    use tempfile::tempdir;

    fn copy_registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register(
                Rule::new("copy")
                    .output("out/{name}.txt")
                    .input("in/{name}.txt")
                    .shell("cp {input} {output}"),
            )
            .unwrap();
        registry
    }

    fn setup(dir: &std::path::Path) {
        fs::create_dir_all(dir.join("in")).unwrap();
        fs::write(dir.join("in/a.txt"), "alpha").unwrap();
    }

    #[test]
    fn test_engine_creation() {
        let registry = Registry::new();
        let engine = Engine::new(&registry, BuildConfig::new().with_cores(3));
        assert_eq!(engine.config().cores, 3);
    }

    #[test]
    fn test_build_runs_stale_job() {
        let dir = tempdir().unwrap();
        setup(dir.path());
        let registry = copy_registry();
        let engine = Engine::new(&registry, BuildConfig::new().with_working_dir(dir.path()));

        let report = engine.build(&["out/a.txt"]).unwrap();
        assert!(report.is_success());
        assert_eq!(report.completed().len(), 1);
        assert!(report.completed()[0].duration.is_some());
        assert_eq!(fs::read_to_string(dir.path().join("out/a.txt")).unwrap(), "alpha");

        let store = FingerprintStore::open(dir.path());
        assert_eq!(store.get("out/a.txt").unwrap().rule, "copy");
    }

    #[test]
    fn test_dry_run_does_not_execute() {
        let dir = tempdir().unwrap();
        setup(dir.path());
        let registry = copy_registry();
        let config = BuildConfig::new().with_working_dir(dir.path()).with_dry_run(true);

        let report = Engine::new(&registry, config).build(&["out/a.txt"]).unwrap();
        assert_eq!(report.planned().len(), 1);
        assert_eq!(
            report.planned()[0].reasons,
            vec![crate::workflow::StaleReason::MissingOutput("out/a.txt".to_string())]
        );
        assert_eq!(report.executed_count(), 0);
        assert!(!dir.path().join("out/a.txt").exists());
    }

    #[test]
    fn test_force_reruns_requested_target() {
        let dir = tempdir().unwrap();
        setup(dir.path());
        let registry = copy_registry();
        let base = BuildConfig::new().with_working_dir(dir.path());

        Engine::new(&registry, base.clone()).build(&["out/a.txt"]).unwrap();
        let again = Engine::new(&registry, base.clone()).build(&["out/a.txt"]).unwrap();
        assert_eq!(again.executed_count(), 0);

        let forced = Engine::new(&registry, base.with_force(true))
            .build(&["out/a.txt"])
            .unwrap();
        assert_eq!(forced.executed_count(), 1);
    }

    #[test]
    fn test_graph_error_aborts_before_execution() {
        let dir = tempdir().unwrap();
        let registry = copy_registry();
        let engine = Engine::new(&registry, BuildConfig::new().with_working_dir(dir.path()));

        let err = engine.build(&["out/missing.txt"]).unwrap_err();
        assert!(matches!(err, BuildError::NoRuleFound { .. }));
        assert!(!dir.path().join("out").exists());
    }
}
