//! Execution Report
//!
//! What happened to every planned job of one build.

use std::fmt::Write as _;
use std::time::Duration;

use colored::Colorize;

use crate::error::BuildError;
use crate::workflow::dag::JobId;
use crate::workflow::pattern::Wildcards;
use crate::workflow::staleness::StaleReason;

/// Final state of one job.
#[derive(Debug)]
pub enum JobOutcome {
    Completed,
    Failed(BuildError),
    /// Not started because `failed_dependency` failed
    Skipped { failed_dependency: JobId },
    /// Not started because the build stopped early
    Cancelled,
    /// Dry run: would have run
    Planned,
}

/// Report entry for one planned job.
#[derive(Debug)]
pub struct JobReport {
    pub id: JobId,
    pub rule: String,
    pub wildcards: Wildcards,
    pub outputs: Vec<String>,
    pub reasons: Vec<StaleReason>,
    pub outcome: JobOutcome,
    pub duration: Option<Duration>,
}

impl JobReport {
    pub fn label(&self) -> String {
        if self.wildcards.is_empty() {
            self.rule.clone()
        } else {
            format!("{}[{}]", self.rule, self.wildcards)
        }
    }
}

/// Outcome of [`Engine::build`](crate::Engine::build).
///
/// Jobs that were already up to date do not appear. A report is returned
/// even when jobs failed; check [`ExecutionReport::is_success`].
#[derive(Debug, Default)]
pub struct ExecutionReport {
    pub jobs: Vec<JobReport>,
    /// Jobs in the graph, including up-to-date ones
    pub total_jobs: usize,
    pub elapsed: Duration,
    pub dry_run: bool,
}

impl ExecutionReport {
    /// True when no job failed, was skipped or was cancelled.
    pub fn is_success(&self) -> bool {
        self.jobs.iter().all(|j| {
            matches!(j.outcome, JobOutcome::Completed | JobOutcome::Planned)
        })
    }

    pub fn job(&self, id: JobId) -> Option<&JobReport> {
        self.jobs.iter().find(|j| j.id == id)
    }

    /// Reports of jobs whose rule is `rule`.
    pub fn by_rule<'a>(&'a self, rule: &'a str) -> impl Iterator<Item = &'a JobReport> + 'a {
        self.jobs.iter().filter(move |j| j.rule == rule)
    }

    pub fn completed(&self) -> Vec<&JobReport> {
        self.filter(|o| matches!(o, JobOutcome::Completed))
    }

    pub fn failed(&self) -> Vec<&JobReport> {
        self.filter(|o| matches!(o, JobOutcome::Failed(_)))
    }

    pub fn skipped(&self) -> Vec<&JobReport> {
        self.filter(|o| matches!(o, JobOutcome::Skipped { .. }))
    }

    pub fn cancelled(&self) -> Vec<&JobReport> {
        self.filter(|o| matches!(o, JobOutcome::Cancelled))
    }

    pub fn planned(&self) -> Vec<&JobReport> {
        self.filter(|o| matches!(o, JobOutcome::Planned))
    }

    /// Number of jobs whose action was invoked.
    pub fn executed_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| matches!(j.outcome, JobOutcome::Completed | JobOutcome::Failed(_)))
            .count()
    }

    fn filter(&self, pred: impl Fn(&JobOutcome) -> bool) -> Vec<&JobReport> {
        self.jobs.iter().filter(|j| pred(&j.outcome)).collect()
    }

    /// Human-readable summary of the build.
    pub fn summary(&self) -> String {
        let mut out = String::new();

        if self.dry_run {
            let _ = writeln!(
                out,
                "{} {} of {} jobs would run",
                "Dry run:".cyan().bold(),
                self.planned().len(),
                self.total_jobs
            );
            return out;
        }

        let up_to_date = self.total_jobs.saturating_sub(self.jobs.len());
        let headline = if self.is_success() {
            "Build completed successfully".green().bold()
        } else {
            "Build finished with errors".red().bold()
        };
        let _ = writeln!(out, "{}", headline);
        let _ = writeln!(
            out,
            "  {} completed, {} failed, {} skipped, {} cancelled, {} up to date",
            self.completed().len(),
            self.failed().len(),
            self.skipped().len(),
            self.cancelled().len(),
            up_to_date
        );

        for job in self.failed() {
            if let JobOutcome::Failed(e) = &job.outcome {
                let _ = writeln!(out, "  {} {}: {}", "failed".red(), job.label(), e);
            }
        }
        for job in self.skipped() {
            if let JobOutcome::Skipped { failed_dependency } = job.outcome {
                let _ = writeln!(
                    out,
                    "  {} {} (dependency {} failed)",
                    "skipped".yellow(),
                    job.label(),
                    failed_dependency
                );
            }
        }

        let _ = writeln!(out, "Total execution time: {:.2?}", self.elapsed);
        out
    }
}
