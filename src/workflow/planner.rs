//! Execution Planner
//!
//! Scheduling bookkeeping for the jobs of a [`Plan`]:
//! - Remaining dependency counts and the ready queue
//! - Thread allocation against the core budget
//! - Job status tracking, including skips after failures
//!
//! The planner is owned by the coordinating thread; workers never touch it.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use log::{debug, info};

use super::dag::{Dag, JobId};
use super::staleness::Plan;

/// Status of a job during execution.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    /// Waiting for dependencies or threads
    Pending,
    /// Currently executing
    Running,
    /// Finished successfully
    Completed,
    /// Failed with error message
    Failed(String),
    /// Not started because a job it depends on failed
    Skipped { failed_dependency: JobId },
    /// Not started because the build stopped after a failure
    Cancelled,
}

impl JobStatus {
    /// True once the job will not change status again.
    pub fn is_finished(&self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

/// Manages the scheduling state of one build.
pub struct ExecutionPlanner {
    /// Clamped thread count per planned job
    threads: HashMap<JobId, usize>,
    /// Planned dependencies not yet completed
    remaining: HashMap<JobId, usize>,
    /// Planned dependents of each planned job
    dependents: HashMap<JobId, Vec<JobId>>,
    /// Jobs whose dependencies are all complete, in plan order
    ready: VecDeque<JobId>,
    running: HashSet<JobId>,
    status: BTreeMap<JobId, JobStatus>,
    /// Current total threads in use
    current_threads_used: usize,
    max_threads: usize,
}

impl ExecutionPlanner {
    /// Creates a planner for the needed jobs of `plan`.
    ///
    /// Jobs that are up to date are not scheduled. Thread requests are
    /// clamped to `[1, cores]`.
    pub fn new(dag: &Dag, plan: &Plan, cores: usize) -> Self {
        let max_threads = cores.max(1);
        info!(
            "Creating planner: {} jobs, {} threads available",
            plan.len(),
            max_threads
        );

        let mut threads = HashMap::new();
        let mut remaining = HashMap::new();
        let mut dependents: HashMap<JobId, Vec<JobId>> = HashMap::new();
        let mut ready = VecDeque::new();
        let mut status = BTreeMap::new();

        for id in plan.jobs() {
            let job = dag.job(id);
            let requested = job.threads.clamp(1, max_threads);
            if requested != job.threads {
                debug!(
                    "{} requests {} threads, using {}",
                    job.label(),
                    job.threads,
                    requested
                );
            }
            threads.insert(id, requested);

            let planned_deps: Vec<JobId> = job
                .dependencies
                .iter()
                .copied()
                .filter(|dep| plan.is_needed(*dep))
                .collect();
            for dep in &planned_deps {
                dependents.entry(*dep).or_default().push(id);
            }
            if planned_deps.is_empty() {
                ready.push_back(id);
            }
            remaining.insert(id, planned_deps.len());
            status.insert(id, JobStatus::Pending);
        }

        Self {
            threads,
            remaining,
            dependents,
            ready,
            running: HashSet::new(),
            status,
            current_threads_used: 0,
            max_threads,
        }
    }

    /// Returns ready jobs that fit into the free threads, in plan order.
    ///
    /// A job that does not fit is passed over so smaller jobs behind it can
    /// still start.
    pub fn get_ready_jobs(&self) -> Vec<JobId> {
        let mut selected = Vec::new();
        let mut threads_to_allocate = 0;

        for &id in &self.ready {
            let job_threads = self.threads_of(id);
            if self.current_threads_used + threads_to_allocate + job_threads > self.max_threads {
                debug!(
                    "Job {} needs {} threads but only {} available",
                    id,
                    job_threads,
                    self.max_threads - self.current_threads_used - threads_to_allocate
                );
                continue;
            }
            selected.push(id);
            threads_to_allocate += job_threads;
        }

        selected
    }

    /// Marks a job as dispatched.
    pub fn mark_running(&mut self, id: JobId) {
        self.ready.retain(|&r| r != id);
        self.running.insert(id);
        self.current_threads_used += self.threads_of(id);
        self.status.insert(id, JobStatus::Running);
        debug!(
            "Job {} started (threads in use: {}/{})",
            id, self.current_threads_used, self.max_threads
        );
    }

    /// Marks a job as completed and releases dependents whose last planned
    /// dependency it was.
    pub fn mark_completed(&mut self, id: JobId) {
        self.release(id);
        self.status.insert(id, JobStatus::Completed);

        for next in self.dependents.get(&id).cloned().unwrap_or_default() {
            if let Some(count) = self.remaining.get_mut(&next) {
                *count = count.saturating_sub(1);
                if *count == 0 && self.status.get(&next) == Some(&JobStatus::Pending) {
                    self.ready.push_back(next);
                }
            }
        }
    }

    /// Marks a job as failed and skips everything downstream of it.
    ///
    /// Returns the newly skipped jobs.
    pub fn mark_failed(&mut self, id: JobId, error: String) -> Vec<JobId> {
        self.release(id);
        self.status.insert(id, JobStatus::Failed(error));

        let mut skipped = Vec::new();
        let mut queue: VecDeque<JobId> = self.dependents.get(&id).cloned().unwrap_or_default().into();
        while let Some(next) = queue.pop_front() {
            if self.status.get(&next) != Some(&JobStatus::Pending) {
                continue;
            }
            self.status.insert(next, JobStatus::Skipped { failed_dependency: id });
            self.ready.retain(|&r| r != next);
            skipped.push(next);
            queue.extend(self.dependents.get(&next).cloned().unwrap_or_default());
        }

        if !skipped.is_empty() {
            info!("Skipping {} jobs downstream of failed job {}", skipped.len(), id);
        }
        skipped
    }

    /// Cancels every job that has not started. Returns the cancelled jobs.
    pub fn halt(&mut self) -> Vec<JobId> {
        let cancelled: Vec<JobId> = self
            .status
            .iter()
            .filter(|(_, s)| **s == JobStatus::Pending)
            .map(|(id, _)| *id)
            .collect();
        for id in &cancelled {
            self.status.insert(*id, JobStatus::Cancelled);
        }
        self.ready.clear();
        cancelled
    }

    fn release(&mut self, id: JobId) {
        if self.running.remove(&id) {
            self.current_threads_used = self.current_threads_used.saturating_sub(self.threads_of(id));
        }
    }

    fn threads_of(&self, id: JobId) -> usize {
        self.threads.get(&id).copied().unwrap_or(1)
    }

    pub fn has_running(&self) -> bool {
        !self.running.is_empty()
    }

    /// True while some job is pending or running.
    pub fn has_work_remaining(&self) -> bool {
        self.status.values().any(|s| !s.is_finished())
    }

    /// Returns the current progress as (finished, total).
    pub fn progress(&self) -> (usize, usize) {
        let finished = self.status.values().filter(|s| s.is_finished()).count();
        (finished, self.status.len())
    }

    pub fn threads_in_use(&self) -> usize {
        self.current_threads_used
    }

    pub fn status_of(&self, id: JobId) -> Option<&JobStatus> {
        self.status.get(&id)
    }

    /// Status of every planned job.
    pub fn statuses(&self) -> &BTreeMap<JobId, JobStatus> {
        &self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::dag::tests::{dag_of, job};
    use crate::workflow::state::FingerprintStore;
    use crate::workflow::staleness::StalenessOracle;
    use tempfile::tempdir;

    /// Plans every job of `dag` (nothing exists on disk).
    fn plan_all(dag: &Dag) -> Plan {
        let dir = tempdir().unwrap();
        let store = FingerprintStore::new(dir.path());
        StalenessOracle::new(dir.path(), &store).evaluate(dag).unwrap()
    }

    fn chain() -> Dag {
        dag_of(vec![job(0, "a", &[]), job(1, "b", &[0])])
    }

    #[test]
    fn test_planner_creation() {
        let dag = chain();
        let planner = ExecutionPlanner::new(&dag, &plan_all(&dag), 4);
        assert_eq!(planner.progress(), (0, 2));
        assert!(planner.has_work_remaining());
        assert!(!planner.has_running());
    }

    #[test]
    fn test_planner_ready_after_dependency_completes() {
        let dag = chain();
        let mut planner = ExecutionPlanner::new(&dag, &plan_all(&dag), 4);

        assert_eq!(planner.get_ready_jobs(), vec![JobId(0)]);

        planner.mark_running(JobId(0));
        assert!(planner.get_ready_jobs().is_empty());
        assert_eq!(planner.status_of(JobId(0)), Some(&JobStatus::Running));

        planner.mark_completed(JobId(0));
        assert_eq!(planner.get_ready_jobs(), vec![JobId(1)]);
        assert_eq!(planner.progress(), (1, 2));

        planner.mark_running(JobId(1));
        planner.mark_completed(JobId(1));
        assert!(!planner.has_work_remaining());
        assert_eq!(planner.progress(), (2, 2));
    }

    #[test]
    fn test_planner_skips_up_to_date_dependencies() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.out"), "").unwrap();
        let dag = chain();
        let store = FingerprintStore::new(dir.path());
        let plan = StalenessOracle::new(dir.path(), &store)
            .force_jobs([JobId(1)])
            .evaluate(&dag)
            .unwrap();

        let planner = ExecutionPlanner::new(&dag, &plan, 2);
        assert_eq!(planner.progress(), (0, 1));
        assert_eq!(planner.get_ready_jobs(), vec![JobId(1)]);
    }

    #[test]
    fn test_planner_thread_budget() {
        let mut heavy = job(0, "heavy", &[]);
        heavy.threads = 3;
        let dag = dag_of(vec![heavy, job(1, "a", &[]), job(2, "b", &[])]);
        let mut planner = ExecutionPlanner::new(&dag, &plan_all(&dag), 4);

        // heavy (3) + a (1) fill the budget, b waits
        let ready = planner.get_ready_jobs();
        assert_eq!(ready, vec![JobId(0), JobId(1)]);
        for id in ready {
            planner.mark_running(id);
        }
        assert_eq!(planner.threads_in_use(), 4);
        assert!(planner.get_ready_jobs().is_empty());

        planner.mark_completed(JobId(1));
        assert_eq!(planner.get_ready_jobs(), vec![JobId(2)]);
    }

    #[test]
    fn test_planner_clamps_thread_requests() {
        let mut greedy = job(0, "greedy", &[]);
        greedy.threads = 64;
        let dag = dag_of(vec![greedy]);
        let mut planner = ExecutionPlanner::new(&dag, &plan_all(&dag), 2);

        assert_eq!(planner.get_ready_jobs(), vec![JobId(0)]);
        planner.mark_running(JobId(0));
        assert_eq!(planner.threads_in_use(), 2);
    }

    #[test]
    fn test_planner_failure_skips_downstream_only() {
        // x <- y <- w, z independent
        let dag = dag_of(vec![
            job(0, "x", &[]),
            job(1, "y", &[0]),
            job(2, "z", &[]),
            job(3, "w", &[1]),
        ]);
        let mut planner = ExecutionPlanner::new(&dag, &plan_all(&dag), 4);
        planner.mark_running(JobId(0));
        planner.mark_running(JobId(2));

        let skipped = planner.mark_failed(JobId(0), "boom".to_string());
        assert_eq!(skipped, vec![JobId(1), JobId(3)]);
        assert_eq!(
            planner.status_of(JobId(3)),
            Some(&JobStatus::Skipped {
                failed_dependency: JobId(0)
            })
        );
        match planner.status_of(JobId(0)) {
            Some(JobStatus::Failed(msg)) => assert_eq!(msg, "boom"),
            other => panic!("Expected Failed status, got {:?}", other),
        }

        assert!(planner.has_work_remaining());
        planner.mark_completed(JobId(2));
        assert!(!planner.has_work_remaining());
        assert_eq!(planner.threads_in_use(), 0);
    }

    #[test]
    fn test_planner_halt_cancels_pending() {
        let dag = dag_of(vec![job(0, "a", &[]), job(1, "b", &[]), job(2, "c", &[0])]);
        let mut planner = ExecutionPlanner::new(&dag, &plan_all(&dag), 1);
        planner.mark_running(JobId(0));

        let cancelled = planner.halt();
        assert_eq!(cancelled, vec![JobId(1), JobId(2)]);
        assert!(planner.get_ready_jobs().is_empty());
        assert!(planner.has_running());

        planner.mark_completed(JobId(0));
        assert!(!planner.has_work_remaining());
        assert_eq!(planner.status_of(JobId(2)), Some(&JobStatus::Cancelled));
    }
}
