//! Job Graph
//!
//! Jobs are concrete instantiations of rules; edges point from a job to the
//! jobs producing its inputs.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;

use log::debug;

use super::pattern::Wildcards;
use super::rule::Action;
use crate::error::{BuildError, Result};

/// Dense identifier of a job within one [`Dag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub usize);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One rule bound to one set of wildcards.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub rule: String,
    pub wildcards: Wildcards,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub dependencies: BTreeSet<JobId>,
    pub threads: usize,
    pub action: Action,
    pub code_hash: String,
}

impl Job {
    /// Short human label, e.g. `sort[sample=a]`.
    pub fn label(&self) -> String {
        if self.wildcards.is_empty() {
            self.rule.clone()
        } else {
            format!("{}[{}]", self.rule, self.wildcards)
        }
    }

    /// The path used to name this job in errors: its first output, or the rule.
    pub fn target(&self) -> &str {
        self.outputs.first().map(String::as_str).unwrap_or(&self.rule)
    }
}

/// The resolved dependency graph for a set of requested targets.
#[derive(Debug, Clone, Default)]
pub struct Dag {
    jobs: Vec<Job>,
    producers: HashMap<String, JobId>,
    sources: BTreeSet<String>,
    targets: Vec<(String, Option<JobId>)>,
}

impl Dag {
    pub(crate) fn from_parts(
        jobs: Vec<Job>,
        producers: HashMap<String, JobId>,
        sources: BTreeSet<String>,
        targets: Vec<(String, Option<JobId>)>,
    ) -> Self {
        Self {
            jobs,
            producers,
            sources,
            targets,
        }
    }

    pub fn job(&self, id: JobId) -> &Job {
        &self.jobs[id.0]
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// The job producing `path`, if any.
    pub fn producer_of(&self, path: &str) -> Option<JobId> {
        self.producers.get(path).copied()
    }

    /// Existing files reached during resolution that no rule produces.
    pub fn sources(&self) -> &BTreeSet<String> {
        &self.sources
    }

    /// Requested targets with the job producing each (`None` for sources).
    pub fn targets(&self) -> &[(String, Option<JobId>)] {
        &self.targets
    }

    /// Jobs that directly depend on `id`.
    pub fn dependents(&self, id: JobId) -> Vec<JobId> {
        self.jobs
            .iter()
            .filter(|job| job.dependencies.contains(&id))
            .map(|job| job.id)
            .collect()
    }

    /// Orders jobs so that dependencies come before dependents (Kahn).
    ///
    /// Fails with `CyclicDependency` if some jobs can never become ready.
    pub fn topological_order(&self) -> Result<Vec<JobId>> {
        let mut in_degree: Vec<usize> = self.jobs.iter().map(|j| j.dependencies.len()).collect();
        let mut dependents: Vec<Vec<JobId>> = vec![Vec::new(); self.jobs.len()];
        for job in &self.jobs {
            for dep in &job.dependencies {
                dependents[dep.0].push(job.id);
            }
        }

        let mut queue: VecDeque<JobId> = self
            .jobs
            .iter()
            .filter(|j| j.dependencies.is_empty())
            .map(|j| j.id)
            .collect();

        let mut order = Vec::with_capacity(self.jobs.len());
        while let Some(current) = queue.pop_front() {
            order.push(current);
            for &next in &dependents[current.0] {
                in_degree[next.0] -= 1;
                if in_degree[next.0] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if order.len() != self.jobs.len() {
            let stuck: Vec<String> = self
                .jobs
                .iter()
                .filter(|j| in_degree[j.id.0] > 0)
                .map(|j| j.target().to_string())
                .collect();
            let first = self
                .jobs
                .iter()
                .find(|j| in_degree[j.id.0] > 0)
                .map(|j| (j.target().to_string(), j.rule.clone()))
                .unwrap_or_default();
            return Err(BuildError::CyclicDependency {
                target: first.0,
                rule: first.1,
                chain: stuck,
            });
        }

        debug!(
            "Topological order: {:?}",
            order.iter().map(|id| self.job(*id).label()).collect::<Vec<_>>()
        );
        Ok(order)
    }

    /// `roots` plus every job that transitively depends on one of them.
    pub fn downstream_of(&self, roots: &[JobId]) -> BTreeSet<JobId> {
        let mut seen: BTreeSet<JobId> = roots.iter().copied().collect();
        let mut queue: VecDeque<JobId> = roots.iter().copied().collect();
        while let Some(current) = queue.pop_front() {
            for next in self.dependents(current) {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds a job for graph tests; outputs are `<name>.out`.
    pub(crate) fn job(id: usize, name: &str, deps: &[usize]) -> Job {
        Job {
            id: JobId(id),
            rule: name.to_string(),
            wildcards: Wildcards::new(),
            inputs: Vec::new(),
            outputs: vec![format!("{}.out", name)],
            dependencies: deps.iter().map(|&d| JobId(d)).collect(),
            threads: 1,
            action: Action::Noop,
            code_hash: Action::Noop.code_hash(),
        }
    }

    pub(crate) fn dag_of(jobs: Vec<Job>) -> Dag {
        let producers = jobs
            .iter()
            .flat_map(|j| j.outputs.iter().map(move |o| (o.clone(), j.id)))
            .collect();
        Dag::from_parts(jobs, producers, BTreeSet::new(), Vec::new())
    }

    #[test]
    fn test_topological_order_respects_edges() {
        // d depends on b and c, both depend on a
        let dag = dag_of(vec![
            job(0, "a", &[]),
            job(1, "b", &[0]),
            job(2, "c", &[0]),
            job(3, "d", &[1, 2]),
        ]);
        let order = dag.topological_order().unwrap();
        let pos = |id: usize| order.iter().position(|j| j.0 == id).unwrap();
        assert_eq!(order.len(), 4);
        assert!(pos(0) < pos(1));
        assert!(pos(0) < pos(2));
        assert!(pos(1) < pos(3));
        assert!(pos(2) < pos(3));
    }

    #[test]
    fn test_topological_order_detects_cycle() {
        let dag = dag_of(vec![job(0, "a", &[1]), job(1, "b", &[0]), job(2, "c", &[])]);
        let err = dag.topological_order().unwrap_err();
        match err {
            BuildError::CyclicDependency { chain, .. } => {
                assert_eq!(chain, vec!["a.out", "b.out"]);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_dependents_and_downstream() {
        let dag = dag_of(vec![
            job(0, "x", &[]),
            job(1, "y", &[0]),
            job(2, "z", &[]),
            job(3, "w", &[1]),
        ]);
        assert_eq!(dag.dependents(JobId(0)), vec![JobId(1)]);
        let down = dag.downstream_of(&[JobId(0)]);
        assert_eq!(down.into_iter().collect::<Vec<_>>(), vec![JobId(0), JobId(1), JobId(3)]);
        assert_eq!(dag.producer_of("z.out"), Some(JobId(2)));
    }

    #[test]
    fn test_job_label_and_target() {
        let mut j = job(0, "sort", &[]);
        assert_eq!(j.label(), "sort");
        j.wildcards = [("sample", "a")].into_iter().collect();
        assert_eq!(j.label(), "sort[sample=a]");
        assert_eq!(j.target(), "sort.out");
        j.outputs.clear();
        assert_eq!(j.target(), "sort");
    }
}
