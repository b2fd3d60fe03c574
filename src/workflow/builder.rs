//! Dependency Graph Builder
//!
//! Resolves requested targets into a [`Dag`]:
//! 1. Find the unique rule producing the target and bind its wildcards
//! 2. Resolve the rule's inputs (templates or functions of the wildcards)
//! 3. Resolve every input as a nested target, adding an edge per job
//!
//! Inputs with no producing rule must exist on disk as source files.
//! Cycles are detected on the resolution stack before any job is created.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use log::{debug, info};

use super::dag::{Dag, Job, JobId};
use super::pattern::{has_wildcards, Pattern, Wildcards};
use super::registry::{CompiledRule, Registry, RuleMatch};
use super::rule::InputSpec;
use crate::error::{BuildError, Result};

/// Maximum nesting of target resolution.
///
/// Rules like `{n}.a <- {n}.a.a` would otherwise generate targets forever.
pub const MAX_RESOLUTION_DEPTH: usize = 128;

type JobKey = (String, Wildcards);

#[derive(Debug)]
struct Frame {
    target: String,
    rule: String,
    key: JobKey,
}

/// State saved before trying a rule, restored when the target falls back
/// to being a source file.
struct Checkpoint {
    jobs: usize,
    sources: BTreeSet<String>,
}

/// Builds the job graph for a set of targets.
pub struct DagBuilder<'r> {
    registry: &'r Registry,
    working_dir: PathBuf,
    jobs: Vec<Job>,
    index: HashMap<JobKey, JobId>,
    producers: HashMap<String, JobId>,
    sources: BTreeSet<String>,
    stack: Vec<Frame>,
}

impl<'r> DagBuilder<'r> {
    /// Creates a builder resolving file existence relative to `working_dir`.
    pub fn new(registry: &'r Registry, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            working_dir: working_dir.into(),
            jobs: Vec::new(),
            index: HashMap::new(),
            producers: HashMap::new(),
            sources: BTreeSet::new(),
            stack: Vec::new(),
        }
    }

    /// Resolves every target, returning the complete graph.
    ///
    /// Any resolution error aborts the whole build.
    pub fn build<S: AsRef<str>>(mut self, targets: &[S]) -> Result<Dag> {
        let mut requested = Vec::with_capacity(targets.len());
        for target in targets {
            let target = normalize_path(target.as_ref());
            let job = self.resolve_target(&target, None)?;
            requested.push((target, job));
        }

        info!(
            "Resolved {} jobs for {} targets ({} source files)",
            self.jobs.len(),
            requested.len(),
            self.sources.len()
        );

        Ok(Dag::from_parts(
            self.jobs,
            self.producers,
            self.sources,
            requested,
        ))
    }

    fn exists(&self, path: &str) -> bool {
        resolve_in(&self.working_dir, path).exists()
    }

    fn resolve_target(&mut self, target: &str, required_by: Option<&str>) -> Result<Option<JobId>> {
        if let Some(&id) = self.producers.get(target) {
            return Ok(Some(id));
        }
        if self.sources.contains(target) {
            return Ok(None);
        }
        if let Some(pos) = self.stack.iter().position(|f| f.target == target) {
            return Err(self.cycle_error(pos, target));
        }

        let registry = self.registry;
        let mut candidates = registry.candidates(target);
        if candidates.len() > 1 {
            return Err(BuildError::AmbiguousRule {
                target: target.to_string(),
                rules: candidates
                    .iter()
                    .map(|c| c.rule.name().to_string())
                    .collect(),
            });
        }

        let Some(candidate) = candidates.pop() else {
            if required_by.is_none() {
                if let Some(rule) = registry.get(target).filter(|r| r.is_target_rule()) {
                    let matched = RuleMatch {
                        rule,
                        wildcards: Wildcards::new(),
                    };
                    return self.resolve_job(matched, target).map(Some);
                }
            }
            if self.exists(target) {
                debug!("'{}' is a source file", target);
                self.sources.insert(target.to_string());
                return Ok(None);
            }
            return Err(BuildError::NoRuleFound {
                target: target.to_string(),
                required_by: required_by.map(str::to_string),
            });
        };

        let checkpoint = self.checkpoint();
        match self.resolve_job(candidate, target) {
            Ok(id) => Ok(Some(id)),
            Err(e) if e.is_missing_input() && self.exists(target) => {
                debug!(
                    "'{}' exists and its rule cannot be satisfied ({}); using it as a source file",
                    target, e
                );
                self.restore(checkpoint);
                self.sources.insert(target.to_string());
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn resolve_job(&mut self, matched: RuleMatch<'r>, target: &str) -> Result<JobId> {
        let RuleMatch { rule, wildcards } = matched;
        let key: JobKey = (rule.name().to_string(), wildcards.clone());

        if let Some(&id) = self.index.get(&key) {
            return Ok(id);
        }
        if let Some(pos) = self.stack.iter().position(|f| f.key == key) {
            return Err(self.cycle_error(pos, target));
        }
        if self.stack.len() >= MAX_RESOLUTION_DEPTH {
            return Err(BuildError::ResolutionDepthExceeded {
                target: target.to_string(),
                rule: rule.name().to_string(),
                limit: MAX_RESOLUTION_DEPTH,
            });
        }

        self.stack.push(Frame {
            target: target.to_string(),
            rule: rule.name().to_string(),
            key: key.clone(),
        });
        let resolved = self.instantiate(rule, &wildcards, target);
        self.stack.pop();
        let (inputs, outputs, dependencies) = resolved?;

        let id = JobId(self.jobs.len());
        debug!(
            "Job {} {}: {} inputs, {} dependencies -> {:?}",
            id,
            rule.name(),
            inputs.len(),
            dependencies.len(),
            outputs
        );
        for output in &outputs {
            self.producers.insert(output.clone(), id);
        }
        self.index.insert(key, id);
        self.jobs.push(Job {
            id,
            rule: rule.name().to_string(),
            wildcards,
            inputs,
            outputs,
            dependencies,
            threads: rule.rule().thread_count(),
            action: rule.rule().action().clone(),
            code_hash: rule.code_hash().to_string(),
        });
        Ok(id)
    }

    #[allow(clippy::type_complexity)]
    fn instantiate(
        &mut self,
        rule: &'r CompiledRule,
        wildcards: &Wildcards,
        target: &str,
    ) -> Result<(Vec<String>, Vec<String>, BTreeSet<JobId>)> {
        let inputs = resolve_inputs(rule, wildcards, target)?;

        let mut dependencies = BTreeSet::new();
        for input in &inputs {
            if let Some(dep) = self.resolve_target(input, Some(rule.name()))? {
                dependencies.insert(dep);
            }
        }

        let outputs = rule
            .outputs()
            .iter()
            .map(|pattern| {
                pattern
                    .render(wildcards)
                    .map(|path| normalize_path(&path))
                    .map_err(|name| BuildError::InvalidRule {
                        rule: rule.name().to_string(),
                        message: format!("output '{}' needs wildcard '{}'", pattern, name),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok((inputs, outputs, dependencies))
    }

    fn cycle_error(&self, pos: usize, target: &str) -> BuildError {
        let mut chain: Vec<String> = self.stack[pos..].iter().map(|f| f.target.clone()).collect();
        chain.push(target.to_string());
        let rule = self
            .stack
            .last()
            .map(|f| f.rule.clone())
            .unwrap_or_default();
        BuildError::CyclicDependency {
            target: target.to_string(),
            rule,
            chain,
        }
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            jobs: self.jobs.len(),
            sources: self.sources.clone(),
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        let keep = checkpoint.jobs;
        self.jobs.truncate(keep);
        self.index.retain(|_, id| id.0 < keep);
        self.producers.retain(|_, id| id.0 < keep);
        self.sources = checkpoint.sources;
    }
}

/// Resolves a rule's input specification into concrete paths.
fn resolve_inputs(rule: &CompiledRule, wildcards: &Wildcards, target: &str) -> Result<Vec<String>> {
    let mut resolved: Vec<String> = Vec::new();

    for spec in rule.rule().input_specs() {
        let templates = match spec {
            InputSpec::Literal(templates) => templates.clone(),
            InputSpec::Computed(func) => func(wildcards).into_vec(),
        };

        for template in templates {
            let path = if has_wildcards(&template) {
                Pattern::parse(&template)?
                    .render(wildcards)
                    .map_err(|wildcard| BuildError::WildcardMismatch {
                        rule: rule.name().to_string(),
                        target: target.to_string(),
                        template: template.clone(),
                        wildcard,
                    })?
            } else {
                template
            };

            let path = normalize_path(&path);
            if !path.is_empty() && !resolved.contains(&path) {
                resolved.push(path);
            }
        }
    }

    Ok(resolved)
}

/// Trims whitespace and leading `./` components.
pub(crate) fn normalize_path(path: &str) -> String {
    let mut path = path.trim();
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    path.to_string()
}

/// Joins a relative path onto the working directory; absolute paths pass through.
pub(crate) fn resolve_in(working_dir: &Path, path: &str) -> PathBuf {
    working_dir.join(path)
}
