//! Rule Declarations
//!
//! A rule describes how to produce output files from input files. Outputs
//! are wildcard patterns, inputs are templates or functions of the wildcard
//! bindings, and the action is either a shell template or a Rust callable.
//!
//! # Example
//!
//! ```
//! use rulerunner::workflow::Rule;
//!
//! let rule = Rule::new("sort")
//!     .output("sorted/{sample}.txt")
//!     .input("raw/{sample}.txt")
//!     .shell("sort {input} > {output}")
//!     .threads(2);
//! assert_eq!(rule.name(), "sort");
//! ```

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use super::pattern::Wildcards;

/// What an input function may return: one path or an ordered list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputValue {
    Single(String),
    Many(Vec<String>),
}

impl InputValue {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::Single(path) => vec![path],
            Self::Many(paths) => paths,
        }
    }
}

impl From<String> for InputValue {
    fn from(path: String) -> Self {
        Self::Single(path)
    }
}

impl From<&str> for InputValue {
    fn from(path: &str) -> Self {
        Self::Single(path.to_string())
    }
}

impl From<Vec<String>> for InputValue {
    fn from(paths: Vec<String>) -> Self {
        Self::Many(paths)
    }
}

impl From<Vec<&str>> for InputValue {
    fn from(paths: Vec<&str>) -> Self {
        Self::Many(paths.into_iter().map(str::to_string).collect())
    }
}

/// Function computing inputs from a wildcard binding.
pub type InputFn = Arc<dyn Fn(&Wildcards) -> InputValue + Send + Sync>;

/// One entry of a rule's input specification.
#[derive(Clone)]
pub enum InputSpec {
    /// Templates rendered with the job's wildcards.
    Literal(Vec<String>),
    /// Inputs computed by a function of the wildcards.
    Computed(InputFn),
}

impl fmt::Debug for InputSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(templates) => f.debug_tuple("Literal").field(templates).finish(),
            Self::Computed(_) => f.write_str("Computed(<fn>)"),
        }
    }
}

/// Everything a `run` action gets to see about its job.
#[derive(Debug, Clone, Copy)]
pub struct JobContext<'a> {
    pub rule: &'a str,
    pub wildcards: &'a Wildcards,
    pub inputs: &'a [String],
    pub outputs: &'a [String],
    pub threads: usize,
    pub working_dir: &'a Path,
}

/// Callable action. An `Err` message marks the job as failed.
pub type ActionFn = Arc<dyn Fn(&JobContext<'_>) -> Result<(), String> + Send + Sync>;

/// How a job produces its outputs.
#[derive(Clone)]
pub enum Action {
    /// Shell command template, run with bash in strict mode.
    Shell(String),
    /// Rust callable. `version` stands in for its source when fingerprinting.
    Run { version: String, func: ActionFn },
    /// Nothing to run; used by target rules that only aggregate inputs.
    Noop,
}

impl Action {
    /// Text identifying the action's definition.
    pub fn definition(&self) -> String {
        match self {
            Self::Shell(template) => format!("shell:{}", template),
            Self::Run { version, .. } => format!("run:{}", version),
            Self::Noop => "noop".to_string(),
        }
    }

    /// SHA-256 of the definition, hex encoded.
    pub fn code_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.definition().as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell(template) => f.debug_tuple("Shell").field(template).finish(),
            Self::Run { version, .. } => f.debug_struct("Run").field("version", version).finish(),
            Self::Noop => f.write_str("Noop"),
        }
    }
}

/// A named template producing outputs from inputs.
#[derive(Debug, Clone)]
pub struct Rule {
    name: String,
    outputs: Vec<String>,
    inputs: Vec<InputSpec>,
    action: Action,
    threads: usize,
}

impl Rule {
    /// Creates a rule with no outputs, no inputs and no action.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            outputs: Vec::new(),
            inputs: Vec::new(),
            action: Action::Noop,
            threads: 1,
        }
    }

    /// Adds an output pattern.
    pub fn output(mut self, pattern: impl Into<String>) -> Self {
        self.outputs.push(pattern.into());
        self
    }

    /// Adds a literal input template.
    pub fn input(mut self, template: impl Into<String>) -> Self {
        self.inputs.push(InputSpec::Literal(vec![template.into()]));
        self
    }

    /// Adds several literal input templates.
    pub fn inputs<I, S>(mut self, templates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.push(InputSpec::Literal(
            templates.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Adds inputs computed from the wildcards.
    ///
    /// ```
    /// use rulerunner::workflow::Rule;
    ///
    /// let rule = Rule::new("merge")
    ///     .output("merged/{group}.txt")
    ///     .input_fn(|wc| {
    ///         let group = wc.get("group").unwrap_or_default();
    ///         vec![format!("parts/{}_1.txt", group), format!("parts/{}_2.txt", group)]
    ///     })
    ///     .shell("cat {input} > {output}");
    /// assert_eq!(rule.input_specs().len(), 1);
    /// ```
    pub fn input_fn<F, R>(mut self, func: F) -> Self
    where
        F: Fn(&Wildcards) -> R + Send + Sync + 'static,
        R: Into<InputValue>,
    {
        self.inputs
            .push(InputSpec::Computed(Arc::new(move |wc| func(wc).into())));
        self
    }

    /// Sets a shell command template as the action.
    pub fn shell(mut self, template: impl Into<String>) -> Self {
        self.action = Action::Shell(template.into());
        self
    }

    /// Sets a callable as the action.
    ///
    /// Bump `version` whenever the callable's behavior changes so existing
    /// outputs are rebuilt.
    pub fn run<F>(mut self, version: impl Into<String>, func: F) -> Self
    where
        F: Fn(&JobContext<'_>) -> Result<(), String> + Send + Sync + 'static,
    {
        self.action = Action::Run {
            version: version.into(),
            func: Arc::new(func),
        };
        self
    }

    /// Sets the number of threads (cores) a job of this rule occupies.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output_patterns(&self) -> &[String] {
        &self.outputs
    }

    pub fn input_specs(&self) -> &[InputSpec] {
        &self.inputs
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn thread_count(&self) -> usize {
        self.threads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_builder() {
        let rule = Rule::new("  align ")
            .output("{s}.bam")
            .output("{s}.bai")
            .input("{s}.fastq")
            .inputs(["ref.fa", "ref.fa.fai"])
            .shell("bwa mem {input} > {output[0]}")
            .threads(0);

        assert_eq!(rule.name(), "align");
        assert_eq!(rule.output_patterns(), &["{s}.bam", "{s}.bai"]);
        assert_eq!(rule.input_specs().len(), 2);
        assert_eq!(rule.thread_count(), 1);
        assert!(matches!(rule.action(), Action::Shell(_)));
    }

    #[test]
    fn test_input_fn_single_and_many() {
        let single = Rule::new("a").input_fn(|wc| format!("{}.txt", wc.get("x").unwrap_or("?")));
        let many = Rule::new("b").input_fn(|_| vec!["1.txt", "2.txt"]);

        let wc: Wildcards = [("x", "v")].into_iter().collect();
        match &single.input_specs()[0] {
            InputSpec::Computed(f) => assert_eq!(f(&wc), InputValue::Single("v.txt".into())),
            other => panic!("unexpected spec {:?}", other),
        }
        match &many.input_specs()[0] {
            InputSpec::Computed(f) => assert_eq!(f(&wc).into_vec(), vec!["1.txt", "2.txt"]),
            other => panic!("unexpected spec {:?}", other),
        }
    }

    #[test]
    fn test_code_hash_tracks_definition() {
        let a = Action::Shell("cat {input} > {output}".into());
        let b = Action::Shell("cp {input} {output}".into());
        assert_eq!(a.code_hash(), a.clone().code_hash());
        assert_ne!(a.code_hash(), b.code_hash());
        assert_eq!(a.code_hash().len(), 64);
    }

    #[test]
    fn test_run_version_changes_hash() {
        let v1 = Rule::new("r").run("1", |_| Ok(()));
        let v2 = Rule::new("r").run("2", |_| Ok(()));
        assert_ne!(v1.action().code_hash(), v2.action().code_hash());
    }

    #[test]
    fn test_default_action_is_noop() {
        let rule = Rule::new("all").input("a.txt");
        assert!(matches!(rule.action(), Action::Noop));
        assert!(rule.output_patterns().is_empty());
    }
}
